//! In-memory representation of topic map constructs.
//!
//! Constructs live in an arena keyed by [ConstructId] (see [crate::topicmap::cache]). Every
//! cross-reference, including the cyclic ones (topic and the roles it plays, association and its
//! roles, name and its variants, reifier and reified) is stored as an id and resolved through the
//! owning topic map.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{
    error::TopicStoreError,
    properties::{ConstructId, ConstructKind, IdentifierKind, Locator, Revision, XSD_STRING},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMapBody {
    pub locator: Locator,
    pub reifier: Option<ConstructId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBody {
    pub subject_identifiers: BTreeSet<Locator>,
    pub subject_locators: BTreeSet<Locator>,
    pub types: BTreeSet<ConstructId>,
    pub names: BTreeSet<ConstructId>,
    pub occurrences: BTreeSet<ConstructId>,
    pub roles_played: BTreeSet<ConstructId>,
    pub reified: Option<ConstructId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationBody {
    pub r#type: ConstructId,
    pub scope: BTreeSet<ConstructId>,
    pub reifier: Option<ConstructId>,
    pub roles: BTreeSet<ConstructId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBody {
    pub r#type: ConstructId,
    pub player: ConstructId,
    pub reifier: Option<ConstructId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameBody {
    pub r#type: ConstructId,
    pub value: String,
    pub scope: BTreeSet<ConstructId>,
    pub reifier: Option<ConstructId>,
    pub variants: BTreeSet<ConstructId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceBody {
    pub r#type: ConstructId,
    pub value: String,
    pub datatype: Locator,
    pub scope: BTreeSet<ConstructId>,
    pub reifier: Option<ConstructId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantBody {
    pub value: String,
    pub datatype: Locator,
    pub scope: BTreeSet<ConstructId>,
    pub reifier: Option<ConstructId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstructBody {
    TopicMap(TopicMapBody),
    Topic(TopicBody),
    Association(AssociationBody),
    Role(RoleBody),
    Name(NameBody),
    Occurrence(OccurrenceBody),
    Variant(VariantBody),
}

impl ConstructBody {
    /// Placeholder body for a construct known only by id and kind. Topic maps are never stubbed.
    pub fn stub(kind: ConstructKind) -> Option<ConstructBody> {
        let nil = ConstructId::nil();
        let body = match kind {
            ConstructKind::TopicMap => return None,
            ConstructKind::Topic => ConstructBody::Topic(TopicBody::default()),
            ConstructKind::Association => ConstructBody::Association(AssociationBody {
                r#type: nil,
                scope: BTreeSet::new(),
                reifier: None,
                roles: BTreeSet::new(),
            }),
            ConstructKind::Role => ConstructBody::Role(RoleBody {
                r#type: nil,
                player: nil,
                reifier: None,
            }),
            ConstructKind::Name => ConstructBody::Name(NameBody {
                r#type: nil,
                value: String::new(),
                scope: BTreeSet::new(),
                reifier: None,
                variants: BTreeSet::new(),
            }),
            ConstructKind::Occurrence => ConstructBody::Occurrence(OccurrenceBody {
                r#type: nil,
                value: String::new(),
                datatype: XSD_STRING.clone(),
                scope: BTreeSet::new(),
                reifier: None,
            }),
            ConstructKind::Variant => ConstructBody::Variant(VariantBody {
                value: String::new(),
                datatype: XSD_STRING.clone(),
                scope: BTreeSet::new(),
                reifier: None,
            }),
        };
        Some(body)
    }

    pub fn kind(&self) -> ConstructKind {
        match self {
            ConstructBody::TopicMap(_) => ConstructKind::TopicMap,
            ConstructBody::Topic(_) => ConstructKind::Topic,
            ConstructBody::Association(_) => ConstructKind::Association,
            ConstructBody::Role(_) => ConstructKind::Role,
            ConstructBody::Name(_) => ConstructKind::Name,
            ConstructBody::Occurrence(_) => ConstructKind::Occurrence,
            ConstructBody::Variant(_) => ConstructKind::Variant,
        }
    }
}

/// A node of the topic map graph.
///
/// `revision` is `None` until the construct was first written to the backing store. `loaded` is
/// shallow: a loaded construct knows the ids of its neighbours, never their state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Construct {
    pub id: ConstructId,
    pub revision: Option<Revision>,
    pub topicmap: ConstructId,
    pub parent: Option<ConstructId>,
    pub item_identifiers: BTreeSet<Locator>,
    pub loaded: bool,
    pub body: ConstructBody,
}

impl Construct {
    pub fn new(
        id: ConstructId,
        topicmap: ConstructId,
        parent: Option<ConstructId>,
        body: ConstructBody,
    ) -> Self {
        Construct {
            id,
            revision: None,
            topicmap,
            parent,
            item_identifiers: BTreeSet::new(),
            loaded: true,
            body,
        }
    }

    /// An unloaded placeholder for a neighbour whose kind is implied by the field referencing it.
    pub fn stub(id: ConstructId, topicmap: ConstructId, kind: ConstructKind) -> Option<Self> {
        Some(Construct {
            id,
            revision: None,
            topicmap,
            parent: None,
            item_identifiers: BTreeSet::new(),
            loaded: false,
            body: ConstructBody::stub(kind)?,
        })
    }

    /// Neighbours whose kind follows from the referencing field.
    pub fn typed_neighbours(&self) -> Vec<(ConstructId, ConstructKind)> {
        let mut out: Vec<(ConstructId, ConstructKind)> = Vec::new();
        out.extend(self.reifier().map(|r| (r, ConstructKind::Topic)));
        out.extend(self.r#type().map(|t| (t, ConstructKind::Topic)));
        if let Some(scope) = self.scope() {
            out.extend(scope.iter().map(|t| (*t, ConstructKind::Topic)));
        }
        match &self.body {
            ConstructBody::Topic(t) => {
                out.extend(t.types.iter().map(|id| (*id, ConstructKind::Topic)));
                out.extend(t.names.iter().map(|id| (*id, ConstructKind::Name)));
                out.extend(t.occurrences.iter().map(|id| (*id, ConstructKind::Occurrence)));
                out.extend(t.roles_played.iter().map(|id| (*id, ConstructKind::Role)));
            }
            ConstructBody::Association(a) => {
                out.extend(a.roles.iter().map(|id| (*id, ConstructKind::Role)));
            }
            ConstructBody::Role(r) => out.push((r.player, ConstructKind::Topic)),
            ConstructBody::Name(n) => {
                out.extend(n.variants.iter().map(|id| (*id, ConstructKind::Variant)));
            }
            _ => {}
        }
        out
    }

    pub fn kind(&self) -> ConstructKind {
        self.body.kind()
    }

    pub fn is_topic(&self) -> bool {
        matches!(self.body, ConstructBody::Topic(_))
    }

    fn wrong_kind(&self, expected: ConstructKind) -> TopicStoreError {
        TopicStoreError::model(format!(
            "{} is a {}, expected a {}",
            self.id,
            self.kind(),
            expected
        ))
    }

    pub fn topic(&self) -> Result<&TopicBody, TopicStoreError> {
        match &self.body {
            ConstructBody::Topic(t) => Ok(t),
            _ => Err(self.wrong_kind(ConstructKind::Topic)),
        }
    }

    pub fn topic_mut(&mut self) -> Result<&mut TopicBody, TopicStoreError> {
        let err = self.wrong_kind(ConstructKind::Topic);
        match &mut self.body {
            ConstructBody::Topic(t) => Ok(t),
            _ => Err(err),
        }
    }

    pub fn association(&self) -> Result<&AssociationBody, TopicStoreError> {
        match &self.body {
            ConstructBody::Association(a) => Ok(a),
            _ => Err(self.wrong_kind(ConstructKind::Association)),
        }
    }

    pub fn association_mut(&mut self) -> Result<&mut AssociationBody, TopicStoreError> {
        let err = self.wrong_kind(ConstructKind::Association);
        match &mut self.body {
            ConstructBody::Association(a) => Ok(a),
            _ => Err(err),
        }
    }

    pub fn role(&self) -> Result<&RoleBody, TopicStoreError> {
        match &self.body {
            ConstructBody::Role(r) => Ok(r),
            _ => Err(self.wrong_kind(ConstructKind::Role)),
        }
    }

    pub fn role_mut(&mut self) -> Result<&mut RoleBody, TopicStoreError> {
        let err = self.wrong_kind(ConstructKind::Role);
        match &mut self.body {
            ConstructBody::Role(r) => Ok(r),
            _ => Err(err),
        }
    }

    pub fn name(&self) -> Result<&NameBody, TopicStoreError> {
        match &self.body {
            ConstructBody::Name(n) => Ok(n),
            _ => Err(self.wrong_kind(ConstructKind::Name)),
        }
    }

    pub fn name_mut(&mut self) -> Result<&mut NameBody, TopicStoreError> {
        let err = self.wrong_kind(ConstructKind::Name);
        match &mut self.body {
            ConstructBody::Name(n) => Ok(n),
            _ => Err(err),
        }
    }

    pub fn variant(&self) -> Result<&VariantBody, TopicStoreError> {
        match &self.body {
            ConstructBody::Variant(v) => Ok(v),
            _ => Err(self.wrong_kind(ConstructKind::Variant)),
        }
    }

    pub fn variant_mut(&mut self) -> Result<&mut VariantBody, TopicStoreError> {
        let err = self.wrong_kind(ConstructKind::Variant);
        match &mut self.body {
            ConstructBody::Variant(v) => Ok(v),
            _ => Err(err),
        }
    }

    pub fn reifier(&self) -> Option<ConstructId> {
        match &self.body {
            ConstructBody::TopicMap(b) => b.reifier,
            ConstructBody::Topic(_) => None,
            ConstructBody::Association(b) => b.reifier,
            ConstructBody::Role(b) => b.reifier,
            ConstructBody::Name(b) => b.reifier,
            ConstructBody::Occurrence(b) => b.reifier,
            ConstructBody::Variant(b) => b.reifier,
        }
    }

    pub fn set_reifier(&mut self, reifier: Option<ConstructId>) -> Result<(), TopicStoreError> {
        let slot = match &mut self.body {
            ConstructBody::TopicMap(b) => &mut b.reifier,
            ConstructBody::Topic(_) => {
                return Err(TopicStoreError::model(format!(
                    "topic {} cannot be reified",
                    self.id
                )))
            }
            ConstructBody::Association(b) => &mut b.reifier,
            ConstructBody::Role(b) => &mut b.reifier,
            ConstructBody::Name(b) => &mut b.reifier,
            ConstructBody::Occurrence(b) => &mut b.reifier,
            ConstructBody::Variant(b) => &mut b.reifier,
        };
        *slot = reifier;
        Ok(())
    }

    pub fn r#type(&self) -> Option<ConstructId> {
        match &self.body {
            ConstructBody::Association(b) => Some(b.r#type),
            ConstructBody::Role(b) => Some(b.r#type),
            ConstructBody::Name(b) => Some(b.r#type),
            ConstructBody::Occurrence(b) => Some(b.r#type),
            _ => None,
        }
    }

    pub fn set_type(&mut self, r#type: ConstructId) -> Result<ConstructId, TopicStoreError> {
        let kind = self.kind();
        let slot = match &mut self.body {
            ConstructBody::Association(b) => &mut b.r#type,
            ConstructBody::Role(b) => &mut b.r#type,
            ConstructBody::Name(b) => &mut b.r#type,
            ConstructBody::Occurrence(b) => &mut b.r#type,
            _ => {
                return Err(TopicStoreError::model(format!(
                    "{kind} {} is not typed",
                    self.id
                )))
            }
        };
        Ok(std::mem::replace(slot, r#type))
    }

    pub fn scope(&self) -> Option<&BTreeSet<ConstructId>> {
        match &self.body {
            ConstructBody::Association(b) => Some(&b.scope),
            ConstructBody::Name(b) => Some(&b.scope),
            ConstructBody::Occurrence(b) => Some(&b.scope),
            ConstructBody::Variant(b) => Some(&b.scope),
            _ => None,
        }
    }

    pub fn scope_mut(&mut self) -> Result<&mut BTreeSet<ConstructId>, TopicStoreError> {
        let kind = self.kind();
        match &mut self.body {
            ConstructBody::Association(b) => Ok(&mut b.scope),
            ConstructBody::Name(b) => Ok(&mut b.scope),
            ConstructBody::Occurrence(b) => Ok(&mut b.scope),
            ConstructBody::Variant(b) => Ok(&mut b.scope),
            _ => Err(TopicStoreError::model(format!(
                "{kind} {} is not scoped",
                self.id
            ))),
        }
    }

    pub fn value(&self) -> Option<&str> {
        match &self.body {
            ConstructBody::Name(b) => Some(&b.value),
            ConstructBody::Occurrence(b) => Some(&b.value),
            ConstructBody::Variant(b) => Some(&b.value),
            _ => None,
        }
    }

    pub fn datatype(&self) -> Option<&Locator> {
        match &self.body {
            ConstructBody::Occurrence(b) => Some(&b.datatype),
            ConstructBody::Variant(b) => Some(&b.datatype),
            _ => None,
        }
    }

    /// Children owned by this construct: names and occurrences of a topic, roles of an
    /// association, variants of a name.
    pub fn children(&self) -> Vec<ConstructId> {
        match &self.body {
            ConstructBody::Topic(t) => t.names.iter().chain(t.occurrences.iter()).copied().collect(),
            ConstructBody::Association(a) => a.roles.iter().copied().collect(),
            ConstructBody::Name(n) => n.variants.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Every construct id this construct points at, parent included.
    pub fn references(&self) -> BTreeSet<ConstructId> {
        let mut refs: BTreeSet<ConstructId> = self.parent.into_iter().collect();
        refs.extend(self.reifier());
        refs.extend(self.r#type());
        if let Some(scope) = self.scope() {
            refs.extend(scope.iter().copied());
        }
        refs.extend(self.children());
        match &self.body {
            ConstructBody::Topic(t) => {
                refs.extend(t.types.iter().copied());
                refs.extend(t.roles_played.iter().copied());
                refs.extend(t.reified);
            }
            ConstructBody::Role(r) => {
                refs.insert(r.player);
            }
            _ => {}
        }
        refs
    }

    /// Identifiers this construct holds, tagged by how it holds them.
    pub fn identifiers(&self) -> Vec<(IdentifierKind, Locator)> {
        let mut ids: Vec<(IdentifierKind, Locator)> = self
            .item_identifiers
            .iter()
            .map(|l| (IdentifierKind::ItemIdentifier, l.clone()))
            .collect();
        if let ConstructBody::Topic(t) = &self.body {
            ids.extend(
                t.subject_identifiers
                    .iter()
                    .map(|l| (IdentifierKind::SubjectIdentifier, l.clone())),
            );
            ids.extend(
                t.subject_locators
                    .iter()
                    .map(|l| (IdentifierKind::SubjectLocator, l.clone())),
            );
        }
        ids
    }

    pub fn holds(&self, kind: IdentifierKind, locator: &Locator) -> bool {
        match (kind, &self.body) {
            (IdentifierKind::ItemIdentifier, _) => self.item_identifiers.contains(locator),
            (IdentifierKind::SubjectIdentifier, ConstructBody::Topic(t)) => {
                t.subject_identifiers.contains(locator)
            }
            (IdentifierKind::SubjectLocator, ConstructBody::Topic(t)) => {
                t.subject_locators.contains(locator)
            }
            _ => false,
        }
    }
}

/// Arena entry. A merged-away construct is never dropped from the arena: its slot turns into a
/// forwarding pointer to the survivor so stale ids keep resolving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Live(Construct),
    Forwarded(ConstructId),
}

impl Slot {
    pub fn live(&self) -> Option<&Construct> {
        match self {
            Slot::Live(c) => Some(c),
            Slot::Forwarded(_) => None,
        }
    }

    pub fn forwarded(&self) -> Option<ConstructId> {
        match self {
            Slot::Live(_) => None,
            Slot::Forwarded(target) => Some(*target),
        }
    }
}
