//! The flat record shape constructs take in the backing store.
use serde::{Deserialize, Serialize};

use crate::{
    construct::{
        AssociationBody, Construct, ConstructBody, NameBody, OccurrenceBody, RoleBody, TopicBody,
        TopicMapBody, VariantBody,
    },
    error::TopicStoreError,
    properties::{ConstructId, ConstructKind, Locator, Revision},
};

/// One stored construct. List fields are kept sorted so that set-valued keys (scope, roles) compare
/// order-independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: ConstructId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    pub documenttype: ConstructKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ConstructId>,
    pub topicmap: ConstructId,
    #[serde(default)]
    pub itemidentifiers: Vec<Locator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<ConstructId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<Locator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<ConstructId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<ConstructId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<ConstructId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub occurrences: Vec<ConstructId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<ConstructId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<ConstructId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjectidentifiers: Vec<Locator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjectlocators: Vec<Locator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reifier: Option<ConstructId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reified: Option<ConstructId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<ConstructId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<Locator>,
}

impl Document {
    fn empty(id: ConstructId, documenttype: ConstructKind, topicmap: ConstructId) -> Self {
        Document {
            id,
            rev: None,
            documenttype,
            parent: None,
            topicmap,
            itemidentifiers: Vec::new(),
            r#type: None,
            value: None,
            datatype: None,
            scope: Vec::new(),
            roles: Vec::new(),
            names: Vec::new(),
            occurrences: Vec::new(),
            variants: Vec::new(),
            types: Vec::new(),
            subjectidentifiers: Vec::new(),
            subjectlocators: Vec::new(),
            reifier: None,
            reified: None,
            player: None,
            locator: None,
        }
    }

    /// True when this document holds `locator` as item identifier, subject identifier or subject
    /// locator.
    pub fn holds_identifier(&self, locator: &Locator) -> bool {
        self.itemidentifiers.contains(locator)
            || self.subjectidentifiers.contains(locator)
            || self.subjectlocators.contains(locator)
    }

    fn missing(&self, field: &str) -> TopicStoreError {
        TopicStoreError::Serialization(format!(
            "{} document {} lacks required field '{field}'",
            self.documenttype, self.id
        ))
    }
}

impl From<&Construct> for Document {
    fn from(c: &Construct) -> Self {
        let mut doc = Document::empty(c.id, c.kind(), c.topicmap);
        doc.rev = c.revision.clone();
        doc.parent = c.parent;
        doc.itemidentifiers = c.item_identifiers.iter().cloned().collect();
        doc.reifier = c.reifier();
        doc.r#type = c.r#type();
        if let Some(scope) = c.scope() {
            doc.scope = scope.iter().copied().collect();
        }
        doc.value = c.value().map(str::to_string);
        doc.datatype = c.datatype().cloned();
        match &c.body {
            ConstructBody::TopicMap(b) => {
                doc.locator = Some(b.locator.clone());
            }
            ConstructBody::Topic(b) => {
                doc.subjectidentifiers = b.subject_identifiers.iter().cloned().collect();
                doc.subjectlocators = b.subject_locators.iter().cloned().collect();
                doc.types = b.types.iter().copied().collect();
                doc.names = b.names.iter().copied().collect();
                doc.occurrences = b.occurrences.iter().copied().collect();
                doc.roles = b.roles_played.iter().copied().collect();
                doc.reified = b.reified;
            }
            ConstructBody::Association(b) => {
                doc.roles = b.roles.iter().copied().collect();
            }
            ConstructBody::Role(b) => {
                doc.player = Some(b.player);
            }
            ConstructBody::Name(b) => {
                doc.variants = b.variants.iter().copied().collect();
            }
            ConstructBody::Occurrence(_) | ConstructBody::Variant(_) => {}
        }
        doc
    }
}

impl TryFrom<Document> for Construct {
    type Error = TopicStoreError;

    fn try_from(doc: Document) -> Result<Self, Self::Error> {
        let body = match doc.documenttype {
            ConstructKind::TopicMap => ConstructBody::TopicMap(TopicMapBody {
                locator: doc.locator.clone().ok_or_else(|| doc.missing("locator"))?,
                reifier: doc.reifier,
            }),
            ConstructKind::Topic => ConstructBody::Topic(TopicBody {
                subject_identifiers: doc.subjectidentifiers.iter().cloned().collect(),
                subject_locators: doc.subjectlocators.iter().cloned().collect(),
                types: doc.types.iter().copied().collect(),
                names: doc.names.iter().copied().collect(),
                occurrences: doc.occurrences.iter().copied().collect(),
                roles_played: doc.roles.iter().copied().collect(),
                reified: doc.reified,
            }),
            ConstructKind::Association => ConstructBody::Association(AssociationBody {
                r#type: doc.r#type.ok_or_else(|| doc.missing("type"))?,
                scope: doc.scope.iter().copied().collect(),
                reifier: doc.reifier,
                roles: doc.roles.iter().copied().collect(),
            }),
            ConstructKind::Role => ConstructBody::Role(RoleBody {
                r#type: doc.r#type.ok_or_else(|| doc.missing("type"))?,
                player: doc.player.ok_or_else(|| doc.missing("player"))?,
                reifier: doc.reifier,
            }),
            ConstructKind::Name => ConstructBody::Name(NameBody {
                r#type: doc.r#type.ok_or_else(|| doc.missing("type"))?,
                value: doc.value.clone().ok_or_else(|| doc.missing("value"))?,
                scope: doc.scope.iter().copied().collect(),
                reifier: doc.reifier,
                variants: doc.variants.iter().copied().collect(),
            }),
            ConstructKind::Occurrence => ConstructBody::Occurrence(OccurrenceBody {
                r#type: doc.r#type.ok_or_else(|| doc.missing("type"))?,
                value: doc.value.clone().ok_or_else(|| doc.missing("value"))?,
                datatype: doc.datatype.clone().ok_or_else(|| doc.missing("datatype"))?,
                scope: doc.scope.iter().copied().collect(),
                reifier: doc.reifier,
            }),
            ConstructKind::Variant => ConstructBody::Variant(VariantBody {
                value: doc.value.clone().ok_or_else(|| doc.missing("value"))?,
                datatype: doc.datatype.clone().ok_or_else(|| doc.missing("datatype"))?,
                scope: doc.scope.iter().copied().collect(),
                reifier: doc.reifier,
            }),
        };
        if doc.documenttype != ConstructKind::TopicMap && doc.parent.is_none() {
            return Err(doc.missing("parent"));
        }
        Ok(Construct {
            id: doc.id,
            revision: doc.rev,
            topicmap: doc.topicmap,
            parent: doc.parent,
            item_identifiers: doc.itemidentifiers.into_iter().collect(),
            loaded: true,
            body,
        })
    }
}
