//! Typed creation, mutation and removal.
//!
//! Every operation validates its arguments, stages its change, reports it to the consistency
//! monitor and returns the canonical id of the construct it touched. That id may belong to a
//! construct that existed before the call: creating something equivalent to an existing
//! construct returns the existing one, and a mutation can merge its target away.
use std::collections::{BTreeMap, BTreeSet};

use super::{base::TopicMap, txn::Transaction};
use crate::{
    construct::{
        AssociationBody, Construct, ConstructBody, NameBody, OccurrenceBody, RoleBody, TopicBody,
        VariantBody,
    },
    error::TopicStoreError,
    event::MutationEvent,
    properties::{
        ConstructId, ConstructKind, IdentifierKind, Locator, GENERATED_IID_PREFIX, PSI_INSTANCE,
        PSI_TOPIC_NAME, PSI_TYPE, PSI_TYPE_INSTANCE, XSD_STRING,
    },
    store::IndexQuery,
};

impl TopicMap {
    /// A topic identified only by a generated item identifier.
    pub fn create_topic(&mut self) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.new_topic(None))
    }

    pub fn create_topic_by_item_identifier(
        &mut self,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.topic_by_identity(IdentifierKind::ItemIdentifier, locator))
    }

    pub fn create_topic_by_subject_identifier(
        &mut self,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.topic_by_identity(IdentifierKind::SubjectIdentifier, locator))
    }

    pub fn create_topic_by_subject_locator(
        &mut self,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.topic_by_identity(IdentifierKind::SubjectLocator, locator))
    }

    /// An association of `type` in `scope`. An existing association with the same type and scope
    /// that has no roles yet is returned instead of a new one.
    pub fn create_association(
        &mut self,
        r#type: ConstructId,
        scope: &[ConstructId],
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.new_association(r#type, scope, true))
    }

    pub fn create_role(
        &mut self,
        association: ConstructId,
        r#type: ConstructId,
        player: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.new_role(association, r#type, player, true))
    }

    /// A name of `topic`. Without a type the default topic-name type is used, created on demand.
    pub fn create_name(
        &mut self,
        topic: ConstructId,
        r#type: Option<ConstructId>,
        value: &str,
        scope: &[ConstructId],
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| {
            let r#type = match r#type {
                Some(t) => t,
                None => txn.topic_by_identity(IdentifierKind::SubjectIdentifier, &PSI_TOPIC_NAME)?,
            };
            txn.new_name(topic, r#type, value, scope)
        })
    }

    /// An occurrence of `topic`. The datatype defaults to `xsd:string`.
    pub fn create_occurrence(
        &mut self,
        topic: ConstructId,
        r#type: ConstructId,
        value: &str,
        datatype: Option<&Locator>,
        scope: &[ConstructId],
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.new_occurrence(topic, r#type, value, datatype, scope))
    }

    /// A variant of `name`. `scope` must be non-empty and add at least one theme to the name's
    /// own scope; the variant's stored scope is the union of both.
    pub fn create_variant(
        &mut self,
        name: ConstructId,
        value: &str,
        datatype: Option<&Locator>,
        scope: &[ConstructId],
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.new_variant(name, value, datatype, scope))
    }

    pub fn add_item_identifier(
        &mut self,
        id: ConstructId,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.add_identifier(id, IdentifierKind::ItemIdentifier, locator))
    }

    pub fn remove_item_identifier(
        &mut self,
        id: ConstructId,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.remove_identifier(id, IdentifierKind::ItemIdentifier, locator))
    }

    pub fn add_subject_identifier(
        &mut self,
        topic: ConstructId,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.add_identifier(topic, IdentifierKind::SubjectIdentifier, locator))
    }

    pub fn remove_subject_identifier(
        &mut self,
        topic: ConstructId,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| {
            txn.remove_identifier(topic, IdentifierKind::SubjectIdentifier, locator)
        })
    }

    pub fn add_subject_locator(
        &mut self,
        topic: ConstructId,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.add_identifier(topic, IdentifierKind::SubjectLocator, locator))
    }

    pub fn remove_subject_locator(
        &mut self,
        topic: ConstructId,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.remove_identifier(topic, IdentifierKind::SubjectLocator, locator))
    }

    pub fn set_type(
        &mut self,
        id: ConstructId,
        r#type: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.retype(id, r#type))
    }

    pub fn add_theme(
        &mut self,
        id: ConstructId,
        theme: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.add_theme(id, theme))
    }

    pub fn remove_theme(
        &mut self,
        id: ConstructId,
        theme: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.remove_theme(id, theme))
    }

    /// Set the value of a name, occurrence or variant. Names only take `xsd:string`; the
    /// datatype of occurrences and variants defaults to it.
    pub fn set_value(
        &mut self,
        id: ConstructId,
        value: &str,
        datatype: Option<&Locator>,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.set_value(id, value, datatype))
    }

    /// Make `reifier` the reifier of `id`. A topic that reified another construct silently stops
    /// doing so.
    pub fn set_reifier(
        &mut self,
        id: ConstructId,
        reifier: Option<ConstructId>,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.set_reifier(id, reifier))
    }

    pub fn set_reified(
        &mut self,
        topic: ConstructId,
        reified: Option<ConstructId>,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.set_reified(topic, reified))
    }

    pub fn set_player(
        &mut self,
        role: ConstructId,
        player: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.set_player(role, player))
    }

    pub fn add_type(
        &mut self,
        topic: ConstructId,
        r#type: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.add_topic_type(topic, r#type))
    }

    pub fn remove_type(
        &mut self,
        topic: ConstructId,
        r#type: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.remove_topic_type(topic, r#type))
    }

    /// Reparent a name or occurrence onto another topic, a role onto another association or a
    /// variant onto another name.
    pub fn move_to(
        &mut self,
        id: ConstructId,
        parent: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| txn.move_to(id, parent))
    }

    /// Merge topic `second` into `first`. Fails without touching either topic when both reify
    /// different constructs.
    pub fn merge_topics(
        &mut self,
        first: ConstructId,
        second: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        self.mutate(|txn| {
            let first = txn.load_topic(first)?.id;
            let second = txn.load_topic(second)?.id;
            txn.merge(first, second)
        })
    }

    /// Copy every construct of `other` into this topic map. Copies equivalent to existing
    /// constructs merge with them; `other` is left unchanged.
    pub fn merge_in(&mut self, other: &mut TopicMap) -> Result<(), TopicStoreError> {
        if other.id() == self.id() {
            return Ok(());
        }
        let source = other.constructs()?;
        tracing::info!(
            "[TopicMap::merge_in] {} constructs from {} into {}",
            source.len(),
            other.locator(),
            self.locator()
        );
        let source_id = other.id();
        self.mutate(|txn| txn.copy_in(source_id, &source))
    }

    /// Remove a construct together with everything it owns.
    ///
    /// Topics still used as a type, theme, role player or reifier are refused with
    /// [TopicStoreError::TopicInUse].
    pub fn remove(&mut self, id: ConstructId) -> Result<(), TopicStoreError> {
        self.mutate(|txn| txn.remove_construct(id))
    }

    /// Delete every construct of this topic map, the topic map document included. The context is
    /// unusable afterwards.
    pub fn remove_topic_map(&mut self) -> Result<(), TopicStoreError> {
        let id = self.id();
        self.mutate(|txn| {
            for construct in txn.query(&IndexQuery::new(id))? {
                txn.remove(construct)?;
            }
            Ok(())
        })?;
        tracing::info!("[TopicMap::remove_topic_map] removed {}", self.locator());
        self.mark_removed();
        Ok(())
    }
}

fn identifier_added(kind: IdentifierKind, locator: Locator) -> MutationEvent {
    match kind {
        IdentifierKind::ItemIdentifier => MutationEvent::ItemIdentifierAdded(locator),
        IdentifierKind::SubjectIdentifier => MutationEvent::SubjectIdentifierAdded(locator),
        IdentifierKind::SubjectLocator => MutationEvent::SubjectLocatorAdded(locator),
    }
}

fn identifier_removed(kind: IdentifierKind, locator: Locator) -> MutationEvent {
    match kind {
        IdentifierKind::ItemIdentifier => MutationEvent::ItemIdentifierRemoved(locator),
        IdentifierKind::SubjectIdentifier => MutationEvent::SubjectIdentifierRemoved(locator),
        IdentifierKind::SubjectLocator => MutationEvent::SubjectLocatorRemoved(locator),
    }
}

fn mapped(
    ids: &BTreeMap<ConstructId, ConstructId>,
    id: ConstructId,
) -> Result<ConstructId, TopicStoreError> {
    ids.get(&id)
        .copied()
        .ok_or_else(|| TopicStoreError::internal(format!("{id} was not copied")))
}

impl Transaction<'_> {
    fn new_topic(
        &mut self,
        identity: Option<(IdentifierKind, Locator)>,
    ) -> Result<ConstructId, TopicStoreError> {
        let tm = self.topicmap();
        let id = ConstructId::new(tm);
        let (kind, locator) = match identity {
            Some(identity) => identity,
            None => (
                IdentifierKind::ItemIdentifier,
                Locator::parse(&format!("{GENERATED_IID_PREFIX}{id}"))?,
            ),
        };
        let mut topic = Construct::new(id, tm, Some(tm), ConstructBody::Topic(TopicBody::default()));
        match kind {
            IdentifierKind::ItemIdentifier => {
                topic.item_identifiers.insert(locator.clone());
            }
            IdentifierKind::SubjectIdentifier => {
                topic
                    .topic_mut()?
                    .subject_identifiers
                    .insert(locator.clone());
            }
            IdentifierKind::SubjectLocator => {
                topic.topic_mut()?.subject_locators.insert(locator.clone());
            }
        }
        self.create(topic);
        self.on_mutation(id, &identifier_added(kind, locator))
    }

    /// The topic identified by `locator`, created if there is none. A topic holding an item
    /// identifier that equals a requested subject identifier (or vice versa) is reused and gains
    /// the requested identifier.
    fn topic_by_identity(
        &mut self,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        if let Some(existing) = self.by_identifier(kind, locator)? {
            if existing.is_topic() {
                return Ok(existing.id);
            }
            return Err(TopicStoreError::model(format!(
                "{locator} already identifies {} {}",
                existing.kind(),
                existing.id
            )));
        }
        let counterpart = match kind {
            IdentifierKind::ItemIdentifier => Some(IdentifierKind::SubjectIdentifier),
            IdentifierKind::SubjectIdentifier => Some(IdentifierKind::ItemIdentifier),
            IdentifierKind::SubjectLocator => None,
        };
        if let Some(other_kind) = counterpart {
            if let Some(existing) = self.by_identifier(other_kind, locator)? {
                if !existing.is_topic() {
                    return Err(TopicStoreError::model(format!(
                        "{locator} already identifies {} {}",
                        existing.kind(),
                        existing.id
                    )));
                }
                return self.add_identifier(existing.id, kind, locator);
            }
        }
        self.new_topic(Some((kind, locator.clone())))
    }

    fn ensure_topic(&mut self, id: ConstructId) -> Result<ConstructId, TopicStoreError> {
        Ok(self.load_topic(id)?.id)
    }

    fn ensure_themes(&mut self, scope: &[ConstructId]) -> Result<BTreeSet<ConstructId>, TopicStoreError> {
        scope.iter().map(|t| self.ensure_topic(*t)).collect()
    }

    /// Stage a freshly built child construct and hook it into its parent, unless an equivalent
    /// construct already exists, in which case that one is returned and the fresh one dropped.
    fn attach(&mut self, construct: Construct) -> Result<ConstructId, TopicStoreError> {
        let id = construct.id;
        let kind = construct.kind();
        let Some(parent) = construct.parent else {
            return Err(TopicStoreError::internal(format!(
                "{kind} {id} has no parent to attach to"
            )));
        };
        let player = match &construct.body {
            ConstructBody::Role(r) => Some(r.player),
            _ => None,
        };
        self.create(construct);
        if let Some(existing) = self.find_equivalent(id)? {
            tracing::debug!("[attach] reusing {} {}", kind, existing);
            self.discard(&id);
            return Ok(existing);
        }
        let mut owner = self.load(parent)?;
        let owner_kind = owner.kind();
        let listed = match (&mut owner.body, kind) {
            (ConstructBody::Topic(t), ConstructKind::Name) => t.names.insert(id),
            (ConstructBody::Topic(t), ConstructKind::Occurrence) => t.occurrences.insert(id),
            (ConstructBody::Association(a), ConstructKind::Role) => a.roles.insert(id),
            (ConstructBody::Name(n), ConstructKind::Variant) => n.variants.insert(id),
            _ => {
                return Err(TopicStoreError::model(format!(
                    "a {owner_kind} cannot own a {kind}"
                )))
            }
        };
        if listed {
            self.stage(owner);
        }
        if let Some(player) = player {
            let mut topic = self.load_topic(player)?;
            topic.topic_mut()?.roles_played.insert(id);
            self.stage(topic);
        }
        self.on_mutation(id, &MutationEvent::ParentChanged { old: None, new: parent })
    }

    fn new_association(
        &mut self,
        r#type: ConstructId,
        scope: &[ConstructId],
        reuse_roleless: bool,
    ) -> Result<ConstructId, TopicStoreError> {
        let tm = self.topicmap();
        let r#type = self.ensure_topic(r#type)?;
        let scope = self.ensure_themes(scope)?;
        if reuse_roleless {
            let query = IndexQuery::new(tm)
                .kind(ConstructKind::Association)
                .typed(r#type)
                .scope(&scope);
            for existing in self.query_constructs(&query)? {
                if existing.association()?.roles.is_empty() {
                    return Ok(existing.id);
                }
            }
        }
        let id = ConstructId::new(tm);
        self.create(Construct::new(
            id,
            tm,
            Some(tm),
            ConstructBody::Association(AssociationBody {
                r#type,
                scope,
                reifier: None,
                roles: BTreeSet::new(),
            }),
        ));
        Ok(id)
    }

    /// With `settle` the association is checked for duplicates right away; bulk builders add
    /// all roles first and settle once.
    fn new_role(
        &mut self,
        association: ConstructId,
        r#type: ConstructId,
        player: ConstructId,
        settle: bool,
    ) -> Result<ConstructId, TopicStoreError> {
        let tm = self.topicmap();
        let association = self.load_kind(association, ConstructKind::Association)?.id;
        let r#type = self.ensure_topic(r#type)?;
        let player = self.ensure_topic(player)?;
        let role = Construct::new(
            ConstructId::new(tm),
            tm,
            Some(association),
            ConstructBody::Role(RoleBody {
                r#type,
                player,
                reifier: None,
            }),
        );
        let role = self.attach(role)?;
        if settle {
            self.on_mutation(association, &MutationEvent::RolesChanged(role))?;
        }
        self.resolve(role)
    }

    fn new_name(
        &mut self,
        topic: ConstructId,
        r#type: ConstructId,
        value: &str,
        scope: &[ConstructId],
    ) -> Result<ConstructId, TopicStoreError> {
        let tm = self.topicmap();
        let topic = self.ensure_topic(topic)?;
        let r#type = self.ensure_topic(r#type)?;
        let scope = self.ensure_themes(scope)?;
        self.attach(Construct::new(
            ConstructId::new(tm),
            tm,
            Some(topic),
            ConstructBody::Name(NameBody {
                r#type,
                value: value.to_string(),
                scope,
                reifier: None,
                variants: BTreeSet::new(),
            }),
        ))
    }

    fn new_occurrence(
        &mut self,
        topic: ConstructId,
        r#type: ConstructId,
        value: &str,
        datatype: Option<&Locator>,
        scope: &[ConstructId],
    ) -> Result<ConstructId, TopicStoreError> {
        let tm = self.topicmap();
        let topic = self.ensure_topic(topic)?;
        let r#type = self.ensure_topic(r#type)?;
        let scope = self.ensure_themes(scope)?;
        self.attach(Construct::new(
            ConstructId::new(tm),
            tm,
            Some(topic),
            ConstructBody::Occurrence(OccurrenceBody {
                r#type,
                value: value.to_string(),
                datatype: datatype.unwrap_or(&*XSD_STRING).clone(),
                scope,
                reifier: None,
            }),
        ))
    }

    fn new_variant(
        &mut self,
        name: ConstructId,
        value: &str,
        datatype: Option<&Locator>,
        scope: &[ConstructId],
    ) -> Result<ConstructId, TopicStoreError> {
        let tm = self.topicmap();
        let owner = self.load_kind(name, ConstructKind::Name)?;
        let given = self.ensure_themes(scope)?;
        let scope = self.refined_scope(&owner, given)?;
        self.attach(Construct::new(
            ConstructId::new(tm),
            tm,
            Some(owner.id),
            ConstructBody::Variant(VariantBody {
                value: value.to_string(),
                datatype: datatype.unwrap_or(&*XSD_STRING).clone(),
                scope,
                reifier: None,
            }),
        ))
    }

    /// Union of a variant's themes with its name's scope, refused unless the variant adds at
    /// least one theme.
    fn refined_scope(
        &mut self,
        name: &Construct,
        themes: BTreeSet<ConstructId>,
    ) -> Result<BTreeSet<ConstructId>, TopicStoreError> {
        let name_scope: BTreeSet<ConstructId> =
            self.resolve_all(name.name()?.scope.iter())?.into_iter().collect();
        if themes.is_empty() {
            return Err(TopicStoreError::model(format!(
                "a variant of name {} needs a non-empty scope",
                name.id
            )));
        }
        let scope: BTreeSet<ConstructId> = themes.union(&name_scope).copied().collect();
        if scope.len() <= name_scope.len() {
            return Err(TopicStoreError::model(format!(
                "variant scope must add a theme to the scope of name {}",
                name.id
            )));
        }
        Ok(scope)
    }

    fn add_identifier(
        &mut self,
        id: ConstructId,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        let mut construct = self.load(id)?;
        if construct.holds(kind, locator) {
            return Ok(construct.id);
        }
        match kind {
            IdentifierKind::ItemIdentifier => {
                construct.item_identifiers.insert(locator.clone());
            }
            IdentifierKind::SubjectIdentifier => {
                construct
                    .topic_mut()?
                    .subject_identifiers
                    .insert(locator.clone());
            }
            IdentifierKind::SubjectLocator => {
                construct
                    .topic_mut()?
                    .subject_locators
                    .insert(locator.clone());
            }
        }
        let id = construct.id;
        self.stage(construct);
        self.on_mutation(id, &identifier_added(kind, locator.clone()))
    }

    fn remove_identifier(
        &mut self,
        id: ConstructId,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        let mut construct = self.load(id)?;
        let removed = match kind {
            IdentifierKind::ItemIdentifier => construct.item_identifiers.remove(locator),
            IdentifierKind::SubjectIdentifier => {
                construct.topic_mut()?.subject_identifiers.remove(locator)
            }
            IdentifierKind::SubjectLocator => {
                construct.topic_mut()?.subject_locators.remove(locator)
            }
        };
        let id = construct.id;
        if !removed {
            return Ok(id);
        }
        self.stage(construct);
        self.on_mutation(id, &identifier_removed(kind, locator.clone()))
    }

    fn retype(&mut self, id: ConstructId, r#type: ConstructId) -> Result<ConstructId, TopicStoreError> {
        let mut construct = self.load(id)?;
        if !construct.kind().is_typed() {
            return Err(TopicStoreError::model(format!(
                "{} {} has no type",
                construct.kind(),
                construct.id
            )));
        }
        let new = self.ensure_topic(r#type)?;
        let old = construct.set_type(new)?;
        let id = construct.id;
        if self.resolve(old)? == new {
            return Ok(id);
        }
        self.stage(construct);
        self.on_mutation(id, &MutationEvent::TypeSet { old, new })
    }

    fn add_theme(&mut self, id: ConstructId, theme: ConstructId) -> Result<ConstructId, TopicStoreError> {
        let theme = self.ensure_topic(theme)?;
        let mut construct = self.load(id)?;
        if !construct.scope_mut()?.insert(theme) {
            return Ok(construct.id);
        }
        if let ConstructBody::Name(name) = &construct.body {
            for variant in name.variants.iter() {
                let Some(v) = self.fetch(*variant)? else {
                    continue;
                };
                let own = v.scope().map_or(0, |s| s.difference(&name.scope).count());
                if own == 0 {
                    return Err(TopicStoreError::model(format!(
                        "theme {theme} on name {} leaves variant {} without a theme of its own",
                        construct.id, v.id
                    )));
                }
            }
        }
        let id = construct.id;
        self.stage(construct);
        let id = self.on_mutation(id, &MutationEvent::ThemeAdded(theme))?;
        // Variants refine their name's scope and follow it.
        let construct = self.load(id)?;
        if let ConstructBody::Name(name) = &construct.body {
            for variant in name.variants.iter() {
                let Some(mut v) = self.fetch(*variant)? else {
                    continue;
                };
                if v.scope_mut()?.insert(theme) {
                    let vid = v.id;
                    self.stage(v);
                    self.on_mutation(vid, &MutationEvent::ThemeAdded(theme))?;
                }
            }
        }
        self.resolve(id)
    }

    fn remove_theme(
        &mut self,
        id: ConstructId,
        theme: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        let theme = self.resolve(theme)?;
        let mut construct = self.load(id)?;
        if !construct.scope_mut()?.remove(&theme) {
            return Ok(construct.id);
        }
        if construct.kind() == ConstructKind::Variant {
            if let Some(parent) = construct.parent {
                let name = self.load_kind(parent, ConstructKind::Name)?;
                let remaining = construct.scope().cloned().unwrap_or_default();
                let name_themes: BTreeSet<ConstructId> = name.name()?.scope.clone();
                let own: BTreeSet<ConstructId> =
                    remaining.difference(&name_themes).copied().collect();
                self.refined_scope(&name, own)?;
            }
        }
        let variants: Vec<ConstructId> = match &construct.body {
            ConstructBody::Name(n) => n.variants.iter().copied().collect(),
            _ => Vec::new(),
        };
        let id = construct.id;
        self.stage(construct);
        let id = self.on_mutation(id, &MutationEvent::ThemeRemoved(theme))?;
        for variant in variants {
            let Some(mut v) = self.fetch(variant)? else {
                continue;
            };
            if v.scope_mut()?.remove(&theme) {
                let vid = v.id;
                self.stage(v);
                self.on_mutation(vid, &MutationEvent::ThemeRemoved(theme))?;
            }
        }
        self.resolve(id)
    }

    fn set_value(
        &mut self,
        id: ConstructId,
        value: &str,
        datatype: Option<&Locator>,
    ) -> Result<ConstructId, TopicStoreError> {
        let mut construct = self.load(id)?;
        let (id, kind) = (construct.id, construct.kind());
        let datatype = datatype.unwrap_or(&*XSD_STRING);
        let changed = match &mut construct.body {
            ConstructBody::Name(n) => {
                if datatype != &*XSD_STRING {
                    return Err(TopicStoreError::model(format!(
                        "name {id} only takes string values, not {datatype}"
                    )));
                }
                let changed = n.value != value;
                n.value = value.to_string();
                changed
            }
            ConstructBody::Occurrence(OccurrenceBody {
                value: v,
                datatype: d,
                ..
            })
            | ConstructBody::Variant(VariantBody {
                value: v,
                datatype: d,
                ..
            }) => {
                let changed = v.as_str() != value || &*d != datatype;
                *v = value.to_string();
                *d = datatype.clone();
                changed
            }
            _ => {
                return Err(TopicStoreError::model(format!(
                    "{kind} {id} has no value"
                )))
            }
        };
        if !changed {
            return Ok(id);
        }
        self.stage(construct);
        self.on_mutation(id, &MutationEvent::ValueChanged)
    }

    fn set_reifier(
        &mut self,
        id: ConstructId,
        reifier: Option<ConstructId>,
    ) -> Result<ConstructId, TopicStoreError> {
        let mut construct = self.load(id)?;
        if !construct.kind().is_reifiable() {
            return Err(TopicStoreError::model(format!(
                "{} {} cannot be reified",
                construct.kind(),
                construct.id
            )));
        }
        let new = reifier.map(|r| self.ensure_topic(r)).transpose()?;
        let old = self.resolve_opt(construct.reifier())?;
        let id = construct.id;
        if old == new {
            return Ok(id);
        }
        construct.set_reifier(new)?;
        self.stage(construct);
        self.on_mutation(id, &MutationEvent::ReifierSet { old, new })
    }

    fn set_reified(
        &mut self,
        topic: ConstructId,
        reified: Option<ConstructId>,
    ) -> Result<ConstructId, TopicStoreError> {
        let mut construct = self.load_topic(topic)?;
        let old = self.resolve_opt(construct.topic()?.reified)?;
        let new = self.resolve_opt(reified)?;
        let id = construct.id;
        if old == new {
            return Ok(id);
        }
        construct.topic_mut()?.reified = new;
        self.stage(construct);
        self.on_mutation(id, &MutationEvent::ReifiedSet { old, new })
    }

    fn set_player(
        &mut self,
        role: ConstructId,
        player: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        let mut construct = self.load_kind(role, ConstructKind::Role)?;
        let new = self.ensure_topic(player)?;
        let old = self.resolve(construct.role()?.player)?;
        let id = construct.id;
        if old == new {
            return Ok(id);
        }
        construct.role_mut()?.player = new;
        self.stage(construct);
        if let Some(mut previous) = self.fetch(old)? {
            previous.topic_mut()?.roles_played.remove(&id);
            self.stage(previous);
        }
        let mut topic = self.load_topic(new)?;
        topic.topic_mut()?.roles_played.insert(id);
        self.stage(topic);
        self.on_mutation(id, &MutationEvent::PlayerSet { old, new })
    }

    fn add_topic_type(
        &mut self,
        topic: ConstructId,
        r#type: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        let r#type = self.ensure_topic(r#type)?;
        let mut construct = self.load_topic(topic)?;
        let id = construct.id;
        if !construct.topic_mut()?.types.insert(r#type) {
            return Ok(id);
        }
        self.stage(construct);
        if self.features().type_instance_associations {
            let association_type =
                self.topic_by_identity(IdentifierKind::SubjectIdentifier, &PSI_TYPE_INSTANCE)?;
            let type_role = self.topic_by_identity(IdentifierKind::SubjectIdentifier, &PSI_TYPE)?;
            let instance_role =
                self.topic_by_identity(IdentifierKind::SubjectIdentifier, &PSI_INSTANCE)?;
            let association = self.new_association(association_type, &[], false)?;
            self.new_role(association, type_role, r#type, false)?;
            let role = self.new_role(association, instance_role, id, false)?;
            self.on_mutation(association, &MutationEvent::RolesChanged(role))?;
        }
        self.resolve(id)
    }

    fn remove_topic_type(
        &mut self,
        topic: ConstructId,
        r#type: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        let r#type = self.resolve(r#type)?;
        let mut construct = self.load_topic(topic)?;
        let id = construct.id;
        if !construct.topic_mut()?.types.remove(&r#type) {
            return Ok(id);
        }
        self.stage(construct);
        if self.features().type_instance_associations {
            for association in self.type_instance_associations(r#type, id)? {
                self.remove_construct(association)?;
            }
        }
        Ok(id)
    }

    /// Type-instance associations stating that `instance` is an instance of `r#type`.
    fn type_instance_associations(
        &mut self,
        r#type: ConstructId,
        instance: ConstructId,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        let psi = |txn: &mut Self, locator: &Locator| {
            txn.by_identifier(IdentifierKind::SubjectIdentifier, locator)
                .map(|found| found.map(|c| c.id))
        };
        let (Some(association_type), Some(type_role), Some(instance_role)) = (
            psi(self, &PSI_TYPE_INSTANCE)?,
            psi(self, &PSI_TYPE)?,
            psi(self, &PSI_INSTANCE)?,
        ) else {
            return Ok(Vec::new());
        };
        let mut expected = vec![(type_role, r#type), (instance_role, instance)];
        expected.sort();
        let query = IndexQuery::new(self.topicmap())
            .kind(ConstructKind::Association)
            .typed(association_type);
        let mut found = Vec::new();
        for association in self.query_constructs(&query)? {
            if self.role_signature(&association)? == expected {
                found.push(association.id);
            }
        }
        Ok(found)
    }

    fn move_to(&mut self, id: ConstructId, parent: ConstructId) -> Result<ConstructId, TopicStoreError> {
        let mut construct = self.load(id)?;
        let kind = construct.kind();
        let owner_kind = match kind {
            ConstructKind::Name | ConstructKind::Occurrence => ConstructKind::Topic,
            ConstructKind::Role => ConstructKind::Association,
            ConstructKind::Variant => ConstructKind::Name,
            _ => {
                return Err(TopicStoreError::model(format!(
                    "{kind} {} cannot be moved",
                    construct.id
                )))
            }
        };
        let mut owner = self.load_kind(parent, owner_kind)?;
        let new = owner.id;
        let old = self.resolve_opt(construct.parent)?;
        let id = construct.id;
        if old == Some(new) {
            return Ok(id);
        }
        if let ConstructBody::Variant(v) = &construct.body {
            let themes = v.scope.clone();
            let scope = self.refined_scope(&owner, themes)?;
            *construct.scope_mut()? = scope;
        }
        self.detach_from_parent(&construct)?;
        construct.parent = Some(new);
        self.stage(construct);
        match &mut owner.body {
            ConstructBody::Topic(t) if kind == ConstructKind::Name => {
                t.names.insert(id);
            }
            ConstructBody::Topic(t) => {
                t.occurrences.insert(id);
            }
            ConstructBody::Association(a) => {
                a.roles.insert(id);
            }
            ConstructBody::Name(n) => {
                n.variants.insert(id);
            }
            _ => {}
        }
        self.stage(owner);
        let moved = self.on_mutation(id, &MutationEvent::ParentChanged { old, new })?;
        if owner_kind == ConstructKind::Association {
            if let Some(old) = old {
                if self.fetch(old)?.is_some() {
                    self.on_mutation(old, &MutationEvent::RolesChanged(moved))?;
                }
            }
            self.on_mutation(new, &MutationEvent::RolesChanged(moved))?;
        }
        self.resolve(moved)
    }

    fn ensure_unused(&mut self, topic: &Construct) -> Result<(), TopicStoreError> {
        let tm = self.topicmap();
        let id = topic.id;
        let body = topic.topic()?;
        let mut uses = Vec::new();
        if !body.roles_played.is_empty()
            || !self.query(&IndexQuery::new(tm).player(id))?.is_empty()
        {
            uses.push("plays roles");
        }
        if body.reified.is_some() {
            uses.push("reifies a construct");
        }
        if !self.query(&IndexQuery::new(tm).typed(id))?.is_empty() {
            uses.push("types constructs");
        }
        if self
            .query(&IndexQuery::new(tm).kind(ConstructKind::Topic).instance_of(id))?
            .iter()
            .any(|t| *t != id)
        {
            uses.push("types topics");
        }
        if !self.query(&IndexQuery::new(tm).theme(id))?.is_empty() {
            uses.push("is a theme");
        }
        if uses.is_empty() {
            return Ok(());
        }
        Err(TopicStoreError::TopicInUse(format!(
            "{id} ({})",
            uses.join(", ")
        )))
    }

    /// Delete a construct and everything it owns, detaching it from its parent, its player and
    /// its reifier.
    fn remove_construct(&mut self, id: ConstructId) -> Result<(), TopicStoreError> {
        let construct = self.load(id)?;
        if construct.kind() == ConstructKind::TopicMap {
            return Err(TopicStoreError::internal(
                "topic maps are removed with remove_topic_map",
            ));
        }
        if construct.is_topic() {
            self.ensure_unused(&construct)?;
        }
        tracing::debug!("[remove_construct] {} {}", construct.kind(), construct.id);
        self.remove(construct.id)?;
        self.detach_from_parent(&construct)?;
        if let Some(reifier) = construct.reifier() {
            if let Some(mut topic) = self.fetch(reifier)? {
                topic.topic_mut()?.reified = None;
                self.stage(topic);
            }
        }
        for child in construct.children() {
            if self.fetch(child)?.is_some() {
                self.remove_construct(child)?;
            }
        }
        if let ConstructBody::Role(role) = &construct.body {
            if let Some(mut player) = self.fetch(role.player)? {
                if player.topic_mut()?.roles_played.remove(&construct.id) {
                    self.stage(player);
                }
            }
            if let Some(association) = construct.parent {
                if self.fetch(association)?.is_some() {
                    self.on_mutation(association, &MutationEvent::RolesChanged(construct.id))?;
                }
            }
        }
        Ok(())
    }

    /// Copy the constructs of topic map `source_tm` into this one. Topics are matched by
    /// identity, everything else by its defining key.
    fn copy_in(
        &mut self,
        source_tm: ConstructId,
        source: &[Construct],
    ) -> Result<(), TopicStoreError> {
        let tm = self.topicmap();
        let index: BTreeMap<ConstructId, &Construct> = source.iter().map(|c| (c.id, c)).collect();
        let of_kind = |kind: ConstructKind| source.iter().filter(move |c| c.kind() == kind);
        let mut ids: BTreeMap<ConstructId, ConstructId> = BTreeMap::new();
        ids.insert(source_tm, tm);

        for topic in of_kind(ConstructKind::Topic) {
            let body = topic.topic()?;
            let copy = ConstructId::new(tm);
            let mut construct = Construct::new(
                copy,
                tm,
                Some(tm),
                ConstructBody::Topic(TopicBody {
                    subject_identifiers: body.subject_identifiers.clone(),
                    subject_locators: body.subject_locators.clone(),
                    ..TopicBody::default()
                }),
            );
            construct.item_identifiers = topic.item_identifiers.clone();
            self.create(construct);
            ids.insert(topic.id, copy);
            for (kind, locator) in topic.identifiers() {
                self.on_mutation(copy, &identifier_added(kind, locator))?;
            }
        }
        for topic in of_kind(ConstructKind::Topic) {
            let target = self.resolve(mapped(&ids, topic.id)?)?;
            for r#type in topic.topic()?.types.iter() {
                let r#type = self.resolve(mapped(&ids, *r#type)?)?;
                self.add_topic_type(target, r#type)?;
            }
        }

        for association in of_kind(ConstructKind::Association) {
            let body = association.association()?;
            let scope = body
                .scope
                .iter()
                .map(|t| mapped(&ids, *t))
                .collect::<Result<Vec<_>, _>>()?;
            let copy = self.new_association(mapped(&ids, body.r#type)?, &scope, false)?;
            ids.insert(association.id, copy);
            let mut last = None;
            for role_id in body.roles.iter() {
                let Some(role) = index.get(role_id) else {
                    continue;
                };
                let role_body = role.role()?;
                let role_copy = self.new_role(
                    copy,
                    mapped(&ids, role_body.r#type)?,
                    mapped(&ids, role_body.player)?,
                    false,
                )?;
                ids.insert(role.id, role_copy);
                last = Some(role_copy);
            }
            if let Some(role) = last {
                self.on_mutation(copy, &MutationEvent::RolesChanged(role))?;
            }
        }

        for name in of_kind(ConstructKind::Name) {
            let body = name.name()?;
            let Some(parent) = name.parent else {
                continue;
            };
            let scope = mapped_all(&ids, &body.scope)?;
            let copy = self.new_name(
                mapped(&ids, parent)?,
                mapped(&ids, body.r#type)?,
                &body.value,
                &scope,
            )?;
            ids.insert(name.id, copy);
        }
        for occurrence in of_kind(ConstructKind::Occurrence) {
            let Some(parent) = occurrence.parent else {
                continue;
            };
            let ConstructBody::Occurrence(body) = &occurrence.body else {
                continue;
            };
            let scope = mapped_all(&ids, &body.scope)?;
            let copy = self.new_occurrence(
                mapped(&ids, parent)?,
                mapped(&ids, body.r#type)?,
                &body.value,
                Some(&body.datatype),
                &scope,
            )?;
            ids.insert(occurrence.id, copy);
        }
        for variant in of_kind(ConstructKind::Variant) {
            let body = variant.variant()?;
            let Some(parent) = variant.parent else {
                continue;
            };
            let scope = mapped_all(&ids, &body.scope)?;
            let copy = self.new_variant(
                mapped(&ids, parent)?,
                &body.value,
                Some(&body.datatype),
                &scope,
            )?;
            ids.insert(variant.id, copy);
        }

        for construct in source.iter().filter(|c| !c.is_topic()) {
            let target = mapped(&ids, construct.id)?;
            for locator in construct.item_identifiers.iter() {
                self.add_identifier(target, IdentifierKind::ItemIdentifier, locator)?;
            }
        }
        for construct in source.iter() {
            let Some(reifier) = construct.reifier() else {
                continue;
            };
            let target = self.resolve(mapped(&ids, construct.id)?)?;
            let reifier = self.resolve(mapped(&ids, reifier)?)?;
            let current = self.load(target)?.reifier();
            match self.resolve_opt(current)? {
                None => {
                    self.set_reifier(target, Some(reifier))?;
                }
                Some(existing) if existing == reifier => {}
                Some(existing) => {
                    self.merge(existing, reifier)?;
                }
            }
        }
        Ok(())
    }
}

fn mapped_all(
    ids: &BTreeMap<ConstructId, ConstructId>,
    scope: &BTreeSet<ConstructId>,
) -> Result<Vec<ConstructId>, TopicStoreError> {
    scope.iter().map(|t| mapped(ids, *t)).collect()
}
