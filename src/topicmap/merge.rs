//! Merge engine.
//!
//! [Transaction::merge] collapses two equivalent constructs of the same kind into one. `first`
//! survives; `second` is forwarded to it. Children of the absorbed construct are reparented onto
//! the survivor and every reparenting is fed back through the consistency monitor, so duplicates
//! created by the merge are merged in turn.
use std::collections::BTreeSet;

use super::txn::Transaction;
use crate::{
    construct::{Construct, ConstructBody},
    error::TopicStoreError,
    event::MutationEvent,
    properties::{ConstructId, ConstructKind},
    store::IndexQuery,
};

/// What is left to do about reification once both sides of a merge are staged.
enum ReifierFollowUp {
    Nothing,
    /// The survivor took over the absorbed construct's reifier.
    Adopt(ConstructId),
    /// Both sides were reified: the reifier topics are equivalent too.
    MergeTopics(ConstructId, ConstructId),
}

impl Transaction<'_> {
    /// Merge `second` into `first` and return the survivor.
    pub(crate) fn merge(
        &mut self,
        first: ConstructId,
        second: ConstructId,
    ) -> Result<ConstructId, TopicStoreError> {
        let first = self.resolve(first)?;
        let second = self.resolve(second)?;
        if first == second {
            return Ok(first);
        }
        let a = self.load(first)?;
        let b = self.load(second)?;
        if a.kind() != b.kind() {
            return Err(TopicStoreError::internal(format!(
                "cannot merge {} {} with {} {}",
                a.kind(),
                first,
                b.kind(),
                second
            )));
        }
        if a.topicmap != b.topicmap {
            return Err(TopicStoreError::internal(format!(
                "cannot merge {first} and {second} across topic maps"
            )));
        }
        tracing::info!("[merge] {} {} into {}", a.kind(), second, first);
        self.descend()?;
        let merged = match a.kind() {
            ConstructKind::Topic => self.merge_topics(a, b),
            ConstructKind::Association => self.merge_associations(a, b),
            ConstructKind::Role => self.merge_roles(a, b),
            ConstructKind::Name => self.merge_names(a, b),
            ConstructKind::Occurrence => self.merge_occurrences(a, b),
            ConstructKind::Variant => self.merge_variants(a, b),
            ConstructKind::TopicMap => Err(TopicStoreError::internal(
                "topic maps are merged by copying, not by forwarding",
            )),
        };
        self.ascend();
        let survivor = merged?;
        self.resolve(survivor)
    }

    fn merge_topics(
        &mut self,
        mut a: Construct,
        b: Construct,
    ) -> Result<ConstructId, TopicStoreError> {
        let (first, second) = (a.id, b.id);
        let absorbed = b.topic()?.clone();

        let survivor_reified = self.resolve_opt(a.topic()?.reified)?;
        let absorbed_reified = self.resolve_opt(absorbed.reified)?;
        if let (Some(x), Some(y)) = (survivor_reified, absorbed_reified) {
            if x != y {
                return Err(TopicStoreError::model(format!(
                    "topics {first} and {second} reify different constructs ({x}, {y})"
                )));
            }
        }

        a.item_identifiers
            .extend(b.item_identifiers.iter().cloned());
        {
            let body = a.topic_mut()?;
            body.subject_identifiers
                .extend(absorbed.subject_identifiers.iter().cloned());
            body.subject_locators
                .extend(absorbed.subject_locators.iter().cloned());
            body.types = body
                .types
                .iter()
                .chain(absorbed.types.iter())
                .map(|t| if *t == second { first } else { *t })
                .collect();
            body.names.extend(absorbed.names.iter().copied());
            body.occurrences.extend(absorbed.occurrences.iter().copied());
            body.roles_played
                .extend(absorbed.roles_played.iter().copied());
            if body.reified.is_none() {
                body.reified = absorbed_reified;
            }
        }
        self.stage(a);
        self.forward(second, first)?;

        if let Some(reified) = absorbed_reified {
            let mut construct = self.load(reified)?;
            construct.set_reifier(Some(first))?;
            self.stage(construct);
        }

        let tm = self.topicmap();
        let mut children: BTreeSet<ConstructId> = absorbed
            .names
            .iter()
            .chain(absorbed.occurrences.iter())
            .copied()
            .collect();
        children.extend(self.query(&IndexQuery::new(tm).kind(ConstructKind::Name).parent(second))?);
        children.extend(
            self.query(
                &IndexQuery::new(tm)
                    .kind(ConstructKind::Occurrence)
                    .parent(second),
            )?,
        );
        for child in children {
            self.reparent(child, second, first)?;
        }

        let mut roles: BTreeSet<ConstructId> = absorbed.roles_played.clone();
        roles.extend(self.query(&IndexQuery::new(tm).kind(ConstructKind::Role).player(second))?);
        for role_id in roles {
            let Some(mut role) = self.fetch(role_id)? else {
                continue;
            };
            if role.role()?.player != second {
                continue;
            }
            role.role_mut()?.player = first;
            let role_id = role.id;
            self.stage(role);
            self.on_mutation(
                role_id,
                &MutationEvent::PlayerSet {
                    old: second,
                    new: first,
                },
            )?;
        }

        for topic_id in self.query(
            &IndexQuery::new(tm)
                .kind(ConstructKind::Topic)
                .instance_of(second),
        )? {
            let mut topic = self.load(topic_id)?;
            let types = &mut topic.topic_mut()?.types;
            types.remove(&second);
            types.insert(first);
            self.stage(topic);
        }

        for typed_id in self.query(&IndexQuery::new(tm).typed(second))? {
            let Some(mut typed) = self.fetch(typed_id)? else {
                continue;
            };
            if typed.r#type() != Some(second) {
                continue;
            }
            typed.set_type(first)?;
            let typed_id = typed.id;
            self.stage(typed);
            self.on_mutation(
                typed_id,
                &MutationEvent::TypeSet {
                    old: second,
                    new: first,
                },
            )?;
        }

        for scoped_id in self.query(&IndexQuery::new(tm).theme(second))? {
            let Some(mut scoped) = self.fetch(scoped_id)? else {
                continue;
            };
            let scope = scoped.scope_mut()?;
            if !scope.remove(&second) {
                continue;
            }
            scope.insert(first);
            let scoped_id = scoped.id;
            self.stage(scoped);
            self.on_mutation(scoped_id, &MutationEvent::ThemeAdded(first))?;
        }

        let survivor = self.resolve(first)?;
        self.suppress_duplicate_associations(survivor)?;
        Ok(survivor)
    }

    fn merge_associations(
        &mut self,
        mut a: Construct,
        b: Construct,
    ) -> Result<ConstructId, TopicStoreError> {
        let (first, second) = (a.id, b.id);
        a.item_identifiers
            .extend(b.item_identifiers.iter().cloned());
        let follow_up = self.absorb_reifier(&mut a, &b)?;
        let absorbed = b.association()?;
        let moved_roles = absorbed.roles.clone();
        {
            let body = a.association_mut()?;
            body.scope.extend(absorbed.scope.iter().copied());
            body.roles.extend(moved_roles.iter().copied());
        }
        self.stage(a);
        self.forward(second, first)?;
        for role in moved_roles {
            self.reparent(role, second, first)?;
        }
        self.settle_reifier(first, follow_up)?;
        Ok(first)
    }

    fn merge_roles(&mut self, mut a: Construct, b: Construct) -> Result<ConstructId, TopicStoreError> {
        let (first, second) = (a.id, b.id);
        a.item_identifiers
            .extend(b.item_identifiers.iter().cloned());
        let follow_up = self.absorb_reifier(&mut a, &b)?;
        let player = b.role()?.player;
        self.stage(a);
        self.forward(second, first)?;
        self.detach_from_parent(&b)?;
        if let Some(mut topic) = self.fetch(player)? {
            if topic.topic_mut()?.roles_played.remove(&second) {
                self.stage(topic);
            }
        }
        self.settle_reifier(first, follow_up)?;
        Ok(first)
    }

    fn merge_names(&mut self, mut a: Construct, b: Construct) -> Result<ConstructId, TopicStoreError> {
        let (first, second) = (a.id, b.id);
        a.item_identifiers
            .extend(b.item_identifiers.iter().cloned());
        let follow_up = self.absorb_reifier(&mut a, &b)?;
        let absorbed = b.name()?;
        let moved_variants = absorbed.variants.clone();
        {
            let body = a.name_mut()?;
            body.scope.extend(absorbed.scope.iter().copied());
            body.variants.extend(moved_variants.iter().copied());
        }
        self.stage(a);
        self.forward(second, first)?;
        self.detach_from_parent(&b)?;
        for variant in moved_variants {
            self.reparent(variant, second, first)?;
        }
        self.settle_reifier(first, follow_up)?;
        Ok(first)
    }

    fn merge_occurrences(
        &mut self,
        mut a: Construct,
        b: Construct,
    ) -> Result<ConstructId, TopicStoreError> {
        let (first, second) = (a.id, b.id);
        a.item_identifiers
            .extend(b.item_identifiers.iter().cloned());
        let follow_up = self.absorb_reifier(&mut a, &b)?;
        let scope = b.scope().cloned().unwrap_or_default();
        a.scope_mut()?.extend(scope);
        self.stage(a);
        self.forward(second, first)?;
        self.detach_from_parent(&b)?;
        self.settle_reifier(first, follow_up)?;
        Ok(first)
    }

    /// The absorbed variant leaves its name; the survivor stays on the name that already holds it.
    fn merge_variants(
        &mut self,
        mut a: Construct,
        b: Construct,
    ) -> Result<ConstructId, TopicStoreError> {
        let (first, second) = (a.id, b.id);
        a.item_identifiers
            .extend(b.item_identifiers.iter().cloned());
        let follow_up = self.absorb_reifier(&mut a, &b)?;
        let scope = b.scope().cloned().unwrap_or_default();
        a.scope_mut()?.extend(scope);
        self.stage(a);
        self.forward(second, first)?;
        self.detach_from_parent(&b)?;
        self.settle_reifier(first, follow_up)?;
        Ok(first)
    }

    fn absorb_reifier(
        &mut self,
        survivor: &mut Construct,
        absorbed: &Construct,
    ) -> Result<ReifierFollowUp, TopicStoreError> {
        let kept = self.resolve_opt(survivor.reifier())?;
        let incoming = self.resolve_opt(absorbed.reifier())?;
        match (kept, incoming) {
            (_, None) => Ok(ReifierFollowUp::Nothing),
            (None, Some(r)) => {
                survivor.set_reifier(Some(r))?;
                Ok(ReifierFollowUp::Adopt(r))
            }
            (Some(k), Some(r)) if k == r => Ok(ReifierFollowUp::Nothing),
            (Some(k), Some(r)) => Ok(ReifierFollowUp::MergeTopics(k, r)),
        }
    }

    fn settle_reifier(
        &mut self,
        survivor: ConstructId,
        follow_up: ReifierFollowUp,
    ) -> Result<(), TopicStoreError> {
        match follow_up {
            ReifierFollowUp::Nothing => Ok(()),
            ReifierFollowUp::Adopt(reifier) => {
                let mut topic = self.load_topic(reifier)?;
                topic.topic_mut()?.reified = Some(survivor);
                self.stage(topic);
                Ok(())
            }
            ReifierFollowUp::MergeTopics(kept, incoming) => {
                // The incoming reifier reified the construct that was just absorbed. Clear that
                // pairing so the two reifiers can merge without a reified conflict.
                let mut topic = self.load_topic(incoming)?;
                topic.topic_mut()?.reified = None;
                self.stage(topic);
                self.merge(kept, incoming)?;
                Ok(())
            }
        }
    }

    /// Move `child` from the merged-away `old` parent to `new`, then check it for duplicates
    /// among its new siblings.
    fn reparent(
        &mut self,
        child: ConstructId,
        old: ConstructId,
        new: ConstructId,
    ) -> Result<(), TopicStoreError> {
        let Some(mut construct) = self.fetch(child)? else {
            return Ok(());
        };
        if construct.id != child || construct.parent == Some(new) {
            return Ok(());
        }
        construct.parent = Some(new);
        self.stage(construct);
        self.on_mutation(
            child,
            &MutationEvent::ParentChanged {
                old: Some(old),
                new,
            },
        )?;
        Ok(())
    }

    /// Remove an absorbed or deleted construct from its parent's child list.
    pub(crate) fn detach_from_parent(&mut self, child: &Construct) -> Result<(), TopicStoreError> {
        let Some(parent) = child.parent else {
            return Ok(());
        };
        let Some(mut owner) = self.fetch(parent)? else {
            return Ok(());
        };
        let removed = match (&mut owner.body, child.kind()) {
            (ConstructBody::Topic(t), ConstructKind::Name) => t.names.remove(&child.id),
            (ConstructBody::Topic(t), ConstructKind::Occurrence) => t.occurrences.remove(&child.id),
            (ConstructBody::Association(a), ConstructKind::Role) => a.roles.remove(&child.id),
            (ConstructBody::Name(n), ConstructKind::Variant) => n.variants.remove(&child.id),
            _ => false,
        };
        if removed {
            self.stage(owner);
        }
        Ok(())
    }

    /// After a topic merge, associations that differ only in which of the two (now identical)
    /// topics they referenced are duplicates. Two associations of the same type are merged when
    /// every role of the smaller one has a role in the larger one with the same player or the
    /// same type.
    fn suppress_duplicate_associations(
        &mut self,
        topic: ConstructId,
    ) -> Result<(), TopicStoreError> {
        loop {
            let topic = self.resolve(topic)?;
            let Some((keep, drop)) = self.duplicate_association_pair(topic)? else {
                return Ok(());
            };
            tracing::debug!(
                "[suppress_duplicate_associations] {} duplicates {} via {}",
                drop,
                keep,
                topic
            );
            self.merge(keep, drop)?;
        }
    }

    fn duplicate_association_pair(
        &mut self,
        topic: ConstructId,
    ) -> Result<Option<(ConstructId, ConstructId)>, TopicStoreError> {
        let tm = self.topicmap();
        let mut roles =
            self.query_constructs(&IndexQuery::new(tm).kind(ConstructKind::Role).typed(topic))?;
        for role in
            self.query_constructs(&IndexQuery::new(tm).kind(ConstructKind::Role).player(topic))?
        {
            if !roles.iter().any(|r| r.id == role.id) {
                roles.push(role);
            }
        }
        // Any two roles the topic takes part in, across different associations.
        for (i, r1) in roles.iter().enumerate() {
            for r2 in roles.iter().skip(i + 1) {
                let (Some(x), Some(y)) = (r1.parent, r2.parent) else {
                    continue;
                };
                let (x, y) = (self.resolve(x)?, self.resolve(y)?);
                if x == y {
                    continue;
                }
                if let Some(pair) = self.overlapping_associations(x, y)? {
                    return Ok(Some(pair));
                }
            }
        }
        Ok(None)
    }

    /// `Some((larger, smaller))` when the two associations share a type and the smaller one's
    /// roles all have a counterpart in the larger one.
    fn overlapping_associations(
        &mut self,
        x: ConstructId,
        y: ConstructId,
    ) -> Result<Option<(ConstructId, ConstructId)>, TopicStoreError> {
        let ax = self.load(x)?;
        let ay = self.load(y)?;
        if self.resolve(ax.association()?.r#type)? != self.resolve(ay.association()?.r#type)? {
            return Ok(None);
        }
        let (larger, smaller) = if ay.association()?.roles.len() > ax.association()?.roles.len() {
            (ay, ax)
        } else {
            (ax, ay)
        };
        let big = self.role_signature(&larger)?;
        let small = self.role_signature(&smaller)?;
        let covered = small.iter().all(|(s_type, s_player)| {
            big.iter()
                .any(|(b_type, b_player)| b_player == s_player || b_type == s_type)
        });
        Ok(covered.then_some((larger.id, smaller.id)))
    }

    pub(crate) fn resolve_opt(
        &self,
        id: Option<ConstructId>,
    ) -> Result<Option<ConstructId>, TopicStoreError> {
        id.map(|i| self.resolve(i)).transpose()
    }
}
