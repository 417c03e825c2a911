//! Consistency monitor.
//!
//! Every typed mutator stages its change and then reports a [MutationEvent] here. The monitor
//! decides whether the mutated construct now duplicates an existing one and, if so, merges the
//! two. Merging is never a step callers invoke for consistency; it falls out of ordinary mutation.
use super::txn::Transaction;
use crate::{
    error::TopicStoreError,
    event::MutationEvent,
    properties::{ConstructId, ConstructKind, IdentifierKind, Locator},
};

impl Transaction<'_> {
    /// Handle one identity-relevant mutation of `id`. Returns the canonical id of the mutated
    /// construct afterwards, which differs from `id` when it was merged away.
    pub(crate) fn on_mutation(
        &mut self,
        id: ConstructId,
        event: &MutationEvent,
    ) -> Result<ConstructId, TopicStoreError> {
        let id = self.resolve(id)?;
        tracing::debug!("[on_mutation] {} on {}", event, id);
        match event {
            MutationEvent::ItemIdentifierAdded(loc) => {
                self.check_identity(id, IdentifierKind::ItemIdentifier, loc)
            }
            MutationEvent::SubjectIdentifierAdded(loc) => {
                self.check_identity(id, IdentifierKind::SubjectIdentifier, loc)
            }
            MutationEvent::SubjectLocatorAdded(loc) => {
                self.check_identity(id, IdentifierKind::SubjectLocator, loc)
            }
            MutationEvent::ItemIdentifierRemoved(_)
            | MutationEvent::SubjectIdentifierRemoved(_)
            | MutationEvent::SubjectLocatorRemoved(_) => {
                self.check_still_identified(id)?;
                Ok(id)
            }
            MutationEvent::TypeSet { .. } | MutationEvent::PlayerSet { .. } => {
                if self.load(id)?.kind() == ConstructKind::Role {
                    self.settle_role(id)
                } else {
                    self.merge_into_equivalent(id)
                }
            }
            MutationEvent::ThemeAdded(_)
            | MutationEvent::ThemeRemoved(_)
            | MutationEvent::ValueChanged
            | MutationEvent::RolesChanged(_) => self.merge_into_equivalent(id),
            MutationEvent::ParentChanged { old, .. } => match self.find_equivalent(id)? {
                None => Ok(id),
                // A freshly attached construct absorbs the existing one.
                Some(existing) if old.is_none() => self.merge(id, existing),
                Some(existing) => self.merge(existing, id),
            },
            MutationEvent::ReifierSet { old, new } => {
                self.pair_reifier(id, *old, *new)?;
                Ok(id)
            }
            MutationEvent::ReifiedSet { old, new } => {
                self.pair_reified(id, *old, *new)?;
                Ok(id)
            }
        }
    }

    fn check_identity(
        &mut self,
        id: ConstructId,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<ConstructId, TopicStoreError> {
        let claimant = self.load(id)?;
        let Some(existing) = self.identity_holder(&claimant, kind, locator)? else {
            return Ok(id);
        };
        if claimant.is_topic() && existing.is_topic() && self.features().auto_merge {
            tracing::info!(
                "[check_identity] {} {} collides with topic {}, merging",
                kind,
                locator,
                existing.id
            );
            return self.merge(existing.id, claimant.id);
        }
        Err(TopicStoreError::IdentityConstraint {
            locator: locator.clone(),
            existing: existing.id,
            construct: claimant.id,
        })
    }

    fn check_still_identified(&mut self, id: ConstructId) -> Result<(), TopicStoreError> {
        let construct = self.load(id)?;
        if construct.is_topic() && construct.identifiers().is_empty() {
            return Err(TopicStoreError::model(format!(
                "topic {id} would be left without any identifier"
            )));
        }
        Ok(())
    }

    /// Merge the mutated construct into an existing equivalent one. Topics and topic maps have no
    /// key beyond their identifiers, which are handled separately.
    fn merge_into_equivalent(&mut self, id: ConstructId) -> Result<ConstructId, TopicStoreError> {
        let kind = self.load(id)?.kind();
        if matches!(kind, ConstructKind::Topic | ConstructKind::TopicMap) {
            return Ok(id);
        }
        match self.find_equivalent(id)? {
            Some(existing) => self.merge(existing, id),
            None => Ok(id),
        }
    }

    /// A role's key changed; so did the role signature of its association.
    fn settle_role(&mut self, role: ConstructId) -> Result<ConstructId, TopicStoreError> {
        let role = self.merge_into_equivalent(role)?;
        if let Some(association) = self.load(role)?.parent {
            self.on_mutation(association, &MutationEvent::RolesChanged(role))?;
        }
        self.resolve(role)
    }

    /// `id` now names `new` as its reifier. Clear the old reifier's back-reference and take the
    /// new reifier away from whatever it reified before.
    fn pair_reifier(
        &mut self,
        id: ConstructId,
        old: Option<ConstructId>,
        new: Option<ConstructId>,
    ) -> Result<(), TopicStoreError> {
        let old = self.resolve_opt(old)?;
        let new = self.resolve_opt(new)?;
        if let Some(previous) = old.filter(|o| Some(*o) != new) {
            if let Some(mut topic) = self.fetch(previous)? {
                let body = topic.topic_mut()?;
                if self.resolve_opt(body.reified)? == Some(id) {
                    body.reified = None;
                    self.stage(topic);
                }
            }
        }
        let Some(reifier) = new else {
            return Ok(());
        };
        let mut topic = self.load_topic(reifier)?;
        if let Some(before) = self.resolve_opt(topic.topic()?.reified)? {
            if before != id {
                tracing::debug!(
                    "[pair_reifier] {} no longer reifies {}, now reifies {}",
                    reifier,
                    before,
                    id
                );
                self.release_reified(before, reifier)?;
            }
        }
        topic.topic_mut()?.reified = Some(id);
        self.stage(topic);
        Ok(())
    }

    /// Topic `id` now reifies `new`. Mirror of [Self::pair_reifier] from the topic's side.
    fn pair_reified(
        &mut self,
        id: ConstructId,
        old: Option<ConstructId>,
        new: Option<ConstructId>,
    ) -> Result<(), TopicStoreError> {
        let old = self.resolve_opt(old)?;
        let new = self.resolve_opt(new)?;
        if let Some(previous) = old.filter(|o| Some(*o) != new) {
            self.release_reified(previous, id)?;
        }
        let Some(target) = new else {
            return Ok(());
        };
        let mut construct = self.load(target)?;
        if !construct.kind().is_reifiable() {
            return Err(TopicStoreError::model(format!(
                "{} {} cannot be reified",
                construct.kind(),
                target
            )));
        }
        if let Some(before) = self.resolve_opt(construct.reifier())? {
            if before != id {
                if let Some(mut topic) = self.fetch(before)? {
                    topic.topic_mut()?.reified = None;
                    self.stage(topic);
                }
            }
        }
        construct.set_reifier(Some(id))?;
        self.stage(construct);
        Ok(())
    }

    /// Clear `construct`'s reifier if it is still `reifier`.
    fn release_reified(
        &mut self,
        construct: ConstructId,
        reifier: ConstructId,
    ) -> Result<(), TopicStoreError> {
        let Some(mut reified) = self.fetch(construct)? else {
            return Ok(());
        };
        if self.resolve_opt(reified.reifier())? == Some(reifier) {
            reified.set_reifier(None)?;
            self.stage(reified);
        }
        Ok(())
    }
}
