//! Candidate lookup: does a construct equivalent to this one already exist?
//!
//! Equivalence keys per kind:
//!
//! | kind | key |
//! |---|---|
//! | Topic | any shared identifier (item identifier ~ subject identifier, subject locator) |
//! | Name | type, value, scope, parent |
//! | Occurrence | type, value, datatype, scope, parent |
//! | Variant | value, datatype, scope, parent |
//! | Role | type, player, parent |
//! | Association | type, scope, multiset of role (type, player) pairs |
//!
//! Once the invariants hold there is at most one match besides the construct itself. When more
//! turn up the first (lowest id) wins and the merge cascade picks up the rest.
use super::txn::Transaction;
use crate::{
    construct::{Construct, ConstructBody},
    error::TopicStoreError,
    properties::{ConstructId, ConstructKind, IdentifierKind, Locator},
    store::IndexQuery,
};

impl Transaction<'_> {
    /// Find an existing construct equivalent to `id` under its full defining key.
    pub(crate) fn find_equivalent(
        &mut self,
        id: ConstructId,
    ) -> Result<Option<ConstructId>, TopicStoreError> {
        let construct = self.load(id)?;
        let tm = self.topicmap();
        let parent = construct.parent.map(|p| self.resolve(p)).transpose()?;
        let candidates = match &construct.body {
            ConstructBody::TopicMap(_) => return Ok(None),
            ConstructBody::Topic(_) => return self.find_topic_by_identity(&construct),
            ConstructBody::Name(n) => {
                let query = IndexQuery::new(tm)
                    .kind(ConstructKind::Name)
                    .typed(self.resolve(n.r#type)?)
                    .value(n.value.clone())
                    .scope(&self.resolve_all(n.scope.iter())?);
                self.query(&with_parent(query, parent))?
            }
            ConstructBody::Occurrence(o) => {
                let query = IndexQuery::new(tm)
                    .kind(ConstructKind::Occurrence)
                    .typed(self.resolve(o.r#type)?)
                    .value(o.value.clone())
                    .datatype(o.datatype.clone())
                    .scope(&self.resolve_all(o.scope.iter())?);
                self.query(&with_parent(query, parent))?
            }
            ConstructBody::Variant(v) => {
                let query = IndexQuery::new(tm)
                    .kind(ConstructKind::Variant)
                    .value(v.value.clone())
                    .datatype(v.datatype.clone())
                    .scope(&self.resolve_all(v.scope.iter())?);
                self.query(&with_parent(query, parent))?
            }
            ConstructBody::Role(r) => {
                let query = IndexQuery::new(tm)
                    .kind(ConstructKind::Role)
                    .typed(self.resolve(r.r#type)?)
                    .player(self.resolve(r.player)?);
                self.query(&with_parent(query, parent))?
            }
            ConstructBody::Association(a) => {
                let query = IndexQuery::new(tm)
                    .kind(ConstructKind::Association)
                    .typed(self.resolve(a.r#type)?)
                    .scope(&self.resolve_all(a.scope.iter())?);
                let signature = self.role_signature(&construct)?;
                let mut same = Vec::new();
                for candidate in self.query(&query)? {
                    if candidate == construct.id {
                        continue;
                    }
                    let other = self.load(candidate)?;
                    if self.role_signature(&other)? == signature {
                        same.push(candidate);
                    }
                }
                same
            }
        };
        Ok(first_other(&construct, candidates))
    }

    /// Another topic sharing an identity with `topic`.
    fn find_topic_by_identity(
        &mut self,
        topic: &Construct,
    ) -> Result<Option<ConstructId>, TopicStoreError> {
        let body = topic.topic()?;
        let mut probes: Vec<(IdentifierKind, Locator)> = Vec::new();
        probes.extend(
            topic
                .item_identifiers
                .iter()
                .map(|l| (IdentifierKind::ItemIdentifier, l.clone())),
        );
        probes.extend(
            body.subject_identifiers
                .iter()
                .map(|l| (IdentifierKind::SubjectIdentifier, l.clone())),
        );
        probes.extend(
            body.subject_locators
                .iter()
                .map(|l| (IdentifierKind::SubjectLocator, l.clone())),
        );
        for (kind, locator) in probes {
            if let Some(other) = self.identity_holder(topic, kind, &locator)? {
                if other.is_topic() {
                    return Ok(Some(other.id));
                }
            }
        }
        Ok(None)
    }

    /// The construct other than `claimant` that conflicts with `claimant` holding `locator` as
    /// `kind`. Item identifiers collide with any construct's item identifier; between topics, an
    /// item identifier and a subject identifier denote the same subject. Subject locators only
    /// collide with subject locators.
    pub(crate) fn identity_holder(
        &mut self,
        claimant: &Construct,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<Option<Construct>, TopicStoreError> {
        let holders = self.holders(locator)?;
        let mut conflicts = holders.into_iter().filter(|other| {
            if other.id == claimant.id {
                return false;
            }
            match kind {
                IdentifierKind::ItemIdentifier => {
                    other.holds(IdentifierKind::ItemIdentifier, locator)
                        || (claimant.is_topic()
                            && other.holds(IdentifierKind::SubjectIdentifier, locator))
                }
                IdentifierKind::SubjectIdentifier => {
                    other.is_topic()
                        && (other.holds(IdentifierKind::SubjectIdentifier, locator)
                            || other.holds(IdentifierKind::ItemIdentifier, locator))
                }
                IdentifierKind::SubjectLocator => {
                    other.holds(IdentifierKind::SubjectLocator, locator)
                }
            }
        });
        let first = conflicts.next();
        if conflicts.next().is_some() {
            tracing::warn!(
                "[identity_holder] {} is held by more than one construct besides {}",
                locator,
                claimant.id
            );
        }
        Ok(first)
    }

    /// The construct holding `locator` as `kind`. The identifier map and the store's identifier
    /// lookup are tried first; a hit that no longer holds the identifier counts as a miss.
    pub(crate) fn by_identifier(
        &mut self,
        kind: IdentifierKind,
        locator: &Locator,
    ) -> Result<Option<Construct>, TopicStoreError> {
        if let Some(id) = self.cache().by_identifier(kind, locator) {
            if let Some(hit) = self.fetch(id)?.filter(|c| c.holds(kind, locator)) {
                return Ok(Some(hit));
            }
        }
        let tm = self.topicmap();
        if let Some(doc) = self.store().fetch_by_identifier(&tm, locator)? {
            if let Some(hit) = self.fetch(doc.id)?.filter(|c| c.holds(kind, locator)) {
                return Ok(Some(hit));
            }
        }
        Ok(self
            .holders(locator)?
            .into_iter()
            .find(|c| c.holds(kind, locator)))
    }

    /// Every canonical construct holding `locator` in any identifier role.
    pub(crate) fn holders(&mut self, locator: &Locator) -> Result<Vec<Construct>, TopicStoreError> {
        let query = IndexQuery::new(self.topicmap()).identifier(locator.clone());
        self.query_constructs(&query)
    }

    /// Sorted (role type, player) pairs of an association, with every reference resolved.
    pub(crate) fn role_signature(
        &mut self,
        association: &Construct,
    ) -> Result<Vec<(ConstructId, ConstructId)>, TopicStoreError> {
        let mut signature = Vec::new();
        for role_id in association.association()?.roles.iter() {
            let Some(role) = self.fetch(*role_id)? else {
                continue;
            };
            let body = role.role()?;
            signature.push((self.resolve(body.r#type)?, self.resolve(body.player)?));
        }
        signature.sort();
        Ok(signature)
    }

    pub(crate) fn resolve_all<'i, I: Iterator<Item = &'i ConstructId>>(
        &self,
        ids: I,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        ids.map(|id| self.resolve(*id)).collect()
    }
}

fn with_parent(query: IndexQuery, parent: Option<ConstructId>) -> IndexQuery {
    match parent {
        Some(p) => query.parent(p),
        None => query,
    }
}

fn first_other(construct: &Construct, candidates: Vec<ConstructId>) -> Option<ConstructId> {
    let mut others = candidates.into_iter().filter(|c| *c != construct.id);
    let first = others.next();
    if others.next().is_some() {
        tracing::warn!(
            "[find_equivalent] more than one {} equivalent to {}; merging with the first",
            construct.kind(),
            construct.id
        );
    }
    first
}
