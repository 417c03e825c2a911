//! Staging overlay for one mutating call.
//!
//! A [Transaction] reads through itself, then the construct cache, then the backing store. Every
//! change a call makes, including the complete merge cascade it triggers, is staged here first.
//! Dropping the transaction before [Transaction::commit] discards all of it. Commit writes
//! survivors before deleting absorbed constructs and mirrors every successful write into the
//! cache, so cache and store agree after each individual write.
use std::collections::{BTreeMap, BTreeSet};

use super::cache::ConstructCache;
use crate::{
    config::Features,
    construct::Construct,
    document::Document,
    error::TopicStoreError,
    event::StoreEvent,
    properties::{ConstructId, ConstructKind, Revision},
    store::{DocumentStore, IndexQuery},
};

/// Merge cascades nest (duplicate suppression merges associations, which merge roles, which may
/// merge reifier topics). Anything deeper than this is a cycle.
const MAX_CASCADE_DEPTH: usize = 128;

pub(crate) struct Transaction<'a> {
    topicmap: ConstructId,
    store: &'a dyn DocumentStore,
    cache: &'a mut ConstructCache,
    features: Features,
    staged: BTreeMap<ConstructId, Construct>,
    order: Vec<ConstructId>,
    created: BTreeSet<ConstructId>,
    removed: BTreeMap<ConstructId, Option<Revision>>,
    forwarded: BTreeMap<ConstructId, ConstructId>,
    notices: Vec<StoreEvent>,
    depth: usize,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        topicmap: ConstructId,
        store: &'a dyn DocumentStore,
        cache: &'a mut ConstructCache,
        features: Features,
    ) -> Self {
        Transaction {
            topicmap,
            store,
            cache,
            features,
            staged: BTreeMap::new(),
            order: Vec::new(),
            created: BTreeSet::new(),
            removed: BTreeMap::new(),
            forwarded: BTreeMap::new(),
            notices: Vec::new(),
            depth: 0,
        }
    }

    pub(crate) fn topicmap(&self) -> ConstructId {
        self.topicmap
    }

    pub(crate) fn features(&self) -> Features {
        self.features
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.store
    }

    pub(crate) fn cache(&mut self) -> &mut ConstructCache {
        &mut *self.cache
    }

    /// Follow forwarding first through merges staged in this transaction, then through committed
    /// tombstones, until a construct that was not merged away.
    pub(crate) fn resolve(&self, id: ConstructId) -> Result<ConstructId, TopicStoreError> {
        let limit = self.forwarded.len() + self.cache.slot_count() + 1;
        let mut current = id;
        for _ in 0..=limit {
            if let Some(next) = self.forwarded.get(&current) {
                current = *next;
                continue;
            }
            match self.cache.forwarded(&current) {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
        Err(TopicStoreError::internal(format!(
            "forwarding cycle while resolving {id}"
        )))
    }

    pub(crate) fn is_gone(&self, id: &ConstructId) -> bool {
        self.removed.contains_key(id) || self.forwarded.contains_key(id)
    }

    /// Current state of the canonical construct behind `id`, or `None` if it does not exist (or
    /// belongs to another topic map).
    pub(crate) fn fetch(&mut self, id: ConstructId) -> Result<Option<Construct>, TopicStoreError> {
        let id = self.resolve(id)?;
        if self.removed.contains_key(&id) {
            return Ok(None);
        }
        if let Some(c) = self.staged.get(&id) {
            return Ok(Some(c.clone()));
        }
        if let Some(c) = self.cache.get(&id) {
            return Ok((c.topicmap == self.topicmap).then(|| c.clone()));
        }
        let Some(doc) = self.store.fetch_by_id(&id)? else {
            return Ok(None);
        };
        let construct = Construct::try_from(doc)?;
        if construct.topicmap != self.topicmap {
            return Ok(None);
        }
        tracing::debug!("[Transaction::fetch] loaded {} {}", construct.kind(), id);
        self.cache.insert(construct.clone());
        Ok(Some(construct))
    }

    pub(crate) fn load(&mut self, id: ConstructId) -> Result<Construct, TopicStoreError> {
        self.fetch(id)?
            .ok_or_else(|| TopicStoreError::NotFound(format!("construct {id}")))
    }

    pub(crate) fn load_kind(
        &mut self,
        id: ConstructId,
        kind: ConstructKind,
    ) -> Result<Construct, TopicStoreError> {
        let resolved = self.resolve(id)?;
        if let Some(cached) = self.cache.peek_kind(&resolved) {
            if cached != kind && !self.staged.contains_key(&resolved) {
                return Err(TopicStoreError::model(format!(
                    "{id} is a {cached}, expected a {kind}"
                )));
            }
        }
        let construct = self.load(resolved)?;
        if construct.kind() != kind {
            return Err(TopicStoreError::model(format!(
                "{id} is a {}, expected a {kind}",
                construct.kind()
            )));
        }
        Ok(construct)
    }

    pub(crate) fn load_topic(&mut self, id: ConstructId) -> Result<Construct, TopicStoreError> {
        self.load_kind(id, ConstructKind::Topic)
    }

    /// Record the new state of a construct.
    pub(crate) fn stage(&mut self, construct: Construct) {
        let id = construct.id;
        if !self.staged.contains_key(&id) {
            self.order.push(id);
        }
        self.staged.insert(id, construct);
    }

    pub(crate) fn create(&mut self, construct: Construct) {
        tracing::debug!(
            "[Transaction::create] new {} {}",
            construct.kind(),
            construct.id
        );
        self.created.insert(construct.id);
        self.stage(construct);
    }

    /// Forget a construct created in this transaction as if it was never staged.
    pub(crate) fn discard(&mut self, id: &ConstructId) {
        if self.created.remove(id) {
            self.staged.remove(id);
            self.order.retain(|o| o != id);
        }
    }

    /// Schedule deletion of a construct.
    pub(crate) fn remove(&mut self, id: ConstructId) -> Result<(), TopicStoreError> {
        let construct = self.load(id)?;
        self.staged.remove(&construct.id);
        let revision = if self.created.remove(&construct.id) {
            None
        } else {
            construct.revision
        };
        self.removed.insert(construct.id, revision);
        Ok(())
    }

    /// Delete `absorbed` and make every later lookup of it land on `survivor`.
    pub(crate) fn forward(
        &mut self,
        absorbed: ConstructId,
        survivor: ConstructId,
    ) -> Result<(), TopicStoreError> {
        if absorbed == survivor {
            return Err(TopicStoreError::internal(format!(
                "cannot forward {absorbed} to itself"
            )));
        }
        self.remove(absorbed)?;
        self.forwarded.insert(absorbed, survivor);
        self.notices.push(StoreEvent::Merged { absorbed, survivor });
        Ok(())
    }

    /// Ids of the canonical constructs matching `query`, store results overlaid with this
    /// transaction's staged changes.
    pub(crate) fn query(&mut self, query: &IndexQuery) -> Result<Vec<ConstructId>, TopicStoreError> {
        let mut hits = BTreeSet::new();
        for doc in self.store.query(query)? {
            let id = doc.id;
            if self.is_gone(&id) || self.cache.forwarded(&id).is_some() {
                continue;
            }
            if let Some(staged) = self.staged.get(&id) {
                if query.matches(&Document::from(staged)) {
                    hits.insert(id);
                }
                continue;
            }
            if !self.cache.contains_live(&id) {
                self.cache.insert(Construct::try_from(doc)?);
            }
            hits.insert(id);
        }
        for (id, staged) in self.staged.iter() {
            if query.matches(&Document::from(staged)) {
                hits.insert(*id);
            }
        }
        Ok(hits.into_iter().collect())
    }

    pub(crate) fn query_constructs(
        &mut self,
        query: &IndexQuery,
    ) -> Result<Vec<Construct>, TopicStoreError> {
        let ids = self.query(query)?;
        ids.into_iter().map(|id| self.load(id)).collect()
    }

    pub(crate) fn descend(&mut self) -> Result<(), TopicStoreError> {
        self.depth += 1;
        if self.depth > MAX_CASCADE_DEPTH {
            return Err(TopicStoreError::internal(
                "merge cascade exceeded its depth limit",
            ));
        }
        Ok(())
    }

    pub(crate) fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn has_changes(&self) -> bool {
        !self.staged.is_empty() || !self.removed.is_empty()
    }

    /// Persist staged state. Survivors are written before absorbed constructs are deleted; a
    /// failed write evicts the affected cache entry and surfaces the store's error unchanged.
    pub(crate) fn commit(mut self) -> Result<Vec<StoreEvent>, TopicStoreError> {
        let mut notices = Vec::new();
        for id in std::mem::take(&mut self.order) {
            let Some(mut construct) = self.staged.remove(&id) else {
                continue;
            };
            let doc = Document::from(&construct);
            match self.store.put(&doc, construct.revision.as_ref()) {
                Ok(rev) => {
                    construct.revision = Some(rev);
                    construct.loaded = true;
                    self.cache.insert(construct);
                    notices.push(StoreEvent::Saved(id));
                }
                Err(e) => {
                    tracing::warn!("[Transaction::commit] write of {} failed: {}", id, e);
                    self.cache.evict(&id);
                    return Err(e);
                }
            }
        }
        for (id, revision) in std::mem::take(&mut self.removed) {
            if let Some(rev) = revision {
                if let Err(e) = self.store.delete(&id, &rev) {
                    tracing::warn!("[Transaction::commit] delete of {} failed: {}", id, e);
                    self.cache.evict(&id);
                    return Err(e);
                }
            }
            match self.forwarded.get(&id) {
                Some(survivor) => self.cache.tombstone(id, *survivor),
                None => {
                    self.cache.purge(&id);
                    notices.push(StoreEvent::Removed(id));
                }
            }
        }
        notices.append(&mut self.notices);
        Ok(notices)
    }
}
