//! Per-topic-map identity map.
//!
//! [ConstructCache] maps construct ids to arena [Slot]s and every known identifier to the
//! construct holding it. Live entries are bounded by a capacity and evicted least recently used
//! first; forwarding tombstones are never evicted so that ids of merged-away constructs keep
//! resolving for the lifetime of the topic map context.
use std::collections::BTreeMap;

use crate::{
    construct::{Construct, Slot},
    error::TopicStoreError,
    properties::{ConstructId, ConstructKind, IdentifierKind, Locator},
};

#[derive(Debug)]
pub struct ConstructCache {
    slots: BTreeMap<ConstructId, Slot>,
    identifiers: BTreeMap<(IdentifierKind, Locator), ConstructId>,
    recency: BTreeMap<u64, ConstructId>,
    stamps: BTreeMap<ConstructId, u64>,
    clock: u64,
    capacity: usize,
}

impl ConstructCache {
    pub fn new(capacity: usize) -> Self {
        ConstructCache {
            slots: BTreeMap::new(),
            identifiers: BTreeMap::new(),
            recency: BTreeMap::new(),
            stamps: BTreeMap::new(),
            clock: 0,
            capacity: capacity.max(1),
        }
    }

    /// Follow forwarding tombstones to the final survivor. Ids unknown to the cache resolve to
    /// themselves.
    pub fn resolve(&self, id: ConstructId) -> Result<ConstructId, TopicStoreError> {
        let mut current = id;
        for _ in 0..=self.slots.len() {
            match self.slots.get(&current).and_then(Slot::forwarded) {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
        Err(TopicStoreError::internal(format!(
            "forwarding cycle while resolving {id}"
        )))
    }

    pub fn forwarded(&self, id: &ConstructId) -> Option<ConstructId> {
        self.slots.get(id).and_then(Slot::forwarded)
    }

    /// The loaded construct stored under `id`. Does not follow tombstones.
    pub fn get(&mut self, id: &ConstructId) -> Option<&Construct> {
        let loaded = matches!(self.slots.get(id), Some(Slot::Live(c)) if c.loaded);
        if !loaded {
            return None;
        }
        self.touch(*id);
        self.slots.get(id).and_then(Slot::live)
    }

    pub fn peek(&self, id: &ConstructId) -> Option<&Construct> {
        self.slots.get(id).and_then(Slot::live).filter(|c| c.loaded)
    }

    /// Kind of a cached construct, stubs included.
    pub fn peek_kind(&self, id: &ConstructId) -> Option<ConstructKind> {
        self.slots.get(id).and_then(Slot::live).map(Construct::kind)
    }

    pub fn contains_live(&self, id: &ConstructId) -> bool {
        self.peek(id).is_some()
    }

    /// Install the current state of a construct. Identifiers it no longer holds are released,
    /// identifiers it holds now point at it, and unknown neighbours are stubbed.
    pub fn insert(&mut self, construct: Construct) {
        let id = construct.id;
        self.release_identifiers(&id);
        for key in construct.identifiers() {
            self.identifiers.insert(key, id);
        }
        if construct.loaded {
            for (neighbour, kind) in construct.typed_neighbours() {
                if !self.slots.contains_key(&neighbour) {
                    if let Some(stub) = Construct::stub(neighbour, construct.topicmap, kind) {
                        self.slots.insert(neighbour, Slot::Live(stub));
                        self.touch(neighbour);
                    }
                }
            }
        }
        self.slots.insert(id, Slot::Live(construct));
        self.touch(id);
        self.evict_overflow(&id);
    }

    /// Turn `absorbed` into a forwarding tombstone. Its identifiers were unioned into the survivor
    /// by the merge, so only entries still pointing at `absorbed` are dropped.
    pub fn tombstone(&mut self, absorbed: ConstructId, survivor: ConstructId) {
        self.release_identifiers(&absorbed);
        self.forget_recency(&absorbed);
        self.slots.insert(absorbed, Slot::Forwarded(survivor));
    }

    /// Drop every trace of a deleted construct.
    pub fn purge(&mut self, id: &ConstructId) {
        self.release_identifiers(id);
        self.forget_recency(id);
        self.slots.remove(id);
    }

    /// Drop a possibly stale live entry so the next access refetches it. Tombstones stay.
    pub fn evict(&mut self, id: &ConstructId) {
        if matches!(self.slots.get(id), Some(Slot::Live(_))) {
            self.purge(id);
        }
    }

    /// The construct registered for an identifier, if it still holds it.
    pub fn by_identifier(&mut self, kind: IdentifierKind, locator: &Locator) -> Option<ConstructId> {
        let key = (kind, locator.clone());
        let id = *self.identifiers.get(&key)?;
        let holder = self.resolve(id).ok()?;
        let holds = self
            .peek(&holder)
            .is_some_and(|c| c.holds(kind, locator));
        if holds {
            return Some(holder);
        }
        tracing::debug!(
            "[ConstructCache::by_identifier] dropping stale entry {} -> {}",
            locator,
            id
        );
        self.identifiers.remove(&key);
        None
    }

    pub fn live(&self) -> impl Iterator<Item = &Construct> {
        self.slots
            .values()
            .filter_map(Slot::live)
            .filter(|c| c.loaded)
    }

    pub fn tombstones(&self) -> Vec<(ConstructId, ConstructId)> {
        self.slots
            .iter()
            .filter_map(|(id, slot)| slot.forwarded().map(|target| (*id, target)))
            .collect()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.stamps.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.identifiers.clear();
        self.recency.clear();
        self.stamps.clear();
    }

    fn release_identifiers(&mut self, id: &ConstructId) {
        self.identifiers.retain(|_, holder| holder != id);
    }

    fn touch(&mut self, id: ConstructId) {
        self.clock += 1;
        if let Some(old) = self.stamps.insert(id, self.clock) {
            self.recency.remove(&old);
        }
        self.recency.insert(self.clock, id);
    }

    fn forget_recency(&mut self, id: &ConstructId) {
        if let Some(stamp) = self.stamps.remove(id) {
            self.recency.remove(&stamp);
        }
    }

    fn evict_overflow(&mut self, keep: &ConstructId) {
        while self.stamps.len() > self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.stamps.remove(&oldest);
            if &oldest == keep {
                self.recency.insert(self.clock, oldest);
                self.stamps.insert(oldest, self.clock);
                break;
            }
            self.release_identifiers(&oldest);
            self.slots.remove(&oldest);
            tracing::trace!("[ConstructCache] evicted {}", oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{ConstructBody, TopicBody};

    fn topic(tm: ConstructId, sid: &str) -> Construct {
        let mut body = TopicBody::default();
        body.subject_identifiers
            .insert(Locator::parse(sid).expect("valid"));
        Construct::new(ConstructId::new(tm), tm, Some(tm), ConstructBody::Topic(body))
    }

    #[test]
    fn tombstones_resolve_transitively_and_survive_eviction() {
        let tm = ConstructId::new_topic_map();
        let mut cache = ConstructCache::new(1);
        let (a, b, c) = (topic(tm, "http://x/a"), topic(tm, "http://x/b"), topic(tm, "http://x/c"));
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        cache.insert(a);
        cache.insert(b);
        cache.tombstone(a_id, b_id);
        cache.insert(c);
        cache.tombstone(b_id, c_id);

        assert_eq!(cache.resolve(a_id).expect("acyclic"), c_id);
        assert_eq!(cache.live_count(), 1);
        assert_eq!(cache.tombstones().len(), 2);
    }

    #[test]
    fn identifier_lookup_verifies_holder() {
        let tm = ConstructId::new_topic_map();
        let mut cache = ConstructCache::new(8);
        let mut t = topic(tm, "http://x/a");
        let loc = Locator::parse("http://x/a").expect("valid");
        cache.insert(t.clone());
        assert_eq!(
            cache.by_identifier(IdentifierKind::SubjectIdentifier, &loc),
            Some(t.id)
        );
        assert_eq!(cache.by_identifier(IdentifierKind::ItemIdentifier, &loc), None);

        t.topic_mut().expect("topic").subject_identifiers.clear();
        t.item_identifiers
            .insert(Locator::parse("http://x/iid").expect("valid"));
        cache.insert(t);
        assert_eq!(
            cache.by_identifier(IdentifierKind::SubjectIdentifier, &loc),
            None
        );
    }

    #[test]
    fn loading_a_construct_stubs_its_neighbours() {
        let tm = ConstructId::new_topic_map();
        let mut cache = ConstructCache::new(8);
        let mut t = topic(tm, "http://x/a");
        let name = ConstructId::new(tm);
        t.topic_mut().expect("topic").names.insert(name);
        cache.insert(t);
        assert_eq!(cache.peek_kind(&name), Some(ConstructKind::Name));
        assert!(cache.get(&name).is_none(), "stubs are not loaded");
    }
}
