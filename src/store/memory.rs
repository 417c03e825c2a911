use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use super::{next_revision, DocumentStore, IndexQuery};
use crate::{
    document::Document,
    error::TopicStoreError,
    properties::{ConstructId, ConstructKind, Locator, Revision},
};

/// In-process [DocumentStore]. Besides serving as the default backend it lets tests simulate an
/// outage ([MemoryStore::fail_next_writes]) and a concurrent writer ([MemoryStore::touch]).
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<ConstructId, Document>>,
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Reject the next `count` puts or deletes with [TopicStoreError::Unavailable].
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Rewrite a document unchanged under a fresh revision, as another writer would.
    pub fn touch(&self, id: &ConstructId) -> Result<Revision, TopicStoreError> {
        let mut docs = self.docs.write();
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| TopicStoreError::NotFound(format!("document {id}")))?;
        let rev = next_revision(doc.rev.as_ref(), doc)?;
        doc.rev = Some(rev.clone());
        Ok(rev)
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn check_available(&self) -> Result<(), TopicStoreError> {
        let outcome = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match outcome {
            Ok(_) => Err(TopicStoreError::Unavailable(
                "memory store write rejected".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }
}

impl DocumentStore for MemoryStore {
    fn fetch_by_id(&self, id: &ConstructId) -> Result<Option<Document>, TopicStoreError> {
        Ok(self.docs.read().get(id).cloned())
    }

    fn fetch_by_identifier(
        &self,
        topicmap: &ConstructId,
        locator: &Locator,
    ) -> Result<Option<Document>, TopicStoreError> {
        Ok(self
            .docs
            .read()
            .values()
            .find(|doc| &doc.topicmap == topicmap && doc.holds_identifier(locator))
            .cloned())
    }

    fn put(
        &self,
        doc: &Document,
        expected: Option<&Revision>,
    ) -> Result<Revision, TopicStoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        let actual = docs.get(&doc.id).and_then(|d| d.rev.clone());
        if actual.as_ref() != expected {
            return Err(TopicStoreError::RevisionConflict {
                id: doc.id,
                expected: expected.cloned(),
                actual,
            });
        }
        let rev = next_revision(expected, doc)?;
        let mut stored = doc.clone();
        stored.rev = Some(rev.clone());
        docs.insert(doc.id, stored);
        Ok(rev)
    }

    fn delete(&self, id: &ConstructId, revision: &Revision) -> Result<(), TopicStoreError> {
        self.check_available()?;
        let mut docs = self.docs.write();
        let actual = match docs.get(id) {
            Some(doc) => doc.rev.clone(),
            None => return Err(TopicStoreError::NotFound(format!("document {id}"))),
        };
        if actual.as_ref() != Some(revision) {
            return Err(TopicStoreError::RevisionConflict {
                id: *id,
                expected: Some(revision.clone()),
                actual,
            });
        }
        docs.remove(id);
        Ok(())
    }

    fn query(&self, query: &IndexQuery) -> Result<Vec<Document>, TopicStoreError> {
        Ok(self
            .docs
            .read()
            .values()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect())
    }

    fn topic_maps(&self) -> Result<Vec<Document>, TopicStoreError> {
        Ok(self
            .docs
            .read()
            .values()
            .filter(|doc| doc.documenttype == ConstructKind::TopicMap)
            .cloned()
            .collect())
    }
}
