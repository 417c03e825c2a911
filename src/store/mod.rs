//! Backing store client interface.
//!
//! The engine talks to persistence only through [DocumentStore]: id and identifier fetches,
//! revision-checked puts and deletes, and the fixed vocabulary of secondary-index queries captured
//! by [IndexQuery]. Every call blocks the caller.
use sha2::{Digest, Sha256};
use std::fmt::Debug;

use crate::{
    document::Document,
    error::TopicStoreError,
    properties::{ConstructId, ConstructKind, Locator, Revision},
};

pub mod memory;
#[cfg(feature = "service")]
pub mod sqlite;
#[cfg(test)]
mod tests;

pub use memory::MemoryStore;
#[cfg(feature = "service")]
pub use sqlite::SqliteStore;

pub trait DocumentStore: Send + Sync + Debug {
    fn fetch_by_id(&self, id: &ConstructId) -> Result<Option<Document>, TopicStoreError>;

    /// The first document (by id) of `topicmap` holding `locator` as item identifier, subject
    /// identifier or subject locator.
    fn fetch_by_identifier(
        &self,
        topicmap: &ConstructId,
        locator: &Locator,
    ) -> Result<Option<Document>, TopicStoreError>;

    /// Write `doc`. `expected` must equal the revision the store currently holds for `doc.id`
    /// (`None` for a document that does not exist yet), otherwise the write is rejected with
    /// [TopicStoreError::RevisionConflict].
    fn put(&self, doc: &Document, expected: Option<&Revision>)
        -> Result<Revision, TopicStoreError>;

    fn delete(&self, id: &ConstructId, revision: &Revision) -> Result<(), TopicStoreError>;

    /// All documents matching `query`, ordered by id.
    fn query(&self, query: &IndexQuery) -> Result<Vec<Document>, TopicStoreError>;

    /// The topic map documents held by this store.
    fn topic_maps(&self) -> Result<Vec<Document>, TopicStoreError>;
}

/// Compute the revision a store hands out for the next write of `doc`.
pub fn next_revision(
    previous: Option<&Revision>,
    doc: &Document,
) -> Result<Revision, TopicStoreError> {
    let mut unrevisioned = doc.clone();
    unrevisioned.rev = None;
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&unrevisioned)?);
    if let Some(prev) = previous {
        hasher.update(prev.as_str().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    let generation = previous.map(|r| r.generation()).unwrap_or(0) + 1;
    Ok(Revision::new(generation, &digest[..32]))
}

/// Secondary-index lookup. Unset fields do not constrain the result. `scope` is an exact match
/// against the sorted theme list; `theme` matches any document whose scope contains the theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub topicmap: ConstructId,
    pub kind: Option<ConstructKind>,
    pub r#type: Option<ConstructId>,
    pub theme: Option<ConstructId>,
    pub scope: Option<Vec<ConstructId>>,
    pub value: Option<String>,
    pub datatype: Option<Locator>,
    pub parent: Option<ConstructId>,
    pub player: Option<ConstructId>,
    pub reifier: Option<ConstructId>,
    pub instance_of: Option<ConstructId>,
    pub identifier: Option<Locator>,
}

impl IndexQuery {
    pub fn new(topicmap: ConstructId) -> Self {
        IndexQuery {
            topicmap,
            kind: None,
            r#type: None,
            theme: None,
            scope: None,
            value: None,
            datatype: None,
            parent: None,
            player: None,
            reifier: None,
            instance_of: None,
            identifier: None,
        }
    }

    pub fn kind(mut self, kind: ConstructKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn typed(mut self, r#type: ConstructId) -> Self {
        self.r#type = Some(r#type);
        self
    }

    pub fn theme(mut self, theme: ConstructId) -> Self {
        self.theme = Some(theme);
        self
    }

    pub fn scope<'a, I: IntoIterator<Item = &'a ConstructId>>(mut self, scope: I) -> Self {
        let mut themes: Vec<ConstructId> = scope.into_iter().copied().collect();
        themes.sort();
        themes.dedup();
        self.scope = Some(themes);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn datatype(mut self, datatype: Locator) -> Self {
        self.datatype = Some(datatype);
        self
    }

    pub fn parent(mut self, parent: ConstructId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn player(mut self, player: ConstructId) -> Self {
        self.player = Some(player);
        self
    }

    pub fn reifier(mut self, reifier: ConstructId) -> Self {
        self.reifier = Some(reifier);
        self
    }

    pub fn instance_of(mut self, r#type: ConstructId) -> Self {
        self.instance_of = Some(r#type);
        self
    }

    pub fn identifier(mut self, locator: Locator) -> Self {
        self.identifier = Some(locator);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.topicmap == self.topicmap
            && self.kind.map_or(true, |k| doc.documenttype == k)
            && self.r#type.map_or(true, |t| doc.r#type == Some(t))
            && self.theme.map_or(true, |t| doc.scope.contains(&t))
            && self.scope.as_ref().map_or(true, |s| &doc.scope == s)
            && self
                .value
                .as_ref()
                .map_or(true, |v| doc.value.as_ref() == Some(v))
            && self
                .datatype
                .as_ref()
                .map_or(true, |d| doc.datatype.as_ref() == Some(d))
            && self.parent.map_or(true, |p| doc.parent == Some(p))
            && self.player.map_or(true, |p| doc.player == Some(p))
            && self.reifier.map_or(true, |r| doc.reifier == Some(r))
            && self.instance_of.map_or(true, |t| doc.types.contains(&t))
            && self
                .identifier
                .as_ref()
                .map_or(true, |l| doc.holds_identifier(l))
    }
}
