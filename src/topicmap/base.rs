use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::{cache::ConstructCache, txn::Transaction};
use crate::{
    config::{Features, StoreConfig},
    construct::{Construct, ConstructBody, TopicMapBody},
    document::Document,
    error::TopicStoreError,
    event::StoreEvent,
    properties::{ConstructId, ConstructKind, IdentifierKind, Locator},
    store::{DocumentStore, IndexQuery},
};

/// One topic map: its identity, its construct cache and the store it persists to.
///
/// All mutation runs synchronously on the caller's thread. A `TopicMap` is meant to have a single
/// writer; two contexts opened on the same topic map see each other's writes only as
/// [TopicStoreError::RevisionConflict]s, which [TopicMap::retrying] resolves.
#[derive(Debug)]
pub struct TopicMap {
    pub(crate) id: ConstructId,
    locator: Locator,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) cache: ConstructCache,
    config: StoreConfig,
    notifier: Option<UnboundedSender<StoreEvent>>,
    removed: bool,
}

impl TopicMap {
    /// Persist a fresh topic map document and return its context.
    pub(crate) fn create(
        store: Arc<dyn DocumentStore>,
        locator: Locator,
        config: StoreConfig,
    ) -> Result<TopicMap, TopicStoreError> {
        let id = ConstructId::new_topic_map();
        let mut construct = Construct::new(
            id,
            id,
            None,
            ConstructBody::TopicMap(TopicMapBody {
                locator: locator.clone(),
                reifier: None,
            }),
        );
        construct.revision = Some(store.put(&Document::from(&construct), None)?);
        tracing::info!("[TopicMap::create] {} as {}", locator, id);
        let mut cache = ConstructCache::new(config.cache_capacity);
        cache.insert(construct);
        Ok(TopicMap {
            id,
            locator,
            store,
            cache,
            config,
            notifier: None,
            removed: false,
        })
    }

    /// Open the topic map stored as `doc`.
    pub(crate) fn open(
        store: Arc<dyn DocumentStore>,
        doc: Document,
        config: StoreConfig,
    ) -> Result<TopicMap, TopicStoreError> {
        let construct = Construct::try_from(doc)?;
        let ConstructBody::TopicMap(body) = &construct.body else {
            return Err(TopicStoreError::model(format!(
                "{} is a {}, not a topic map",
                construct.id,
                construct.kind()
            )));
        };
        let locator = body.locator.clone();
        let id = construct.id;
        let mut cache = ConstructCache::new(config.cache_capacity);
        cache.insert(construct);
        tracing::debug!("[TopicMap::open] {} as {}", locator, id);
        Ok(TopicMap {
            id,
            locator,
            store,
            cache,
            config,
            notifier: None,
            removed: false,
        })
    }

    pub fn id(&self) -> ConstructId {
        self.id
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn features(&self) -> Features {
        self.config.features
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn cache(&self) -> &ConstructCache {
        &self.cache
    }

    /// Receive a [StoreEvent] for every write, delete and merge committed from now on. A new
    /// subscription replaces the previous one.
    pub fn subscribe(&mut self) -> UnboundedReceiver<StoreEvent> {
        let (tx, rx) = unbounded_channel();
        self.notifier = Some(tx);
        rx
    }

    /// Run `op` up to `attempts` times while it fails with a retryable error. The cache entry a
    /// failed write touched is evicted before each retry, so the next attempt works from the
    /// store's current revision.
    pub fn retrying<T, F>(&mut self, attempts: usize, mut op: F) -> Result<T, TopicStoreError>
    where
        F: FnMut(&mut TopicMap) -> Result<T, TopicStoreError>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(self) {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        "[TopicMap::retrying] attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    if let TopicStoreError::RevisionConflict { id, .. } = &e {
                        self.cache.evict(id);
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn ensure_open(&self) -> Result<(), TopicStoreError> {
        if self.removed {
            return Err(TopicStoreError::internal(format!(
                "topic map {} was removed",
                self.locator
            )));
        }
        Ok(())
    }

    /// Run a mutating operation in a fresh [Transaction] and commit it. An error from `op` drops
    /// every staged change; nothing reaches the store or the cache.
    pub(crate) fn mutate<T, F>(&mut self, op: F) -> Result<T, TopicStoreError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, TopicStoreError>,
    {
        self.ensure_open()?;
        if self.config.features.read_only {
            return Err(TopicStoreError::ReadOnly);
        }
        let mut txn = Transaction::new(
            self.id,
            self.store.as_ref(),
            &mut self.cache,
            self.config.features,
        );
        let out = op(&mut txn)?;
        if !txn.has_changes() {
            return Ok(out);
        }
        let notices = txn.commit()?;
        self.publish(notices);
        Ok(out)
    }

    /// Run a read-only operation. Whatever it loads stays cached.
    pub(crate) fn read<T, F>(&mut self, op: F) -> Result<T, TopicStoreError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, TopicStoreError>,
    {
        self.ensure_open()?;
        let mut txn = Transaction::new(
            self.id,
            self.store.as_ref(),
            &mut self.cache,
            self.config.features,
        );
        op(&mut txn)
    }

    fn publish(&mut self, notices: Vec<StoreEvent>) {
        let delivered = match &self.notifier {
            Some(tx) => notices.into_iter().all(|notice| tx.send(notice).is_ok()),
            None => return,
        };
        if !delivered {
            tracing::debug!("[TopicMap::publish] subscriber went away, unsubscribing");
            self.notifier = None;
        }
    }

    pub(crate) fn mark_removed(&mut self) {
        self.removed = true;
        self.notifier = None;
        self.cache.clear();
    }

    /// Follow merge forwarding to the surviving construct.
    pub fn resolve(&mut self, id: ConstructId) -> Result<ConstructId, TopicStoreError> {
        self.read(|txn| txn.resolve(id))
    }

    /// Current state of the construct behind `id`, following merges.
    pub fn get(&mut self, id: ConstructId) -> Result<Option<Construct>, TopicStoreError> {
        self.read(|txn| txn.fetch(id))
    }

    pub fn construct_by_item_identifier(
        &mut self,
        locator: &Locator,
    ) -> Result<Option<Construct>, TopicStoreError> {
        self.read(|txn| txn.by_identifier(IdentifierKind::ItemIdentifier, locator))
    }

    pub fn topic_by_subject_identifier(
        &mut self,
        locator: &Locator,
    ) -> Result<Option<Construct>, TopicStoreError> {
        self.read(|txn| txn.by_identifier(IdentifierKind::SubjectIdentifier, locator))
    }

    pub fn topic_by_subject_locator(
        &mut self,
        locator: &Locator,
    ) -> Result<Option<Construct>, TopicStoreError> {
        self.read(|txn| txn.by_identifier(IdentifierKind::SubjectLocator, locator))
    }

    /// Ids of the surviving constructs matching `query`. The query's topic map is replaced by
    /// this one.
    pub fn query(&mut self, query: &IndexQuery) -> Result<Vec<ConstructId>, TopicStoreError> {
        let mut query = query.clone();
        query.topicmap = self.id;
        self.read(|txn| txn.query(&query))
    }

    pub fn find(&mut self, query: &IndexQuery) -> Result<Vec<Construct>, TopicStoreError> {
        let mut query = query.clone();
        query.topicmap = self.id;
        self.read(|txn| txn.query_constructs(&query))
    }

    pub fn topics(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.query(&IndexQuery::new(self.id).kind(ConstructKind::Topic))
    }

    pub fn associations(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.query(&IndexQuery::new(self.id).kind(ConstructKind::Association))
    }

    pub fn names_of(&mut self, topic: ConstructId) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.read(|txn| {
            let topic = txn.load_topic(topic)?;
            txn.resolve_all(topic.topic()?.names.iter())
        })
    }

    pub fn occurrences_of(
        &mut self,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.read(|txn| {
            let topic = txn.load_topic(topic)?;
            txn.resolve_all(topic.topic()?.occurrences.iter())
        })
    }

    pub fn roles_played_by(
        &mut self,
        topic: ConstructId,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.read(|txn| {
            let topic = txn.load_topic(topic)?;
            txn.resolve_all(topic.topic()?.roles_played.iter())
        })
    }

    /// Existing construct equivalent to `id` under its defining key, other than `id` itself.
    pub fn find_equivalent(
        &mut self,
        id: ConstructId,
    ) -> Result<Option<ConstructId>, TopicStoreError> {
        self.read(|txn| txn.find_equivalent(id))
    }

    /// Every construct of this topic map, the topic map itself included.
    pub fn constructs(&mut self) -> Result<Vec<Construct>, TopicStoreError> {
        self.find(&IndexQuery::new(self.id))
    }

    /// Check the identity invariants over the whole topic map. Loads every construct.
    ///
    /// Returns one message per violation; an empty list means the graph is consistent.
    pub fn built_in_test(&mut self) -> Result<Vec<String>, TopicStoreError> {
        let tombstones = self.cache.tombstones();
        let constructs = self.constructs()?;
        let by_id: BTreeMap<ConstructId, &Construct> =
            constructs.iter().map(|c| (c.id, c)).collect();
        let mut errors = Vec::new();

        // Identifier uniqueness. Among topics, item identifiers and subject
        // identifiers share one namespace.
        let mut seen: BTreeMap<(IdentifierKind, Locator), ConstructId> = BTreeMap::new();
        for construct in constructs.iter() {
            let mut keys: Vec<(IdentifierKind, Locator)> = construct
                .item_identifiers
                .iter()
                .map(|l| (IdentifierKind::ItemIdentifier, l.clone()))
                .collect();
            if let ConstructBody::Topic(topic) = &construct.body {
                keys.extend(
                    topic
                        .subject_identifiers
                        .iter()
                        .chain(construct.item_identifiers.iter())
                        .map(|l| (IdentifierKind::SubjectIdentifier, l.clone())),
                );
                keys.extend(
                    topic
                        .subject_locators
                        .iter()
                        .map(|l| (IdentifierKind::SubjectLocator, l.clone())),
                );
            }
            for key in keys {
                let Some(other) = seen.insert(key.clone(), construct.id) else {
                    continue;
                };
                if other != construct.id {
                    errors.push(format!(
                        "[TopicMap::built_in_test identity] {} {} held by both {} and {}",
                        key.0, key.1, other, construct.id
                    ));
                }
            }
        }

        // Reification is symmetric.
        for construct in constructs.iter() {
            if let Some(reifier) = construct.reifier() {
                let reified = by_id
                    .get(&reifier)
                    .and_then(|t| t.topic().ok())
                    .and_then(|t| t.reified);
                if reified != Some(construct.id) {
                    errors.push(format!(
                        "[TopicMap::built_in_test reification] {} names reifier {}, which reifies {:?}",
                        construct.id, reifier, reified
                    ));
                }
            }
            if let ConstructBody::Topic(topic) = &construct.body {
                if let Some(reified) = topic.reified {
                    let reifier = by_id.get(&reified).and_then(|c| c.reifier());
                    if reifier != Some(construct.id) {
                        errors.push(format!(
                            "[TopicMap::built_in_test reification] topic {} reifies {}, whose reifier is {:?}",
                            construct.id, reified, reifier
                        ));
                    }
                }
            }
        }

        // A variant's scope strictly extends its name's scope.
        for construct in constructs.iter() {
            let ConstructBody::Variant(variant) = &construct.body else {
                continue;
            };
            let Some(name) = construct
                .parent
                .and_then(|p| by_id.get(&p))
                .and_then(|n| n.name().ok())
            else {
                continue;
            };
            let refines =
                name.scope.is_subset(&variant.scope) && variant.scope.len() > name.scope.len();
            if !refines {
                errors.push(format!(
                    "[TopicMap::built_in_test variant] variant {} does not refine the scope of its name",
                    construct.id
                ));
            }
        }

        // No duplicates under the defining keys.
        let ids: Vec<ConstructId> = constructs
            .iter()
            .filter(|c| !c.is_topic() && c.kind() != ConstructKind::TopicMap)
            .map(|c| c.id)
            .collect();
        for id in ids {
            if let Some(twin) = self.find_equivalent(id)? {
                errors.push(format!(
                    "[TopicMap::built_in_test duplicate] {id} duplicates {twin}"
                ));
            }
        }

        // Forwarding ends at a surviving construct.
        for (absorbed, _) in tombstones {
            match self.resolve(absorbed) {
                Ok(survivor) if by_id.contains_key(&survivor) => {}
                Ok(survivor) => errors.push(format!(
                    "[TopicMap::built_in_test forwarding] {absorbed} forwards to missing {survivor}"
                )),
                Err(e) => errors.push(format!(
                    "[TopicMap::built_in_test forwarding] {absorbed}: {e}"
                )),
            }
        }

        // References must land on surviving constructs.
        let mut dangling = BTreeSet::new();
        for construct in constructs.iter() {
            for reference in construct.references() {
                if !by_id.contains_key(&self.cache.resolve(reference)?) {
                    dangling.insert((construct.id, reference));
                }
            }
        }
        for (from, to) in dangling {
            errors.push(format!(
                "[TopicMap::built_in_test] {from} references missing construct {to}"
            ));
        }

        for error in errors.iter() {
            tracing::warn!("{}", error);
        }
        Ok(errors)
    }
}
