use std::sync::Arc;

use crate::{
    config::{Backend, StoreConfig},
    construct::{Construct, ConstructBody},
    error::TopicStoreError,
    properties::Locator,
    store::{DocumentStore, MemoryStore},
    topicmap::TopicMap,
};

/// Entry point: a backing store plus the configuration every topic map opened from it shares.
///
/// Each [TopicMap] handed out is an independent context with its own cache. Distinct topic maps
/// can be driven from different threads.
#[derive(Debug, Clone)]
pub struct TopicMapSystem {
    store: Arc<dyn DocumentStore>,
    config: StoreConfig,
}

impl TopicMapSystem {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: StoreConfig,
    ) -> Result<TopicMapSystem, TopicStoreError> {
        config.validate()?;
        Ok(TopicMapSystem { store, config })
    }

    /// Build the store named by `config.backend`.
    pub fn from_config(config: StoreConfig) -> Result<TopicMapSystem, TopicStoreError> {
        let store: Arc<dyn DocumentStore> = match &config.backend {
            Backend::Memory => Arc::new(MemoryStore::new()),
            #[cfg(feature = "service")]
            Backend::Sqlite { path } => Arc::new(crate::store::SqliteStore::open(path.clone())?),
            #[cfg(not(feature = "service"))]
            Backend::Sqlite { .. } => {
                return Err(TopicStoreError::Config(
                    "the sqlite backend requires the `service` feature".to_string(),
                ))
            }
        };
        TopicMapSystem::new(store, config)
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn create_topic_map(&self, locator: &Locator) -> Result<TopicMap, TopicStoreError> {
        if self.locators()?.contains(locator) {
            return Err(TopicStoreError::TopicMapExists(locator.to_string()));
        }
        TopicMap::create(self.store.clone(), locator.clone(), self.config.clone())
    }

    pub fn open_topic_map(&self, locator: &Locator) -> Result<TopicMap, TopicStoreError> {
        let Some(doc) = self
            .store
            .topic_maps()?
            .into_iter()
            .find(|doc| doc.locator.as_ref() == Some(locator))
        else {
            return Err(TopicStoreError::NotFound(format!("topic map {locator}")));
        };
        TopicMap::open(self.store.clone(), doc, self.config.clone())
    }

    /// Locators of every topic map in the store.
    pub fn locators(&self) -> Result<Vec<Locator>, TopicStoreError> {
        let mut locators = Vec::new();
        for doc in self.store.topic_maps()? {
            let construct = Construct::try_from(doc)?;
            if let ConstructBody::TopicMap(body) = construct.body {
                locators.push(body.locator);
            }
        }
        locators.sort();
        Ok(locators)
    }

    pub fn remove_topic_map(&self, locator: &Locator) -> Result<(), TopicStoreError> {
        self.open_topic_map(locator)?.remove_topic_map()
    }
}
