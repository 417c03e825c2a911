//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::sync::Arc;
use topicstore::{
    config::StoreConfig,
    properties::{ConstructId, Locator},
    store::MemoryStore,
    system::TopicMapSystem,
    topicmap::TopicMap,
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

#[allow(dead_code)]
pub fn loc(iri: &str) -> Locator {
    Locator::parse(iri).unwrap()
}

/// A fresh topic map at `http://example.org/map` over an in-memory store.
#[allow(dead_code)]
pub fn memory_topic_map() -> (Arc<MemoryStore>, TopicMap) {
    let store = Arc::new(MemoryStore::new());
    let system = TopicMapSystem::new(store.clone(), StoreConfig::default()).unwrap();
    let tm = system
        .create_topic_map(&loc("http://example.org/map"))
        .unwrap();
    (store, tm)
}

/// Composer/work vocabulary used across the scenario tests.
#[allow(dead_code)]
pub struct Opera {
    pub composed_by: ConstructId,
    pub composer: ConstructId,
    pub work: ConstructId,
    pub puccini: ConstructId,
    pub tosca: ConstructId,
}

#[allow(dead_code)]
pub fn opera_vocabulary(tm: &mut TopicMap) -> Opera {
    let sid = |s: &str| loc(&format!("http://psi.example.org/{s}"));
    Opera {
        composed_by: tm
            .create_topic_by_subject_identifier(&sid("composed-by"))
            .unwrap(),
        composer: tm
            .create_topic_by_subject_identifier(&sid("composer"))
            .unwrap(),
        work: tm.create_topic_by_subject_identifier(&sid("work")).unwrap(),
        puccini: tm
            .create_topic_by_subject_identifier(&sid("puccini"))
            .unwrap(),
        tosca: tm.create_topic_by_subject_identifier(&sid("tosca")).unwrap(),
    }
}

/// Panic with every violation the built-in test reports.
#[allow(dead_code)]
pub fn assert_consistent(tm: &mut TopicMap) {
    let violations = tm.built_in_test().unwrap();
    assert!(violations.is_empty(), "violations: {violations:#?}");
}
