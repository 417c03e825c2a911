//! SQLite backing store: persistence across reopen, revision checks and index queries.
#![cfg(feature = "service")]

mod common;

use common::{assert_consistent, loc};
use std::sync::Arc;
use tempfile::TempDir;
use test_log::test;
use topicstore::{
    config::{Backend, StoreConfig},
    document::Document,
    properties::ConstructKind,
    store::{DocumentStore, IndexQuery, SqliteStore},
    system::TopicMapSystem,
    TopicStoreError,
};

fn sqlite_system(dir: &TempDir) -> TopicMapSystem {
    let config = StoreConfig {
        backend: Backend::Sqlite {
            path: dir.path().join("topics.db"),
        },
        ..Default::default()
    };
    TopicMapSystem::from_config(config).unwrap()
}

#[test]
fn merged_topic_map_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let map = loc("http://example.org/map");
    let sid = loc("http://example.org/puccini");
    let (a, b) = {
        let system = sqlite_system(&dir);
        let mut tm = system.create_topic_map(&map).unwrap();
        let a = tm.create_topic_by_subject_identifier(&sid).unwrap();
        let b = tm.create_topic().unwrap();
        tm.create_name(b, None, "Giacomo Puccini", &[]).unwrap();
        assert_eq!(tm.add_subject_identifier(b, &sid).unwrap(), a);
        (a, b)
    };

    let system = sqlite_system(&dir);
    assert_eq!(system.locators().unwrap(), vec![map.clone()]);
    let mut tm = system.open_topic_map(&map).unwrap();
    let topic = tm.topic_by_subject_identifier(&sid).unwrap().unwrap();
    assert_eq!(topic.id, a);
    assert_eq!(tm.names_of(a).unwrap().len(), 1);
    assert_eq!(tm.get(b).unwrap(), None, "absorbed topic was deleted");
    assert_consistent(&mut tm);

    assert!(matches!(
        system.create_topic_map(&map),
        Err(TopicStoreError::TopicMapExists(_))
    ));
}

#[test]
fn stale_write_is_a_revision_conflict() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("topics.db")).unwrap());
    let system = TopicMapSystem::new(store.clone(), StoreConfig::default()).unwrap();
    let mut tm = system
        .create_topic_map(&loc("http://example.org/map"))
        .unwrap();
    let topic = tm.create_topic().unwrap();

    let doc: Document = store.fetch_by_id(&topic).unwrap().unwrap();
    let observed = doc.rev.clone();
    store.put(&doc, observed.as_ref()).unwrap();

    let err = store.put(&doc, observed.as_ref()).unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, TopicStoreError::RevisionConflict { id, .. } if id == topic));

    // The engine still holds the old revision too; a retry picks up the new one.
    let iid = loc("http://example.org/retried");
    tm.retrying(2, |tm| tm.add_item_identifier(topic, &iid))
        .unwrap();
    assert_eq!(
        tm.construct_by_item_identifier(&iid).unwrap().map(|c| c.id),
        Some(topic)
    );
}

#[test]
fn index_queries_filter_on_scope_and_identifiers() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("topics.db")).unwrap());
    let system = TopicMapSystem::new(store.clone(), StoreConfig::default()).unwrap();
    let mut tm = system
        .create_topic_map(&loc("http://example.org/map"))
        .unwrap();
    let topic = tm.create_topic().unwrap();
    let italian = tm.create_topic().unwrap();
    let plain = tm.create_name(topic, None, "Tosca", &[]).unwrap();
    let scoped = tm.create_name(topic, None, "Tosca", &[italian]).unwrap();

    let names = IndexQuery::new(tm.id()).kind(ConstructKind::Name);
    let unscoped: Vec<_> = store
        .query(&names.clone().scope(std::iter::empty()))
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(unscoped, vec![plain]);
    let themed: Vec<_> = store
        .query(&names.theme(italian))
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(themed, vec![scoped]);

    let sid = loc("http://example.org/tosca");
    tm.add_subject_identifier(topic, &sid).unwrap();
    let found = store.fetch_by_identifier(&tm.id(), &sid).unwrap().unwrap();
    assert_eq!(found.id, topic);
}
