//! Tests for the in-memory backing store

use super::*;
use crate::construct::{Construct, ConstructBody, TopicBody, TopicMapBody};

fn topic_map_doc() -> Document {
    let tm = ConstructId::new_topic_map();
    Document::from(&Construct::new(
        tm,
        tm,
        None,
        ConstructBody::TopicMap(TopicMapBody {
            locator: Locator::parse("http://example.org/map").expect("valid"),
            reifier: None,
        }),
    ))
}

fn topic_doc(tm: ConstructId, sid: &str) -> Document {
    let mut body = TopicBody::default();
    body.subject_identifiers
        .insert(Locator::parse(sid).expect("valid"));
    Document::from(&Construct::new(
        ConstructId::new(tm),
        tm,
        Some(tm),
        ConstructBody::Topic(body),
    ))
}

/// A put carrying a stale revision is a retryable conflict, never a silent overwrite.
#[test]
fn stale_revision_is_rejected_as_conflict() {
    let store = MemoryStore::new();
    let map = topic_map_doc();
    let doc = topic_doc(map.id, "http://example.org/a");

    let first = store.put(&doc, None).expect("fresh insert");
    assert_eq!(first.generation(), 1);

    let second = store.put(&doc, Some(&first)).expect("update");
    assert_eq!(second.generation(), 2);

    let err = store.put(&doc, Some(&first)).expect_err("stale");
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        TopicStoreError::RevisionConflict { actual: Some(ref a), .. } if a == &second
    ));

    let err = store.put(&doc, None).expect_err("already exists");
    assert!(matches!(err, TopicStoreError::RevisionConflict { .. }));
}

#[test]
fn touch_invalidates_observed_revision() {
    let store = MemoryStore::new();
    let map = topic_map_doc();
    let doc = topic_doc(map.id, "http://example.org/a");
    let rev = store.put(&doc, None).expect("insert");
    let bumped = store.touch(&doc.id).expect("touched");
    assert_ne!(rev, bumped);
    assert!(store.delete(&doc.id, &rev).is_err());
    store.delete(&doc.id, &bumped).expect("delete with current rev");
    assert!(store.is_empty());
}

#[test]
fn simulated_outage_applies_to_writes_only() {
    let store = MemoryStore::new();
    let map = topic_map_doc();
    store.put(&map, None).expect("insert");
    store.fail_next_writes(1);
    let err = store
        .put(&topic_doc(map.id, "http://example.org/b"), None)
        .expect_err("outage");
    assert!(matches!(err, TopicStoreError::Unavailable(_)));
    assert!(store.fetch_by_id(&map.id).expect("reads work").is_some());
    store
        .put(&topic_doc(map.id, "http://example.org/b"), None)
        .expect("outage over");
    assert_eq!(store.len(), 2);
}

#[test]
fn index_queries_filter_by_identifier_and_topic_map() {
    let store = MemoryStore::new();
    let map = topic_map_doc();
    let other = topic_map_doc();
    let a = topic_doc(map.id, "http://example.org/a");
    let b = topic_doc(other.id, "http://example.org/a");
    for doc in [&map, &other, &a, &b] {
        store.put(doc, None).expect("insert");
    }
    let loc = Locator::parse("http://example.org/a").expect("valid");

    let hits = store
        .query(&IndexQuery::new(map.id).identifier(loc.clone()))
        .expect("query");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, a.id);

    let found = store
        .fetch_by_identifier(&other.id, &loc)
        .expect("fetch")
        .expect("present");
    assert_eq!(found.id, b.id);

    assert_eq!(store.topic_maps().expect("maps").len(), 2);
}

#[test]
fn scope_queries_are_exact_and_order_independent() {
    let map = topic_map_doc();
    let (t1, t2) = (ConstructId::new(map.id), ConstructId::new(map.id));
    let mut doc = topic_doc(map.id, "http://example.org/a");
    doc.documenttype = ConstructKind::Name;
    doc.scope = {
        let mut s = vec![t1, t2];
        s.sort();
        s
    };

    assert!(IndexQuery::new(map.id).scope([&t2, &t1]).matches(&doc));
    assert!(!IndexQuery::new(map.id).scope([&t1]).matches(&doc));
    assert!(IndexQuery::new(map.id).theme(t1).matches(&doc));
    assert!(!IndexQuery::new(map.id)
        .kind(ConstructKind::Occurrence)
        .matches(&doc));
}
