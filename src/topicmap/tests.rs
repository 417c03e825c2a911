//! Tests for the per-topic-map engine: rollback, persistence failures, removal and the typed API
//! paths that feed the consistency monitor.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use super::TopicMap;
use crate::{
    config::{Features, StoreConfig},
    construct::ConstructBody,
    document::Document,
    error::TopicStoreError,
    event::StoreEvent,
    index::TypeInstanceIndex,
    properties::{ConstructId, Locator, XSD_ANY_URI},
    store::{DocumentStore, MemoryStore},
    system::TopicMapSystem,
};

fn loc(iri: &str) -> Locator {
    Locator::parse(iri).expect("valid locator")
}

fn open_with(features: Features) -> (Arc<MemoryStore>, TopicMapSystem, TopicMap) {
    let store = Arc::new(MemoryStore::new());
    let config = StoreConfig {
        features,
        ..Default::default()
    };
    let system = TopicMapSystem::new(store.clone(), config).expect("valid config");
    let tm = system
        .create_topic_map(&loc("http://example.org/map"))
        .expect("fresh topic map");
    (store, system, tm)
}

fn open() -> (Arc<MemoryStore>, TopicMap) {
    let (store, _, tm) = open_with(Features::default());
    (store, tm)
}

fn drain(rx: &mut UnboundedReceiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(tm: &mut TopicMap, topic: ConstructId) -> Vec<ConstructId> {
    tm.names_of(topic).expect("topic exists")
}

/// With auto-merge off a colliding subject identifier is refused, and nothing of the attempted
/// mutation survives in the cache or the store.
#[test]
fn identity_collision_without_auto_merge_rolls_back() {
    let (store, _, mut tm) = open_with(Features {
        auto_merge: false,
        ..Default::default()
    });
    let sid = loc("http://example.org/puccini");
    let a = tm.create_topic_by_subject_identifier(&sid).expect("a");
    let b = tm.create_topic().expect("b");
    tm.create_name(b, None, "Giacomo Puccini", &[]).expect("name");
    let stored = store.len();

    let err = tm.add_subject_identifier(b, &sid).expect_err("collision");
    assert!(matches!(
        err,
        TopicStoreError::IdentityConstraint { existing, construct, .. } if existing == a && construct == b
    ));

    assert_eq!(tm.resolve(b).expect("resolves"), b);
    let b_now = tm.get(b).expect("read").expect("b still exists");
    assert!(b_now.topic().expect("topic").subject_identifiers.is_empty());
    assert_eq!(names(&mut tm, b).len(), 1);
    assert_eq!(store.len(), stored);
    let holder = tm.topic_by_subject_identifier(&sid).expect("lookup");
    assert_eq!(holder.map(|t| t.id), Some(a));
}

#[test]
fn item_identifier_collision_between_non_topics_is_refused_even_with_auto_merge() {
    let (_, mut tm) = open();
    let iid = loc("http://example.org/shared");
    let topic = tm.create_topic_by_item_identifier(&iid).expect("topic");
    let name = tm.create_name(topic, None, "Tosca", &[]).expect("name");

    let err = tm.add_item_identifier(name, &iid).expect_err("collision");
    assert!(matches!(err, TopicStoreError::IdentityConstraint { .. }));
    let name_now = tm.get(name).expect("read").expect("name exists");
    assert!(name_now.item_identifiers.is_empty());
}

#[test]
fn create_topic_by_identifier_of_a_non_topic_is_a_model_error() {
    let (_, mut tm) = open();
    let topic = tm.create_topic().expect("topic");
    let name = tm.create_name(topic, None, "Tosca", &[]).expect("name");
    let iid = loc("http://example.org/name-1");
    tm.add_item_identifier(name, &iid).expect("iid");

    let err = tm
        .create_topic_by_subject_identifier(&iid)
        .expect_err("name holds it");
    assert!(matches!(err, TopicStoreError::ModelConstraint(_)));
}

#[test]
fn subject_identifier_reuses_topic_with_equal_item_identifier() {
    let (_, mut tm) = open();
    let iri = loc("http://example.org/opera");
    let by_iid = tm.create_topic_by_item_identifier(&iri).expect("by iid");
    let by_sid = tm.create_topic_by_subject_identifier(&iri).expect("by sid");
    assert_eq!(by_iid, by_sid);
    let topic = tm.get(by_iid).expect("read").expect("exists");
    assert!(topic.topic().expect("topic").subject_identifiers.contains(&iri));
    assert!(topic.item_identifiers.contains(&iri));
}

#[test]
fn removing_the_last_identifier_is_refused() {
    let (_, mut tm) = open();
    let sid = loc("http://example.org/only");
    let topic = tm.create_topic_by_subject_identifier(&sid).expect("topic");
    let err = tm.remove_subject_identifier(topic, &sid).expect_err("last one");
    assert!(matches!(err, TopicStoreError::ModelConstraint(_)));

    tm.add_subject_locator(topic, &loc("http://example.org/only.html"))
        .expect("second identifier");
    tm.remove_subject_identifier(topic, &sid).expect("no longer the last");
}

/// A write the store rejects leaves no trace; the identical call succeeds once the store is back.
#[test]
fn unavailable_store_leaves_graph_untouched() {
    let (store, mut tm) = open();
    let sid = loc("http://example.org/puccini");
    let a = tm.create_topic_by_subject_identifier(&sid).expect("a");
    let b = tm.create_topic().expect("b");
    tm.create_name(b, None, "Puccini", &[]).expect("name");

    store.fail_next_writes(1);
    let err = tm.add_subject_identifier(b, &sid).expect_err("outage");
    assert!(matches!(err, TopicStoreError::Unavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(tm.resolve(b).expect("resolves"), b);
    assert_eq!(names(&mut tm, b).len(), 1);
    assert!(names(&mut tm, a).is_empty());

    let survivor = tm.add_subject_identifier(b, &sid).expect("store is back");
    assert_eq!(survivor, a);
    assert_eq!(tm.resolve(b).expect("resolves"), a);
    assert_eq!(names(&mut tm, a).len(), 1);
}

#[test]
fn stale_revision_surfaces_as_conflict_and_retry_recovers() {
    let (store, mut tm) = open();
    let topic = tm.create_topic().expect("topic");

    store.touch(&topic).expect("concurrent writer");
    let err = tm
        .add_item_identifier(topic, &loc("http://example.org/first"))
        .expect_err("stale");
    assert!(matches!(err, TopicStoreError::RevisionConflict { id, .. } if id == topic));

    // Re-cache the current revision, then let another writer move past it.
    tm.get(topic).expect("read");
    store.touch(&topic).expect("concurrent writer again");
    let second = loc("http://example.org/second");
    let id = tm
        .retrying(3, |tm| tm.add_item_identifier(topic, &second))
        .expect("retry wins");
    assert_eq!(id, topic);
    let current = tm.get(topic).expect("read").expect("exists");
    assert!(current.item_identifiers.contains(&second));
}

#[test]
fn read_only_topic_map_refuses_mutation() {
    let (_, _, mut tm) = open_with(Features {
        read_only: true,
        ..Default::default()
    });
    assert!(matches!(tm.create_topic(), Err(TopicStoreError::ReadOnly)));
    assert!(tm.topics().expect("reads still work").is_empty());
}

#[test]
fn topic_in_use_cannot_be_removed() {
    let (_, mut tm) = open();
    let person = tm.create_topic().expect("person");
    let puccini = tm.create_topic().expect("puccini");
    tm.add_type(puccini, person).expect("typed");
    let err = tm.remove(person).expect_err("types a topic");
    assert!(matches!(err, TopicStoreError::TopicInUse(_)));

    let nickname = tm.create_topic().expect("name type");
    let name = tm
        .create_name(puccini, Some(nickname), "Giacomo", &[])
        .expect("name");
    assert!(matches!(
        tm.remove(nickname),
        Err(TopicStoreError::TopicInUse(_))
    ));
    tm.remove(name).expect("name removed");
    tm.remove(nickname).expect("no longer used");
    assert_eq!(tm.get(nickname).expect("read"), None);
}

#[test]
fn removing_a_topic_removes_what_it_owns() {
    let (_, mut tm) = open();
    let opera = tm.create_topic().expect("opera");
    let italian = tm.create_topic().expect("theme");
    let premiere = tm.create_topic().expect("occurrence type");
    let name = tm.create_name(opera, None, "Tosca", &[]).expect("name");
    let variant = tm
        .create_variant(name, "TOSCA", None, &[italian])
        .expect("variant");
    let occurrence = tm
        .create_occurrence(opera, premiere, "1900-01-14", None, &[])
        .expect("occurrence");

    tm.remove(opera).expect("removed");
    for id in [opera, name, variant, occurrence] {
        assert_eq!(tm.get(id).expect("read"), None, "{id} should be gone");
    }
    assert!(tm.get(italian).expect("read").is_some());
    assert!(tm.built_in_test().expect("check").is_empty());
}

#[test]
fn variant_scope_must_refine_the_name_scope() {
    let (_, mut tm) = open();
    let topic = tm.create_topic().expect("topic");
    let (t1, t2) = (
        tm.create_topic().expect("t1"),
        tm.create_topic().expect("t2"),
    );
    let name = tm.create_name(topic, None, "Tosca", &[t1]).expect("name");

    assert!(matches!(
        tm.create_variant(name, "tosca", None, &[]),
        Err(TopicStoreError::ModelConstraint(_))
    ));
    assert!(matches!(
        tm.create_variant(name, "tosca", None, &[t1]),
        Err(TopicStoreError::ModelConstraint(_))
    ));

    let variant = tm.create_variant(name, "tosca", None, &[t2]).expect("refines");
    let stored = tm.get(variant).expect("read").expect("exists");
    let scope = stored.scope().expect("scoped");
    assert!(scope.contains(&t1) && scope.contains(&t2));

    assert!(matches!(
        tm.remove_theme(variant, t2),
        Err(TopicStoreError::ModelConstraint(_))
    ));
}

#[test]
fn themes_added_to_a_name_reach_its_variants() {
    let (_, mut tm) = open();
    let topic = tm.create_topic().expect("topic");
    let (t1, t2) = (
        tm.create_topic().expect("t1"),
        tm.create_topic().expect("t2"),
    );
    let name = tm.create_name(topic, None, "Tosca", &[]).expect("name");
    let variant = tm.create_variant(name, "tosca", None, &[t1]).expect("variant");

    tm.add_theme(name, t2).expect("theme");
    let stored = tm.get(variant).expect("read").expect("exists");
    assert!(stored.scope().expect("scoped").contains(&t2));
}

#[test]
fn mutable_body_access_checks_the_kind() {
    let (_, mut tm) = open();
    let topic = tm.create_topic().expect("topic");
    let name = tm.create_name(topic, None, "Tosca", &[]).expect("name");
    let mut stored = tm.get(name).expect("read").expect("exists");

    assert!(matches!(stored.topic_mut(), Err(TopicStoreError::ModelConstraint(_))));
    assert!(matches!(stored.association_mut(), Err(TopicStoreError::ModelConstraint(_))));
    assert!(matches!(stored.role_mut(), Err(TopicStoreError::ModelConstraint(_))));
    assert!(matches!(stored.variant_mut(), Err(TopicStoreError::ModelConstraint(_))));
    stored.name_mut().expect("a name").value = "La Tosca".to_string();
    assert_eq!(stored.name().expect("a name").value, "La Tosca");
}

#[test]
fn name_theme_that_a_variant_already_has_is_refused() {
    let (_, mut tm) = open();
    let topic = tm.create_topic().expect("topic");
    let t = tm.create_topic().expect("theme");
    let name = tm.create_name(topic, None, "Tosca", &[]).expect("name");
    let variant = tm.create_variant(name, "tosca", None, &[t]).expect("variant");

    let err = tm.add_theme(name, t).expect_err("variant would equal its name");
    assert!(matches!(err, TopicStoreError::ModelConstraint(_)));

    let name_now = tm.get(name).expect("read").expect("exists");
    assert!(name_now.scope().expect("scoped").is_empty());
    let variant_now = tm.get(variant).expect("read").expect("exists");
    assert_eq!(variant_now.scope().expect("scoped").len(), 1);
    assert!(tm.built_in_test().expect("check").is_empty());
}

#[test]
fn built_in_test_reports_a_variant_that_does_not_refine_its_name() {
    let (store, system, mut tm) = open_with(Features::default());
    let topic = tm.create_topic().expect("topic");
    let t = tm.create_topic().expect("theme");
    let name = tm.create_name(topic, None, "Tosca", &[]).expect("name");
    let variant = tm.create_variant(name, "tosca", None, &[t]).expect("variant");

    let mut stored = tm.get(variant).expect("read").expect("exists");
    let ConstructBody::Variant(body) = &mut stored.body else {
        panic!("{variant} is not a variant");
    };
    body.scope.clear();
    store
        .put(&Document::from(&stored), stored.revision.as_ref())
        .expect("written behind the engine");

    let mut reopened = system.open_topic_map(tm.locator()).expect("reopen");
    let violations = reopened.built_in_test().expect("check");
    assert_eq!(violations.len(), 1, "{violations:#?}");
    assert!(violations[0].contains(&variant.to_string()));
}

#[test]
fn creating_an_equivalent_construct_returns_the_existing_one() {
    let (_, mut tm) = open();
    let topic = tm.create_topic().expect("topic");
    let homepage = tm.create_topic().expect("occurrence type");
    let url = loc("http://example.org/tosca");

    let first = tm
        .create_occurrence(topic, homepage, url.as_str(), Some(&*XSD_ANY_URI), &[])
        .expect("first");
    let again = tm
        .create_occurrence(topic, homepage, url.as_str(), Some(&*XSD_ANY_URI), &[])
        .expect("again");
    assert_eq!(first, again);

    let as_string = tm
        .create_occurrence(topic, homepage, url.as_str(), None, &[])
        .expect("other datatype");
    assert_ne!(first, as_string);
    assert_eq!(tm.occurrences_of(topic).expect("read").len(), 2);
}

#[test]
fn equivalent_association_is_merged_when_its_roles_settle() {
    let (_, mut tm) = open();
    let composed = tm.create_topic().expect("association type");
    let (composer, work) = (
        tm.create_topic().expect("composer"),
        tm.create_topic().expect("work"),
    );
    let (puccini, tosca) = (
        tm.create_topic().expect("puccini"),
        tm.create_topic().expect("tosca"),
    );

    let first = tm.create_association(composed, &[]).expect("first");
    tm.create_role(first, composer, puccini).expect("role");
    tm.create_role(first, work, tosca).expect("role");

    let second = tm.create_association(composed, &[]).expect("second");
    assert_ne!(first, second, "the first association already has roles");
    tm.create_role(second, composer, puccini).expect("role");
    tm.create_role(second, work, tosca).expect("role");

    assert_eq!(tm.resolve(second).expect("resolves"), first);
    assert_eq!(tm.associations().expect("read"), vec![first]);
    assert_eq!(tm.roles_played_by(puccini).expect("read").len(), 1);
    assert!(tm.built_in_test().expect("check").is_empty());
}

#[test]
fn moving_a_name_onto_a_topic_with_an_equal_name_merges_them() {
    let (_, mut tm) = open();
    let (p, q) = (tm.create_topic().expect("p"), tm.create_topic().expect("q"));
    let kept = tm.create_name(p, None, "Tosca", &[]).expect("p's name");
    let moved = tm.create_name(q, None, "Tosca", &[]).expect("q's name");
    assert_ne!(kept, moved);

    let survivor = tm.move_to(moved, p).expect("moved");
    assert_eq!(survivor, kept);
    assert_eq!(tm.resolve(moved).expect("resolves"), kept);
    assert_eq!(names(&mut tm, p), vec![kept]);
    assert!(names(&mut tm, q).is_empty());
}

#[test]
fn merging_topics_that_reify_different_constructs_fails_cleanly() {
    let (_, mut tm) = open();
    let topic = tm.create_topic().expect("topic");
    let n1 = tm.create_name(topic, None, "Tosca", &[]).expect("n1");
    let n2 = tm.create_name(topic, None, "La Tosca", &[]).expect("n2");
    let (r1, r2) = (tm.create_topic().expect("r1"), tm.create_topic().expect("r2"));
    tm.set_reifier(n1, Some(r1)).expect("reified");
    tm.set_reifier(n2, Some(r2)).expect("reified");

    let err = tm.merge_topics(r1, r2).expect_err("conflict");
    assert!(matches!(err, TopicStoreError::ModelConstraint(_)));
    assert_eq!(tm.resolve(r2).expect("resolves"), r2);
    let r1_now = tm.get(r1).expect("read").expect("exists");
    assert_eq!(r1_now.topic().expect("topic").reified, Some(n1));
}

#[test]
fn subscribers_see_saves_and_merges() {
    let (_, mut tm) = open();
    let mut rx = tm.subscribe();
    let sid = loc("http://example.org/puccini");
    let a = tm.create_topic_by_subject_identifier(&sid).expect("a");
    let b = tm.create_topic().expect("b");
    assert_eq!(drain(&mut rx), vec![StoreEvent::Saved(a), StoreEvent::Saved(b)]);

    tm.add_subject_identifier(b, &sid).expect("merge");
    let events = drain(&mut rx);
    assert!(events.contains(&StoreEvent::Saved(a)));
    assert!(events.contains(&StoreEvent::Merged {
        absorbed: b,
        survivor: a
    }));
    assert!(!events.contains(&StoreEvent::Removed(b)));

    drop(rx);
    tm.create_topic().expect("unsubscribed writes still succeed");
}

#[test]
fn type_instance_associations_mirror_topic_types() {
    let (_, _, mut tm) = open_with(Features {
        type_instance_associations: true,
        ..Default::default()
    });
    let composer = tm.create_topic().expect("type");
    let puccini = tm.create_topic().expect("instance");

    tm.add_type(puccini, composer).expect("typed");
    assert_eq!(tm.associations().expect("read").len(), 1);
    assert_eq!(
        TypeInstanceIndex::new(&mut tm)
            .topics_of_type(&[composer], false)
            .expect("index"),
        vec![puccini]
    );

    tm.remove_type(puccini, composer).expect("untyped");
    assert!(tm.associations().expect("read").is_empty());
    assert!(TypeInstanceIndex::new(&mut tm)
        .topics_of_type(&[composer], false)
        .expect("index")
        .is_empty());
}

#[test]
fn merge_in_copies_and_merges_equivalents() {
    let (_, system, mut target) = open_with(Features::default());
    let mut source = system
        .create_topic_map(&loc("http://example.org/other"))
        .expect("second map");
    let sid = loc("http://example.org/puccini");

    let here = target.create_topic_by_subject_identifier(&sid).expect("here");
    target.create_name(here, None, "Puccini", &[]).expect("name");

    let there = source.create_topic_by_subject_identifier(&sid).expect("there");
    source.create_name(there, None, "Puccini", &[]).expect("name");
    let website = source.create_topic().expect("occurrence type");
    source
        .create_occurrence(there, website, "http://www.puccini.it", None, &[])
        .expect("occurrence");
    let source_count = source.constructs().expect("read").len();

    target.merge_in(&mut source).expect("merged in");

    let merged = target
        .topic_by_subject_identifier(&sid)
        .expect("lookup")
        .expect("still there");
    assert_eq!(merged.id, here);
    assert_eq!(names(&mut target, here).len(), 1);
    assert_eq!(target.occurrences_of(here).expect("read").len(), 1);
    assert_eq!(source.constructs().expect("read").len(), source_count);
    assert!(target.built_in_test().expect("check").is_empty());
}

#[test]
fn removed_topic_map_is_unusable() {
    let (store, system, mut tm) = open_with(Features::default());
    let topic = tm.create_topic().expect("topic");
    tm.create_name(topic, None, "Tosca", &[]).expect("name");

    tm.remove_topic_map().expect("removed");
    assert!(tm.is_removed());
    assert!(store.is_empty());
    assert!(system.locators().expect("list").is_empty());
    assert!(matches!(tm.create_topic(), Err(TopicStoreError::Internal(_))));
}
