//! End-to-end merge properties: each test drives the public API only and checks one guarantee of
//! the identity-resolution engine.

mod common;

use common::{assert_consistent, loc, memory_topic_map, opera_vocabulary};
use test_log::test;
use topicstore::{properties::IdentifierKind, TopicStoreError};

#[test]
fn merge_is_idempotent() {
    let (_, mut tm) = memory_topic_map();
    let x = loc("http://example.org/x");
    let a = tm.create_topic_by_subject_identifier(&x).unwrap();
    let b = tm
        .create_topic_by_item_identifier(&loc("http://example.org/b"))
        .unwrap();
    tm.create_name(b, None, "B", &[]).unwrap();

    let survivor = tm.add_subject_identifier(b, &x).unwrap();
    assert_eq!(survivor, a);
    assert_eq!(tm.find_equivalent(survivor).unwrap(), None);

    let topic = tm.get(survivor).unwrap().unwrap();
    for (kind, locator) in topic.identifiers() {
        let holder = match kind {
            IdentifierKind::ItemIdentifier => tm.construct_by_item_identifier(&locator),
            IdentifierKind::SubjectIdentifier => tm.topic_by_subject_identifier(&locator),
            IdentifierKind::SubjectLocator => tm.topic_by_subject_locator(&locator),
        }
        .unwrap();
        assert_eq!(holder.map(|c| c.id), Some(survivor), "{kind} {locator}");
    }

    // Claiming an identifier the survivor already holds changes nothing.
    assert_eq!(tm.add_subject_identifier(a, &x).unwrap(), a);
    assert_eq!(tm.merge_topics(a, b).unwrap(), a);
    assert_eq!(tm.topics().unwrap().len(), 2, "survivor plus the topic-name type");
    assert_consistent(&mut tm);
}

#[test]
fn merges_are_transitive() {
    let (_, mut tm) = memory_topic_map();
    let (sa, sb, sc) = (
        loc("http://example.org/a"),
        loc("http://example.org/b"),
        loc("http://example.org/c"),
    );
    let a = tm.create_topic_by_subject_identifier(&sa).unwrap();
    let b = tm.create_topic_by_subject_identifier(&sb).unwrap();
    let c = tm.create_topic_by_subject_identifier(&sc).unwrap();

    // A claims b: the existing holder B survives.
    assert_eq!(tm.add_subject_identifier(a, &sb).unwrap(), b);
    // B claims c: the existing holder C survives.
    assert_eq!(tm.add_subject_identifier(b, &sc).unwrap(), c);

    assert_eq!(tm.resolve(a).unwrap(), c);
    assert_eq!(tm.resolve(b).unwrap(), c);
    let survivor = tm.get(a).unwrap().unwrap();
    assert_eq!(survivor.id, c);
    let sids = &survivor.topic().unwrap().subject_identifiers;
    assert!(sids.contains(&sa) && sids.contains(&sb) && sids.contains(&sc));
    assert_consistent(&mut tm);
}

#[test]
fn creating_the_same_name_twice_yields_one_construct() {
    let (_, mut tm) = memory_topic_map();
    let topic = tm.create_topic().unwrap();
    let nickname = tm.create_topic().unwrap();

    let first = tm.create_name(topic, Some(nickname), "x", &[]).unwrap();
    let second = tm.create_name(topic, Some(nickname), "x", &[]).unwrap();
    assert_eq!(first, second);
    assert_eq!(tm.names_of(topic).unwrap(), vec![first]);
}

#[test]
fn identity_collision_merges_everything_into_one_topic() {
    let (_, mut tm) = memory_topic_map();
    let v = opera_vocabulary(&mut tm);
    let x = loc("http://en.wikipedia.org/wiki/Giacomo_Puccini");
    let person = tm.create_topic().unwrap();
    let born = tm.create_topic().unwrap();

    let a = tm.create_topic_by_subject_identifier(&x).unwrap();
    tm.create_name(a, None, "Puccini", &[]).unwrap();
    tm.create_occurrence(a, born, "1858", None, &[]).unwrap();

    let b = v.puccini;
    tm.create_name(b, None, "Giacomo Puccini", &[]).unwrap();
    tm.add_type(b, person).unwrap();
    let composed = tm.create_association(v.composed_by, &[]).unwrap();
    tm.create_role(composed, v.composer, b).unwrap();
    tm.create_role(composed, v.work, v.tosca).unwrap();
    let topics_before = tm.topics().unwrap().len();

    let survivor = tm.add_subject_identifier(b, &x).unwrap();
    assert_eq!(survivor, a);
    assert_eq!(tm.resolve(b).unwrap(), a);
    assert_eq!(tm.topics().unwrap().len(), topics_before - 1);

    let merged = tm.get(a).unwrap().unwrap();
    let body = merged.topic().unwrap();
    assert_eq!(body.names.len(), 2);
    assert_eq!(body.occurrences.len(), 1);
    assert_eq!(body.roles_played.len(), 1);
    assert!(body.types.contains(&person));
    assert!(body
        .subject_identifiers
        .contains(&loc("http://psi.example.org/puccini")));
    assert_consistent(&mut tm);
}

#[test]
fn a_reifier_reifies_at_most_one_construct() {
    let (_, mut tm) = memory_topic_map();
    let topic = tm.create_topic().unwrap();
    let k = tm.create_name(topic, None, "Tosca", &[]).unwrap();
    let k2 = tm.create_name(topic, None, "La Tosca", &[]).unwrap();
    let t = tm.create_topic().unwrap();

    tm.set_reifier(k, Some(t)).unwrap();
    assert_eq!(tm.get(t).unwrap().unwrap().topic().unwrap().reified, Some(k));

    tm.set_reifier(k2, Some(t)).unwrap();
    assert_eq!(tm.get(k).unwrap().unwrap().reifier(), None);
    assert_eq!(tm.get(k2).unwrap().unwrap().reifier(), Some(t));
    assert_eq!(tm.get(t).unwrap().unwrap().topic().unwrap().reified, Some(k2));

    // The reified side of the pairing works the same way.
    tm.set_reified(t, Some(k)).unwrap();
    assert_eq!(tm.get(k2).unwrap().unwrap().reifier(), None);
    assert_eq!(tm.get(k).unwrap().unwrap().reifier(), Some(t));
    assert_consistent(&mut tm);
}

#[test]
fn variant_scope_must_strictly_extend_name_scope() {
    let (_, mut tm) = memory_topic_map();
    let topic = tm.create_topic().unwrap();
    let italian = tm.create_topic().unwrap();
    let name = tm.create_name(topic, None, "Tosca", &[italian]).unwrap();

    let err = tm
        .create_variant(name, "tosca", None, &[italian])
        .unwrap_err();
    assert!(matches!(err, TopicStoreError::ModelConstraint(_)));
    assert!(tm.get(name).unwrap().unwrap().name().unwrap().variants.is_empty());
}

/// A and B play the same role type in two associations that are otherwise identical; merging A
/// and B leaves a single association.
#[test]
fn merging_topics_merges_the_associations_they_made_identical() {
    let (_, mut tm) = memory_topic_map();
    let v = opera_vocabulary(&mut tm);
    let other_puccini = tm.create_topic().unwrap();

    let x = tm.create_association(v.composed_by, &[]).unwrap();
    tm.create_role(x, v.composer, v.puccini).unwrap();
    tm.create_role(x, v.work, v.tosca).unwrap();
    let y = tm.create_association(v.composed_by, &[]).unwrap();
    tm.create_role(y, v.composer, other_puccini).unwrap();
    tm.create_role(y, v.work, v.tosca).unwrap();
    assert_eq!(tm.associations().unwrap().len(), 2);

    let survivor = tm.merge_topics(v.puccini, other_puccini).unwrap();
    assert_eq!(survivor, v.puccini);

    let associations = tm.associations().unwrap();
    assert_eq!(associations.len(), 1);
    assert_eq!(tm.resolve(x).unwrap(), associations[0]);
    assert_eq!(tm.resolve(y).unwrap(), associations[0]);
    let merged = tm.get(associations[0]).unwrap().unwrap();
    assert_eq!(merged.association().unwrap().roles.len(), 2);
    assert_eq!(tm.roles_played_by(v.puccini).unwrap().len(), 1);
    assert_eq!(tm.roles_played_by(v.tosca).unwrap().len(), 1);
    assert_consistent(&mut tm);
}

#[test]
fn references_resolve_to_survivors_after_merge_chains() {
    let (_, mut tm) = memory_topic_map();
    let v = opera_vocabulary(&mut tm);
    let italian = tm.create_topic().unwrap();
    let aliases: Vec<_> = (0..3)
        .map(|i| {
            let t = tm
                .create_topic_by_item_identifier(&loc(&format!("http://example.org/alias/{i}")))
                .unwrap();
            tm.create_name(t, None, "Puccini", &[italian]).unwrap();
            let a = tm.create_association(v.composed_by, &[]).unwrap();
            tm.create_role(a, v.composer, t).unwrap();
            tm.create_role(a, v.work, v.tosca).unwrap();
            t
        })
        .collect();
    let italian_alias = tm.create_topic().unwrap();
    tm.create_name(v.puccini, None, "Giacomo", &[italian_alias])
        .unwrap();

    for alias in aliases.iter() {
        tm.merge_topics(*alias, v.puccini).unwrap();
    }
    tm.merge_topics(italian, italian_alias).unwrap();

    let survivor = tm.resolve(v.puccini).unwrap();
    for alias in aliases.iter() {
        assert_eq!(tm.resolve(*alias).unwrap(), survivor);
    }
    assert_eq!(tm.associations().unwrap().len(), 1);

    for construct in tm.constructs().unwrap() {
        for reference in construct.references() {
            let target = tm.resolve(reference).unwrap();
            assert!(
                tm.get(target).unwrap().is_some(),
                "{} references {} which resolves to missing {}",
                construct.id,
                reference,
                target
            );
        }
    }
    assert_consistent(&mut tm);
}

/// A plays R1 in X and B plays R2 in Y, both of type AT with roles {R1, R2}. Once A and B are one
/// topic, every role of Y has a counterpart of the same type in X.
#[test]
fn merging_players_of_different_roles_merges_same_typed_associations() {
    let (_, mut tm) = memory_topic_map();
    let at = tm.create_topic().unwrap();
    let (r1, r2) = (tm.create_topic().unwrap(), tm.create_topic().unwrap());
    let (a, b) = (tm.create_topic().unwrap(), tm.create_topic().unwrap());
    let (p, q) = (tm.create_topic().unwrap(), tm.create_topic().unwrap());

    let x = tm.create_association(at, &[]).unwrap();
    tm.create_role(x, r1, a).unwrap();
    tm.create_role(x, r2, p).unwrap();
    let y = tm.create_association(at, &[]).unwrap();
    tm.create_role(y, r1, q).unwrap();
    tm.create_role(y, r2, b).unwrap();

    assert_eq!(tm.merge_topics(a, b).unwrap(), a);

    let associations = tm.associations().unwrap();
    assert_eq!(associations.len(), 1);
    assert_eq!(tm.resolve(x).unwrap(), associations[0]);
    assert_eq!(tm.resolve(y).unwrap(), associations[0]);
    assert_eq!(tm.roles_played_by(a).unwrap().len(), 2);
    assert_consistent(&mut tm);
}

/// The larger association absorbs a smaller one whose roles it covers by player or by type.
#[test]
fn covered_association_is_absorbed_by_the_larger_one() {
    let (_, mut tm) = memory_topic_map();
    let v = opera_vocabulary(&mut tm);
    let librettist = tm.create_topic().unwrap();
    let illica = tm.create_topic().unwrap();
    let other_puccini = tm.create_topic().unwrap();

    let full = tm.create_association(v.composed_by, &[]).unwrap();
    tm.create_role(full, v.composer, v.puccini).unwrap();
    tm.create_role(full, v.work, v.tosca).unwrap();
    tm.create_role(full, librettist, illica).unwrap();
    let partial = tm.create_association(v.composed_by, &[]).unwrap();
    tm.create_role(partial, v.composer, other_puccini).unwrap();
    tm.create_role(partial, v.work, v.tosca).unwrap();

    tm.merge_topics(v.puccini, other_puccini).unwrap();

    assert_eq!(tm.associations().unwrap(), vec![full]);
    assert_eq!(tm.resolve(partial).unwrap(), full);
    let merged = tm.get(full).unwrap().unwrap();
    assert_eq!(merged.association().unwrap().roles.len(), 3);
    assert_eq!(tm.roles_played_by(v.puccini).unwrap().len(), 1);
    assert_eq!(tm.roles_played_by(v.tosca).unwrap().len(), 1);
    assert_consistent(&mut tm);
}

#[test]
fn associations_of_different_types_are_never_merged() {
    let (_, mut tm) = memory_topic_map();
    let (composed, premiered) = (tm.create_topic().unwrap(), tm.create_topic().unwrap());
    let (r1, r2) = (tm.create_topic().unwrap(), tm.create_topic().unwrap());
    let (a, b) = (tm.create_topic().unwrap(), tm.create_topic().unwrap());
    let (p, q) = (tm.create_topic().unwrap(), tm.create_topic().unwrap());

    let x = tm.create_association(composed, &[]).unwrap();
    tm.create_role(x, r1, a).unwrap();
    tm.create_role(x, r2, p).unwrap();
    let y = tm.create_association(premiered, &[]).unwrap();
    tm.create_role(y, r1, q).unwrap();
    tm.create_role(y, r2, b).unwrap();

    tm.merge_topics(a, b).unwrap();

    assert_eq!(tm.associations().unwrap().len(), 2);
    assert_ne!(tm.resolve(x).unwrap(), tm.resolve(y).unwrap());
    assert_eq!(tm.roles_played_by(a).unwrap().len(), 2);
    assert_consistent(&mut tm);
}
