mod common;

use common::{Fixture, Order, RefuseAtRoot, person_identity, record};
use hearth_context::{DataStoreError, ImportParameters};
use hearth_model::IdentityParameters;
use hearth_types::{DispatchTier, IdentityKey};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

fn people(ids: &[&str], team: Option<&str>) -> Vec<hearth_model::Record> {
    ids.iter()
        .map(|id| record(json!({"id": id, "name": id.to_uppercase(), "team": team})))
        .collect()
}

fn durable_ids(fx: &Fixture, entity: &str, property: &str) -> BTreeSet<String> {
    fx.durable(entity)
        .iter()
        .filter_map(|o| o.get(property).and_then(Value::as_str).map(str::to_string))
        .collect()
}

// ── Find-or-create ────────────────────────────────────────────────

#[test]
fn import_then_reimport_updates_in_place() {
    let fx = Fixture::new();
    let identity = IdentityParameters::new("Person", "id");
    let worker = fx.controller.new_session(DispatchTier::Worker, None).unwrap();

    let id = identity.clone();
    let (report, keys) = fx.with(&worker, move |s| {
        let records = vec![
            record(json!({"id": "a", "name": "Ann"})),
            record(json!({"id": "b", "name": "Bo"})),
        ];
        let report = s.import_records(records, &id, ImportParameters::new())?;
        Ok((report, s.cache_keys()?))
    });
    assert_eq!(report.created, 2);
    assert_eq!(report.objects.len(), 2);
    assert_eq!(
        keys,
        vec![
            IdentityKey::new("Person", "a", None::<String>),
            IdentityKey::new("Person", "b", None::<String>),
        ]
    );
    fx.controller.save(&worker).unwrap();

    let report = fx
        .controller
        .import_records(
            vec![record(json!({"id": "a", "name": "Annie"}))],
            identity,
            ImportParameters::new().find_existing(true),
        )
        .unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 1);
    assert_eq!(report.objects[0].get("name"), Some(&json!("Annie")));

    let stored = fx.durable("Person");
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().any(|o| o.get("name") == Some(&json!("Annie"))));
    assert!(stored.iter().any(|o| o.get("name") == Some(&json!("Bo"))));
}

#[test]
fn repeated_import_is_idempotent() {
    let fx = Fixture::new();
    let batch = people(&["a", "b", "c"], None);

    let first = fx
        .controller
        .import_records(batch.clone(), person_identity(), ImportParameters::new())
        .unwrap();
    let after_first = durable_ids(&fx, "Person", "id");

    let second = fx
        .controller
        .import_records(batch, person_identity(), ImportParameters::new())
        .unwrap();
    assert_eq!(durable_ids(&fx, "Person", "id"), after_first);
    assert_eq!(fx.durable("Person").len(), 3);
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 3);

    let ids = |r: &hearth_context::ImportReport| r.objects.iter().map(|o| o.id).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn without_find_existing_every_record_creates() {
    let fx = Fixture::new();
    for _ in 0..2 {
        fx.controller
            .import_records(
                people(&["a"], None),
                person_identity(),
                ImportParameters::new().find_existing(false),
            )
            .unwrap();
    }
    assert_eq!(fx.durable("Person").len(), 2);
}

#[test]
fn duplicates_in_a_batch_resolve_to_one_object() {
    let fx = Fixture::new();
    let report = fx
        .controller
        .import_records(
            vec![
                record(json!({"id": "a", "name": "first"})),
                record(json!({"id": "a", "name": "second"})),
            ],
            person_identity(),
            ImportParameters::new(),
        )
        .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.objects[0].id, report.objects[1].id);
    let stored = fx.durable("Person");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("name"), Some(&json!("second")));
}

#[test]
fn records_without_identity_are_skipped() {
    let fx = Fixture::new();
    let report = fx
        .controller
        .import_records(
            vec![
                record(json!({"name": "nobody"})),
                record(json!({"id": null, "name": "null"})),
                record(json!({"id": "a"})),
            ],
            person_identity(),
            ImportParameters::new(),
        )
        .unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.created, 1);
    assert_eq!(fx.durable("Person").len(), 1);
}

#[test]
fn record_keys_are_mapped_onto_the_model() {
    let fx = Fixture::new();
    let identity = IdentityParameters::new("Person", "id").with_record_identity_property("person_id");
    fx.controller
        .import_records(
            vec![record(json!({"person_id": "z", "name": "Zed", "shoe_size": 44}))],
            identity,
            ImportParameters::new(),
        )
        .unwrap();

    let stored = fx.durable("Person");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("id"), Some(&json!("z")));
    assert_eq!(stored[0].get("person_id"), None);
    assert_eq!(stored[0].get("shoe_size"), None);
}

// ── Groups ────────────────────────────────────────────────────────

#[test]
fn delete_existing_replaces_the_group() {
    let fx = Fixture::new();
    let red = || ImportParameters::new().in_group("red").delete_existing(true);

    fx.controller
        .import_records(people(&["a", "b", "c"], Some("red")), person_identity(), red())
        .unwrap();
    fx.controller
        .import_records(
            people(&["a"], Some("blue")),
            person_identity(),
            ImportParameters::new().in_group("blue"),
        )
        .unwrap();

    let report = fx
        .controller
        .import_records(people(&["a", "b"], Some("red")), person_identity(), red())
        .unwrap();
    assert_eq!(report.updated, 2);
    assert_eq!(report.deleted, 1);

    let red_ids: BTreeSet<_> = fx
        .durable_where("Person", "team", "red")
        .iter()
        .filter_map(|o| o.get("id").and_then(Value::as_str).map(str::to_string))
        .collect();
    assert_eq!(red_ids, BTreeSet::from(["a".to_string(), "b".to_string()]));
    assert_eq!(fx.durable_where("Person", "team", "blue").len(), 1);
}

#[test]
fn same_identity_in_two_groups_is_two_objects() {
    let fx = Fixture::new();
    for team in ["red", "blue"] {
        fx.controller
            .import_records(
                people(&["a"], None),
                person_identity(),
                ImportParameters::new().in_group(team),
            )
            .unwrap();
    }
    assert_eq!(fx.durable("Person").len(), 2);
    assert_eq!(fx.durable_where("Person", "team", "red").len(), 1);
}

#[test]
fn record_from_another_group_is_a_conflict() {
    let fx = Fixture::new();
    let report = fx
        .controller
        .import_records(
            vec![
                record(json!({"id": "a", "team": "red"})),
                record(json!({"id": "b", "team": "blue"})),
            ],
            person_identity(),
            ImportParameters::new().in_group("red"),
        )
        .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.index, 1);
    assert_eq!(conflict.record_group.as_deref(), Some("blue"));
    assert!(matches!(
        conflict.to_error(),
        DataStoreError::IdentityConflict { .. }
    ));
    assert_eq!(fx.durable("Person").len(), 1);
}

// ── Callbacks and failure ─────────────────────────────────────────

#[test]
fn post_create_runs_for_new_objects_only() {
    let fx = Fixture::new();
    fx.controller
        .import_records(people(&["a"], None), person_identity(), ImportParameters::new())
        .unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let params = ImportParameters::new().on_create(move |object, record, index, session| {
        seen.lock().unwrap().push((index, record["id"].clone()));
        let number = format!("for-{}", object.get("id").and_then(Value::as_str).unwrap_or("?"));
        session.create("Order", common::record(json!({"number": number})))?;
        Ok(())
    });
    fx.controller
        .import_records(people(&["a", "b", "c"], None), person_identity(), params)
        .unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![(1, json!("b")), (2, json!("c"))]
    );
    assert_eq!(
        durable_ids(&fx, "Order", "number"),
        BTreeSet::from(["for-b".to_string(), "for-c".to_string()])
    );
}

#[test]
fn failing_post_create_discards_the_batch() {
    let fx = Fixture::new();
    let params = ImportParameters::new().on_create(|_, _, index, _| {
        if index == 1 {
            anyhow::bail!("refusing record {index}");
        }
        Ok(())
    });
    let err = fx
        .controller
        .import_records(people(&["a", "b"], None), person_identity(), params)
        .unwrap_err();
    assert!(err.to_string().contains("refusing record 1"), "{err}");
    assert!(fx.durable("Person").is_empty());
}

#[test]
fn invalid_batch_is_not_saved() {
    let fx = Fixture::new();
    let err = fx
        .controller
        .import_records(
            vec![
                record(json!({"id": "a", "name": "fine"})),
                record(json!({"id": "b", "name": 42})),
            ],
            person_identity(),
            ImportParameters::new(),
        )
        .unwrap_err();
    assert!(matches!(err, DataStoreError::ValidationFailed(_)), "{err}");
    assert!(fx.durable("Person").is_empty());
}

#[test]
fn batch_refused_by_the_root_never_becomes_durable() {
    let fx = Fixture::new();
    let refuse = RefuseAtRoot::new();
    fx.controller.register_validation_handler("Person", refuse.clone());

    let err = fx
        .controller
        .import_records(people(&["a", "b"], None), person_identity(), ImportParameters::new())
        .unwrap_err();
    assert!(matches!(err, DataStoreError::ValidationFailed(_)), "{err}");
    assert!(!fx.controller.background_session().has_changes());

    refuse.allow();
    assert!(fx.controller.save_background_session().unwrap().is_none());
    assert!(fx.durable("Person").is_empty());

    let report = fx
        .controller
        .import_records(people(&["a", "b"], None), person_identity(), ImportParameters::new())
        .unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(fx.durable("Person").len(), 2);
}

// ── Typed records ─────────────────────────────────────────────────

#[test]
fn typed_import_uses_the_record_identity() {
    let fx = Fixture::new();
    let report = fx
        .controller
        .import_model_records(&[Order::new("T-1", 5), Order::new("T-2", 6)], ImportParameters::new())
        .unwrap();
    assert_eq!(report.created, 2);

    let report = fx
        .controller
        .import_model_records(&[Order::new("T-1", 50)], ImportParameters::new())
        .unwrap();
    assert_eq!(report.updated, 1);

    let stored = fx.durable("Order");
    assert_eq!(stored.len(), 2);
    let t1 = stored
        .iter()
        .find(|o| o.get("number") == Some(&json!("T-1")))
        .unwrap();
    assert_eq!(t1.get("total"), Some(&json!(50)));
}

#[test]
fn session_level_typed_import() {
    let fx = Fixture::new();
    let worker = fx.controller.new_session(DispatchTier::Worker, None).unwrap();
    let orders: Vec<Order> = fx.with(&worker, |s| {
        s.import_model_records(&[Order::new("S-1", 1)], ImportParameters::new())?;
        s.model_records(hearth_model::Predicate::True)
    });
    assert_eq!(orders, vec![Order::new("S-1", 1)]);
}

// ── Properties ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn one_object_per_distinct_identity(ids in proptest::collection::vec("[a-e]", 1..10)) {
        let fx = Fixture::new();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        for _ in 0..2 {
            fx.controller
                .import_records(people(&refs, None), person_identity(), ImportParameters::new())
                .unwrap();
        }
        let distinct: BTreeSet<String> = ids.iter().cloned().collect();
        prop_assert_eq!(durable_ids(&fx, "Person", "id"), distinct.clone());
        prop_assert_eq!(fx.durable("Person").len(), distinct.len());
    }
}
