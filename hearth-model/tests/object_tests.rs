use hearth_model::{IdentityParameters, ManagedObject, ModelRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    #[serde(rename = "id")]
    external_id: String,
    name: String,
}

impl ModelRecord for Person {
    const ENTITY: &'static str = "Person";

    fn identity_parameters() -> IdentityParameters {
        IdentityParameters::new("Person", "id")
    }
}

// ── ManagedObject ─────────────────────────────────────────────────

#[test]
fn new_object_is_empty() {
    let o = ManagedObject::new("Person");
    assert_eq!(o.entity, "Person");
    assert!(o.properties().unwrap().is_empty());
    assert_eq!(o.created_at, o.modified_at);
}

#[test]
fn set_reports_changes() {
    let mut o = ManagedObject::new("Person");
    assert!(o.set("name", json!("Ann")));
    assert!(!o.set("name", json!("Ann")));
    assert!(o.set("name", json!("Annie")));
    assert_eq!(o.get_str("/name"), Some("Annie"));
}

#[test]
fn pointer_accessors() {
    let mut o = ManagedObject::new("Person");
    o.set("age", json!(41));
    o.set("active", json!(false));
    assert_eq!(o.get_number("/age"), Some(41.0));
    assert_eq!(o.get_bool("/active"), Some(false));
    assert_eq!(o.get_str("/missing"), None);
}

// ── ModelRecord ───────────────────────────────────────────────────

#[test]
fn record_mapping_follows_serde_names() {
    let p = Person {
        external_id: "a".into(),
        name: "Ann".into(),
    };
    let record = p.to_record().unwrap();
    assert_eq!(record.get("id"), Some(&json!("a")));

    let mut object = ManagedObject::new("Person");
    object.set("id", json!("a"));
    object.set("name", json!("Ann"));
    object.set("group", json!("team"));
    assert_eq!(Person::from_object(&object).unwrap(), p);
}

#[test]
fn identity_parameters_default_record_key() {
    let params = IdentityParameters::new("Person", "remoteId");
    assert_eq!(params.record_identity_key(), "remoteId");
    let params = params.with_record_identity_property("id").with_group_property("list");
    assert_eq!(params.record_identity_key(), "id");
    assert_eq!(params.group_property.as_deref(), Some("list"));
}
