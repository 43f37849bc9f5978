use hearth_types::{ObjectId, SessionId, WatcherId};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

// ── ObjectId ──────────────────────────────────────────────────────

#[test]
fn object_id_new_is_unique() {
    let a = ObjectId::new();
    let b = ObjectId::new();
    assert_ne!(a, b);
}

#[test]
fn object_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    let id = ObjectId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
}

#[test]
fn object_id_display_and_parse() {
    let id = ObjectId::new();
    let parsed = ObjectId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn object_id_from_str_invalid() {
    assert!(ObjectId::from_str("garbage").is_err());
    assert!(ObjectId::parse("not-a-uuid").is_err());
}

#[test]
fn object_id_serde_is_transparent() {
    let id = ObjectId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}

#[test]
fn object_id_hash_and_eq() {
    let id = ObjectId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

// ── SessionId ─────────────────────────────────────────────────────

#[test]
fn session_ids_are_increasing() {
    let a = SessionId::next();
    let b = SessionId::next();
    assert!(b.get() > a.get());
    assert!(a.to_string().starts_with("session-"));
}

// ── WatcherId ─────────────────────────────────────────────────────

#[test]
fn watcher_id_follows_allocation() {
    let a = Arc::new(1u32);
    let a2 = Arc::clone(&a);
    let b = Arc::new(1u32);
    assert_eq!(WatcherId::of(&a), WatcherId::of(&a2));
    assert_ne!(WatcherId::of(&a), WatcherId::of(&b));
}
