use hearth_types::{DispatchTier, IdentityKey};
use proptest::prelude::*;
use serde_json::json;

// ── IdentityKey ───────────────────────────────────────────────────

#[test]
fn key_from_string_value() {
    let key = IdentityKey::from_value("Person", &json!("a"), None).unwrap();
    assert_eq!(key, IdentityKey::new("Person", "a", None::<String>));
    assert_eq!(key.to_string(), "Person[a]");
}

#[test]
fn numeric_and_string_identities_share_a_key() {
    let a = IdentityKey::from_value("Order", &json!(7), Some("g")).unwrap();
    let b = IdentityKey::from_value("Order", &json!("7"), Some("g")).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "Order[7]@g");
}

#[test]
fn structured_values_are_not_identities() {
    assert!(IdentityKey::from_value("Order", &json!(null), None).is_none());
    assert!(IdentityKey::from_value("Order", &json!([1]), None).is_none());
    assert!(IdentityKey::from_value("Order", &json!({"a": 1}), None).is_none());
}

#[test]
fn groups_partition_identities() {
    let a = IdentityKey::new("Item", "1", Some("inbox"));
    let b = IdentityKey::new("Item", "1", Some("archive"));
    assert_ne!(a, b);
    assert!(a.in_group(Some("inbox")));
    assert!(!a.in_group(None));
}

// ── DispatchTier ──────────────────────────────────────────────────

#[test]
fn tier_wait_order() {
    assert!(DispatchTier::Worker.may_wait_on(DispatchTier::Main));
    assert!(DispatchTier::Worker.may_wait_on(DispatchTier::Background));
    assert!(DispatchTier::Main.may_wait_on(DispatchTier::Background));
    assert!(!DispatchTier::Background.may_wait_on(DispatchTier::Main));
    assert!(!DispatchTier::Main.may_wait_on(DispatchTier::Worker));
    assert!(DispatchTier::Main.may_wait_on(DispatchTier::Main));
}

#[test]
fn tier_parse() {
    assert_eq!("ui".parse::<DispatchTier>().unwrap(), DispatchTier::Main);
    assert_eq!("Background".parse::<DispatchTier>().unwrap(), DispatchTier::Background);
    assert_eq!("thread".parse::<DispatchTier>().unwrap(), DispatchTier::Worker);
    assert!("gpu".parse::<DispatchTier>().is_err());
}

proptest! {
    #[test]
    fn integer_identities_normalize_like_their_decimal_string(n in any::<i64>()) {
        let from_number = IdentityKey::from_value("E", &json!(n), None).unwrap();
        let from_string = IdentityKey::from_value("E", &json!(n.to_string()), None).unwrap();
        prop_assert_eq!(from_number, from_string);
    }

    #[test]
    fn wait_order_is_antisymmetric(a in 0usize..3, b in 0usize..3) {
        let (ta, tb) = (DispatchTier::ALL[a], DispatchTier::ALL[b]);
        if ta != tb {
            prop_assert!(ta.may_wait_on(tb) != tb.may_wait_on(ta));
        }
    }
}
