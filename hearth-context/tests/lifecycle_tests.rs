mod common;

use common::{Fixture, init_tracing, record, shop_model};
use hearth_context::{
    ControllerConfig, DataStoreController, DataStoreError, StoreLifecycleEvent, StoreNotifications,
};
use hearth_types::{DispatchTier, IdentityKey};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;

fn drain(rx: &mut broadcast::Receiver<StoreLifecycleEvent>) -> Vec<StoreLifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn seed(fx: &Fixture) {
    fx.with(&fx.controller.background_session(), |s| {
        s.create("Order", record(json!({"number": "L-1"})))
    });
    fx.controller.save_background_session().unwrap();
}

// ── Reset ─────────────────────────────────────────────────────────

#[test]
fn reset_empties_the_store_and_invalidates_sessions() {
    let fx = Fixture::new();
    seed(&fx);
    let mut events = fx.controller.notifications().subscribe();
    let old_main = fx.controller.main_session();
    let old_worker = fx.controller.new_session(DispatchTier::Worker, None).unwrap();

    fx.controller.reset().unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            StoreLifecycleEvent::WillClearDatabase,
            StoreLifecycleEvent::DidClearDatabase
        ]
    );
    assert!(fx.durable("Order").is_empty());
    assert!(!old_main.is_valid());
    assert!(!old_worker.is_valid());

    let err = fx.controller.perform_with(&old_main, |s| s.count(&hearth_store::FetchRequest::new("Order")));
    assert!(matches!(err, Err(DataStoreError::StoreUnavailable(_))));

    let new_main = fx.controller.main_session();
    assert_ne!(new_main.id(), old_main.id());
    assert!(new_main.is_valid());
    fx.with(&new_main, |s| s.create("Order", record(json!({"number": "L-2"}))));
    fx.controller.save_main_session().unwrap();
    assert_eq!(fx.durable("Order").len(), 1);
}

#[test]
fn reset_clears_session_caches() {
    let fx = Fixture::new();
    let key = IdentityKey::new("Order", "L-1", None::<String>);
    let k = key.clone();
    fx.with(&fx.controller.background_session(), move |s| {
        let object = s.create("Order", record(json!({"number": "L-1"})))?;
        s.cache_put(k, &object)
    });
    fx.controller.save_background_session().unwrap();

    fx.controller.reset().unwrap();
    let hit = fx.with(&fx.controller.background_session(), move |s| s.cache_get(&key));
    assert_eq!(hit, None);
}

#[test]
fn deleted_store_is_unavailable_until_reset() {
    let fx = Fixture::new();
    seed(&fx);
    let path = fx.controller.store_path().to_path_buf();
    let mut events = fx.controller.notifications().subscribe();

    fx.controller.delete_persistent_store().unwrap();
    assert!(!path.exists());
    assert_eq!(
        drain(&mut events),
        vec![
            StoreLifecycleEvent::WillClearDatabase,
            StoreLifecycleEvent::DidClearDatabase
        ]
    );

    let err = fx
        .controller
        .perform_with(&fx.controller.main_session(), |s| {
            s.create("Order", record(json!({"number": "L-3"})))
        })
        .unwrap_err();
    assert!(matches!(err, DataStoreError::StoreUnavailable(_)), "{err}");

    fx.controller.reset().unwrap();
    assert!(path.exists());
    assert!(fx.durable("Order").is_empty());
}

#[test]
fn failed_reset_still_replaces_sessions_and_finishes() {
    let fx = Fixture::new();
    seed(&fx);
    let path = fx.controller.store_path().to_path_buf();
    let old_main = fx.controller.main_session();
    let mut events = fx.controller.notifications().subscribe();

    // A directory where the store file was cannot be removed as a file.
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();

    assert!(fx.controller.reset().is_err());
    assert_eq!(
        drain(&mut events),
        vec![
            StoreLifecycleEvent::WillClearDatabase,
            StoreLifecycleEvent::DidClearDatabase
        ]
    );
    assert!(!old_main.is_valid());
    let new_main = fx.controller.main_session();
    assert_ne!(new_main.id(), old_main.id());

    std::fs::remove_dir(&path).unwrap();
    fx.controller.reset().unwrap();
    fx.with(&fx.controller.main_session(), |s| {
        s.create("Order", record(json!({"number": "L-4"})))
    });
    fx.controller.save_main_session().unwrap();
    assert_eq!(fx.durable("Order").len(), 1);
}

// ── Opening ───────────────────────────────────────────────────────

#[test]
fn reopening_keeps_committed_objects() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig::new("shop").with_root_directory(dir.path());

    {
        let controller = DataStoreController::open(config.clone(), shop_model(1)).unwrap();
        controller
            .perform_with(&controller.background_session(), |s| {
                s.create("Order", record(json!({"number": "K-1"})))?;
                s.save()
            })
            .unwrap();
    }

    let controller = DataStoreController::open(config, shop_model(1)).unwrap();
    let count = controller
        .perform_with(&controller.background_session(), |s| {
            s.count(&hearth_store::FetchRequest::new("Order"))
        })
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn incompatible_store_is_cleared_on_open() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig::new("shop").with_root_directory(dir.path());

    {
        let controller = DataStoreController::open(config.clone(), shop_model(1)).unwrap();
        controller
            .perform_with(&controller.background_session(), |s| {
                s.create("Order", record(json!({"number": "X-1"})))?;
                s.save()
            })
            .unwrap();
    }

    let notifications = StoreNotifications::new();
    let mut events = notifications.subscribe();
    let controller =
        DataStoreController::open_with_notifications(config, shop_model(2), notifications).unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            StoreLifecycleEvent::WillClearIncompatibleDatabase,
            StoreLifecycleEvent::DidClearIncompatibleDatabase
        ]
    );
    let count = controller
        .perform_with(&controller.background_session(), |s| {
            s.count(&hearth_store::FetchRequest::new("Order"))
        })
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn unreadable_store_file_is_replaced() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig::new("shop").with_root_directory(dir.path());
    std::fs::write(config.store_path(), vec![b'x'; 4096]).unwrap();

    let notifications = StoreNotifications::new();
    let mut events = notifications.subscribe();
    DataStoreController::open_with_notifications(config, shop_model(1), notifications).unwrap();
    assert_eq!(drain(&mut events).len(), 2);
}

#[test]
fn invalid_config_is_rejected_at_open() {
    init_tracing();
    let err = DataStoreController::open(ControllerConfig::new("  "), shop_model(1)).err();
    assert!(matches!(err, Some(DataStoreError::Config(_))));

    let config = ControllerConfig::new("shop").with_store_file_name("nested/shop.sqlite");
    let err = DataStoreController::open(config, shop_model(1)).err();
    assert!(matches!(err, Some(DataStoreError::Config(_))));
}

#[test]
fn controller_accessors() {
    let fx = Fixture::new();
    assert_eq!(fx.controller.identifier(), "shop");
    assert_eq!(fx.controller.store_path(), fx.dir.path().join("shop.sqlite"));
    assert!(fx.controller.model().entity("Person").is_some());
    assert!(fx.controller.background_session().is_root());
    assert_eq!(
        fx.controller.main_session().parent().map(|p| p.id()),
        Some(fx.controller.background_session().id())
    );
}

// ── Config ────────────────────────────────────────────────────────

#[test]
fn config_loads_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hearth.toml");
    std::fs::write(
        &path,
        "identifier = \"library\"\nstore_file_name = \"books.db\"\nenforce_tier_confinement = false\n",
    )
    .unwrap();

    let config = ControllerConfig::load_from(&path);
    assert_eq!(config.identifier, "library");
    assert_eq!(config.resolved_file_name(), "books.db");
    assert!(!config.enforce_tier_confinement);
    assert_eq!(config.root_directory, None);
}

#[test]
fn config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = ControllerConfig::load_from(&dir.path().join("missing.toml"));
    assert_eq!(missing, ControllerConfig::default());

    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "identifier = [").unwrap();
    assert_eq!(ControllerConfig::load_from(&broken), ControllerConfig::default());

    let config = ControllerConfig::new("notes").with_root_directory("/srv/hearth");
    assert_eq!(
        config.store_path(),
        std::path::PathBuf::from("/srv/hearth/notes.sqlite")
    );
}
