//! Shared helpers for the session-layer tests.

#![allow(dead_code)]

use hearth_context::{ControllerConfig, DataStoreController, Session};
use hearth_model::{
    EntityDescription, FetchTemplate, ManagedObject, Model, ModelRecord, Predicate,
    PropertyDescription, IdentityParameters, Record, ValidationHandler,
};
use hearth_store::{FetchRequest, SqliteStore};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(5);

/// Installs a test subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A shop with orders and people. People are grouped by team.
pub fn shop_model(version: u32) -> Model {
    Model::new("shop", version)
        .with_entity(
            EntityDescription::new("Order")
                .with_property(PropertyDescription::string("number").required())
                .with_property(PropertyDescription::string("status").with_default(json!("open")))
                .with_property(PropertyDescription::string("notes"))
                .with_property(PropertyDescription::integer("total"))
                .with_identity("number"),
        )
        .with_entity(
            EntityDescription::new("Person")
                .with_property(PropertyDescription::string("id").required())
                .with_property(PropertyDescription::string("name"))
                .with_property(PropertyDescription::string("team"))
                .with_identity("id")
                .with_group("team"),
        )
        .with_template(
            "orders_with_status",
            FetchTemplate::new("Order", Predicate::eq("status", "$STATUS")),
        )
}

/// An open controller over a fresh store in its own temp directory.
pub struct Fixture {
    pub controller: DataStoreController,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(adjust: impl FnOnce(ControllerConfig) -> ControllerConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let config = adjust(ControllerConfig::new("shop").with_root_directory(dir.path()));
        let controller = DataStoreController::open(config, shop_model(1)).unwrap();
        Self { controller, dir }
    }

    /// Blocks until everything already queued on the main tier has run.
    pub fn drain_main(&self) {
        self.controller
            .perform_on_main_and_wait(|_, _, _| Ok(()))
            .unwrap();
    }

    /// Every committed object of an entity, read straight from the file.
    pub fn durable(&self, entity: &str) -> Vec<ManagedObject> {
        let store = SqliteStore::open(self.controller.store_path(), Arc::new(shop_model(1))).unwrap();
        store.fetch(&FetchRequest::new(entity)).unwrap()
    }

    /// Committed objects of an entity whose `property` equals `value`.
    pub fn durable_where(&self, entity: &str, property: &str, value: &str) -> Vec<ManagedObject> {
        self.durable(entity)
            .into_iter()
            .filter(|o| o.get(property).and_then(Value::as_str) == Some(value))
            .collect()
    }

    /// Runs `f` in `session` on its tier.
    pub fn with<T, F>(&self, session: &Session, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> hearth_context::DataStoreResult<T> + Send + 'static,
    {
        self.controller.perform_with(session, f).unwrap()
    }
}

pub fn record(value: Value) -> Record {
    let Value::Object(map) = value else {
        panic!("test record must be an object");
    };
    map
}

pub fn person_identity() -> IdentityParameters {
    IdentityParameters::new("Person", "id").with_group_property("team")
}

/// Receives one value or fails the test after [`WAIT`].
pub fn recv<T>(rx: &mpsc::Receiver<T>) -> T {
    rx.recv_timeout(WAIT).expect("timed out waiting")
}

/// Asserts nothing arrives within a short grace period.
pub fn assert_silent<T: std::fmt::Debug>(rx: &mpsc::Receiver<T>) {
    if let Ok(value) = rx.recv_timeout(Duration::from_millis(200)) {
        panic!("unexpected delivery: {value:?}");
    }
}

/// Refuses every object validated on the background tier until
/// [`allow`](RefuseAtRoot::allow) is called. Child saves pass, the root
/// commit fails.
pub struct RefuseAtRoot {
    refusing: AtomicBool,
}

impl RefuseAtRoot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refusing: AtomicBool::new(true),
        })
    }

    pub fn allow(&self) {
        self.refusing.store(false, Ordering::SeqCst);
    }
}

impl ValidationHandler for RefuseAtRoot {
    fn validate(&self, object: &ManagedObject) -> Result<(), String> {
        let on_root = std::thread::current().name() == Some("hearth-background");
        if on_root && self.refusing.load(Ordering::SeqCst) {
            return Err(format!("{} refused by the root", object.entity));
        }
        Ok(())
    }
}

/// Typed view of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub total: Option<i64>,
}

impl Order {
    pub fn new(number: &str, total: i64) -> Self {
        Self {
            number: number.to_string(),
            status: Some("open".to_string()),
            notes: None,
            total: Some(total),
        }
    }
}

impl ModelRecord for Order {
    const ENTITY: &'static str = "Order";

    fn identity_parameters() -> IdentityParameters {
        IdentityParameters::new("Order", "number")
    }
}
