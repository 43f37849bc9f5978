//! The data store controller: the explicit handle callers pass around.

use crate::dispatch::{self, Dispatcher};
use crate::handle::{StoreHandle, StoreLifecycleEvent, StoreNotifications};
use crate::observer::{ChangeNotification, ObserverOptions, ObserverRegistry};
use crate::records::to_records;
use crate::save::SavePoint;
use crate::session::Shared;
use crate::{
    ChangeEvent, ControllerConfig, DataStoreError, DataStoreResult, ImportParameters,
    ImportReport, Session, WorkContext, WorkParameters,
};
use hearth_model::{IdentityParameters, ManagedObject, Model, ModelRecord, Record, ValidationHandler};
use hearth_types::{DispatchTier, IdentityKey, ObjectId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// The sessions that live as long as the store does.
struct StandingSessions {
    background: Session,
    main: Session,
}

impl StandingSessions {
    fn build(shared: &Arc<Shared>) -> Self {
        let background = Session::new(shared.clone(), DispatchTier::Background, None);
        let main = Session::new(shared.clone(), DispatchTier::Main, Some(background.clone()));
        Self { background, main }
    }
}

struct ControllerInner {
    config: ControllerConfig,
    shared: Arc<Shared>,
    sessions: RwLock<StandingSessions>,
    notifications: StoreNotifications,
}

/// Entry point to one persistent store.
///
/// Owns the store handle, the dispatcher and the observer registry, and
/// keeps the two standing sessions: the background session (the root, the
/// only writer of the store) and the main session (its child on the
/// ui-affinity tier). Cloning is cheap; clones share everything.
#[derive(Clone)]
pub struct DataStoreController {
    inner: Arc<ControllerInner>,
}

impl DataStoreController {
    /// Opens (or creates) the store described by `config`.
    pub fn open(config: ControllerConfig, model: Model) -> DataStoreResult<Self> {
        Self::open_with_notifications(config, model, StoreNotifications::new())
    }

    /// Like [`open`](Self::open), emitting lifecycle events (including the
    /// ones sent while clearing an incompatible store at open) on
    /// `notifications`.
    pub fn open_with_notifications(
        config: ControllerConfig,
        model: Model,
        notifications: StoreNotifications,
    ) -> DataStoreResult<Self> {
        config.validate()?;
        let store = StoreHandle::open(&config, Arc::new(model), &notifications)?;
        let shared = Arc::new(Shared {
            store,
            observers: ObserverRegistry::new(),
            dispatcher: Dispatcher::new()?,
            handlers: RwLock::new(HashMap::new()),
            enforce_tier_confinement: config.enforce_tier_confinement,
        });
        let sessions = RwLock::new(StandingSessions::build(&shared));
        info!(
            store = %config.identifier,
            path = %shared.store.path().display(),
            "Data store opened"
        );

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                shared,
                sessions,
                notifications,
            }),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.inner.config.identifier
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn model(&self) -> &Arc<Model> {
        self.inner.shared.store.model()
    }

    pub fn store_path(&self) -> &Path {
        self.inner.shared.store.path()
    }

    pub fn notifications(&self) -> &StoreNotifications {
        &self.inner.notifications
    }

    /// Installs custom validation and load hooks for an entity.
    pub fn register_validation_handler(
        &self,
        entity: impl Into<String>,
        handler: Arc<dyn ValidationHandler>,
    ) {
        self.inner.shared.handlers.write().insert(entity.into(), handler);
    }

    // ── Sessions ─────────────────────────────────────────────────

    pub fn main_session(&self) -> Session {
        self.inner.sessions.read().main.clone()
    }

    pub fn background_session(&self) -> Session {
        self.inner.sessions.read().background.clone()
    }

    /// Session of the unit running on the calling thread; otherwise the
    /// standing session of the calling tier. `None` outside any tier.
    pub fn current_session(&self) -> Option<Session> {
        if let Some(session) = dispatch::bound_session(|s| s.belongs_to(&self.inner.shared)) {
            return Some(session);
        }
        match self.inner.shared.dispatcher.current_tier()? {
            DispatchTier::Main => Some(self.main_session()),
            DispatchTier::Background => Some(self.background_session()),
            DispatchTier::Worker => None,
        }
    }

    /// Creates a session on `tier`. The parent defaults to the background
    /// session and must rank at least as high as `tier`.
    pub fn new_session(
        &self,
        tier: DispatchTier,
        parent: Option<&Session>,
    ) -> DataStoreResult<Session> {
        let parent = match parent {
            Some(parent) => {
                if !parent.belongs_to(&self.inner.shared) {
                    return Err(DataStoreError::StoreUnavailable(
                        "parent session belongs to another store".into(),
                    ));
                }
                parent.clone()
            }
            None => self.background_session(),
        };
        if !tier.may_wait_on(parent.tier()) {
            return Err(DataStoreError::WaitOrderViolation {
                from: tier,
                to: parent.tier(),
            });
        }
        Ok(Session::new(self.inner.shared.clone(), tier, Some(parent)))
    }

    // ── Work ─────────────────────────────────────────────────────

    /// Submits a work unit.
    ///
    /// Wait-variant units block until the unit and its save complete and
    /// return their error. Other units return immediately; their errors are
    /// logged.
    pub fn perform_work(&self, params: WorkParameters) -> DataStoreResult<()> {
        let tier = params.tier;
        let dispatcher = &self.inner.shared.dispatcher;
        let controller = self.clone();

        if let Some(delay) = params.delay {
            if params.wait {
                debug!(%tier, "Delayed work does not block the caller");
            }
            dispatcher.submit_after(tier, delay, Box::new(move || controller.execute_logged(params)));
            return Ok(());
        }
        if params.wait {
            return dispatcher.run_and_wait(tier, move || controller.execute(params))?;
        }
        dispatcher.submit(tier, Box::new(move || controller.execute_logged(params)))
    }

    /// Runs `f` in `session` on its tier and waits for the result.
    pub fn perform_with<T, F>(&self, session: &Session, f: F) -> DataStoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> DataStoreResult<T> + Send + 'static,
    {
        let session = session.clone();
        self.inner
            .shared
            .dispatcher
            .run_and_wait(session.tier(), move || {
                let _bound = dispatch::bind_session(session.clone());
                f(&session)
            })?
    }

    fn execute(&self, params: WorkParameters) -> DataStoreResult<()> {
        let WorkParameters {
            tier,
            should_save,
            session,
            post_save,
            work,
            ..
        } = params;
        let session = match session {
            Some(session) => session,
            None => self.standing_session(tier)?,
        };
        let _bound = dispatch::bind_session(session.clone());
        let context = WorkContext::new(tier, should_save);

        work(self, &session, &context).map_err(DataStoreError::from_work)?;
        if context.should_save() {
            self.save(&session)?;
            if let Some(post_save) = post_save {
                post_save(self, &session);
            }
        }
        Ok(())
    }

    fn execute_logged(&self, params: WorkParameters) {
        let tier = params.tier;
        if let Err(e) = self.execute(params) {
            error!(%tier, "Work unit failed: {}", e);
        }
    }

    fn standing_session(&self, tier: DispatchTier) -> DataStoreResult<Session> {
        match tier {
            DispatchTier::Main => Ok(self.main_session()),
            DispatchTier::Background => Ok(self.background_session()),
            DispatchTier::Worker => self.new_session(DispatchTier::Worker, None),
        }
    }

    pub fn perform_on_main<F>(&self, work: F) -> DataStoreResult<()>
    where
        F: FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        self.perform_work(WorkParameters::new(DispatchTier::Main, work))
    }

    pub fn perform_on_main_and_wait<F>(&self, work: F) -> DataStoreResult<()>
    where
        F: FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        self.perform_work(WorkParameters::new(DispatchTier::Main, work).and_wait())
    }

    pub fn perform_on_main_after<F>(&self, delay: Duration, work: F) -> DataStoreResult<()>
    where
        F: FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        self.perform_work(WorkParameters::new(DispatchTier::Main, work).after(delay))
    }

    pub fn perform_on_background<F>(&self, work: F) -> DataStoreResult<()>
    where
        F: FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        self.perform_work(WorkParameters::new(DispatchTier::Background, work))
    }

    pub fn perform_on_background_and_wait<F>(&self, work: F) -> DataStoreResult<()>
    where
        F: FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        self.perform_work(WorkParameters::new(DispatchTier::Background, work).and_wait())
    }

    pub fn perform_on_background_after<F>(&self, delay: Duration, work: F) -> DataStoreResult<()>
    where
        F: FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        self.perform_work(WorkParameters::new(DispatchTier::Background, work).after(delay))
    }

    /// Runs `work` in a fresh worker session.
    pub fn perform_on_worker<F>(&self, work: F) -> DataStoreResult<()>
    where
        F: FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        self.perform_work(WorkParameters::new(DispatchTier::Worker, work))
    }

    pub fn perform_on_worker_and_wait<F>(&self, work: F) -> DataStoreResult<()>
    where
        F: FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        self.perform_work(WorkParameters::new(DispatchTier::Worker, work).and_wait())
    }

    // ── Saving ───────────────────────────────────────────────────

    /// Saves `session` and then every ancestor, each on its own tier, up to
    /// the store. Returns the root's change event.
    ///
    /// The chain saves as a whole: if any level fails, every session in it
    /// gets back the pending changes it had before the call.
    pub fn save(&self, session: &Session) -> DataStoreResult<Option<ChangeEvent>> {
        let dispatcher = &self.inner.shared.dispatcher;
        let mut undo: Vec<SavePoint> = Vec::new();
        let mut current = session.clone();
        loop {
            let target = current.clone();
            let step = dispatcher
                .run_and_wait(current.tier(), move || target.save_recording())
                .and_then(|result| result);
            match step {
                Ok((event, points)) => {
                    undo.extend(points);
                    let parent = current.parent().cloned();
                    match parent {
                        Some(parent) => current = parent,
                        None => return Ok(event),
                    }
                }
                Err(e) => {
                    if !undo.is_empty() {
                        warn!(
                            session = %session.id(),
                            failed_at = %current.id(),
                            "Chained save failed, restoring pending changes: {}", e
                        );
                        for point in undo.into_iter().rev() {
                            point.restore();
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    pub fn save_main_session(&self) -> DataStoreResult<Option<ChangeEvent>> {
        self.save(&self.main_session())
    }

    pub fn save_background_session(&self) -> DataStoreResult<Option<ChangeEvent>> {
        self.save(&self.background_session())
    }

    /// Saves the calling tier's current session. A no-op outside any tier.
    pub fn save_current_session(&self) -> DataStoreResult<Option<ChangeEvent>> {
        match self.current_session() {
            Some(session) => self.save(&session),
            None => {
                debug!("No current session to save");
                Ok(None)
            }
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Deletes the store file and recreates it empty. Every existing
    /// session (and its cache) becomes unusable; fresh standing sessions
    /// replace the old ones.
    pub fn reset(&self) -> DataStoreResult<()> {
        self.clear(true)
    }

    /// Deletes the store file without recreating it. Every session fails
    /// with [`DataStoreError::StoreUnavailable`] afterwards.
    pub fn delete_persistent_store(&self) -> DataStoreResult<()> {
        self.clear(false)
    }

    fn clear(&self, recreate: bool) -> DataStoreResult<()> {
        let notifications = &self.inner.notifications;
        notifications.emit(StoreLifecycleEvent::WillClearDatabase);
        let result = self.inner.shared.store.clear(recreate);
        // The generation moved either way; the old standing sessions are dead.
        *self.inner.sessions.write() = StandingSessions::build(&self.inner.shared);
        notifications.emit(StoreLifecycleEvent::DidClearDatabase);
        match result {
            Ok(generation) => {
                info!(store = %self.identifier(), generation, recreate, "Data store cleared");
                Ok(())
            }
            Err(e) => {
                error!(store = %self.identifier(), recreate, "Clearing the data store failed: {}", e);
                Err(e)
            }
        }
    }

    // ── Observers ────────────────────────────────────────────────

    /// Registers `action` to be called with every matching committed
    /// change. Only a weak reference to `watcher` is kept.
    pub fn add_observer<W, F>(&self, watcher: &Arc<W>, options: ObserverOptions, action: F)
    where
        W: Send + Sync + 'static,
        F: Fn(&W, &ChangeNotification) + Send + Sync + 'static,
    {
        self.inner.shared.observers.add(watcher, options, action);
    }

    pub fn remove_observer<W: ?Sized>(&self, watcher: &Arc<W>, entity: Option<&str>) -> bool {
        self.inner.shared.observers.remove(watcher, entity)
    }

    pub fn has_observer<W: ?Sized>(&self, watcher: &Arc<W>, entity: Option<&str>) -> bool {
        self.inner.shared.observers.contains(watcher, entity)
    }

    /// Observes `R::ENTITY` on `tier`.
    pub fn add_record_observer<R, W, F>(&self, watcher: &Arc<W>, tier: DispatchTier, action: F)
    where
        R: ModelRecord,
        W: Send + Sync + 'static,
        F: Fn(&W, &ChangeNotification) + Send + Sync + 'static,
    {
        self.add_observer(watcher, ObserverOptions::for_record::<R>().on_tier(tier), action);
    }

    pub fn has_record_observer<R: ModelRecord>(
        &self,
        watcher: &Arc<impl Send + Sync + 'static>,
    ) -> bool {
        self.has_observer(watcher, Some(R::ENTITY))
    }

    pub fn remove_record_observer<R: ModelRecord>(
        &self,
        watcher: &Arc<impl Send + Sync + 'static>,
    ) -> bool {
        self.remove_observer(watcher, Some(R::ENTITY))
    }

    // ── Identity cache ───────────────────────────────────────────

    pub fn set_cache_object(
        &self,
        session: &Session,
        key: IdentityKey,
        object: &ManagedObject,
    ) -> DataStoreResult<()> {
        session.cache_put(key, object)
    }

    pub fn cache_object(
        &self,
        session: &Session,
        key: &IdentityKey,
    ) -> DataStoreResult<Option<ManagedObject>> {
        session.cache_get(key)
    }

    pub fn remove_cache_object(
        &self,
        session: &Session,
        key: &IdentityKey,
    ) -> DataStoreResult<Option<ObjectId>> {
        session.cache_remove(key)
    }

    // ── Import ───────────────────────────────────────────────────

    /// Imports a batch in a fresh worker session and saves it to the
    /// store. On any failure nothing becomes durable.
    pub fn import_records(
        &self,
        records: Vec<Record>,
        identity: IdentityParameters,
        params: ImportParameters,
    ) -> DataStoreResult<ImportReport> {
        let slot = Arc::new(Mutex::new(None));
        let out = slot.clone();
        self.perform_work(
            WorkParameters::new(DispatchTier::Worker, move |_, session, _| {
                let report = session.import_records(records, &identity, params)?;
                *out.lock() = Some(report);
                Ok(())
            })
            .and_save()
            .and_wait(),
        )?;
        let report = slot.lock().take();
        report.ok_or_else(|| DataStoreError::Work(anyhow::anyhow!("import produced no report")))
    }

    /// Typed variant of [`import_records`](Self::import_records).
    pub fn import_model_records<R: ModelRecord>(
        &self,
        records: &[R],
        params: ImportParameters,
    ) -> DataStoreResult<ImportReport> {
        self.import_records(to_records(records)?, R::identity_parameters(), params)
    }
}
