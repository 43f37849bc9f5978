//! Work units.

use crate::{DataStoreController, Session};
use hearth_types::DispatchTier;
use std::cell::Cell;
use std::fmt;
use std::time::Duration;

/// Body of a work unit.
pub type WorkFn =
    Box<dyn FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()> + Send>;

/// Runs after a work unit's save succeeded.
pub type PostSaveFn = Box<dyn FnOnce(&DataStoreController, &Session) + Send>;

/// A unit of work and where and how to run it.
///
/// Consumed on execution, so it runs at most once.
pub struct WorkParameters {
    pub(crate) tier: DispatchTier,
    pub(crate) wait: bool,
    pub(crate) should_save: bool,
    pub(crate) delay: Option<Duration>,
    pub(crate) session: Option<Session>,
    pub(crate) post_save: Option<PostSaveFn>,
    pub(crate) work: WorkFn,
}

impl WorkParameters {
    /// Creates an asynchronous, non-saving unit for `tier`.
    pub fn new<F>(tier: DispatchTier, work: F) -> Self
    where
        F: FnOnce(&DataStoreController, &Session, &WorkContext) -> anyhow::Result<()>
            + Send
            + 'static,
    {
        Self {
            tier,
            wait: false,
            should_save: false,
            delay: None,
            session: None,
            post_save: None,
            work: Box::new(work),
        }
    }

    /// Block the caller until the unit (and its save) completes.
    pub fn and_wait(mut self) -> Self {
        self.wait = true;
        self
    }

    /// Save the unit's session up to the store once the unit returns.
    pub fn and_save(mut self) -> Self {
        self.should_save = true;
        self
    }

    /// Enqueue only after `delay`. Delayed units never block the caller.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run in an existing session, on that session's tier.
    pub fn in_session(mut self, session: Session) -> Self {
        self.tier = session.tier();
        self.session = Some(session);
        self
    }

    /// Called after a successful save. Never called if the save fails.
    pub fn on_saved<F>(mut self, post_save: F) -> Self
    where
        F: FnOnce(&DataStoreController, &Session) + Send + 'static,
    {
        self.post_save = Some(Box::new(post_save));
        self
    }

    pub fn tier(&self) -> DispatchTier {
        self.tier
    }
}

impl fmt::Debug for WorkParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkParameters")
            .field("tier", &self.tier)
            .field("wait", &self.wait)
            .field("should_save", &self.should_save)
            .field("delay", &self.delay)
            .field("session", &self.session.as_ref().map(Session::id))
            .field("post_save", &self.post_save.is_some())
            .finish_non_exhaustive()
    }
}

/// Passed to a running work unit.
#[derive(Debug)]
pub struct WorkContext {
    tier: DispatchTier,
    should_save: bool,
    skip_save: Cell<bool>,
}

impl WorkContext {
    pub(crate) fn new(tier: DispatchTier, should_save: bool) -> Self {
        Self {
            tier,
            should_save,
            skip_save: Cell::new(false),
        }
    }

    pub fn tier(&self) -> DispatchTier {
        self.tier
    }

    /// Returns true if the session will be saved when the unit returns.
    pub fn should_save(&self) -> bool {
        self.should_save && !self.skip_save.get()
    }

    /// Cancels the save requested with
    /// [`and_save`](WorkParameters::and_save).
    pub fn skip_save(&self) {
        self.skip_save.set(true);
    }
}
