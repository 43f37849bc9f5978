//! Tier dispatch.
//!
//! The main and background tiers are dedicated named threads, each draining
//! its own FIFO queue. Worker submissions run on the blocking pool of a
//! small private tokio runtime, which also drives delayed submissions.
//!
//! A thread-local records which dispatcher and tier the current thread
//! belongs to, so a wait-variant submission to the tier the caller is
//! already on runs inline instead of deadlocking.

use crate::{DataStoreError, DataStoreResult, Session};
use hearth_types::DispatchTier;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// A queued unit of work.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_DISPATCHER: AtomicU64 = AtomicU64::new(1);

const MAX_WORKER_THREADS: usize = 64;

thread_local! {
    static CURRENT: Cell<Option<(u64, DispatchTier)>> = const { Cell::new(None) };
    static BOUND: RefCell<Vec<Session>> = const { RefCell::new(Vec::new()) };
}

/// Restores the previous tier marker on drop.
struct TierGuard {
    previous: Option<(u64, DispatchTier)>,
}

fn enter_tier(dispatcher: u64, tier: DispatchTier) -> TierGuard {
    let previous = CURRENT.with(|c| c.replace(Some((dispatcher, tier))));
    TierGuard { previous }
}

impl Drop for TierGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}

/// Keeps a session bound to the current thread while a unit runs.
pub(crate) struct SessionBinding(());

pub(crate) fn bind_session(session: Session) -> SessionBinding {
    BOUND.with(|b| b.borrow_mut().push(session));
    SessionBinding(())
}

impl Drop for SessionBinding {
    fn drop(&mut self) {
        BOUND.with(|b| {
            b.borrow_mut().pop();
        });
    }
}

/// Innermost session bound on this thread that satisfies `filter`.
pub(crate) fn bound_session(filter: impl Fn(&Session) -> bool) -> Option<Session> {
    BOUND.with(|b| b.borrow().iter().rev().find(|s| filter(s)).cloned())
}

pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_job(tier: DispatchTier, job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        error!(%tier, panic = %panic_message(&payload), "Work unit panicked");
    }
}

/// Cloneable routing half of the dispatcher.
#[derive(Clone)]
struct Router {
    id: u64,
    main: mpsc::UnboundedSender<Job>,
    background: mpsc::UnboundedSender<Job>,
    handle: Handle,
}

impl Router {
    fn enqueue(&self, tier: DispatchTier, job: Job) -> DataStoreResult<()> {
        match tier {
            DispatchTier::Main => self
                .main
                .send(job)
                .map_err(|_| DataStoreError::DispatcherClosed(tier)),
            DispatchTier::Background => self
                .background
                .send(job)
                .map_err(|_| DataStoreError::DispatcherClosed(tier)),
            DispatchTier::Worker => {
                let id = self.id;
                self.handle.spawn_blocking(move || {
                    let _tier = enter_tier(id, DispatchTier::Worker);
                    run_job(DispatchTier::Worker, job);
                });
                Ok(())
            }
        }
    }
}

/// Routes work to the tiers of one store.
pub struct Dispatcher {
    router: Router,
    runtime: Option<Runtime>,
}

impl Dispatcher {
    /// Starts the main and background threads and the worker runtime.
    pub fn new() -> DataStoreResult<Self> {
        let id = NEXT_DISPATCHER.fetch_add(1, Ordering::Relaxed);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(MAX_WORKER_THREADS)
            .thread_name("hearth-worker")
            .enable_time()
            .build()?;

        let main = spawn_tier_thread(id, DispatchTier::Main)?;
        let background = spawn_tier_thread(id, DispatchTier::Background)?;
        debug!(dispatcher = id, "Dispatcher started");

        Ok(Self {
            router: Router {
                id,
                main,
                background,
                handle: runtime.handle().clone(),
            },
            runtime: Some(runtime),
        })
    }

    /// Tier of the calling thread, if it belongs to this dispatcher.
    pub fn current_tier(&self) -> Option<DispatchTier> {
        CURRENT.with(|c| match c.get() {
            Some((id, tier)) if id == self.router.id => Some(tier),
            _ => None,
        })
    }

    /// Returns true if the calling thread runs `tier` of this dispatcher.
    pub fn is_current(&self, tier: DispatchTier) -> bool {
        self.current_tier() == Some(tier)
    }

    /// Queues a job on a tier and returns immediately.
    pub(crate) fn submit(&self, tier: DispatchTier, job: Job) -> DataStoreResult<()> {
        self.router.enqueue(tier, job)
    }

    /// Queues a job on a tier once `delay` has elapsed. Never blocks.
    pub(crate) fn submit_after(&self, tier: DispatchTier, delay: Duration, job: Job) {
        let router = self.router.clone();
        self.router.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = router.enqueue(tier, job) {
                warn!(%tier, "Dropped delayed work: {}", e);
            }
        });
    }

    /// Runs `f` on a tier and blocks until it returns.
    ///
    /// Runs inline when the caller is already on `tier`. Otherwise the
    /// caller's tier must rank no higher than the target's.
    pub fn run_and_wait<T, F>(&self, tier: DispatchTier, f: F) -> DataStoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current(tier) {
            return catch_unwind(AssertUnwindSafe(f))
                .map_err(|p| DataStoreError::WorkPanicked(panic_message(&p)));
        }
        if let Some(from) = self.current_tier()
            && !from.may_wait_on(tier)
        {
            return Err(DataStoreError::WaitOrderViolation { from, to: tier });
        }

        let (tx, rx) = oneshot::channel();
        self.router.enqueue(
            tier,
            Box::new(move || {
                let result = catch_unwind(AssertUnwindSafe(f))
                    .map_err(|p| DataStoreError::WorkPanicked(panic_message(&p)));
                let _ = tx.send(result);
            }),
        )?;
        rx.blocking_recv()
            .map_err(|_| DataStoreError::DispatcherClosed(tier))?
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Tier threads exit once their senders are gone.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn spawn_tier_thread(
    id: u64,
    tier: DispatchTier,
) -> DataStoreResult<mpsc::UnboundedSender<Job>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    std::thread::Builder::new()
        .name(format!("hearth-{tier}"))
        .spawn(move || {
            let _tier = enter_tier(id, tier);
            while let Some(job) = rx.blocking_recv() {
                run_job(tier, job);
            }
            debug!(dispatcher = id, %tier, "Tier thread stopped");
        })?;
    Ok(tx)
}
