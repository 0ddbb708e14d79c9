//! Single-threaded execution marshal.
//!
//! The host application has exactly one mutation-safe thread.  The
//! marshal models it as a queue of closures drained by one dedicated
//! worker thread that owns the mutable [`HostContext`]: submitted units
//! of work execute strictly one at a time, in submission order, and the
//! submitting task asynchronously awaits the unit's return value or its
//! propagated failure.
//!
//! A unit of work must never block on the result of a *different*
//! pending submission — that is a guaranteed deadlock on a one-thread
//! queue — so submissions made from the marshal thread itself are
//! rejected outright.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::host::resources::HostContext;
use crate::{AppError, Result};

enum Job {
    Work(Box<dyn FnOnce(&mut HostContext) + Send>),
    Quit,
}

/// Handle to the host's safe-thread work queue.
///
/// Cheap to share behind an [`std::sync::Arc`]; every clone submits to
/// the same single worker thread.
pub struct Marshal {
    tx: mpsc::UnboundedSender<Job>,
    worker_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Marshal {
    /// Spawn the worker thread and hand it ownership of `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Marshal`] if the OS refuses to spawn the
    /// thread.
    pub fn spawn(ctx: HostContext) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = std::thread::Builder::new()
            .name("host-marshal".into())
            .spawn(move || run_worker(ctx, rx))
            .map_err(|err| AppError::Marshal(format!("failed to spawn marshal thread: {err}")))?;
        let worker_id = handle.thread().id();
        Ok(Self {
            tx,
            worker_id,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Submit a unit of work and await its result.
    ///
    /// Work executes on the marshal thread in submission order.  A panic
    /// inside the unit is caught and surfaced as an error; the worker
    /// thread survives and later submissions still run.
    ///
    /// # Errors
    ///
    /// - [`AppError::Marshal`]`("reentrant submission …")` when called
    ///   from the marshal thread itself (self-deadlock guard).
    /// - [`AppError::Marshal`]`("marshal has shut down")` when the
    ///   worker is gone.
    /// - [`AppError::Marshal`] carrying the panic message when the unit
    ///   of work panicked.
    pub async fn submit<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut HostContext) -> T + Send + 'static,
    {
        if std::thread::current().id() == self.worker_id {
            return Err(AppError::Marshal(
                "reentrant submission from the marshal thread would deadlock".into(),
            ));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job::Work(Box::new(move |ctx| {
            let outcome = catch_unwind(AssertUnwindSafe(|| f(ctx)))
                .map_err(|payload| AppError::Marshal(panic_message(payload.as_ref())));
            if reply_tx.send(outcome).is_err() {
                debug!("marshal: submitter dropped before the result was ready");
            }
        }));

        self.tx
            .send(job)
            .map_err(|_| AppError::Marshal("marshal has shut down".into()))?;

        reply_rx
            .await
            .map_err(|_| AppError::Marshal("marshal dropped the unit of work".into()))?
    }

    /// Drain the queue, stop the worker thread, and join it.
    ///
    /// Waits up to `grace` for already-queued work to finish.  Safe to
    /// call more than once; only the first call joins.
    pub async fn shutdown(&self, grace: Duration) {
        if self.tx.send(Job::Quit).is_err() {
            debug!("marshal: worker already stopped");
        }

        let handle = {
            let mut slot = self.handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            slot.take()
        };

        if let Some(handle) = handle {
            let join = tokio::task::spawn_blocking(move || handle.join());
            match tokio::time::timeout(grace, join).await {
                Ok(Ok(Ok(()))) => debug!("marshal: worker thread joined"),
                Ok(Ok(Err(_))) => warn!("marshal: worker thread panicked during shutdown"),
                Ok(Err(err)) => warn!(%err, "marshal: join task failed"),
                Err(_) => warn!(
                    grace_secs = grace.as_secs(),
                    "marshal: worker did not stop within the grace period"
                ),
            }
        }
    }
}

impl std::fmt::Debug for Marshal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marshal")
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

/// Worker loop: drain jobs strictly in order until told to quit or
/// every sender is gone.
fn run_worker(mut ctx: HostContext, mut rx: mpsc::UnboundedReceiver<Job>) {
    debug!("marshal worker started");
    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Work(work) => work(&mut ctx),
            Job::Quit => break,
        }
    }
    ctx.release_all();
    debug!("marshal worker stopped");
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit of work panicked with a non-string payload".to_owned()
    }
}
