//! The single context surfaces are built and torn down on.
//!
//! Render surfaces are bound to one thread. [`UiThread`] owns such a thread
//! and runs posted jobs in order; [`InlineExecutor`] runs them on the caller
//! for hosts without a UI thread and for tests. [`run_blocking`] lets any
//! thread wait for a result from the UI context.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};

use crate::error::{BridgeError, Result};

/// Work posted to the UI context.
pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on the UI-affine context.
pub trait UiExecutor: Send + Sync {
    /// Post a job. Fails if the context is gone.
    fn execute(&self, job: UiJob) -> Result<()>;

    /// True when called from the UI context itself.
    fn is_current(&self) -> bool;
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl UiExecutor for InlineExecutor {
    fn execute(&self, job: UiJob) -> Result<()> {
        job();
        Ok(())
    }

    fn is_current(&self) -> bool {
        true
    }
}

/// A dedicated thread that runs UI jobs one at a time, in posting order.
pub struct UiThread {
    tx: Mutex<Option<mpsc::UnboundedSender<UiJob>>>,
    thread_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for UiThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiThread")
            .field("thread_id", &self.thread_id)
            .field("running", &self.is_running())
            .finish()
    }
}

impl UiThread {
    /// Spawn the thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<UiJob>();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                log::debug!("UI thread started");
                while let Some(job) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log::error!("UI job panicked");
                    }
                }
                log::debug!("UI thread exiting");
            })
            .map_err(|e| BridgeError::UiContext(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread_id: join.thread().id(),
            join: Mutex::new(Some(join)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    ///
    /// Called from the UI thread itself it only stops accepting jobs.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if self.is_current() {
            return;
        }
        if let Some(join) = self.join.lock().unwrap_or_else(PoisonError::into_inner).take()
            && join.join().is_err()
        {
            log::error!("UI thread panicked during shutdown");
        }
    }
}

impl UiExecutor for UiThread {
    fn execute(&self, job: UiJob) -> Result<()> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard
            .as_ref()
            .ok_or_else(|| BridgeError::UiContext("UI thread is shut down".to_string()))?;
        tx.send(job)
            .map_err(|_| BridgeError::UiContext("UI thread is gone".to_string()))
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for UiThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `f` on the UI context and wait for its result.
///
/// Runs inline when already on the UI context, so nested calls cannot
/// deadlock. Otherwise blocks the caller, so call it from a plain thread or
/// `spawn_blocking`, never from inside an async task.
pub fn run_blocking<T, F>(ui: &dyn UiExecutor, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if ui.is_current() {
        return Ok(f());
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    ui.execute(Box::new(move || {
        let _ = reply_tx.send(f());
    }))?;

    reply_rx
        .blocking_recv()
        .map_err(|_| BridgeError::UiContext("UI job dropped its reply".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_inline_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        InlineExecutor
            .execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(InlineExecutor.is_current());
    }

    #[test]
    fn test_run_blocking_on_ui_thread() {
        let ui = UiThread::spawn("test-ui").unwrap();
        let caller = thread::current().id();
        let ran_on = run_blocking(&ui, || thread::current().id()).unwrap();

        assert_ne!(ran_on, caller);
        assert_eq!(ran_on, ui.thread_id);
        assert!(!ui.is_current());
    }

    #[test]
    fn test_jobs_run_in_order() {
        let ui = UiThread::spawn("test-ui").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            ui.execute(Box::new(move || seen.lock().unwrap().push(i))).unwrap();
        }
        run_blocking(&ui, || ()).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_nested_run_blocking_does_not_deadlock() {
        let ui = Arc::new(UiThread::spawn("test-ui").unwrap());
        let inner = ui.clone();
        let value = run_blocking(ui.as_ref(), move || run_blocking(inner.as_ref(), || 7).unwrap()).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_panicking_job_does_not_kill_thread() {
        let ui = UiThread::spawn("test-ui").unwrap();
        ui.execute(Box::new(|| panic!("boom"))).unwrap();
        assert_eq!(run_blocking(&ui, || 1).unwrap(), 1);
    }

    #[test]
    fn test_run_blocking_reports_dropped_job() {
        struct Dropping;

        impl UiExecutor for Dropping {
            fn execute(&self, job: UiJob) -> Result<()> {
                drop(job);
                Ok(())
            }

            fn is_current(&self) -> bool {
                false
            }
        }

        let err = run_blocking(&Dropping, || 1).unwrap_err();
        assert!(matches!(err, BridgeError::UiContext(_)));
    }

    #[test]
    fn test_run_blocking_from_spawn_blocking() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let ui = Arc::new(UiThread::spawn("test-ui").unwrap());
        let value = runtime
            .block_on(tokio::task::spawn_blocking(move || run_blocking(ui.as_ref(), || 5).unwrap()))
            .unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn test_execute_after_shutdown_fails() {
        let ui = UiThread::spawn("test-ui").unwrap();
        ui.shutdown();
        assert!(!ui.is_running());
        let err = ui.execute(Box::new(|| ())).unwrap_err();
        assert!(matches!(err, BridgeError::UiContext(_)));
    }
}
