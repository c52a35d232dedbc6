//! Hand-off of handler work to the embedder's main thread.
//!
//! Handlers flagged `run_on_main_thread` are queued here and the dispatching
//! task waits for the result. The embedder drains the queue either from its
//! own tick loop ([`MainThread::run_pending`]) or by dedicating a thread or
//! task to it ([`MainThread::blocking_run`], [`MainThread::run`]).

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send>;

/// Create a connected handle/queue pair.
pub fn main_thread() -> (MainThreadHandle, MainThread) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MainThreadHandle { tx }, MainThread { rx })
}

/// Submits work to the main thread. Cheap to clone.
#[derive(Clone)]
pub struct MainThreadHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl MainThreadHandle {
    /// Run `f` on the main thread and wait for its return value.
    pub async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Box::new(move || {
                let _ = tx.send(f());
            }))
            .map_err(|_| Error::Internal("main thread is not running".into()))?;
        rx.await
            .map_err(|_| Error::Internal("main thread dropped the task".into()))
    }
}

/// The receiving end, owned by whichever thread plays the main thread.
pub struct MainThread {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl MainThread {
    /// Run every job queued so far without blocking. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Block the current thread running jobs until every handle is dropped.
    /// Must not be called from inside the async runtime.
    pub fn blocking_run(mut self) {
        while let Some(job) = self.rx.blocking_recv() {
            job();
        }
    }

    /// Run jobs on the current task until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
    }
}
