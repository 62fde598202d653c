//! Delivery of results onto the caller's execution context.

use std::sync::mpsc;
use std::time::Duration;

/// Work posted back to a caller.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that accepts jobs from the worker thread.
pub trait CallerContext: Send + Sync + 'static {
    fn post(&self, job: Job);
}

/// Runs jobs immediately on the posting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineContext;

impl CallerContext for InlineContext {
    fn post(&self, job: Job) {
        job();
    }
}

/// Runs jobs on a tokio runtime, one at a time and in posting order.
///
/// A single task drains the channel, so results never overtake each other
/// even on a multi-thread runtime.
#[derive(Clone)]
pub struct RuntimeContext {
    tx: tokio::sync::mpsc::UnboundedSender<Job>,
}

impl RuntimeContext {
    pub fn new(handle: &tokio::runtime::Handle) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Self { tx }
    }

    /// Context on the runtime of the calling task. Panics outside a runtime.
    pub fn current() -> Self {
        Self::new(&tokio::runtime::Handle::current())
    }
}

impl CallerContext for RuntimeContext {
    fn post(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::debug!("Runtime context closed; dropping posted job");
        }
    }
}

/// Posting side of a [`Mailbox`].
#[derive(Clone)]
pub struct MailboxContext {
    tx: mpsc::Sender<Job>,
}

impl CallerContext for MailboxContext {
    fn post(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::debug!("Mailbox closed; dropping posted job");
        }
    }
}

/// A job queue drained by whichever thread owns it.
pub struct Mailbox {
    rx: mpsc::Receiver<Job>,
}

impl Mailbox {
    pub fn new() -> (MailboxContext, Mailbox) {
        let (tx, rx) = mpsc::channel();
        (MailboxContext { tx }, Mailbox { rx })
    }

    /// Run every job that is already waiting. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one job and run it.
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job();
                true
            }
            Err(_) => false,
        }
    }
}
