//! Wakeable queue source and the run loop that hosts it.
//!
//! A [`QueueSource`] is a sticky wake flag plus a condition variable. The
//! worker's [`RunLoop`] blocks on it with an upper bound; any thread may
//! [`QueueSource::signal`] it. Attaching and invalidating the source notify a
//! [`SourceProvider`] so that other threads can find the live source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use splice_common::error::{SpliceError, SpliceResult};

static NEXT_RUN_LOOP_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one run loop instance. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunLoopId(u64);

/// Outcome of one pass of [`RunLoop::run_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// The attached source was signaled and should be serviced.
    Handled,
    /// The bounded wait expired without a signal.
    TimedOut,
    /// The source was invalidated or no source is attached.
    Stopped,
}

/// Receives registration notifications from queue sources.
pub trait SourceProvider: Send + Sync {
    fn register(&self, context: SourceContext);
    fn remove(&self, context: &SourceContext);
}

/// Pairs a run loop with the source attached to it.
#[derive(Clone)]
pub struct SourceContext {
    pub run_loop: RunLoopId,
    pub source: Arc<QueueSource>,
}

impl PartialEq for SourceContext {
    fn eq(&self, other: &Self) -> bool {
        self.run_loop == other.run_loop && Arc::ptr_eq(&self.source, &other.source)
    }
}

impl std::fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceContext")
            .field("run_loop", &self.run_loop)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct SourceState {
    signaled: bool,
    invalidated: bool,
    waiting: bool,
    attached: Option<RunLoopId>,
}

/// Cross-thread signalable event source.
pub struct QueueSource {
    state: Mutex<SourceState>,
    wake: Condvar,
    provider: Weak<dyn SourceProvider>,
}

impl QueueSource {
    pub fn new(provider: Weak<dyn SourceProvider>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SourceState::default()),
            wake: Condvar::new(),
            provider,
        })
    }

    /// Mark the source pending and wake its run loop.
    ///
    /// The flag is sticky: a signal raised while the run loop is busy, or
    /// before it has started waiting, is observed by the next wait.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        if state.invalidated {
            return;
        }
        state.signaled = true;
        self.wake.notify_one();
    }

    /// Whether the hosting run loop is currently blocked.
    pub fn is_waiting(&self) -> bool {
        self.state.lock().waiting
    }

    pub fn is_valid(&self) -> bool {
        !self.state.lock().invalidated
    }

    /// Attach to a run loop. A source is hosted by exactly one run loop.
    pub fn attach(self: &Arc<Self>, run_loop: RunLoopId) -> SpliceResult<()> {
        {
            let mut state = self.state.lock();
            if state.invalidated {
                return Err(SpliceError::executor("cannot attach an invalidated source"));
            }
            match state.attached {
                Some(current) if current == run_loop => {
                    return Err(SpliceError::executor("source already attached to this run loop"));
                }
                Some(_) => {
                    return Err(SpliceError::executor("source is attached to another run loop"));
                }
                None => state.attached = Some(run_loop),
            }
        }

        if let Some(provider) = self.provider.upgrade() {
            provider.register(SourceContext {
                run_loop,
                source: Arc::clone(self),
            });
        }
        Ok(())
    }

    /// Deregister the source and stop the run loop hosting it.
    pub fn invalidate(self: &Arc<Self>) {
        let detached = {
            let mut state = self.state.lock();
            if state.invalidated {
                return;
            }
            state.invalidated = true;
            self.wake.notify_all();
            state.attached.take()
        };

        if let (Some(run_loop), Some(provider)) = (detached, self.provider.upgrade()) {
            provider.remove(&SourceContext {
                run_loop,
                source: Arc::clone(self),
            });
        }
    }

    fn wait(&self, timeout: Duration) -> RunResult {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.invalidated {
                return RunResult::Stopped;
            }
            if state.signaled {
                state.signaled = false;
                return RunResult::Handled;
            }
            if Instant::now() >= deadline {
                return RunResult::TimedOut;
            }
            state.waiting = true;
            self.wake.wait_until(&mut state, deadline);
            state.waiting = false;
        }
    }
}

/// Worker-owned run loop hosting a single queue source.
pub struct RunLoop {
    id: RunLoopId,
    source: Option<Arc<QueueSource>>,
}

impl RunLoop {
    pub fn new() -> Self {
        Self {
            id: RunLoopId(NEXT_RUN_LOOP_ID.fetch_add(1, Ordering::Relaxed)),
            source: None,
        }
    }

    pub fn id(&self) -> RunLoopId {
        self.id
    }

    pub fn add_source(&mut self, source: Arc<QueueSource>) -> SpliceResult<()> {
        if self.source.is_some() {
            return Err(SpliceError::executor("run loop already hosts a source"));
        }
        source.attach(self.id)?;
        self.source = Some(source);
        Ok(())
    }

    /// Block until the source fires, is invalidated, or `timeout` elapses.
    pub fn run_once(&self, timeout: Duration) -> RunResult {
        match &self.source {
            Some(source) => source.wait(timeout),
            None => RunResult::Stopped,
        }
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Provider keeping the one live source context of an executor.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    slot: Mutex<Option<SourceContext>>,
}

impl SourceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The currently registered context, if a worker is attached.
    pub fn current(&self) -> Option<SourceContext> {
        self.slot.lock().clone()
    }
}

impl SourceProvider for SourceRegistry {
    fn register(&self, context: SourceContext) {
        let mut slot = self.slot.lock();
        if let Some(previous) = slot.replace(context) {
            tracing::warn!(run_loop = ?previous.run_loop, "Replacing a source that was never removed");
        }
    }

    fn remove(&self, context: &SourceContext) {
        let mut slot = self.slot.lock();
        if slot.as_ref() == Some(context) {
            *slot = None;
        }
    }
}
