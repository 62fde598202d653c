//! Single-thread command executor.
//!
//! Commands are queued from any thread and executed, in enqueue order, on
//! one dedicated worker thread. Each wake of the worker's run loop executes
//! at most one command; if more remain the worker re-signals itself so the
//! next command runs on the following pass.

use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use splice_common::config::ExecutorConfig;
use splice_common::error::{SpliceError, SpliceResult};

use crate::source::{QueueSource, RunLoop, RunResult, SourceProvider, SourceRegistry};

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the executor whose worker is running on this thread.
    static CURRENT_EXECUTOR: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Executes commands on the worker thread.
///
/// A returned error is logged and the worker moves on to the next command.
pub trait CommandHandler<C>: Send + 'static {
    fn handle(&mut self, command: C, sender: &CommandSender<C>) -> anyhow::Result<()>;
}

impl<C, F> CommandHandler<C> for F
where
    F: FnMut(C, &CommandSender<C>) -> anyhow::Result<()> + Send + 'static,
{
    fn handle(&mut self, command: C, sender: &CommandSender<C>) -> anyhow::Result<()> {
        self(command, sender)
    }
}

/// Lifecycle of an executor's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Never started.
    Idle,
    /// Worker thread alive and serving the queue.
    Running,
    /// Worker stopped; `start()` spawns a fresh one.
    Stopped,
}

struct QueueState<C> {
    items: VecDeque<C>,
    executing: bool,
}

struct Shared<C> {
    id: u64,
    queue: Mutex<QueueState<C>>,
    idle: Condvar,
    registry: Arc<SourceRegistry>,
}

impl<C> Shared<C> {
    fn on_worker(&self) -> bool {
        CURRENT_EXECUTOR.with(|current| current.get() == Some(self.id))
    }

    fn wake_worker(&self) {
        if let Some(context) = self.registry.current() {
            context.source.signal();
        }
    }
}

/// Cloneable handle that appends commands to an executor's queue.
pub struct CommandSender<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for CommandSender<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> CommandSender<C> {
    /// Append a command. Never blocks on command execution.
    ///
    /// On the worker thread itself the command is appended without waking
    /// the run loop; the worker re-arms after the current command finishes.
    pub fn enqueue(&self, command: C) {
        self.shared.queue.lock().items.push_back(command);
        if !self.shared.on_worker() {
            self.shared.wake_worker();
        }
    }

    /// Whether the calling thread is this executor's worker.
    pub fn is_worker_thread(&self) -> bool {
        self.shared.on_worker()
    }

    /// Commands waiting to execute.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().items.len()
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
    thread_id: ThreadId,
}

impl Worker {
    fn is_live(&self) -> bool {
        !self.cancel.load(Ordering::SeqCst) && !self.handle.is_finished()
    }
}

type HandlerSlot<C> = Arc<Mutex<Option<Box<dyn CommandHandler<C>>>>>;

/// Owns a worker thread, its run loop, and a FIFO queue of commands.
pub struct CommandExecutor<C: Send + 'static> {
    shared: Arc<Shared<C>>,
    handler: HandlerSlot<C>,
    worker: Mutex<Option<Worker>>,
    started_once: AtomicBool,
    config: ExecutorConfig,
}

impl<C: Send + 'static> CommandExecutor<C> {
    /// Create an executor. The worker is not spawned until [`start`](Self::start).
    pub fn new(config: ExecutorConfig, handler: impl CommandHandler<C>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed),
                queue: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    executing: false,
                }),
                idle: Condvar::new(),
                registry: SourceRegistry::new(),
            }),
            handler: Arc::new(Mutex::new(Some(Box::new(handler)))),
            worker: Mutex::new(None),
            started_once: AtomicBool::new(false),
            config,
        }
    }

    /// Create an executor whose handler is a closure.
    pub fn from_fn<F>(config: ExecutorConfig, handler: F) -> Self
    where
        F: FnMut(C, &CommandSender<C>) -> anyhow::Result<()> + Send + 'static,
    {
        Self::new(config, handler)
    }

    pub fn state(&self) -> ExecutorState {
        match self.worker.lock().as_ref() {
            Some(worker) if worker.is_live() => ExecutorState::Running,
            Some(_) => ExecutorState::Stopped,
            None if self.started_once.load(Ordering::SeqCst) => ExecutorState::Stopped,
            None => ExecutorState::Idle,
        }
    }

    /// Spawn the worker thread. A no-op while a worker is already running.
    pub fn start(&self) -> SpliceResult<()> {
        loop {
            let previous = {
                let mut worker = self.worker.lock();
                match worker.take() {
                    None => return self.spawn_worker(&mut worker),
                    Some(current) if current.is_live() => {
                        *worker = Some(current);
                        return Ok(());
                    }
                    Some(previous) if previous.thread_id == thread::current().id() => {
                        *worker = Some(previous);
                        return Err(SpliceError::executor(
                            "cannot restart an executor from its own worker thread",
                        ));
                    }
                    Some(previous) => {
                        self.cancel_worker(&previous);
                        previous
                    }
                }
            };

            // Joined unlocked: the draining command may still call into the executor.
            if previous.handle.join().is_err() {
                tracing::error!(executor = %self.config.thread_name, "Previous worker panicked");
            }
        }
    }

    fn spawn_worker(&self, worker: &mut Option<Worker>) -> SpliceResult<()> {
        if self.handler.lock().is_none() {
            return Err(SpliceError::executor("command handler was lost by a previous worker"));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let handler = Arc::clone(&self.handler);
        let wait = self.config.wait_interval();
        let thread_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_worker(shared, handler, thread_cancel, wait))?;

        tracing::debug!(executor = %self.config.thread_name, "Worker thread started");
        *worker = Some(Worker {
            thread_id: handle.thread().id(),
            handle,
            cancel,
        });
        self.started_once.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Called with the worker slot locked, so no racing `start()` can attach
    /// a fresh source before the old one is invalidated.
    fn cancel_worker(&self, worker: &Worker) {
        worker.cancel.store(true, Ordering::SeqCst);
        if let Some(context) = self.shared.registry.current() {
            context.source.invalidate();
        }
    }

    /// Stop the worker cooperatively.
    ///
    /// A command that is executing runs to completion and may call back into
    /// the executor while `stop()` waits for it. Queued commands are kept and
    /// executed by the next worker after `start()`. When called from the
    /// worker itself the thread exits after the current command and is
    /// reclaimed by the next `start()`.
    pub fn stop(&self) {
        let current = {
            let mut worker = self.worker.lock();
            let Some(current) = worker.take() else {
                return;
            };
            self.cancel_worker(&current);
            if current.thread_id == thread::current().id() {
                *worker = Some(current);
                return;
            }
            current
        };

        if current.handle.join().is_err() {
            tracing::error!(executor = %self.config.thread_name, "Worker panicked during shutdown");
        }
        tracing::debug!(executor = %self.config.thread_name, "Worker thread stopped");
    }

    pub fn enqueue(&self, command: C) {
        self.sender().enqueue(command);
    }

    pub fn sender(&self) -> CommandSender<C> {
        CommandSender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    pub fn is_worker_thread(&self) -> bool {
        self.shared.on_worker()
    }

    /// Block until the queue is empty and no command is executing.
    ///
    /// Returns `false` on timeout. From the worker thread this only reports
    /// whether the queue is currently empty.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut queue = self.shared.queue.lock();
        if self.shared.on_worker() {
            return queue.items.is_empty();
        }
        let deadline = Instant::now() + timeout;
        while !queue.items.is_empty() || queue.executing {
            if self
                .shared
                .idle
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                return queue.items.is_empty() && !queue.executing;
            }
        }
        true
    }
}

impl<C: Send + 'static> Drop for CommandExecutor<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<C: Send + 'static>(
    shared: Arc<Shared<C>>,
    handler_slot: HandlerSlot<C>,
    cancel: Arc<AtomicBool>,
    wait: Duration,
) {
    let Some(mut handler) = handler_slot.lock().take() else {
        tracing::error!("Worker started without a command handler");
        return;
    };
    CURRENT_EXECUTOR.with(|current| current.set(Some(shared.id)));

    let provider: Arc<dyn SourceProvider> = shared.registry.clone();
    let source = QueueSource::new(Arc::downgrade(&provider));
    let mut run_loop = RunLoop::new();

    match run_loop.add_source(Arc::clone(&source)) {
        Ok(()) => {
            if !shared.queue.lock().items.is_empty() {
                source.signal();
            }
            let sender = CommandSender {
                shared: Arc::clone(&shared),
            };
            while !cancel.load(Ordering::SeqCst) {
                match run_loop.run_once(wait) {
                    RunResult::Stopped => break,
                    RunResult::TimedOut => {
                        tracing::trace!("Run loop wait elapsed without a signal");
                    }
                    RunResult::Handled => {
                        if execute_one(&shared, handler.as_mut(), &sender) {
                            source.signal();
                        }
                    }
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to attach queue source"),
    }

    source.invalidate();
    *handler_slot.lock() = Some(handler);
    CURRENT_EXECUTOR.with(|current| current.set(None));

    let queue = shared.queue.lock();
    if queue.items.is_empty() {
        shared.idle.notify_all();
    } else {
        tracing::debug!(pending = queue.items.len(), "Worker exited with queued commands");
    }
}

/// Run the next command. Returns whether more commands are queued.
fn execute_one<C: 'static>(
    shared: &Shared<C>,
    handler: &mut dyn CommandHandler<C>,
    sender: &CommandSender<C>,
) -> bool {
    let command = {
        let mut queue = shared.queue.lock();
        let command = queue.items.pop_front();
        queue.executing = command.is_some();
        command
    };
    let Some(command) = command else {
        return false;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(command, sender))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Command failed"),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(panic = %message, "Command panicked");
        }
    }

    let mut queue = shared.queue.lock();
    queue.executing = false;
    let more = !queue.items.is_empty();
    if !more {
        shared.idle.notify_all();
    }
    more
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_config(name: &str) -> ExecutorConfig {
        ExecutorConfig {
            thread_name: name.to_string(),
            wait_interval_ms: 50,
        }
    }

    fn recording_executor(name: &str) -> (CommandExecutor<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let executor = CommandExecutor::from_fn(test_config(name), move |n: u32, _: &CommandSender<u32>| {
            log.lock().push(n);
            Ok(())
        });
        (executor, seen)
    }

    #[test]
    fn test_commands_run_in_fifo_order() {
        let (executor, seen) = recording_executor("fifo");
        executor.start().unwrap();
        for n in 0..100 {
            executor.enqueue(n);
        }
        assert!(executor.wait_idle(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_enqueue_executes_each_once() {
        let (executor, seen) = recording_executor("concurrent");
        executor.start().unwrap();

        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let sender = executor.sender();
                thread::spawn(move || {
                    for i in 0..250 {
                        sender.enqueue(p * 1000 + i);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(executor.wait_idle(Duration::from_secs(10)));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1000);
        for p in 0..4u32 {
            let own: Vec<u32> = seen.iter().copied().filter(|n| n / 1000 == p).collect();
            assert_eq!(own, (0..250).map(|i| p * 1000 + i).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_self_enqueue_runs_in_same_drain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let executor = CommandExecutor::from_fn(test_config("self-enqueue"), move |n: u32, sender: &CommandSender<u32>| {
            assert!(sender.is_worker_thread());
            log.lock().push(n);
            if n == 1 {
                sender.enqueue(2);
            }
            Ok(())
        });
        executor.start().unwrap();
        executor.enqueue(1);
        assert!(executor.wait_idle(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert!(!executor.is_worker_thread());
    }

    #[test]
    fn test_failing_and_panicking_commands_do_not_stop_worker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let executor = CommandExecutor::from_fn(test_config("faulty"), move |n: u32, _: &CommandSender<u32>| {
            match n {
                1 => anyhow::bail!("bad command"),
                2 => panic!("handler blew up"),
                _ => log.lock().push(n),
            }
            Ok(())
        });
        executor.start().unwrap();
        for n in 0..5 {
            executor.enqueue(n);
        }
        assert!(executor.wait_idle(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), vec![0, 3, 4]);
        assert_eq!(executor.state(), ExecutorState::Running);
    }

    #[test]
    fn test_start_is_idempotent_and_state_transitions() {
        let (executor, _) = recording_executor("lifecycle");
        assert_eq!(executor.state(), ExecutorState::Idle);
        executor.start().unwrap();
        executor.start().unwrap();
        assert_eq!(executor.state(), ExecutorState::Running);
        executor.stop();
        assert_eq!(executor.state(), ExecutorState::Stopped);
        executor.stop();
        assert_eq!(executor.state(), ExecutorState::Stopped);
    }

    #[test]
    fn test_restart_after_stop_keeps_queued_commands() {
        let (executor, seen) = recording_executor("restart");
        executor.start().unwrap();
        executor.enqueue(1);
        assert!(executor.wait_idle(Duration::from_secs(5)));
        executor.stop();

        // Queued while no worker is alive.
        executor.enqueue(2);
        executor.enqueue(3);
        assert_eq!(executor.pending(), 2);
        assert!(!executor.wait_idle(Duration::from_millis(20)));

        executor.start().unwrap();
        executor.enqueue(4);
        assert!(executor.wait_idle(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), vec![1, 2, 3, 4]);
        assert_eq!(executor.state(), ExecutorState::Running);
    }

    #[test]
    fn test_stop_returns_promptly_despite_long_wait_bound() {
        let executor = CommandExecutor::from_fn(
            ExecutorConfig {
                thread_name: "long-wait".to_string(),
                wait_interval_ms: 60_000,
            },
            |_: u32, _: &CommandSender<u32>| Ok(()),
        );
        executor.start().unwrap();
        executor.enqueue(1);
        assert!(executor.wait_idle(Duration::from_secs(5)));

        let started = Instant::now();
        executor.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_from_worker_then_restart_from_outside() {
        let executor = Arc::new(Mutex::new(None::<Arc<CommandExecutor<u32>>>));
        let slot = Arc::clone(&executor);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let exec = Arc::new(CommandExecutor::from_fn(
            test_config("self-stop"),
            move |n: u32, _: &CommandSender<u32>| {
                log.lock().push(n);
                if n == 0 {
                    if let Some(exec) = slot.lock().as_ref() {
                        exec.stop();
                        assert!(exec.start().is_err());
                    }
                }
                Ok(())
            },
        ));
        *executor.lock() = Some(Arc::clone(&exec));

        exec.start().unwrap();
        exec.enqueue(0);
        let deadline = Instant::now() + Duration::from_secs(5);
        while exec.state() != ExecutorState::Stopped && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(exec.state(), ExecutorState::Stopped);

        exec.enqueue(1);
        exec.start().unwrap();
        assert!(exec.wait_idle(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), vec![0, 1]);

        // Break the handler <-> executor cycle.
        executor.lock().take();
    }

    #[test]
    fn test_external_stop_lets_running_command_query_executor() {
        let executor = Arc::new(Mutex::new(None::<Arc<CommandExecutor<u32>>>));
        let slot = Arc::clone(&executor);
        let observed = Arc::new(Mutex::new(None));
        let seen_state = Arc::clone(&observed);
        let exec = Arc::new(CommandExecutor::from_fn(
            test_config("stop-reentrant"),
            move |_: u32, _: &CommandSender<u32>| {
                thread::sleep(Duration::from_millis(200));
                let exec = slot.lock().clone();
                if let Some(exec) = exec {
                    *seen_state.lock() = Some(exec.state());
                }
                Ok(())
            },
        ));
        *executor.lock() = Some(Arc::clone(&exec));

        exec.start().unwrap();
        exec.enqueue(0);
        thread::sleep(Duration::from_millis(50));

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let stopper = {
            let exec = Arc::clone(&exec);
            thread::spawn(move || {
                exec.stop();
                let _ = done_tx.send(());
            })
        };
        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
        stopper.join().unwrap();

        assert_eq!(*observed.lock(), Some(ExecutorState::Stopped));
        assert_eq!(exec.state(), ExecutorState::Stopped);
        assert_eq!(exec.pending(), 0);

        executor.lock().take();
    }

    #[test]
    fn test_restart_while_previous_command_queries_executor() {
        let executor = Arc::new(Mutex::new(None::<Arc<CommandExecutor<u32>>>));
        let slot = Arc::clone(&executor);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let exec = Arc::new(CommandExecutor::from_fn(
            test_config("restart-reentrant"),
            move |n: u32, _: &CommandSender<u32>| {
                if n == 0 {
                    let exec = slot.lock().clone();
                    if let Some(exec) = exec {
                        exec.stop();
                        thread::sleep(Duration::from_millis(200));
                        let _ = exec.state();
                    }
                }
                log.lock().push(n);
                Ok(())
            },
        ));
        *executor.lock() = Some(Arc::clone(&exec));

        exec.start().unwrap();
        exec.enqueue(0);
        thread::sleep(Duration::from_millis(50));

        // The old worker is still inside command 0 and must be joined first.
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let starter = {
            let exec = Arc::clone(&exec);
            thread::spawn(move || {
                let _ = done_tx.send(exec.start().is_ok());
            })
        };
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(3)), Ok(true));
        starter.join().unwrap();

        exec.enqueue(1);
        assert!(exec.wait_idle(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), vec![0, 1]);
        assert_eq!(exec.state(), ExecutorState::Running);

        executor.lock().take();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_fifo_exactly_once(batch in proptest::collection::vec(any::<u32>(), 0..64)) {
            let (executor, seen) = recording_executor("prop-fifo");
            executor.start().unwrap();
            for n in &batch {
                executor.enqueue(*n);
            }
            prop_assert!(executor.wait_idle(Duration::from_secs(5)));
            prop_assert_eq!(&*seen.lock(), &batch);
        }
    }
}
