//! Command queue drained by a dedicated worker thread.
//!
//! Lifecycle: Idle → Processing → Idle, with a terminal Destroying state.
//!
//! - `push` appends a closure and wakes the worker (dropped while minimized)
//! - the worker pops one closure at a time and runs it without holding the lock
//! - `wait_idle` blocks until every command submitted before the call completed
//! - `call` is a blocking round-trip returning the closure's value
//!
//! The queue is generic over the worker-owned state `S`, which never leaves the
//! worker thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::{RendererError, Result};

/// Deferred operation executed on the worker thread.
pub type Command<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

struct QueueState<S> {
    commands: VecDeque<Command<S>>,
    submitted: u64,
    completed: u64,
    destroy: bool,
    running: bool,
    worker: Option<ThreadId>,
}

struct Shared<S> {
    state: Mutex<QueueState<S>>,
    /// Signalled when work is pending or destruction was requested.
    work: Condvar,
    /// Signalled when a command completed or the worker stopped.
    done: Condvar,
    minimized: AtomicBool,
}

/// FIFO command queue shared between submitters and one worker.
pub struct CommandQueue<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for CommandQueue<S> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<S: 'static> Default for CommandQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> CommandQueue<S> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    commands: VecDeque::new(),
                    submitted: 0,
                    completed: 0,
                    destroy: false,
                    running: true,
                    worker: None,
                }),
                work: Condvar::new(),
                done: Condvar::new(),
                minimized: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueues a command.
    ///
    /// Returns `false` when the command was discarded: the window is minimized or
    /// the worker has stopped. Discarded commands never run.
    pub fn push<F>(&self, command: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if self.is_minimized() {
            return false;
        }
        self.enqueue(Box::new(command))
    }

    /// Enqueues a command even while minimized. Used for resource release and
    /// for commands that react to minimizing.
    pub(crate) fn push_forced<F>(&self, command: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.enqueue(Box::new(command))
    }

    fn enqueue(&self, command: Command<S>) -> bool {
        let mut st = self.shared.state.lock();
        if !st.running {
            return false;
        }
        st.commands.push_back(command);
        st.submitted += 1;
        drop(st);

        self.shared.work.notify_one();
        true
    }

    /// Runs `f` on the worker and blocks for its result.
    ///
    /// Must not be called from the worker thread itself.
    pub fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> T + Send + 'static,
    {
        if self.is_worker_thread() {
            return Err(RendererError::invalid(
                "blocking renderer call issued from the renderer thread",
            ));
        }
        if self.is_minimized() {
            return Err(RendererError::Minimized);
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let accepted = self.enqueue(Box::new(move |state: &mut S| {
            let _ = tx.send(f(state));
        }));
        if !accepted {
            return Err(RendererError::Disconnected);
        }

        // The sender is dropped unrun if the worker stops first.
        rx.recv().map_err(|_| RendererError::Disconnected)
    }

    /// Blocks until every command submitted before this call has completed,
    /// or the worker stopped.
    pub fn wait_idle(&self) {
        let mut st = self.shared.state.lock();
        if st.worker == Some(thread::current().id()) {
            return;
        }
        let target = st.submitted;
        while st.running && st.completed < target {
            self.shared.done.wait(&mut st);
        }
    }

    pub fn set_minimized(&self, minimized: bool) {
        self.shared.minimized.store(minimized, Ordering::Release);
    }

    pub fn is_minimized(&self) -> bool {
        self.shared.minimized.load(Ordering::Acquire)
    }

    /// Number of commands waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().commands.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    fn is_worker_thread(&self) -> bool {
        self.shared.state.lock().worker == Some(thread::current().id())
    }

    /// Asks the worker to exit once the queue is drained.
    pub fn request_destroy(&self) {
        self.shared.state.lock().destroy = true;
        self.shared.work.notify_all();
    }

    /// Worker loop. Returns once destruction was requested and the queue is empty.
    pub fn run(&self, state: &mut S) {
        let _stop = StopGuard { shared: &self.shared };
        self.shared.state.lock().worker = Some(thread::current().id());

        loop {
            let command = {
                let mut st = self.shared.state.lock();
                loop {
                    if let Some(command) = st.commands.pop_front() {
                        break command;
                    }
                    if st.destroy {
                        return;
                    }
                    self.shared.work.wait(&mut st);
                }
            };

            command(state);

            self.shared.state.lock().completed += 1;
            self.shared.done.notify_all();
        }
    }

    fn mark_stopped(&self) {
        stop(&self.shared);
    }
}

/// Marks the queue stopped when the worker leaves `run`, including by panic.
struct StopGuard<'a, S> {
    shared: &'a Shared<S>,
}

impl<S> Drop for StopGuard<'_, S> {
    fn drop(&mut self) {
        stop(self.shared);
    }
}

fn stop<S>(shared: &Shared<S>) {
    let orphaned = {
        let mut st = shared.state.lock();
        st.running = false;
        std::mem::take(&mut st.commands)
    };
    shared.done.notify_all();

    // Dropped outside the lock: captured handles may try to enqueue releases.
    if !orphaned.is_empty() {
        log::debug!("discarding {} queued commands on shutdown", orphaned.len());
    }
    drop(orphaned);
}

/// Spawns the worker thread.
///
/// `init` runs on the new thread and builds the worker-owned state. The caller
/// blocks until it finished; its error (if any) is returned here. On success the
/// side value `R` is handed back alongside the join handle.
pub fn spawn_worker<S, R, F>(
    queue: &CommandQueue<S>,
    name: &str,
    init: F,
) -> Result<(JoinHandle<()>, R)>
where
    S: 'static,
    R: Send + 'static,
    F: FnOnce() -> Result<(S, R)> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded::<Result<R>>(1);
    let worker_queue = queue.clone();

    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut state = match init() {
                Ok((state, reply)) => {
                    let _ = tx.send(Ok(reply));
                    state
                }
                Err(e) => {
                    worker_queue.mark_stopped();
                    let _ = tx.send(Err(e));
                    return;
                }
            };

            worker_queue.run(&mut state);
            drop(state);
            log::debug!("worker thread exiting");
        })
        .map_err(RendererError::ThreadSpawn)?;

    match rx.recv() {
        Ok(Ok(reply)) => Ok((handle, reply)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            // init panicked
            let _ = handle.join();
            queue.mark_stopped();
            Err(RendererError::Disconnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    fn start() -> (CommandQueue<Vec<u32>>, JoinHandle<()>) {
        let queue = CommandQueue::new();
        let (handle, ()) = spawn_worker(&queue, "test-worker", || Ok((Vec::new(), ()))).unwrap();
        (queue, handle)
    }

    fn stop_worker(queue: CommandQueue<Vec<u32>>, handle: JoinHandle<()>) {
        queue.request_destroy();
        handle.join().unwrap();
    }

    // ── ordering ──────────────────────────────────────────────────────────

    #[test]
    fn commands_run_in_submission_order() {
        let (queue, handle) = start();
        for i in 0..500 {
            assert!(queue.push(move |log: &mut Vec<u32>| log.push(i)));
        }
        let log = queue.call(|log: &mut Vec<u32>| log.clone()).unwrap();
        assert_eq!(log, (0..500).collect::<Vec<_>>());
        stop_worker(queue, handle);
    }

    #[test]
    fn commands_from_many_threads_are_serialized() {
        let (queue, handle) = start();
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let q = queue.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        q.push(move |log: &mut Vec<u32>| log.push(t * 1000 + i));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let log = queue.call(|log: &mut Vec<u32>| log.clone()).unwrap();
        assert_eq!(log.len(), 400);
        // Per-thread order survives interleaving.
        for t in 0..4 {
            let mine: Vec<_> = log.iter().copied().filter(|v| v / 1000 == t).collect();
            assert_eq!(mine, (0..100).map(|i| t * 1000 + i).collect::<Vec<_>>());
        }
        stop_worker(queue, handle);
    }

    // ── minimized backpressure ────────────────────────────────────────────

    #[test]
    fn commands_pushed_while_minimized_never_run() {
        let (queue, handle) = start();
        queue.set_minimized(true);
        for i in 0..10 {
            assert!(!queue.push(move |log: &mut Vec<u32>| log.push(i)));
        }
        assert!(matches!(
            queue.call(|log: &mut Vec<u32>| log.len()),
            Err(RendererError::Minimized)
        ));

        queue.set_minimized(false);
        queue.wait_idle();
        assert_eq!(queue.call(|log: &mut Vec<u32>| log.len()).unwrap(), 0);
        stop_worker(queue, handle);
    }

    #[test]
    fn forced_commands_ignore_minimized_flag() {
        let (queue, handle) = start();
        queue.set_minimized(true);
        assert!(queue.push_forced(|log: &mut Vec<u32>| log.push(1)));
        queue.set_minimized(false);
        assert_eq!(queue.call(|log: &mut Vec<u32>| log.clone()).unwrap(), vec![1]);
        stop_worker(queue, handle);
    }

    // ── idle wait ─────────────────────────────────────────────────────────

    #[test]
    fn wait_idle_blocks_until_prior_commands_finish() {
        let (queue, handle) = start();
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let f = Arc::clone(&finished);
            queue.push(move |_: &mut Vec<u32>| {
                thread::sleep(Duration::from_millis(20));
                f.fetch_add(1, Ordering::SeqCst);
            });
        }
        queue.wait_idle();
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(queue.pending(), 0);
        stop_worker(queue, handle);
    }

    #[test]
    fn wait_idle_on_empty_queue_returns() {
        let (queue, handle) = start();
        queue.wait_idle();
        stop_worker(queue, handle);
    }

    // ── shutdown ──────────────────────────────────────────────────────────

    #[test]
    fn destroy_drains_pending_commands() {
        let (queue, handle) = start();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let r = Arc::clone(&ran);
            queue.push(move |_: &mut Vec<u32>| {
                r.fetch_add(1, Ordering::SeqCst);
            });
        }
        queue.request_destroy();
        handle.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn calls_after_shutdown_are_disconnected() {
        let (queue, handle) = start();
        let q = queue.clone();
        stop_worker(queue, handle);

        assert!(!q.is_running());
        assert!(!q.push(|log: &mut Vec<u32>| log.push(1)));
        assert!(matches!(
            q.call(|log: &mut Vec<u32>| log.len()),
            Err(RendererError::Disconnected)
        ));
        q.wait_idle();
    }

    #[test]
    fn panicking_command_stops_worker_without_hanging_waiters() {
        let (queue, handle) = start();
        queue.push(|_: &mut Vec<u32>| panic!("boom"));
        queue.push(|log: &mut Vec<u32>| log.push(1));
        queue.wait_idle();
        assert!(handle.join().is_err());
        assert!(matches!(
            queue.call(|log: &mut Vec<u32>| log.len()),
            Err(RendererError::Disconnected)
        ));
    }

    #[test]
    fn init_error_is_reported_to_caller() {
        let queue: CommandQueue<Vec<u32>> = CommandQueue::new();
        let result = spawn_worker(&queue, "failing-worker", || -> Result<(Vec<u32>, ())> {
            Err(RendererError::BackendInit("no adapter".into()))
        });
        assert!(matches!(result, Err(RendererError::BackendInit(_))));
        assert!(!queue.is_running());
    }

    #[test]
    fn blocking_call_from_worker_is_rejected() {
        let (queue, handle) = start();
        let inner = queue.clone();
        let nested = queue
            .call(move |_: &mut Vec<u32>| inner.call(|log: &mut Vec<u32>| log.len()).is_err())
            .unwrap();
        assert!(nested);
        stop_worker(queue, handle);
    }
}
