//! Process-wide worker pool for the solver passes.
//!
//! The pool owns N-1 background threads; the producer participates as the
//! Nth worker inside [`WorkerPool::execute`]. Tasks are staged without
//! synchronisation cost on a single-producer list, published in one shot to a
//! lock-free queue, and drained against an atomic `tasks_left` counter. A
//! manual-reset gate parks the workers between steps in the regular model;
//! the persistent model leaves the gate open and lets workers spin for
//! minimal wake latency at the cost of CPU occupancy.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

use crossbeam::queue::SegQueue;
use crossbeam::utils::Backoff;
use serde::{Deserialize, Serialize};

use axlephys_core::error::{Error, Result};

/// How worker threads behave while the queue is empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreadModel {
    /// The gate stays open between steps and workers spin on it.
    Persistent,
    /// The gate closes at the end of `execute` and workers block.
    #[default]
    Regular,
}

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Manual-reset gate. Workers block here while it is closed.
struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self { open: Mutex::new(false), cond: Condvar::new() }
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn close(&self) {
        *self.open.lock().unwrap() = false;
    }

    fn wait_open(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
    }
}

struct Shared {
    queue: SegQueue<Task>,
    tasks_left: AtomicUsize,
    gate: Gate,
    shutdown: AtomicBool,
    persistent: AtomicBool,
}

/// The pool. One per process; obtain it through [`WorkerPool::global`].
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Single-producer staging list; published to the queue by `execute`.
    staged: Mutex<Vec<Task>>,
}

impl WorkerPool {
    /// The process-wide pool, created on first use with one worker per
    /// available core. Reconfigure with [`change_thread_count`]; the caller
    /// coordinates that against `execute`.
    ///
    /// [`change_thread_count`]: WorkerPool::change_thread_count
    pub fn global() -> &'static WorkerPool {
        static POOL: OnceLock<WorkerPool> = OnceLock::new();
        POOL.get_or_init(|| {
            let pool = WorkerPool::new();
            let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
            pool.spawn_workers(threads.saturating_sub(1));
            pool
        })
    }

    /// An empty pool with no background workers. The producer thread still
    /// runs tasks, so a fresh pool behaves like `change_thread_count(1)`.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: SegQueue::new(),
                tasks_left: AtomicUsize::new(0),
                gate: Gate::new(),
                shutdown: AtomicBool::new(false),
                persistent: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
        }
    }

    /// Total workers including the producer.
    pub fn thread_count(&self) -> usize {
        self.workers.lock().unwrap().len() + 1
    }

    pub fn thread_model(&self) -> ThreadModel {
        if self.shared.persistent.load(Ordering::Relaxed) {
            ThreadModel::Persistent
        } else {
            ThreadModel::Regular
        }
    }

    /// Switches the idle behaviour of the workers. Takes effect at the next
    /// `execute`.
    pub fn set_thread_model(&self, model: ThreadModel) {
        let persistent = model == ThreadModel::Persistent;
        self.shared.persistent.store(persistent, Ordering::Relaxed);
        if !persistent {
            self.shared.gate.close();
        }
    }

    /// Joins every worker and starts `count - 1` fresh ones, each confirmed
    /// live through a one-shot handshake. Must not be called concurrently
    /// with `execute`.
    pub fn change_thread_count(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidArgument("worker pool needs at least one thread"));
        }
        let mut workers = self.workers.lock().unwrap();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.gate.open();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);
        drop(workers);

        tracing::debug!(count, "worker pool resized");
        self.spawn_workers(count - 1);
        if self.shared.persistent.load(Ordering::Relaxed) {
            self.shared.gate.open();
        } else {
            self.shared.gate.close();
        }
        Ok(())
    }

    fn spawn_workers(&self, count: usize) {
        let mut workers = self.workers.lock().unwrap();
        for index in 0..count {
            let shared = Arc::clone(&self.shared);
            let (ready_tx, ready_rx) = mpsc::channel();
            let handle = thread::Builder::new()
                .name(format!("axlephys-worker-{index}"))
                .spawn(move || {
                    let _ = ready_tx.send(());
                    worker_loop(&shared);
                })
                .expect("spawn worker thread");
            // A worker counts only once it has signalled readiness.
            let _ = ready_rx.recv();
            workers.push(handle);
        }
    }

    /// Stages a task. No synchronisation beyond an uncontended lock; the
    /// pool is single-producer by contract.
    pub fn add_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.staged.lock().unwrap().push(Box::new(task));
    }

    /// Publishes the staged tasks and runs the queue dry, participating as a
    /// worker. Returns once every published task has completed.
    pub fn execute(&self) {
        let staged: Vec<Task> = mem::take(&mut *self.staged.lock().unwrap());
        if staged.is_empty() {
            return;
        }
        // The counter must cover the batch before the first task becomes
        // visible, so a fast worker can never drive it below zero.
        self.shared.tasks_left.store(staged.len(), Ordering::SeqCst);
        for task in staged {
            self.shared.queue.push(task);
        }
        self.shared.gate.open();

        let backoff = Backoff::new();
        loop {
            if let Some(task) = self.shared.queue.pop() {
                task();
                self.shared.tasks_left.fetch_sub(1, Ordering::AcqRel);
                backoff.reset();
            } else if self.shared.tasks_left.load(Ordering::Acquire) == 0 {
                break;
            } else {
                // Another worker still owns a task; the tail wait spins
                // rather than blocks to keep inter-substep latency low.
                backoff.snooze();
            }
        }

        if !self.shared.persistent.load(Ordering::Relaxed) {
            self.shared.gate.close();
        }
    }

    /// Opens the gate, releasing parked workers.
    pub fn signal(&self) {
        self.shared.gate.open();
    }

    /// Closes the gate; workers park on it once the queue is empty.
    pub fn reset(&self) {
        self.shared.gate.close();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.gate.open();
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        shared.gate.wait_open();
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let backoff = Backoff::new();
        loop {
            if let Some(task) = shared.queue.pop() {
                task();
                shared.tasks_left.fetch_sub(1, Ordering::AcqRel);
                backoff.reset();
            } else if shared.persistent.load(Ordering::Relaxed) {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                // Persistent model: the gate stays open, spin on it.
                backoff.snooze();
            } else {
                // Regular model: yield, then park on the gate once the
                // producer has closed it.
                thread::yield_now();
                break;
            }
        }
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
    }
}
