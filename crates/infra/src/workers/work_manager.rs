//! Fixed-size worker pool with delayed scheduling.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

/// A unit of work run on a pool thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    /// The pool queue is full.
    #[error("work manager '{0}' is exhausted")]
    PoolExhausted(String),

    #[error("work manager '{0}' is shut down")]
    ShutDown(String),

    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

/// Work manager configuration.
#[derive(Debug, Clone)]
pub struct WorkManagerConfig {
    /// Name for logging and thread names
    pub name: String,
    /// Number of worker threads
    pub worker_threads: usize,
    /// Jobs that may wait for a free worker before `schedule` reports exhaustion
    pub queue_capacity: usize,
}

impl Default for WorkManagerConfig {
    fn default() -> Self {
        Self {
            name: "work-manager".to_string(),
            worker_threads: 4,
            queue_capacity: 256,
        }
    }
}

impl WorkManagerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkManagerStats {
    pub scheduled: u64,
    pub completed: u64,
    pub rejected: u64,
    pub panicked: u64,
    pub active: u64,
    pub delayed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,
    active: AtomicU64,
    delayed: AtomicU64,
}

struct Delayed {
    due: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    // Reversed: `BinaryHeap` is a max-heap, the earliest due job must surface first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct TimerQueue {
    jobs: BinaryHeap<Delayed>,
    next_seq: u64,
    stopped: bool,
}

type Timer = Arc<(Mutex<TimerQueue>, Condvar)>;

struct Inner {
    name: String,
    sender: Mutex<Option<SyncSender<Job>>>,
    timer: Timer,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    counters: Arc<Counters>,
    shut_down: AtomicBool,
}

/// Fixed pool of worker threads fed from a bounded queue.
///
/// Cloning yields another handle to the same pool. A background timer thread parks
/// jobs submitted through [`WorkManager::schedule_after`] until they are due.
#[derive(Clone)]
pub struct WorkManager {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for WorkManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkManager")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl WorkManager {
    pub fn start(config: WorkManagerConfig) -> Result<Self, SchedulingError> {
        let threads_wanted = config.worker_threads.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job>(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let timer: Timer = Arc::new((Mutex::new(TimerQueue::default()), Condvar::new()));

        let mut threads = Vec::with_capacity(threads_wanted + 1);
        for idx in 0..threads_wanted {
            let receiver = receiver.clone();
            let counters = counters.clone();
            let name = config.name.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{idx}", config.name))
                .spawn(move || worker_loop(&name, &receiver, &counters))
                .map_err(|e| SchedulingError::Spawn(e.to_string()))?;
            threads.push(handle);
        }

        {
            let timer = timer.clone();
            let sender = sender.clone();
            let counters = counters.clone();
            let name = config.name.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-timer", config.name))
                .spawn(move || timer_loop(&name, &timer, &sender, &counters))
                .map_err(|e| SchedulingError::Spawn(e.to_string()))?;
            threads.push(handle);
        }

        info!(
            work_manager = %config.name,
            workers = threads_wanted,
            queue_capacity = config.queue_capacity,
            "work manager started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                name: config.name,
                sender: Mutex::new(Some(sender)),
                timer,
                threads: Mutex::new(threads),
                counters,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a job for the next free worker.
    ///
    /// Never blocks: a full queue is reported as [`SchedulingError::PoolExhausted`].
    pub fn schedule<F>(&self, job: F) -> Result<(), SchedulingError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(self.shut_down_error());
        }

        let guard = self
            .inner
            .sender
            .lock()
            .map_err(|_| self.shut_down_error())?;
        let sender = guard.as_ref().ok_or_else(|| self.shut_down_error())?;

        match sender.try_send(Box::new(job)) {
            Ok(()) => {
                self.inner.counters.scheduled.fetch_add(1, AtomicOrdering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.inner.counters.rejected.fetch_add(1, AtomicOrdering::Relaxed);
                warn!(work_manager = %self.inner.name, "work queue full, job rejected");
                Err(SchedulingError::PoolExhausted(self.inner.name.clone()))
            }
            Err(TrySendError::Disconnected(_)) => Err(self.shut_down_error()),
        }
    }

    /// Run `job` once `delay` has elapsed.
    ///
    /// Delayed jobs are not bounded by the queue capacity: when one falls due while
    /// the queue is full, the timer waits for space instead of dropping it. Jobs still
    /// waiting at shutdown are discarded.
    pub fn schedule_after<F>(&self, delay: Duration, job: F) -> Result<(), SchedulingError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(self.shut_down_error());
        }

        let (lock, cvar) = &*self.inner.timer;
        let mut queue = lock.lock().map_err(|_| self.shut_down_error())?;
        if queue.stopped {
            return Err(self.shut_down_error());
        }

        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.jobs.push(Delayed {
            due: Instant::now() + delay,
            seq,
            job: Box::new(job),
        });
        self.inner.counters.delayed.fetch_add(1, AtomicOrdering::Relaxed);
        cvar.notify_one();
        Ok(())
    }

    pub fn stats(&self) -> WorkManagerStats {
        let c = &self.inner.counters;
        WorkManagerStats {
            scheduled: c.scheduled.load(AtomicOrdering::Relaxed),
            completed: c.completed.load(AtomicOrdering::Relaxed),
            rejected: c.rejected.load(AtomicOrdering::Relaxed),
            panicked: c.panicked.load(AtomicOrdering::Relaxed),
            active: c.active.load(AtomicOrdering::Relaxed),
            delayed: c.delayed.load(AtomicOrdering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(AtomicOrdering::Acquire)
    }

    /// Stop accepting work, let queued jobs finish, and join every thread.
    ///
    /// Idempotent. When called from one of the pool's own threads, that thread is not
    /// joined.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        self.inner.stop();

        let threads = match self.inner.threads.lock() {
            Ok(mut threads) => std::mem::take(&mut *threads),
            Err(_) => Vec::new(),
        };
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(work_manager = %self.inner.name, "pool thread panicked");
            }
        }

        info!(work_manager = %self.inner.name, "work manager stopped");
    }

    fn shut_down_error(&self) -> SchedulingError {
        SchedulingError::ShutDown(self.inner.name.clone())
    }
}

impl Inner {
    /// Signal the timer and workers to exit without waiting for them.
    fn stop(&self) {
        let (lock, cvar) = &*self.timer;
        if let Ok(mut queue) = lock.lock() {
            queue.stopped = true;
            let dropped = queue.jobs.len();
            queue.jobs.clear();
            self.counters
                .delayed
                .fetch_sub(dropped as u64, AtomicOrdering::Relaxed);
            if dropped > 0 {
                info!(work_manager = %self.name, dropped, "discarding delayed jobs at shutdown");
            }
        }
        cvar.notify_all();

        // Workers exit once the queue drains and every sender is gone.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.shut_down.swap(true, AtomicOrdering::AcqRel) {
            self.stop();
        }
    }
}

fn worker_loop(name: &str, receiver: &Mutex<Receiver<Job>>, counters: &Counters) {
    loop {
        let job = {
            let Ok(receiver) = receiver.lock() else {
                error!(work_manager = name, "work queue lock poisoned, worker exiting");
                return;
            };
            match receiver.recv() {
                Ok(job) => job,
                Err(_) => break,
            }
        };

        counters.active.fetch_add(1, AtomicOrdering::Relaxed);
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            counters.panicked.fetch_add(1, AtomicOrdering::Relaxed);
            error!(work_manager = name, "job panicked");
        }
        counters.active.fetch_sub(1, AtomicOrdering::Relaxed);
        counters.completed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    debug!(work_manager = name, "worker stopped");
}

fn timer_loop(name: &str, timer: &Timer, sender: &SyncSender<Job>, counters: &Counters) {
    let (lock, cvar) = &**timer;
    let Ok(mut queue) = lock.lock() else {
        error!(work_manager = name, "timer lock poisoned, timer exiting");
        return;
    };

    loop {
        if queue.stopped {
            break;
        }

        let now = Instant::now();
        let wait = match queue.jobs.peek() {
            None => None,
            Some(next) if next.due <= now => Some(Duration::ZERO),
            Some(next) => Some(next.due - now),
        };

        match wait {
            Some(Duration::ZERO) => {
                let Some(due) = queue.jobs.pop() else {
                    continue;
                };
                counters.delayed.fetch_sub(1, AtomicOrdering::Relaxed);

                // Release the lock while blocked on a full queue.
                drop(queue);
                if sender.send(due.job).is_err() {
                    break;
                }
                counters.scheduled.fetch_add(1, AtomicOrdering::Relaxed);
                queue = match lock.lock() {
                    Ok(queue) => queue,
                    Err(_) => break,
                };
            }
            Some(timeout) => {
                queue = match cvar.wait_timeout(queue, timeout) {
                    Ok((queue, _)) => queue,
                    Err(_) => break,
                };
            }
            None => {
                queue = match cvar.wait(queue) {
                    Ok(queue) => queue,
                    Err(_) => break,
                };
            }
        }
    }

    debug!(work_manager = name, "timer stopped");
}
