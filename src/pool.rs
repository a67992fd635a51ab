//! Bounded worker pool
//!
//! Runs refresh loads and trigger-driven reclamation off the caller's
//! thread. Core workers start eagerly and live until shutdown. When the
//! queue is full, extra workers are started up to the maximum; they take
//! the overflowing task directly and exit after an idle timeout. Beyond
//! that, submissions are rejected with [`Error::PoolSaturated`].

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool sizing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub core_size: usize,
    pub max_size: usize,
    pub queue_size: usize,
    pub thread_name_prefix: String,
    pub keep_alive: Duration,
}

impl From<&EngineConfig> for PoolConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            core_size: config.worker_pool_core_size,
            max_size: config.worker_pool_max_size,
            queue_size: config.worker_pool_queue_size,
            thread_name_prefix: config.worker_thread_name_prefix.clone(),
            keep_alive: Duration::from_secs(config.worker_keep_alive_secs),
        }
    }
}

struct Shared {
    receiver: Receiver<Job>,
    live: AtomicUsize,
    next_id: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub live_workers: usize,
    pub queued: usize,
    pub completed: u64,
    pub rejected: u64,
    pub panicked: u64,
}

pub struct WorkerPool {
    config: PoolConfig,
    sender: Mutex<Option<Sender<Job>>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Start the pool with its core workers running
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.core_size == 0 || config.max_size < config.core_size || config.queue_size == 0 {
            return Err(Error::Config(format!(
                "invalid worker pool sizing: core={} max={} queue={}",
                config.core_size, config.max_size, config.queue_size
            )));
        }

        let (sender, receiver) = channel::bounded(config.queue_size);
        let pool = Self {
            config,
            sender: Mutex::new(Some(sender)),
            shared: Arc::new(Shared {
                receiver,
                live: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
            }),
        };

        for _ in 0..pool.config.core_size {
            pool.spawn_worker(None, None)?;
        }

        info!(
            core = pool.config.core_size,
            max = pool.config.max_size,
            queue = pool.config.queue_size,
            "Worker pool started"
        );
        Ok(pool)
    }

    /// Queue a task, starting an extra worker if the queue is full
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(Error::PoolShutdown);
        };

        match sender.try_send(Box::new(task)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                if self.try_reserve_worker() {
                    self.spawn_reserved(job)
                } else {
                    self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                    Err(Error::PoolSaturated(format!(
                        "{} workers busy, {} tasks queued",
                        self.config.max_size, self.config.queue_size
                    )))
                }
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::PoolShutdown),
        }
    }

    /// Reserve a worker slot below the maximum
    fn try_reserve_worker(&self) -> bool {
        self.shared
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.config.max_size).then_some(live + 1)
            })
            .is_ok()
    }

    fn spawn_reserved(&self, job: Job) -> Result<()> {
        let result = self.spawn_thread(Some(job), Some(self.config.keep_alive));
        if result.is_err() {
            self.shared.live.fetch_sub(1, Ordering::AcqRel);
        }
        result
    }

    fn spawn_worker(&self, first: Option<Job>, idle_timeout: Option<Duration>) -> Result<()> {
        self.shared.live.fetch_add(1, Ordering::AcqRel);
        let result = self.spawn_thread(first, idle_timeout);
        if result.is_err() {
            self.shared.live.fetch_sub(1, Ordering::AcqRel);
        }
        result
    }

    fn spawn_thread(&self, first: Option<Job>, idle_timeout: Option<Duration>) -> Result<()> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name_prefix, id))
            .spawn(move || worker_loop(shared, first, idle_timeout))?;
        Ok(())
    }

    /// Stop accepting work; queued tasks still run
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            info!("Worker pool shutting down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Wait until every worker has exited. Returns false on timeout.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.shared.live.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live_workers: self.shared.live.load(Ordering::Acquire),
            queued: self.shared.receiver.len(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, first: Option<Job>, idle_timeout: Option<Duration>) {
    if let Some(job) = first {
        run_job(&shared, job);
    }

    loop {
        let next = match idle_timeout {
            None => shared.receiver.recv().ok(),
            Some(timeout) => match shared.receiver.recv_timeout(timeout) {
                Ok(job) => Some(job),
                Err(RecvTimeoutError::Timeout) => {
                    debug!("Idle worker exiting");
                    None
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
        };

        match next {
            Some(job) => run_job(&shared, job),
            None => break,
        }
    }

    shared.live.fetch_sub(1, Ordering::AcqRel);
}

fn run_job(shared: &Shared, job: Job) {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(()) => {
            shared.completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => {
            shared.panicked.fetch_add(1, Ordering::Relaxed);
            error!("Worker task panicked");
        }
    }
}
