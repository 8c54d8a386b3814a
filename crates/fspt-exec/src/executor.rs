//! The worker pool.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::future::Future;
use crate::queue::BoundedQueue;

enum Job {
    Once(Box<dyn FnOnce() + Send>),
    Periodic {
        run: Box<dyn FnMut() + Send>,
        period: Duration,
    },
}

struct Shared {
    queue: BoundedQueue<Job>,
    pool: Mutex<usize>,
    drained: Condvar,
    shutting_down: AtomicBool,
    keep_alive: Duration,
}

/// Fixed + elastic thread pool.
///
/// Up to `core_size` workers are spawned eagerly, one per submission,
/// and stay dedicated to the queue afterwards. When the queue is full,
/// the pool grows to at most `max_size`; workers idle past the
/// keep-alive timeout retire themselves.
pub struct Executor {
    shared: Arc<Shared>,
    core_size: usize,
    max_size: usize,
}

/// Builder for [`Executor`], mirroring the pool's four knobs.
pub struct ExecutorBuilder {
    core_size: usize,
    max_size: usize,
    keep_alive: Duration,
    queue_capacity: usize,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        let cores = num_cpus::get();
        Self {
            core_size: cores,
            max_size: cores,
            keep_alive: Duration::from_millis(500),
            queue_capacity: 4 * cores,
        }
    }
}

impl ExecutorBuilder {
    pub fn core_size(mut self, n: usize) -> Self {
        self.core_size = n;
        self
    }

    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = n;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn build(self) -> Executor {
        assert!(self.core_size > 0 && self.core_size <= self.max_size);
        Executor {
            shared: Arc::new(Shared {
                queue: BoundedQueue::new(self.queue_capacity),
                pool: Mutex::new(0),
                drained: Condvar::new(),
                shutting_down: AtomicBool::new(false),
                keep_alive: self.keep_alive,
            }),
            core_size: self.core_size,
            max_size: self.max_size,
        }
    }
}

impl Executor {
    /// Pool sized to the machine: one core worker per CPU.
    pub fn new() -> Self {
        ExecutorBuilder::default().build()
    }

    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    /// Submits a task without blocking.
    ///
    /// Fails with [`Error::CapacityExhausted`] when the pool is at
    /// `max_size` and the queue is full, and with [`Error::ShutDown`]
    /// after [`Executor::shutdown`].
    pub fn submit<T, F>(&self, task: F) -> Result<Future<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_inner(task, false)
    }

    /// Submits a task, blocking until the queue accepts it if need be.
    pub fn submit_blocking<T, F>(&self, task: F) -> Result<Future<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_inner(task, true)
    }

    fn submit_inner<T, F>(&self, task: F, may_block: bool) -> Result<Future<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        let (future, state) = Future::pending();
        let job = Job::Once(Box::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(value) => state.complete(value),
                Err(_) => state.poison(),
            }
        }));

        // Below core size: a fresh worker takes the job directly.
        {
            let mut pool = self.lock_pool();
            if *pool < self.core_size {
                *pool += 1;
                self.spawn_worker(Some(job));
                return Ok(future);
            }
        }
        match self.shared.queue.try_offer(job) {
            Ok(()) => Ok(future),
            Err(job) => {
                let mut pool = self.lock_pool();
                if *pool < self.max_size {
                    *pool += 1;
                    self.spawn_worker(Some(job));
                    Ok(future)
                } else if may_block {
                    drop(pool);
                    self.shared
                        .queue
                        .put(job)
                        .map_err(|_| Error::ShutDown)?;
                    Ok(future)
                } else {
                    Err(Error::CapacityExhausted)
                }
            }
        }
    }

    /// Schedules `task` to re-run every `period` until shutdown.
    pub fn submit_periodic<F>(&self, task: F, period: Duration) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        assert!(period > Duration::ZERO);
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        let job = Job::Periodic {
            run: Box::new(task),
            period,
        };
        {
            let mut pool = self.lock_pool();
            if *pool < self.core_size {
                *pool += 1;
                self.spawn_worker(Some(job));
                return Ok(());
            }
        }
        match self.shared.queue.try_offer(job) {
            Ok(()) => Ok(()),
            Err(job) => {
                let mut pool = self.lock_pool();
                if *pool < self.max_size {
                    *pool += 1;
                    self.spawn_worker(Some(job));
                    Ok(())
                } else {
                    Err(Error::CapacityExhausted)
                }
            }
        }
    }

    /// Current number of live workers.
    pub fn pool_size(&self) -> usize {
        *self.lock_pool()
    }

    /// Stops accepting work and waits for the pool to drain: queued
    /// tasks still run, periodic tasks stop at their next deadline.
    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        self.shared.queue.close();
        let mut pool = self.lock_pool();
        while *pool > 0 {
            pool = self.shared.drained.wait(pool).expect("pool poisoned");
        }
        debug!("executor drained");
    }

    fn spawn_worker(&self, initial: Option<Job>) {
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || worker_loop(shared, initial));
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, usize> {
        self.shared.pool.lock().expect("pool poisoned")
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Wake idle workers so they can retire; running tasks finish on
        // their own threads.
        self.shared.shutting_down.store(true, Ordering::Release);
        self.shared.queue.close();
    }
}

fn worker_loop(shared: Arc<Shared>, initial: Option<Job>) {
    let mut job = initial;
    loop {
        match job.take() {
            Some(Job::Once(run)) => run(),
            Some(Job::Periodic { mut run, period }) => {
                while !shared.shutting_down.load(Ordering::Acquire) {
                    let deadline = Instant::now() + period;
                    run();
                    if let Some(pause) = deadline.checked_duration_since(Instant::now()) {
                        thread::sleep(pause);
                    }
                }
            }
            None => {}
        }
        job = if shared.keep_alive > Duration::ZERO {
            shared.queue.poll(shared.keep_alive)
        } else {
            shared.queue.take()
        };
        if job.is_none() {
            break;
        }
    }
    let mut pool = shared.pool.lock().expect("pool poisoned");
    *pool -= 1;
    trace!("worker retired, {} left", *pool);
    if *pool == 0 {
        shared.drained.notify_all();
    }
}
