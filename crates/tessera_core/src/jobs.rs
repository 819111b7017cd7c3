//! # Worker Pool
//!
//! A fixed pool of worker threads running parallel-for jobs.
//!
//! Stages never suspend: a job runs to completion before the call that
//! scheduled it returns, so stage ordering is the order of the calls.

use crate::error::{CoreError, CoreResult};

/// Largest supported worker count.
///
/// Per-worker presence bits are packed into a single `u64`.
pub const MAX_WORKERS: usize = 64;

/// A fixed-size rayon thread pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = WorkerPool::new(0)?; // one worker per core
/// let total: u64 = pool.install(|| values.par_iter().sum());
/// ```
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    worker_count: usize,
}

impl WorkerPool {
    /// Creates a pool with `worker_count` threads.
    ///
    /// `0` picks the available parallelism, clamped to [`MAX_WORKERS`].
    ///
    /// # Errors
    ///
    /// Returns an error if more than [`MAX_WORKERS`] workers are requested
    /// or the threads cannot be spawned.
    pub fn new(worker_count: usize) -> CoreResult<Self> {
        let worker_count = resolve_worker_count(worker_count)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|index| format!("tessera-worker-{index}"))
            .build()
            .map_err(|err| CoreError::WorkerPool(err.to_string()))?;

        tracing::info!(workers = worker_count, "worker pool started");
        Ok(Self { pool, worker_count })
    }

    /// Returns the number of worker threads.
    #[inline]
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Runs `job` inside the pool; parallel iterators inside it use the pool's workers.
    pub fn install<R, F>(&self, job: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(job)
    }

    /// Returns the index of the calling worker, or None off the pool.
    #[inline]
    #[must_use]
    pub fn current_worker(&self) -> Option<usize> {
        self.pool.current_thread_index()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .finish_non_exhaustive()
    }
}

/// Resolves a requested worker count, `0` meaning "one per core".
///
/// # Errors
///
/// Returns [`CoreError::InvalidWorkerCount`] above [`MAX_WORKERS`].
pub fn resolve_worker_count(requested: usize) -> CoreResult<usize> {
    if requested > MAX_WORKERS {
        return Err(CoreError::InvalidWorkerCount {
            requested,
            max: MAX_WORKERS,
        });
    }
    if requested > 0 {
        return Ok(requested);
    }
    let available = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    Ok(available.clamp(1, MAX_WORKERS))
}
