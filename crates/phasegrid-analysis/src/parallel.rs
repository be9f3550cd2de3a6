//! Fork-join execution of independent per-voxel work.
//!
//! Every unit of work reads its own input plus shared read-only data and
//! produces one result keyed by its job index. Results are collected into a
//! [`BTreeMap`] so the output never depends on completion order, and a worker
//! count of 1 runs everything on the calling thread.
//!
//! ```rust
//! use phasegrid_analysis::parallel::ParallelVoxelEvaluator;
//!
//! let data = vec![1.0f32, 2.0, 3.0, 4.0];
//! let evaluator = ParallelVoxelEvaluator::new(2);
//! let squares = evaluator
//!     .run(0..data.len(), |i| Ok::<_, std::convert::Infallible>(data[i] * data[i]))
//!     .unwrap();
//! assert_eq!(squares[&3], 16.0);
//! ```

use crate::error::{AnalysisError, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Callback invoked once per finished job.
pub type ProgressFn = Arc<dyn Fn() + Send + Sync>;

/// Runs index-tagged jobs serially or on a dedicated rayon pool.
#[derive(Clone)]
pub struct ParallelVoxelEvaluator {
    workers: usize,
    progress: Option<ProgressFn>,
}

impl fmt::Debug for ParallelVoxelEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelVoxelEvaluator")
            .field("workers", &self.workers)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for ParallelVoxelEvaluator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ParallelVoxelEvaluator {
    /// Create an evaluator with `workers` threads (0 is treated as 1).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            progress: None,
        }
    }

    /// One worker per available CPU.
    pub fn all_cpus() -> Self {
        let available = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(available)
    }

    /// Attach a progress callback. It never influences results.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn tick(&self) {
        if let Some(progress) = &self.progress {
            progress();
        }
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|idx| format!("phasegrid-voxel-{idx}"))
            .build()
            .map_err(|e| AnalysisError::ThreadPool(e.to_string()))
    }

    /// Evaluate `unit_of_work` for every job index.
    ///
    /// A job returning `Err` is logged and left out of the map; the remaining
    /// jobs still run.
    ///
    /// # Errors
    ///
    /// The worker pool could not be created.
    pub fn run<R, E, F>(&self, jobs: impl IntoIterator<Item = usize>, unit_of_work: F) -> Result<BTreeMap<usize, R>>
    where
        R: Send,
        E: fmt::Display,
        F: Fn(usize) -> std::result::Result<R, E> + Sync,
    {
        let jobs: Vec<usize> = jobs.into_iter().collect();
        let evaluate = |job: usize| {
            let outcome = match unit_of_work(job) {
                Ok(value) => Some((job, value)),
                Err(error) => {
                    tracing::warn!(job, %error, "voxel job failed");
                    None
                }
            };
            self.tick();
            outcome
        };

        if self.workers == 1 {
            return Ok(jobs.into_iter().filter_map(evaluate).collect());
        }

        let pool = self.pool()?;
        let results: Vec<(usize, R)> = pool.install(|| jobs.into_par_iter().filter_map(evaluate).collect());
        Ok(results.into_iter().collect())
    }

    /// Run `f(slot_index, slot)` over consecutive `slot_len`-sized slots of
    /// `buffer`, each slot written by exactly one job.
    ///
    /// # Errors
    ///
    /// `slot_len` is zero or does not divide the buffer, or the pool could not
    /// be created.
    pub fn for_each_slot<T, F>(&self, buffer: &mut [T], slot_len: usize, f: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        if slot_len == 0 || buffer.len() % slot_len != 0 {
            return Err(AnalysisError::invalid(
                "slot_len",
                format!("{slot_len} does not divide a buffer of {}", buffer.len()),
            ));
        }

        let work = |(idx, slot): (usize, &mut [T])| {
            f(idx, slot);
            self.tick();
        };

        if self.workers == 1 {
            buffer.chunks_exact_mut(slot_len).enumerate().for_each(work);
            return Ok(());
        }

        let pool = self.pool()?;
        pool.install(|| buffer.par_chunks_exact_mut(slot_len).enumerate().for_each(work));
        Ok(())
    }
}
