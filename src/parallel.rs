//! Thread pool configuration
//!
//! Chunks within a task and the tasks themselves both run on rayon's global
//! pool, so its size bounds the whole run's parallelism.

use crate::errors::{Result, StatsError};
use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

/// Configuration for parallel processing
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    /// `None` keeps rayon's default of one thread per logical core
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    #[must_use]
    pub const fn new(num_threads: Option<usize>) -> Self {
        Self { num_threads }
    }

    /// Use every available CPU core
    #[must_use]
    pub fn all_cores() -> Self {
        Self {
            num_threads: Some(num_cpus::get()),
        }
    }

    /// Set up the global Rayon thread pool
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::ThreadPoolError`] for a zero thread count or if
    /// the global pool was already built.
    pub fn setup_global_pool(&self) -> Result<()> {
        let Some(num_threads) = self.num_threads else {
            debug!(threads = rayon::current_num_threads(), "Using default thread pool");
            return Ok(());
        };
        if num_threads == 0 {
            return Err(StatsError::ThreadPoolError(
                "thread count must be at least 1".to_string(),
            ));
        }

        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("stack-stats-{i}"))
            .build_global()
            .map_err(|e| {
                StatsError::ThreadPoolError(format!(
                    "Failed to initialize thread pool with {num_threads} threads: {e}"
                ))
            })?;
        info!(threads = num_threads, "Configured thread pool");
        Ok(())
    }
}

/// Information about the parallel processing environment
#[derive(Debug, Clone, Copy)]
pub struct ParallelInfo {
    pub current_threads: usize,
    pub available_cores: usize,
    pub physical_cores: usize,
}

impl ParallelInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            current_threads: rayon::current_num_threads(),
            available_cores: num_cpus::get(),
            physical_cores: num_cpus::get_physical(),
        }
    }

    /// Log the environment at debug level
    pub fn log(&self) {
        debug!(
            current_threads = self.current_threads,
            available_cores = self.available_cores,
            physical_cores = self.physical_cores,
            "Parallel processing environment"
        );
    }
}
