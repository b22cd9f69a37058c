//! Bounded worker pool for state fetches and commits.
//!
//! Every job is spawned onto a `JoinSet` and must hold a semaphore
//! permit while it runs, so at most `width` jobs make progress at once.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Cloneable handle to a shared pool of `width` permits.
#[derive(Debug, Clone)]
pub struct WorkPool {
    permits: Arc<Semaphore>,
    width: usize,
}

impl WorkPool {
    /// Create a pool. A width of zero is treated as one.
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run every job and wait for all of them.
    ///
    /// Results come back in completion order. A job that panics is
    /// logged and contributes no result.
    pub async fn run_all<I, F, T>(&self, jobs: I) -> Vec<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_indexed(jobs)
            .await
            .into_iter()
            .filter_map(|(_, result)| result)
            .collect()
    }

    /// Like [`run_all`](Self::run_all), but tags each result with the
    /// job's position in `jobs`.
    ///
    /// Finished jobs come first, in completion order. Every job that
    /// panicked or never got a permit follows as `(position, None)`, so
    /// the caller can account for each one.
    pub async fn run_indexed<I, F, T>(&self, jobs: I) -> Vec<(usize, Option<T>)>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut set = JoinSet::new();
        let mut unfinished = Vec::new();
        for (position, job) in jobs.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            set.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (position, None);
                };
                (position, Some(job.await))
            });
            unfinished.push(true);
        }

        let mut results = Vec::with_capacity(unfinished.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, Some(value))) => {
                    unfinished[position] = false;
                    results.push((position, Some(value)));
                }
                Ok((position, None)) => {
                    warn!(position, "worker pool closed before job could run")
                }
                Err(e) => error!(error = %e, "worker pool job failed"),
            }
        }

        results.extend(
            unfinished
                .iter()
                .enumerate()
                .filter(|(_, pending)| **pending)
                .map(|(position, _)| (position, None)),
        );
        results
    }
}
