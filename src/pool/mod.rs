//! Worker pool orchestrator.
//!
//! Runs the round lifecycle around the shared cache:
//!
//! 1. PROVISION (once): size the pool from the CPU budget, create one
//!    private replica directory per slot, seed them from the store.
//! 2. RUN: spawn one worker per slot against its replica, each draining
//!    jobs until the round deadline passes.
//! 3. QUIESCE: join every worker. An abnormal exit costs that slot's
//!    throughput for the round, nothing more.
//! 4. RECONCILE: merge replica discoveries into the archive and publish,
//!    or pull a fresher remote archive down into the replicas.
//!
//! Reconciliation strictly happens-before the next round's workers start,
//! so no worker ever runs against a replica that is mid-merge, and only the
//! orchestrator thread ever touches the archive or the store.

use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::PathBuf;
use std::thread;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Options;
use crate::signal::ShutdownFlag;
use crate::store::ArchiveStore;
use crate::sync::{SyncError, Synchronizer};
use crate::worker::{PipelineFactory, WorkerLoop, WorkerStats};

/// Errors for pool orchestration
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("pool has not been provisioned")]
    NotProvisioned,
}

/// What the reconcile phase of a round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// New entries were merged and the archive was published.
    Published { added: usize },
    /// Nothing new locally; a fresher remote archive was extracted.
    Refreshed,
    /// Nothing new locally or remotely.
    Unchanged,
    /// Merge, publish, or refresh failed; the next round retries.
    Failed,
}

/// Summary of one completed round.
#[derive(Debug, Clone)]
pub struct RoundSummary {
    pub round_id: String,
    pub deadline: DateTime<Utc>,
    pub stats: Vec<WorkerStats>,
    pub reconcile: ReconcileOutcome,
}

/// Pool size from the configured maximum and the CPU budget.
///
/// A zero maximum means "use every CPU"; a maximum above the CPU count is
/// clamped down to it.
pub fn pool_size(configured_max: usize, cpu_count: usize) -> usize {
    if configured_max == 0 {
        cpu_count
    } else {
        configured_max.min(cpu_count)
    }
}

/// Orchestrates worker rounds around a shared cache synchronizer.
pub struct Orchestrator<S: ArchiveStore, F: PipelineFactory> {
    options: Options,
    synchronizer: Synchronizer<S>,
    factory: F,
    shutdown: ShutdownFlag,
    work_root: PathBuf,
    replicas: Vec<PathBuf>,
}

impl<S: ArchiveStore, F: PipelineFactory> Orchestrator<S, F> {
    pub fn new(
        options: Options,
        synchronizer: Synchronizer<S>,
        factory: F,
        shutdown: ShutdownFlag,
    ) -> Self {
        let work_root = options.resolve_work_root();
        Self {
            options,
            synchronizer,
            factory,
            shutdown,
            work_root,
            replicas: Vec::new(),
        }
    }

    /// The provisioned replica directories.
    pub fn replicas(&self) -> &[PathBuf] {
        &self.replicas
    }

    /// The synchronizer owning the authoritative local archive.
    pub fn synchronizer(&self) -> &Synchronizer<S> {
        &self.synchronizer
    }

    /// PROVISION: size the pool, create the replica directories, and seed
    /// them from the store when an archive is available.
    ///
    /// Failure here is fatal: a pool without replicas cannot run.
    pub fn provision(&mut self) -> Result<(), PoolError> {
        let cpu_count = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let configured = self.options.max_workers;
        let count = pool_size(configured, cpu_count);
        if configured == 0 {
            info!(cpu_count, "worker count set to CPU count");
        } else if configured <= cpu_count {
            info!(max_workers = configured, "worker count limited by max_workers");
        } else {
            warn!(
                max_workers = configured,
                cpu_count, "max_workers exceeds CPU count, using CPU count"
            );
        }

        fs::create_dir_all(&self.work_root)?;
        for slot in 0..count {
            let dir = self.work_root.join(format!("replica-{slot}"));
            fs::create_dir_all(&dir)?;
            self.replicas.push(dir);
        }

        if self.synchronizer.download()? {
            self.synchronizer.extract(&self.replicas)?;
        }
        Ok(())
    }

    /// One complete round: RUN to a fresh deadline, QUIESCE, RECONCILE.
    pub fn run_round(&mut self) -> Result<RoundSummary, PoolError> {
        if self.replicas.is_empty() {
            return Err(PoolError::NotProvisioned);
        }
        let round_id = ulid::Ulid::new().to_string().to_lowercase();
        let deadline =
            Utc::now() + Duration::seconds(self.options.sync_interval_seconds as i64);
        info!(
            %round_id,
            workers = self.replicas.len(),
            %deadline,
            "running workers, next sync at deadline"
        );
        let stats = self.run_workers(deadline);
        let reconcile = self.reconcile();
        Ok(RoundSummary {
            round_id,
            deadline,
            stats,
            reconcile,
        })
    }

    /// Round loop. Runs until shutdown is requested; the check sits after
    /// reconciliation so the final interval's discoveries still publish.
    pub fn run(&mut self) -> Result<(), PoolError> {
        self.provision()?;
        loop {
            let summary = self.run_round()?;
            let jobs: u64 = summary.stats.iter().map(|s| s.jobs).sum();
            info!(
                round_id = %summary.round_id,
                jobs,
                reconcile = ?summary.reconcile,
                "round complete"
            );
            if self.shutdown.is_requested() {
                info!("shutdown requested, stopping after reconciliation");
                break;
            }
        }
        if let Err(err) = fs::remove_dir_all(&self.work_root) {
            warn!(error = %err, "failed to remove work root");
        }
        Ok(())
    }

    /// RUN + QUIESCE: one worker thread per replica, joined before return.
    fn run_workers(&self, deadline: DateTime<Utc>) -> Vec<WorkerStats> {
        let factory = &self.factory;
        let joined = thread::scope(|scope| {
            let handles: Vec<_> = self
                .replicas
                .iter()
                .enumerate()
                .map(|(slot, dir)| {
                    scope.spawn(move || {
                        let mut pipeline = factory.build(slot, dir);
                        WorkerLoop::new(slot, dir.clone(), deadline).run(pipeline.as_mut())
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(slot, handle)| match handle.join() {
                    Ok(stats) => Some(stats),
                    Err(_) => {
                        error!(slot, "worker exited abnormally");
                        None
                    }
                })
                .collect::<Vec<_>>()
        });
        joined.into_iter().flatten().collect()
    }

    /// RECONCILE: merge and publish, or pull the remote archive down.
    /// Never fails the round; a broken archive or store is retried next round.
    fn reconcile(&mut self) -> ReconcileOutcome {
        let sources = self.replicas.clone();
        match self.synchronizer.sync(&sources) {
            Ok(added) if !added.is_empty() => {
                info!(added = added.len(), "merged new cache entries");
                match self.synchronizer.upload() {
                    Ok(()) => ReconcileOutcome::Published { added: added.len() },
                    Err(err) => {
                        error!(error = %err, "failed to publish merged cache archive");
                        ReconcileOutcome::Failed
                    }
                }
            }
            Ok(_) => match self.synchronizer.download() {
                Ok(true) => match self.synchronizer.extract(&sources) {
                    Ok(()) => {
                        info!("refreshed replicas from remote cache archive");
                        ReconcileOutcome::Refreshed
                    }
                    Err(err) => {
                        error!(error = %err, "failed to extract refreshed cache archive");
                        ReconcileOutcome::Failed
                    }
                },
                Ok(false) => ReconcileOutcome::Unchanged,
                Err(err) => {
                    error!(error = %err, "failed to refresh cache archive");
                    ReconcileOutcome::Failed
                }
            },
            Err(err) => {
                error!(error = %err, "unexpected error while syncing the cache");
                ReconcileOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_unset_uses_cpu_count() {
        assert_eq!(pool_size(0, 8), 8);
        assert_eq!(pool_size(0, 1), 1);
    }

    #[test]
    fn test_pool_size_clamped_by_cpu_count() {
        assert_eq!(pool_size(16, 8), 8);
    }

    #[test]
    fn test_pool_size_limited_by_configuration() {
        assert_eq!(pool_size(4, 8), 4);
        assert_eq!(pool_size(8, 8), 8);
    }
}
