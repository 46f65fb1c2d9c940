//! Worker loop and the job-pipeline contract it drives.
//!
//! A worker owns one private cache replica for the duration of a round and
//! drains jobs from its pipeline until the round deadline passes. The
//! deadline is cooperative: it is checked between jobs, never mid-job, so
//! in-flight work always runs to completion.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::job::{JobMessage, JobOutcome};

/// Errors for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("queue receive failed: {0}")]
    Receive(String),

    #[error("result publish failed: {0}")]
    Publish(String),

    #[error("job acknowledgement failed: {0}")]
    Ack(String),
}

/// The per-job pipeline a worker drives: obtain a job, process it against
/// the private cache replica, publish the result, acknowledge completion.
///
/// Implementations own queue consumption, artifact download/transform/upload,
/// and result notification; the pool only sequences the calls.
pub trait JobPipeline {
    /// Next available job, or `None` when nothing is ready right now.
    /// Implementations may block or poll internally.
    fn next_job(&mut self) -> Result<Option<JobMessage>, PipelineError>;

    /// Process a job, reading and extending the private cache replica as a
    /// side effect. Job failures are data in the outcome, not errors.
    fn run(&mut self, job: &JobMessage, cache_dir: &Path) -> JobOutcome;

    /// Publish the job result.
    fn publish(&mut self, outcome: &JobOutcome) -> Result<(), PipelineError>;

    /// Acknowledge the job so the queue will not redeliver it.
    fn ack(&mut self, job: &JobMessage) -> Result<(), PipelineError>;
}

/// Builds one pipeline per pool slot per round.
pub trait PipelineFactory: Sync {
    fn build(&self, slot: usize, cache_dir: &Path) -> Box<dyn JobPipeline + Send>;
}

/// Per-slot counters for one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub slot: usize,
    pub jobs: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Drives a pipeline against one replica until the deadline passes.
pub struct WorkerLoop {
    slot: usize,
    cache_dir: PathBuf,
    deadline: DateTime<Utc>,
}

impl WorkerLoop {
    pub fn new(slot: usize, cache_dir: PathBuf, deadline: DateTime<Utc>) -> Self {
        Self {
            slot,
            cache_dir,
            deadline,
        }
    }

    /// Run until the deadline passes. The deadline is checked after each
    /// job completes, so the loop never cancels in-flight work.
    pub fn run(&self, pipeline: &mut dyn JobPipeline) -> WorkerStats {
        let mut stats = WorkerStats {
            slot: self.slot,
            ..Default::default()
        };
        loop {
            match pipeline.next_job() {
                Ok(Some(job)) => self.handle(pipeline, &job, &mut stats),
                Ok(None) => {}
                Err(err) => {
                    warn!(slot = self.slot, error = %err, "failed to receive job");
                }
            }
            if Utc::now() >= self.deadline {
                break;
            }
        }
        debug!(
            slot = self.slot,
            jobs = stats.jobs,
            failed = stats.failed,
            "worker reached deadline"
        );
        stats
    }

    fn handle(&self, pipeline: &mut dyn JobPipeline, job: &JobMessage, stats: &mut WorkerStats) {
        info!(
            slot = self.slot,
            job_id = %job.job_id,
            message_id = %job.message_id,
            "processing started"
        );
        let outcome = pipeline.run(job, &self.cache_dir);
        stats.jobs += 1;
        if outcome.success {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
            warn!(
                slot = self.slot,
                job_id = %job.job_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "worker failed to process job"
            );
        }
        if let Err(err) = pipeline.publish(&outcome) {
            warn!(slot = self.slot, job_id = %job.job_id, error = %err, "failed to publish result");
        }
        if let Err(err) = pipeline.ack(job) {
            warn!(slot = self.slot, job_id = %job.job_id, error = %err, "failed to acknowledge job");
        }
        info!(slot = self.slot, job_id = %job.job_id, "processing finished");
    }
}

/// Pipeline that never yields a job.
///
/// The integration point for deployments that embed this crate is a real
/// [`JobPipeline`]; the bundled binary runs the pool with idle workers so
/// the cache synchronization lifecycle can be operated on its own.
pub struct IdlePipeline {
    poll_wait: Duration,
}

impl IdlePipeline {
    pub fn new(poll_wait: Duration) -> Self {
        Self { poll_wait }
    }
}

impl JobPipeline for IdlePipeline {
    fn next_job(&mut self) -> Result<Option<JobMessage>, PipelineError> {
        std::thread::sleep(self.poll_wait);
        Ok(None)
    }

    fn run(&mut self, job: &JobMessage, _cache_dir: &Path) -> JobOutcome {
        JobOutcome::failed(&job.job_id, "idle pipeline cannot process jobs")
    }

    fn publish(&mut self, _outcome: &JobOutcome) -> Result<(), PipelineError> {
        Ok(())
    }

    fn ack(&mut self, _job: &JobMessage) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Factory for [`IdlePipeline`] workers.
pub struct IdlePipelineFactory {
    poll_wait: Duration,
}

impl IdlePipelineFactory {
    pub fn new(poll_wait: Duration) -> Self {
        Self { poll_wait }
    }
}

impl PipelineFactory for IdlePipelineFactory {
    fn build(&self, _slot: usize, _cache_dir: &Path) -> Box<dyn JobPipeline + Send> {
        Box::new(IdlePipeline::new(self.poll_wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockJob, MockPipeline, PipelineLog};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn past_deadline() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_worker_completes_in_flight_job_past_deadline() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(Mutex::new(PipelineLog::default()));
        let mut pipeline = MockPipeline::new(vec![MockJob::new("job-1")], log.clone());

        // Deadline already passed: the job handed out is still completed.
        let worker = WorkerLoop::new(0, dir.path().to_path_buf(), past_deadline());
        let stats = worker.run(&mut pipeline);

        assert_eq!(stats.jobs, 1);
        assert_eq!(stats.succeeded, 1);
        let log = log.lock().unwrap();
        assert_eq!(log.published.len(), 1);
        assert_eq!(log.acked, vec!["job-1".to_string()]);
    }

    #[test]
    fn test_worker_publishes_before_ack() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(Mutex::new(PipelineLog::default()));
        let mut pipeline = MockPipeline::new(vec![MockJob::new("job-1")], log.clone());

        WorkerLoop::new(0, dir.path().to_path_buf(), past_deadline()).run(&mut pipeline);

        let log = log.lock().unwrap();
        // Order is recorded through the shared log: publish happened, then ack.
        assert_eq!(log.published[0].job_id, "job-1");
        assert_eq!(log.acked[0], "job-1");
    }

    #[test]
    fn test_worker_counts_failed_jobs() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(Mutex::new(PipelineLog::default()));
        let mut pipeline = MockPipeline::new(vec![MockJob::new("job-1").failing()], log.clone());

        let stats =
            WorkerLoop::new(3, dir.path().to_path_buf(), past_deadline()).run(&mut pipeline);

        assert_eq!(stats.slot, 3);
        assert_eq!(stats.jobs, 1);
        assert_eq!(stats.failed, 1);
        // Failed results are still published and acknowledged
        let log = log.lock().unwrap();
        assert_eq!(log.published.len(), 1);
        assert!(!log.published[0].success);
        assert_eq!(log.acked.len(), 1);
    }

    #[test]
    fn test_worker_tolerates_publish_failure() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(Mutex::new(PipelineLog::default()));
        let mut pipeline =
            MockPipeline::new(vec![MockJob::new("job-1")], log.clone()).failing_publish();

        let stats =
            WorkerLoop::new(0, dir.path().to_path_buf(), past_deadline()).run(&mut pipeline);

        // The loop keeps going: the job was still acknowledged
        assert_eq!(stats.jobs, 1);
        let log = log.lock().unwrap();
        assert!(log.published.is_empty());
        assert_eq!(log.acked, vec!["job-1".to_string()]);
    }

    #[test]
    fn test_worker_writes_cache_files_into_replica() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(Mutex::new(PipelineLog::default()));
        let job = MockJob::new("job-1").with_cache_write("host.example/resp.json", b"cached");
        let mut pipeline = MockPipeline::new(vec![job], log);

        WorkerLoop::new(0, dir.path().to_path_buf(), past_deadline()).run(&mut pipeline);

        assert_eq!(
            std::fs::read(dir.path().join("host.example/resp.json")).unwrap(),
            b"cached"
        );
    }

    #[test]
    fn test_idle_pipeline_yields_nothing() {
        let mut pipeline = IdlePipeline::new(Duration::from_millis(1));
        assert!(pipeline.next_job().unwrap().is_none());
    }
}
