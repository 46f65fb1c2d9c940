//! Scripted job pipeline.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::job::{JobMessage, JobOutcome};
use crate::worker::{JobPipeline, PipelineError, PipelineFactory};

/// One scripted job and its effects on the replica.
#[derive(Debug, Clone)]
pub struct MockJob {
    pub message: JobMessage,
    /// Files the job writes into its replica (relative path, bytes),
    /// standing in for cache misses populated during processing.
    pub cache_writes: Vec<(String, Vec<u8>)>,
    /// Relative path whose presence in the replica is recorded at run time.
    pub probe: Option<String>,
    pub succeed: bool,
    /// Panic inside `run`, simulating an abnormal worker exit.
    pub panic_on_run: bool,
}

impl MockJob {
    pub fn new(job_id: &str) -> Self {
        Self {
            message: JobMessage {
                job_id: job_id.to_string(),
                source_url: format!("https://jobs.example/{job_id}"),
                kind: "mock".to_string(),
                receipt: ulid::Ulid::new().to_string().to_lowercase(),
                message_id: ulid::Ulid::new().to_string().to_lowercase(),
            },
            cache_writes: Vec::new(),
            probe: None,
            succeed: true,
            panic_on_run: false,
        }
    }

    pub fn with_cache_write(mut self, rel: &str, bytes: &[u8]) -> Self {
        self.cache_writes.push((rel.to_string(), bytes.to_vec()));
        self
    }

    pub fn with_probe(mut self, rel: &str) -> Self {
        self.probe = Some(rel.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.succeed = false;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_run = true;
        self
    }
}

/// Shared record of everything scripted pipelines observed.
#[derive(Debug, Default)]
pub struct PipelineLog {
    pub published: Vec<JobOutcome>,
    pub acked: Vec<String>,
    /// (job_id, probed path, present in the replica at run time)
    pub probes: Vec<(String, String, bool)>,
}

/// Pipeline that hands out scripted jobs and records what happens to them.
pub struct MockPipeline {
    jobs: VecDeque<MockJob>,
    current: Option<MockJob>,
    log: Arc<Mutex<PipelineLog>>,
    fail_publish: bool,
    fail_ack: bool,
    poll_wait: Duration,
}

impl MockPipeline {
    pub fn new(jobs: Vec<MockJob>, log: Arc<Mutex<PipelineLog>>) -> Self {
        Self {
            jobs: jobs.into(),
            current: None,
            log,
            fail_publish: false,
            fail_ack: false,
            poll_wait: Duration::from_millis(5),
        }
    }

    pub fn failing_publish(mut self) -> Self {
        self.fail_publish = true;
        self
    }

    pub fn failing_ack(mut self) -> Self {
        self.fail_ack = true;
        self
    }
}

impl JobPipeline for MockPipeline {
    fn next_job(&mut self) -> Result<Option<JobMessage>, PipelineError> {
        match self.jobs.pop_front() {
            Some(job) => {
                let message = job.message.clone();
                self.current = Some(job);
                Ok(Some(message))
            }
            None => {
                thread::sleep(self.poll_wait);
                Ok(None)
            }
        }
    }

    fn run(&mut self, job: &JobMessage, cache_dir: &Path) -> JobOutcome {
        let script = match self.current.take() {
            Some(script) if script.message.job_id == job.job_id => script,
            _ => return JobOutcome::failed(&job.job_id, "no scripted job"),
        };
        if script.panic_on_run {
            panic!("scripted worker failure for job {}", job.job_id);
        }
        if let Some(probe) = &script.probe {
            let present = cache_dir.join(probe).exists();
            self.log
                .lock()
                .unwrap()
                .probes
                .push((job.job_id.clone(), probe.clone(), present));
        }
        for (rel, bytes) in &script.cache_writes {
            let path = cache_dir.join(rel);
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = fs::write(&path, bytes);
        }
        if script.succeed {
            JobOutcome::succeeded(&job.job_id)
        } else {
            JobOutcome::failed(&job.job_id, "scripted failure")
        }
    }

    fn publish(&mut self, outcome: &JobOutcome) -> Result<(), PipelineError> {
        if self.fail_publish {
            return Err(PipelineError::Publish("scripted publish failure".to_string()));
        }
        self.log.lock().unwrap().published.push(outcome.clone());
        Ok(())
    }

    fn ack(&mut self, job: &JobMessage) -> Result<(), PipelineError> {
        if self.fail_ack {
            return Err(PipelineError::Ack("scripted ack failure".to_string()));
        }
        self.log.lock().unwrap().acked.push(job.job_id.clone());
        Ok(())
    }
}

/// Builds scripted pipelines per slot; each `build` pops the next scripted
/// round for that slot, so multi-round tests can vary the workload.
#[derive(Default)]
pub struct MockPipelineFactory {
    scripts: Mutex<HashMap<usize, VecDeque<Vec<MockJob>>>>,
    log: Arc<Mutex<PipelineLog>>,
}

impl MockPipelineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the shared observation log.
    pub fn log(&self) -> Arc<Mutex<PipelineLog>> {
        self.log.clone()
    }

    /// Queue `jobs` for `slot` in its next un-scripted round.
    pub fn script_round(&self, slot: usize, jobs: Vec<MockJob>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(slot)
            .or_default()
            .push_back(jobs);
    }
}

impl PipelineFactory for MockPipelineFactory {
    fn build(&self, slot: usize, _cache_dir: &Path) -> Box<dyn JobPipeline + Send> {
        let jobs = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&slot)
            .and_then(|rounds| rounds.pop_front())
            .unwrap_or_default();
        Box::new(MockPipeline::new(jobs, self.log.clone()))
    }
}
