//! hivecache - worker pool with a shared, store-synchronized cache
//!
//! A pool of workers drains processing jobs, each against a private replica
//! of a shared read-through cache. At a periodic barrier the pool quiesces,
//! entries newly discovered by the workers are merged append-only into one
//! authoritative archive, and the archive is republished to durable object
//! storage so other pool instances converge on it.

pub mod archive;
pub mod config;
pub mod job;
pub mod mock;
pub mod pool;
pub mod signal;
pub mod store;
pub mod sync;
pub mod worker;

pub use archive::{ArchiveAppender, CacheArchive, IgnoreRules};
pub use config::Options;
pub use job::{JobMessage, JobOutcome};
pub use pool::{Orchestrator, ReconcileOutcome, RoundSummary};
pub use signal::ShutdownFlag;
pub use store::{ArchiveStore, DirStore, StoreError};
pub use sync::Synchronizer;
pub use worker::{JobPipeline, PipelineFactory, WorkerLoop, WorkerStats};
