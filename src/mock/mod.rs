//! Test doubles.
//!
//! A scripted job pipeline with a shared observation log, and a store
//! wrapper that records calls and injects failures. Used by the unit and
//! integration tests; kept in the library so embedding crates can drive
//! the pool in their own tests.

mod pipeline;
mod store;

pub use pipeline::{MockJob, MockPipeline, MockPipelineFactory, PipelineLog};
pub use store::{InstrumentedStore, StoreOp};
