//! Job messages and results exchanged with the job pipeline.

use serde::{Deserialize, Serialize};

/// One processing job pulled from the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    /// Identifier of the unit of work.
    pub job_id: String,
    /// Where the source artifact is fetched from.
    pub source_url: String,
    /// Producer-assigned job kind, routed to the matching worker behavior.
    pub kind: String,
    /// Queue receipt used to acknowledge completion.
    pub receipt: String,
    /// Queue message identifier, for log correlation.
    pub message_id: String,
}

/// Wall-clock timings for the stages of one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub fetch_seconds: f64,
    pub transform_seconds: f64,
    pub upload_seconds: f64,
    pub total_seconds: f64,
}

/// Result of one job, published back through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: String,
    /// Keys of result artifacts uploaded by the transformation.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub uploaded_bytes: u64,
    #[serde(default)]
    pub timings: Timings,
}

impl JobOutcome {
    /// A successful outcome with no artifacts yet.
    pub fn succeeded(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            success: true,
            ..Default::default()
        }
    }

    /// A failed outcome carrying the error message.
    pub fn failed(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
