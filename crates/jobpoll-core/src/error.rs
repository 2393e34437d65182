use crate::job::JobStatus;
use std::time::Duration;

/// Top-level error type for submitting, polling and fetching remote jobs.
///
/// Callers match on the variant to pick a recovery strategy: resubmit after a
/// [`JobError::Submission`], keep waiting after a [`JobError::Timeout`], report
/// the remote payload of a [`JobError::RemoteFailure`], and so on.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The request that starts the job was rejected. Never retried.
    #[error("Submission rejected (HTTP {status}): {body}")]
    Submission {
        /// HTTP status returned by the submit endpoint (0 if no response).
        status: u16,
        /// Response body or a description of what was missing.
        body: String,
    },

    /// A network-level failure: connect error, reset, timeout, truncated body.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A non-2xx response while polling or fetching.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The job itself reached `failed` or `cancelled` on the remote side.
    #[error("Job {job_id} ended as {status}: {payload}")]
    RemoteFailure {
        /// Remote job identifier.
        job_id: String,
        /// The terminal status that was observed.
        status: JobStatus,
        /// The remote error object, verbatim.
        payload: serde_json::Value,
    },

    /// The wait budget ran out before a terminal state was observed.
    /// The job may still be running remotely.
    #[error("Job {job_id} not finished after {polls} polls ({elapsed:?}); outcome unknown")]
    Timeout {
        /// Remote job identifier.
        job_id: String,
        /// Number of status queries that were made.
        polls: u32,
        /// Wall-clock time spent waiting.
        elapsed: Duration,
    },

    /// The local caller aborted the wait.
    #[error("Wait for job {job_id} was cancelled")]
    Cancelled {
        /// Remote job identifier.
        job_id: String,
    },

    /// The job completed but downloading its artifact failed.
    #[error("Job {job_id} completed but artifact fetch failed: {source}")]
    ArtifactFetch {
        /// Remote job identifier.
        job_id: String,
        /// The underlying fetch error.
        #[source]
        source: Box<JobError>,
    },

    /// The remote service reported a status change after a terminal state.
    #[error("Job {job_id} moved from terminal {from} to {to}")]
    InvalidTransition {
        /// Remote job identifier.
        job_id: String,
        /// Terminal status previously observed.
        from: JobStatus,
        /// Status reported afterwards.
        to: JobStatus,
    },

    /// A response body did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Missing or invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`JobError`].
pub type JobResult<T> = Result<T, JobError>;

/// Returns `true` for HTTP statuses worth retrying: 408, 429 and any 5xx.
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

impl JobError {
    /// Whether reissuing the same request is likely to succeed.
    ///
    /// Only transport failures and transient HTTP statuses qualify. A
    /// rejected submission is never transient, whatever its status code.
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::Transport(_) => true,
            JobError::HttpStatus { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    /// Stable short label used in log fields and CLI exit messages.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Submission { .. } => "submission",
            JobError::Transport(_) => "transport",
            JobError::HttpStatus { .. } => "http_status",
            JobError::RemoteFailure { .. } => "remote_failure",
            JobError::Timeout { .. } => "timeout",
            JobError::Cancelled { .. } => "cancelled",
            JobError::ArtifactFetch { .. } => "artifact_fetch",
            JobError::InvalidTransition { .. } => "invalid_transition",
            JobError::Decode(_) => "decode",
            JobError::Config(_) => "config",
            JobError::Json(_) => "json",
            JobError::Io(_) => "io",
        }
    }
}
