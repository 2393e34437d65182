/// Evaluation runs over uploaded datasets.
pub mod eval;
/// Text-to-video generation.
pub mod video;

use async_trait::async_trait;
use jobpoll_core::{JobResult, JobSnapshot};

/// Trait for services that run jobs asynchronously behind a
/// submit / status / fetch triple.
///
/// Each backend owns its HTTP session so the connection pool is reused
/// across poll ticks and released when the backend is dropped.
///
/// To add a new job kind:
/// 1. Create a new module in `backends/`
/// 2. Implement `JobBackend` for your struct
/// 3. Hand it to [`crate::JobPoller::new`]
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Parameters describing the job to start.
    type Request: Send + Sync;
    /// What a completed job yields.
    type Artifact: Send;

    /// Short label used in log fields.
    fn kind(&self) -> &'static str;

    /// Starts the job. Errors here are never retried.
    async fn submit(&self, request: &Self::Request) -> JobResult<JobSnapshot>;

    /// Queries the current status of `job_id`.
    async fn status(&self, job_id: &str) -> JobResult<JobSnapshot>;

    /// Downloads the artifact of a completed job.
    async fn fetch(&self, job: &JobSnapshot) -> JobResult<Self::Artifact>;
}
