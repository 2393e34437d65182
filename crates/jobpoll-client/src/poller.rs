use crate::backends::JobBackend;
use crate::retry::{Retrier, RetryPolicy, Sleeper, TokioSleeper};
use jobpoll_core::{CancelToken, JobError, JobResult, JobSnapshot, JobStatus, JobTracker, Transition};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cadence and budget of a poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between consecutive status queries.
    pub poll_interval: Duration,
    /// Maximum number of status queries.
    pub max_polls: u32,
    /// Retry policy applied to each status query and to the artifact fetch.
    pub retry: RetryPolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_polls: 36,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a successful [`JobPoller::run_with_report`].
#[derive(Debug, Clone)]
pub struct PollOutcome<A> {
    /// The fetched artifact.
    pub artifact: A,
    /// The terminal snapshot that released the artifact.
    pub snapshot: JobSnapshot,
    /// Status queries made, not counting retries within one query.
    pub polls: u32,
    /// Time from submission to artifact.
    pub elapsed: Duration,
}

/// Drives one remote job from submission to artifact.
///
/// The poller owns its backend, and with it the backend's HTTP session, so
/// the session is released on every exit path when the poller is dropped.
pub struct JobPoller<B, S = TokioSleeper> {
    backend: B,
    config: PollConfig,
    retrier: Retrier<S>,
}

impl<B: JobBackend> JobPoller<B, TokioSleeper> {
    /// A poller that sleeps on the tokio timer.
    pub fn new(backend: B, config: PollConfig) -> Self {
        Self::with_sleeper(backend, config, TokioSleeper)
    }
}

impl<B: JobBackend, S: Sleeper> JobPoller<B, S> {
    /// A poller whose poll-interval and backoff sleeps go through `sleeper`.
    pub fn with_sleeper(backend: B, config: PollConfig, sleeper: S) -> Self {
        let retrier = Retrier::with_sleeper(config.retry.clone(), sleeper);
        Self {
            backend,
            config,
            retrier,
        }
    }

    /// The backend jobs are sent to.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Cadence, budget and retry policy in use.
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Submits `request`, waits for a terminal state and fetches the artifact.
    pub async fn run(&self, request: &B::Request, cancel: &CancelToken) -> JobResult<B::Artifact> {
        self.run_with_report(request, cancel)
            .await
            .map(|outcome| outcome.artifact)
    }

    /// Like [`JobPoller::run`], also reporting poll count and timing.
    pub async fn run_with_report(
        &self,
        request: &B::Request,
        cancel: &CancelToken,
    ) -> JobResult<PollOutcome<B::Artifact>> {
        let started = Instant::now();
        let kind = self.backend.kind();

        let submitted = self.backend.submit(request).await?;
        let job_id = submitted.id.clone();
        info!(kind, job_id = %job_id, status = %submitted.status, "Job submitted");

        let mut tracker = JobTracker::new(job_id.clone());
        tracker.observe(submitted)?;

        let (snapshot, polls) = self.wait(&mut tracker, cancel, started).await?;
        info!(
            kind,
            job_id = %job_id,
            polls,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job completed, fetching artifact"
        );

        let backend = &self.backend;
        let done = &snapshot;
        let fetched = self
            .retrier
            .run_cancellable("fetch", JobError::is_transient, move || backend.fetch(done), cancel)
            .await;

        let artifact = match fetched {
            None => return Err(JobError::Cancelled { job_id }),
            Some(Ok(artifact)) => artifact,
            Some(Err(e)) => {
                warn!(kind, job_id = %job_id, error = %e, "Artifact fetch failed");
                return Err(JobError::ArtifactFetch {
                    job_id,
                    source: Box::new(e),
                });
            }
        };

        Ok(PollOutcome {
            artifact,
            snapshot,
            polls,
            elapsed: started.elapsed(),
        })
    }

    /// Polls until a terminal state, returning the completed snapshot and the
    /// number of status queries made.
    async fn wait(
        &self,
        tracker: &mut JobTracker,
        cancel: &CancelToken,
        started: Instant,
    ) -> JobResult<(JobSnapshot, u32)> {
        let kind = self.backend.kind();
        let job_id = tracker.job_id().to_string();
        let mut polls = 0u32;

        while polls < self.config.max_polls {
            let backend = &self.backend;
            let id = job_id.as_str();
            let polled = self
                .retrier
                .run_cancellable("status", JobError::is_transient, move || backend.status(id), cancel)
                .await;
            let snapshot = match polled {
                None => return Err(JobError::Cancelled { job_id }),
                Some(result) => result?,
            };
            polls += 1;

            match tracker.observe(snapshot)? {
                Transition::Advanced { from, to } => {
                    info!(kind, job_id = %job_id, from = %from, to = %to, poll = polls, "Job status changed");
                }
                Transition::Started(status) => {
                    info!(kind, job_id = %job_id, status = %status, poll = polls, "Job status");
                }
                Transition::Unchanged | Transition::Ignored { .. } => {
                    debug!(kind, job_id = %job_id, poll = polls, "Job still pending");
                }
            }

            let Some(current) = tracker.latest() else {
                continue;
            };
            match current.status {
                JobStatus::Completed => return Ok((current.clone(), polls)),
                JobStatus::Failed | JobStatus::Cancelled => {
                    warn!(kind, job_id = %job_id, status = %current.status, "Job ended without an artifact");
                    return Err(current.clone().into_remote_failure());
                }
                _ => {}
            }

            if polls < self.config.max_polls {
                tokio::select! {
                    _ = self.retrier.sleeper().sleep(self.config.poll_interval) => {}
                    _ = cancel.cancelled() => return Err(JobError::Cancelled { job_id }),
                }
            }
        }

        warn!(kind, job_id = %job_id, polls, "Job did not reach a terminal state in time");
        Err(JobError::Timeout {
            job_id,
            polls,
            elapsed: started.elapsed(),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
