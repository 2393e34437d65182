use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Status of a remote job as reported by the service.
///
/// Serialized as a snake_case string. Services disagree on spelling, so
/// several wire values map to the same variant (`in_progress` and `running`,
/// `canceled` and `cancelled`). Anything unrecognised is kept in
/// [`JobStatus::Unknown`] and treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    /// Accepted, not started.
    Queued,
    /// Executing.
    Running,
    /// Finished successfully; an artifact is available.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped before finishing.
    Cancelled,
    /// A status string this crate does not know about.
    Unknown(String),
}

impl JobStatus {
    /// `true` for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Position in the `queued → running → terminal` progression.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running | JobStatus::Unknown(_) => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 2,
        }
    }

    /// Canonical wire spelling.
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown(raw) => raw,
        }
    }
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "queued" | "pending" | "not_started" | "preprocessing" => JobStatus::Queued,
            "running" | "in_progress" | "processing" => JobStatus::Running,
            "completed" | "succeeded" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" | "canceled" => JobStatus::Cancelled,
            _ => JobStatus::Unknown(raw),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(raw: &str) -> Self {
        JobStatus::from(raw.to_string())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of a remote job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Opaque identifier assigned by the remote service.
    pub id: String,
    /// Reported status.
    pub status: JobStatus,
    /// Handle used to fetch the artifact. Only meaningful when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    /// Remote error object. Only meaningful when failed or cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    /// When this snapshot was taken locally.
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// Creates a snapshot with the given status and no result or error.
    pub fn new(id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            result_ref: None,
            error: None,
            observed_at: Utc::now(),
        }
    }

    /// A `queued` snapshot.
    pub fn queued(id: impl Into<String>) -> Self {
        Self::new(id, JobStatus::Queued)
    }

    /// A `running` snapshot.
    pub fn running(id: impl Into<String>) -> Self {
        Self::new(id, JobStatus::Running)
    }

    /// A `completed` snapshot carrying the artifact handle.
    pub fn completed(id: impl Into<String>, result_ref: impl Into<String>) -> Self {
        Self {
            result_ref: Some(result_ref.into()),
            ..Self::new(id, JobStatus::Completed)
        }
    }

    /// A `failed` snapshot carrying the remote error payload.
    pub fn failed(id: impl Into<String>, error: serde_json::Value) -> Self {
        Self {
            error: Some(error),
            ..Self::new(id, JobStatus::Failed)
        }
    }

    /// A `cancelled` snapshot.
    pub fn cancelled(id: impl Into<String>) -> Self {
        Self::new(id, JobStatus::Cancelled)
    }

    /// The remote error payload, or `"Unknown error"` when the service sent none.
    pub fn failure_payload(&self) -> serde_json::Value {
        self.error
            .clone()
            .unwrap_or_else(|| serde_json::Value::String("Unknown error".into()))
    }

    /// Converts a failed or cancelled snapshot into [`JobError::RemoteFailure`].
    pub fn into_remote_failure(self) -> JobError {
        let payload = self.failure_payload();
        JobError::RemoteFailure {
            job_id: self.id,
            status: self.status,
            payload,
        }
    }
}

/// What a call to [`JobTracker::observe`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// First observation of the job.
    Started(JobStatus),
    /// Status moved forward.
    Advanced {
        /// Previous status.
        from: JobStatus,
        /// New status.
        to: JobStatus,
    },
    /// Same status as before.
    Unchanged,
    /// The service reported an earlier non-terminal status; kept the newer one.
    Ignored {
        /// Status the tracker keeps.
        current: JobStatus,
        /// Stale status that was reported.
        reported: JobStatus,
    },
}

/// Enforces the `queued → running → terminal` progression for one job.
///
/// Once a terminal status has been observed any different status is an
/// [`JobError::InvalidTransition`]. Non-terminal regressions are logged and
/// dropped, since eventually consistent status endpoints produce them.
#[derive(Debug, Clone)]
pub struct JobTracker {
    job_id: String,
    latest: Option<JobSnapshot>,
}

impl JobTracker {
    /// Starts tracking `job_id` with no observations.
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            latest: None,
        }
    }

    /// The tracked job id.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The most recent accepted snapshot.
    pub fn latest(&self) -> Option<&JobSnapshot> {
        self.latest.as_ref()
    }

    /// The most recent accepted status.
    pub fn status(&self) -> Option<&JobStatus> {
        self.latest.as_ref().map(|s| &s.status)
    }

    /// Records `snapshot` and reports the transition it caused.
    pub fn observe(&mut self, snapshot: JobSnapshot) -> JobResult<Transition> {
        let Some(prev) = self.latest.as_ref() else {
            let status = snapshot.status.clone();
            self.latest = Some(snapshot);
            return Ok(Transition::Started(status));
        };

        if prev.status == snapshot.status {
            self.latest = Some(snapshot);
            return Ok(Transition::Unchanged);
        }

        if prev.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: prev.status.clone(),
                to: snapshot.status,
            });
        }

        if snapshot.status.rank() < prev.status.rank() {
            warn!(
                job_id = %self.job_id,
                current = %prev.status,
                reported = %snapshot.status,
                "Ignoring stale job status"
            );
            return Ok(Transition::Ignored {
                current: prev.status.clone(),
                reported: snapshot.status,
            });
        }

        let from = prev.status.clone();
        let to = snapshot.status.clone();
        self.latest = Some(snapshot);
        Ok(Transition::Advanced { from, to })
    }
}
