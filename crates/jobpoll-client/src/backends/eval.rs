use super::JobBackend;
use crate::config::ClientConfig;
use crate::http::{
    build_session, check_status, check_submit, error_field, normalize_endpoint, read_json,
    transport_error,
};
use async_trait::async_trait;
use jobpoll_core::{JobError, JobResult, JobSnapshot, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

const PAGE_SIZE: u32 = 100;

/// Parameters for an evaluation run over an uploaded JSONL dataset.
#[derive(Debug, Clone)]
pub struct EvalRunRequest {
    /// Display name of the run.
    pub name: String,
    /// Id of the uploaded JSONL file.
    pub file_id: String,
    /// Free-form tags stored with the run.
    pub metadata: BTreeMap<String, String>,
}

impl EvalRunRequest {
    /// A run over `file_id` with no metadata.
    pub fn new(name: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_id: file_id.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds one metadata tag.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "metadata": self.metadata,
            "data_source": {
                "type": "jsonl",
                "source": {
                    "type": "file_id",
                    "id": self.file_id,
                },
            },
        })
    }
}

/// Output of a completed evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    /// Run identifier.
    pub run_id: String,
    /// Portal link for the run, when the service returned one.
    pub report_url: Option<String>,
    /// Per-row grader results, verbatim.
    pub output_items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OutputItemsPage {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

/// Evaluation service: runs under one eval group, addressed by `eval_id`.
pub struct EvalBackend {
    base_url: String,
    api_key: String,
    api_version: String,
    eval_id: String,
    http: reqwest::Client,
}

impl EvalBackend {
    /// A backend for runs of `eval_id`. An empty id is a config error.
    pub fn new(config: &ClientConfig, eval_id: impl Into<String>) -> JobResult<Self> {
        let eval_id = eval_id.into();
        if eval_id.trim().is_empty() {
            return Err(JobError::Config("eval id must not be empty".into()));
        }
        Ok(Self {
            base_url: normalize_endpoint(&config.endpoint),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            eval_id,
            http: build_session(config.request_timeout())?,
        })
    }

    fn runs_url(&self, suffix: &str) -> String {
        format!(
            "{}/openai/evals/{}/runs{}",
            self.base_url, self.eval_id, suffix
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(&[("api-version", self.api_version.as_str())])
    }

    fn snapshot(body: &serde_json::Value, fallback_id: &str) -> JobSnapshot {
        let id = body["id"].as_str().unwrap_or(fallback_id).to_string();
        let status = body["status"]
            .as_str()
            .map(JobStatus::from)
            .unwrap_or(JobStatus::Queued);
        let mut snap = JobSnapshot::new(id, status);
        if snap.status == JobStatus::Completed {
            snap.result_ref = body["report_url"].as_str().map(str::to_string);
        }
        snap.error = error_field(body);
        snap
    }
}

#[async_trait]
impl JobBackend for EvalBackend {
    type Request = EvalRunRequest;
    type Artifact = EvalReport;

    fn kind(&self) -> &'static str {
        "eval"
    }

    async fn submit(&self, request: &EvalRunRequest) -> JobResult<JobSnapshot> {
        info!(eval_id = %self.eval_id, name = %request.name, file_id = %request.file_id, "Creating eval run");

        let resp = self
            .authorized(self.http.post(self.runs_url("")))
            .json(&request.body())
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status().as_u16();
        let body: serde_json::Value = read_json(check_submit(resp).await?).await?;

        match body["id"].as_str() {
            Some(id) if !id.is_empty() => Ok(Self::snapshot(&body, id)),
            _ => Err(JobError::Submission {
                status,
                body: format!("No run ID returned: {body}"),
            }),
        }
    }

    async fn status(&self, job_id: &str) -> JobResult<JobSnapshot> {
        let resp = self
            .authorized(self.http.get(self.runs_url(&format!("/{job_id}"))))
            .send()
            .await
            .map_err(transport_error)?;
        let body: serde_json::Value = read_json(check_status(resp).await?).await?;
        Ok(Self::snapshot(&body, job_id))
    }

    async fn fetch(&self, job: &JobSnapshot) -> JobResult<EvalReport> {
        let url = self.runs_url(&format!("/{}/output_items", job.id));
        let mut output_items = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut request = self
                .authorized(self.http.get(&url))
                .query(&[("limit", PAGE_SIZE.to_string())]);
            if let Some(cursor) = &after {
                request = request.query(&[("after", cursor.as_str())]);
            }

            let resp = request.send().await.map_err(transport_error)?;
            let page: OutputItemsPage = read_json(check_status(resp).await?).await?;
            debug!(run_id = %job.id, items = page.data.len(), has_more = page.has_more, "Output items page");

            let page_was_empty = page.data.is_empty();
            output_items.extend(page.data);

            match (page.has_more, page.last_id) {
                (true, Some(last)) if !page_was_empty => after = Some(last),
                _ => break,
            }
        }

        info!(run_id = %job.id, items = output_items.len(), "Fetched eval output items");
        Ok(EvalReport {
            run_id: job.id.clone(),
            report_url: job.result_ref.clone(),
            output_items,
        })
    }
}
