use super::JobBackend;
use crate::config::ClientConfig;
use crate::http::{
    build_session, check_status, check_submit, error_field, normalize_endpoint, read_json,
    transport_error,
};
use async_trait::async_trait;
use jobpoll_core::{JobError, JobResult, JobSnapshot, JobStatus};
use std::path::{Path, PathBuf};
use tracing::info;

/// Prompts longer than this are truncated before submission.
pub const MAX_PROMPT_CHARS: usize = 1000;

/// Parameters for a text-to-video job.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    /// Text description, truncated to [`MAX_PROMPT_CHARS`].
    pub prompt: String,
    /// Model deployment name.
    pub model: String,
    /// Resolution as `WIDTHxHEIGHT`.
    pub size: String,
}

impl VideoRequest {
    /// A request with the default model and size.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: "sora-2".to_string(),
            size: "1280x720".to_string(),
        }
    }

    /// Overrides the model deployment.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides the resolution.
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    fn body(&self) -> serde_json::Value {
        let prompt: String = self.prompt.chars().take(MAX_PROMPT_CHARS).collect();
        serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "size": self.size,
        })
    }
}

/// Raw video bytes of a completed job.
#[derive(Debug, Clone)]
pub struct VideoArtifact {
    /// Id of the job that produced the video.
    pub job_id: String,
    /// MP4 content.
    pub bytes: Vec<u8>,
}

impl VideoArtifact {
    /// Writes the video to `dir/skit_video_<timestamp>.mp4`, creating `dir`
    /// if needed, and returns the file path.
    pub async fn save_to(&self, dir: &Path) -> JobResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("skit_video_{stamp}.mp4"));
        tokio::fs::write(&path, &self.bytes).await?;
        info!(job_id = %self.job_id, path = %path.display(), bytes = self.bytes.len(), "Video saved");
        Ok(path)
    }
}

/// Video generation service speaking the `/openai/v1/videos` API.
pub struct VideoBackend {
    base_url: String,
    api_key: String,
    api_version: String,
    http: reqwest::Client,
}

impl VideoBackend {
    /// A backend bound to the endpoint and key of `config`.
    pub fn new(config: &ClientConfig) -> JobResult<Self> {
        Ok(Self {
            base_url: normalize_endpoint(&config.endpoint),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            http: build_session(config.request_timeout())?,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/openai/v1/videos{}", self.base_url, suffix)
    }

    fn content_url(&self, job_id: &str) -> String {
        self.url(&format!("/{job_id}/content"))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(&[("api-version", self.api_version.as_str())])
    }

    fn snapshot(&self, body: &serde_json::Value, fallback_id: &str) -> JobSnapshot {
        let id = body["id"].as_str().unwrap_or(fallback_id).to_string();
        let status = body["status"]
            .as_str()
            .map(JobStatus::from)
            .unwrap_or(JobStatus::Queued);
        let mut snap = JobSnapshot::new(id, status);
        if snap.status == JobStatus::Completed {
            snap.result_ref = Some(self.content_url(&snap.id));
        }
        snap.error = error_field(body);
        snap
    }
}

#[async_trait]
impl JobBackend for VideoBackend {
    type Request = VideoRequest;
    type Artifact = VideoArtifact;

    fn kind(&self) -> &'static str {
        "video"
    }

    async fn submit(&self, request: &VideoRequest) -> JobResult<JobSnapshot> {
        let url = self.url("");
        info!(url = %url, model = %request.model, size = %request.size, "Creating video job");

        let resp = self
            .authorized(self.http.post(&url))
            .json(&request.body())
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status().as_u16();
        let body: serde_json::Value = read_json(check_submit(resp).await?).await?;

        match body["id"].as_str() {
            Some(id) if !id.is_empty() => Ok(self.snapshot(&body, id)),
            _ => Err(JobError::Submission {
                status,
                body: format!("No task ID returned: {body}"),
            }),
        }
    }

    async fn status(&self, job_id: &str) -> JobResult<JobSnapshot> {
        let resp = self
            .authorized(self.http.get(self.url(&format!("/{job_id}"))))
            .send()
            .await
            .map_err(transport_error)?;
        let body: serde_json::Value = read_json(check_status(resp).await?).await?;
        Ok(self.snapshot(&body, job_id))
    }

    async fn fetch(&self, job: &JobSnapshot) -> JobResult<VideoArtifact> {
        let url = job
            .result_ref
            .clone()
            .unwrap_or_else(|| self.content_url(&job.id));
        info!(job_id = %job.id, url = %url, "Downloading video");

        let resp = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(transport_error)?;
        let bytes = check_status(resp)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;

        Ok(VideoArtifact {
            job_id: job.id.clone(),
            bytes: bytes.to_vec(),
        })
    }
}
