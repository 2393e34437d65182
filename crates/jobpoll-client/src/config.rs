use crate::poller::PollConfig;
use crate::retry::RetryPolicy;
use jobpoll_core::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Polling cadence and budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Seconds between status queries. Unset means the caller's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    /// Maximum number of status queries before giving up.
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: None,
            max_polls: default_max_polls(),
        }
    }
}

/// Connection and polling settings shared by every backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Service base URL.
    #[serde(default)]
    pub endpoint: String,
    /// Bearer credential.
    #[serde(default)]
    pub api_key: String,
    /// Value of the `api-version` query parameter.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Per-request timeout for the HTTP session.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Polling cadence and budget.
    #[serde(default)]
    pub poll: PollSettings,
    /// Retry policy for status queries, artifact fetches and chat calls.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_api_version() -> String {
    "preview".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Poll interval used when neither the file nor the environment sets one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

fn default_max_polls() -> u32 {
    36
}

/// Environment variables read by [`ClientConfig::apply_env_from`]. The first
/// name present wins.
const ENDPOINT_VARS: &[&str] = &["JOBPOLL_ENDPOINT", "AZURE_OPENAI_ENDPOINT"];
const API_KEY_VARS: &[&str] = &["JOBPOLL_API_KEY", "AZURE_OPENAI_KEY"];

impl ClientConfig {
    /// A config with the given endpoint and key and defaults elsewhere.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
            poll: PollSettings::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Builds a config purely from the process environment.
    pub fn from_env() -> JobResult<Self> {
        let mut config = Self::new("", "");
        config.apply_env_from(|k| std::env::var(k).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file, then lets the environment override it.
    pub fn load(path: &Path) -> JobResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            JobError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let mut config = Self::from_toml(&raw)?;
        config.apply_env_from(|k| std::env::var(k).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without consulting the environment.
    pub fn from_toml(raw: &str) -> JobResult<Self> {
        toml::from_str(raw).map_err(|e| JobError::Config(e.to_string()))
    }

    /// Overrides fields from variables looked up through `get`.
    pub fn apply_env_from<F>(&mut self, get: F) -> JobResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| names.iter().find_map(|n| get(*n).filter(|v| !v.is_empty()));

        if let Some(endpoint) = first(ENDPOINT_VARS) {
            self.endpoint = endpoint;
        }
        if let Some(key) = first(API_KEY_VARS) {
            self.api_key = key;
        }
        if let Some(version) = get("JOBPOLL_API_VERSION") {
            self.api_version = version;
        }
        if let Some(raw) = get("JOBPOLL_POLL_INTERVAL_SECS") {
            self.poll.interval_secs = Some(parse_var("JOBPOLL_POLL_INTERVAL_SECS", &raw)?);
        }
        if let Some(raw) = get("JOBPOLL_MAX_POLLS") {
            self.poll.max_polls = parse_var("JOBPOLL_MAX_POLLS", &raw)?;
        }
        if let Some(raw) = get("JOBPOLL_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_var("JOBPOLL_MAX_ATTEMPTS", &raw)?;
        }
        Ok(())
    }

    /// Checks that the config can produce working requests.
    pub fn validate(&self) -> JobResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(JobError::Config(format!(
                "endpoint is not set (use {} or the config file)",
                ENDPOINT_VARS[0]
            )));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(JobError::Config(format!(
                "endpoint '{}' must start with http:// or https://",
                self.endpoint
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(JobError::Config(format!(
                "API key is not set (use {} or the config file)",
                API_KEY_VARS[0]
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(JobError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// HTTP session timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Poller settings derived from this config, polling every
    /// [`DEFAULT_POLL_INTERVAL`] unless an interval was configured.
    pub fn poll_config(&self) -> PollConfig {
        self.poll_config_or(DEFAULT_POLL_INTERVAL)
    }

    /// Poller settings with `default_interval` standing in for an unset
    /// `poll.interval_secs`.
    pub fn poll_config_or(&self, default_interval: Duration) -> PollConfig {
        PollConfig {
            poll_interval: self
                .poll
                .interval_secs
                .map_or(default_interval, Duration::from_secs),
            max_polls: self.poll.max_polls,
            retry: self.retry.clone(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> JobResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| JobError::Config(format!("{name}='{raw}': {e}")))
}
