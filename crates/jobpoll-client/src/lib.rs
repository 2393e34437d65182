//! Long-running-operation polling and bounded retries for hosted AI jobs.
//!
//! # Main types
//!
//! - [`JobPoller`] — Submits a job, polls it to a terminal state within a
//!   budget, and fetches its artifact.
//! - [`Retrier`] / [`RetryPolicy`] — Capped exponential backoff around any
//!   fallible async call.
//! - [`JobBackend`] — Submit / status / fetch seam implemented per service.
//! - [`VideoBackend`], [`EvalBackend`] — HTTP backends for video generation
//!   and evaluation runs.
//! - [`ChatClient`] — Streaming chat completion wrapped in the retry policy.
//! - [`ClientConfig`] — TOML and environment configuration.

/// Per-service job backends.
pub mod backends;
/// Streaming chat completions.
pub mod chat;
/// TOML and environment configuration.
pub mod config;
/// Shared HTTP session and response handling.
pub mod http;
/// Submit, poll and fetch loop.
pub mod poller;
/// Bounded retries with capped exponential backoff.
pub mod retry;

pub use backends::eval::{EvalBackend, EvalReport, EvalRunRequest};
pub use backends::video::{VideoArtifact, VideoBackend, VideoRequest};
pub use backends::JobBackend;
pub use chat::{ChatClient, ChatCompletion, TokenUsage};
pub use config::{ClientConfig, PollSettings, DEFAULT_POLL_INTERVAL};
pub use poller::{JobPoller, PollConfig, PollOutcome};
pub use retry::{retry, retry_cancellable, Retrier, RetryPolicy, Sleeper, TokioSleeper};
