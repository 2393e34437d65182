use crate::config::ClientConfig;
use crate::http::{build_session, check_status, normalize_endpoint, transport_error};
use crate::retry::{Retrier, Sleeper, TokioSleeper};
use futures_util::StreamExt;
use jobpoll_core::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Token accounting reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the request.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens generated.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Sum of both.
    #[serde(default)]
    pub total_tokens: u64,
}

/// Aggregated result of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    /// Concatenated content deltas.
    pub text: String,
    /// Usage from the final stream event, zero if none was sent.
    pub usage: TokenUsage,
    /// Why generation stopped, `stop` when the stream did not say.
    pub finish_reason: String,
}

/// Streaming chat client for OpenAI-compatible `chat/completions` endpoints.
///
/// A dropped connection mid-stream is a transient failure: the whole call
/// is reissued under the retry policy, so a delta receiver may see the text
/// start over.
pub struct ChatClient<S = TokioSleeper> {
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
    retrier: Retrier<S>,
}

impl ChatClient<TokioSleeper> {
    /// A client for `model` using the endpoint and retry policy of `config`.
    pub fn new(config: &ClientConfig, model: impl Into<String>) -> JobResult<Self> {
        Self::with_sleeper(config, model, TokioSleeper)
    }
}

impl<S: Sleeper> ChatClient<S> {
    /// Like [`ChatClient::new`], with backoff sleeps going through `sleeper`.
    pub fn with_sleeper(
        config: &ClientConfig,
        model: impl Into<String>,
        sleeper: S,
    ) -> JobResult<Self> {
        Ok(Self {
            base_url: normalize_endpoint(&config.endpoint),
            api_key: config.api_key.clone(),
            model: model.into(),
            http: build_session(config.request_timeout())?,
            retrier: Retrier::with_sleeper(config.retry.clone(), sleeper),
        })
    }

    fn url(&self) -> String {
        format!("{}/openai/v1/chat/completions", self.base_url)
    }

    /// Streams a completion for `prompt`, forwarding each content delta to
    /// `deltas` when given, and returns the aggregated text and usage.
    pub async fn complete_streaming(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        deltas: Option<mpsc::Sender<String>>,
    ) -> JobResult<ChatCompletion> {
        let body = self.build_body(system_prompt, prompt);
        let body = &body;
        let deltas = &deltas;
        let completion = self
            .retrier
            .run("chat", JobError::is_transient, move || {
                self.stream_once(body, deltas.clone())
            })
            .await?;

        info!(
            model = %self.model,
            prompt_tokens = completion.usage.prompt_tokens,
            completion_tokens = completion.usage.completion_tokens,
            finish_reason = %completion.finish_reason,
            "Chat completion finished"
        );
        Ok(completion)
    }

    fn build_body(&self, system_prompt: Option<&str>, prompt: &str) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(sys) = system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": sys}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        })
    }

    async fn stream_once(
        &self,
        body: &serde_json::Value,
        mut deltas: Option<mpsc::Sender<String>>,
    ) -> JobResult<ChatCompletion> {
        let resp = self
            .http
            .post(self.url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;

        let mut stream = resp.bytes_stream();
        let mut parser = SseParser::default();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| JobError::Transport(format!("Stream read error: {e}")))?;
            for delta in parser.push(&chunk) {
                let receiver_gone = match &deltas {
                    Some(tx) => tx.send(delta).await.is_err(),
                    None => false,
                };
                if receiver_gone {
                    debug!(model = %self.model, "Delta receiver dropped, no longer forwarding");
                    deltas = None;
                }
            }
        }

        parser.finish()
    }
}

/// Incremental parser for `data:` lines of a chat completion SSE stream.
///
/// Raw bytes are buffered and only complete lines are decoded, so a
/// multibyte character split across network chunks survives intact.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    text: String,
    usage: TokenUsage,
    finish_reason: Option<String>,
    done: bool,
}

impl SseParser {
    /// Feeds a chunk and returns the content deltas it completed.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut deltas = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let decoded = String::from_utf8_lossy(&raw[..line_end]);
            let line = decoded.trim();

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };
            if data == "[DONE]" {
                self.done = true;
                continue;
            }
            let event: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            if let Ok(usage) = serde_json::from_value::<TokenUsage>(event["usage"].clone()) {
                self.usage = usage;
            }

            let choice = &event["choices"][0];
            if let Some(content) = choice["delta"]["content"].as_str() {
                if !content.is_empty() {
                    self.text.push_str(content);
                    deltas.push(content.to_string());
                }
            }
            if let Some(reason) = choice["finish_reason"].as_str() {
                self.finish_reason = Some(reason.to_string());
            }
        }

        deltas
    }

    /// Closes the stream. A stream that ends before `[DONE]` or a finish
    /// reason was cut off and is reported as a transport error.
    fn finish(self) -> JobResult<ChatCompletion> {
        if !self.done && self.finish_reason.is_none() {
            return Err(JobError::Transport(
                "stream ended before completion".to_string(),
            ));
        }
        Ok(ChatCompletion {
            text: self.text,
            usage: self.usage,
            finish_reason: self.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }
}
