//! HTTP backends driven end to end against a local mock server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use jobpoll_client::*;
use jobpoll_core::{CancelToken, JobError, JobStatus};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::new(server.uri(), "test-key");
    config.retry = RetryPolicy {
        max_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
    };
    config.poll.interval_secs = Some(0);
    config.poll.max_polls = 10;
    config
}

async fn mount_status(server: &MockServer, route: &str, body: serde_json::Value, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// 1. Video generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn video_job_downloads_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/v1/videos"))
        .and(query_param("api-version", "preview"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "sora-2", "size": "1280x720"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "video_abc", "status": "queued"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let status_route = "/openai/v1/videos/video_abc";
    mount_status(&server, status_route, json!({"id": "video_abc", "status": "queued"}), 1).await;
    mount_status(&server, status_route, json!({"id": "video_abc", "status": "in_progress"}), 1).await;
    mount_status(&server, status_route, json!({"id": "video_abc", "status": "completed"}), 1).await;

    Mock::given(method("GET"))
        .and(path("/openai/v1/videos/video_abc/content"))
        .and(query_param("api-version", "preview"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8, 1, 2, 3]))
        .expect(1)
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let poller = JobPoller::new(VideoBackend::new(&config).unwrap(), config.poll_config());
    let outcome = poller
        .run_with_report(&VideoRequest::new("A serene beach at sunset"), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.artifact.job_id, "video_abc");
    assert_eq!(outcome.artifact.bytes, vec![0, 1, 2, 3]);
    assert_eq!(outcome.polls, 3);

    let dir = tempfile::tempdir().unwrap();
    let saved = outcome.artifact.save_to(dir.path()).await.unwrap();
    assert_eq!(std::fs::read(saved).unwrap(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn video_submit_rejection_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/v1/videos"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid size"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let poller = JobPoller::new(VideoBackend::new(&config).unwrap(), config.poll_config());
    let err = poller
        .run(&VideoRequest::new("x").with_size("1x1"), &CancelToken::never())
        .await
        .unwrap_err();

    match err {
        JobError::Submission { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid size"));
        }
        other => panic!("Expected Submission, got {other:?}"),
    }
}

#[tokio::test]
async fn video_submit_without_id_is_submission_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "queued"})))
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let poller = JobPoller::new(VideoBackend::new(&config).unwrap(), config.poll_config());
    let err = poller
        .run(&VideoRequest::new("x"), &CancelToken::never())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No task ID returned"), "got: {err}");
}

#[tokio::test]
async fn video_poll_503_recovers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/v1/videos"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "video_r", "status": "queued"})),
        )
        .mount(&server)
        .await;

    let status_route = "/openai/v1/videos/video_r";
    Mock::given(method("GET"))
        .and(path(status_route))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream busy"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_status(&server, status_route, json!({"id": "video_r", "status": "completed"}), 1).await;

    Mock::given(method("GET"))
        .and(path("/openai/v1/videos/video_r/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![42u8]))
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let poller = JobPoller::new(VideoBackend::new(&config).unwrap(), config.poll_config());
    let outcome = poller
        .run_with_report(&VideoRequest::new("x"), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.artifact.bytes, vec![42]);
    assert_eq!(outcome.polls, 1);
}

#[tokio::test]
async fn video_remote_failure_carries_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/v1/videos"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "video_f", "status": "queued"})),
        )
        .mount(&server)
        .await;
    mount_status(
        &server,
        "/openai/v1/videos/video_f",
        json!({"id": "video_f", "status": "failed", "error": {"code": "moderation_blocked", "message": "Prompt rejected"}}),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/openai/v1/videos/video_f/content"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let poller = JobPoller::new(VideoBackend::new(&config).unwrap(), config.poll_config());
    let err = poller
        .run(&VideoRequest::new("x"), &CancelToken::never())
        .await
        .unwrap_err();

    match err {
        JobError::RemoteFailure {
            job_id,
            status,
            payload,
        } => {
            assert_eq!(job_id, "video_f");
            assert_eq!(status, JobStatus::Failed);
            assert_eq!(payload["code"], "moderation_blocked");
        }
        other => panic!("Expected RemoteFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn video_content_404_is_artifact_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/v1/videos"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "video_g", "status": "queued"})),
        )
        .mount(&server)
        .await;
    mount_status(&server, "/openai/v1/videos/video_g", json!({"id": "video_g", "status": "completed"}), 1).await;
    Mock::given(method("GET"))
        .and(path("/openai/v1/videos/video_g/content"))
        .respond_with(ResponseTemplate::new(404).set_body_string("expired"))
        .expect(1)
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let poller = JobPoller::new(VideoBackend::new(&config).unwrap(), config.poll_config());
    let err = poller
        .run(&VideoRequest::new("x"), &CancelToken::never())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "artifact_fetch");
}

// ---------------------------------------------------------------------------
// 2. Evaluation runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn eval_run_collects_all_pages() {
    let server = MockServer::start().await;
    let runs = "/openai/evals/eval_1/runs";

    Mock::given(method("POST"))
        .and(path(runs))
        .and(body_partial_json(json!({
            "name": "nightly",
            "data_source": {"type": "jsonl", "source": {"type": "file_id", "id": "file-9"}}
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "run_7", "status": "queued"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let run_route = "/openai/evals/eval_1/runs/run_7";
    mount_status(&server, run_route, json!({"id": "run_7", "status": "in_progress"}), 1).await;
    mount_status(
        &server,
        run_route,
        json!({"id": "run_7", "status": "completed", "report_url": "https://portal/run_7"}),
        1,
    )
    .await;

    let items = "/openai/evals/eval_1/runs/run_7/output_items";
    Mock::given(method("GET"))
        .and(path(items))
        .and(query_param("after", "item_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "item_3", "status": "pass"}],
            "has_more": false,
            "last_id": "item_3"
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(items))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "item_1", "status": "pass"}, {"id": "item_2", "status": "fail"}],
            "has_more": true,
            "last_id": "item_2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let poller = JobPoller::new(
        EvalBackend::new(&config, "eval_1").unwrap(),
        config.poll_config(),
    );
    let report = poller
        .run(
            &EvalRunRequest::new("nightly", "file-9").with_metadata("team", "eval-exp"),
            &CancelToken::never(),
        )
        .await
        .unwrap();

    assert_eq!(report.run_id, "run_7");
    assert_eq!(report.report_url.as_deref(), Some("https://portal/run_7"));
    let ids: Vec<&str> = report
        .output_items
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["item_1", "item_2", "item_3"]);
}

#[tokio::test]
async fn eval_times_out_with_unknown_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/evals/eval_1/runs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "run_slow", "status": "queued"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/openai/evals/eval_1/runs/run_slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "run_slow", "status": "in_progress"})),
        )
        .expect(4)
        .mount(&server)
        .await;

    let mut config = fast_config(&server);
    config.poll.max_polls = 4;
    let poller = JobPoller::new(
        EvalBackend::new(&config, "eval_1").unwrap(),
        config.poll_config(),
    );
    let err = poller
        .run(&EvalRunRequest::new("n", "f"), &CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Timeout { polls: 4, .. }));
}

// ---------------------------------------------------------------------------
// 3. Streaming chat
// ---------------------------------------------------------------------------

const SSE_BODY: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
data: {\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":3,\"total_tokens\":12}}\n\n\
data: [DONE]\n\n";

#[tokio::test]
async fn chat_streams_deltas() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let client = ChatClient::new(&config, "gpt-4o-mini").unwrap();
    let (tx, mut rx) = mpsc::channel(16);

    let completion = client
        .complete_streaming(None, "Say hello", Some(tx))
        .await
        .unwrap();

    assert_eq!(completion.text, "Hello, world");
    assert_eq!(completion.usage.total_tokens, 12);
    assert_eq!(completion.finish_reason, "stop");

    let mut deltas = Vec::new();
    while let Ok(d) = rx.try_recv() {
        deltas.push(d);
    }
    assert_eq!(deltas, vec!["Hello", ", world"]);
}

#[tokio::test]
async fn chat_completes_after_delta_receiver_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let client = ChatClient::new(&config, "gpt-4o-mini").unwrap();
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let completion = client
        .complete_streaming(None, "Say hello", Some(tx))
        .await
        .unwrap();
    assert_eq!(completion.text, "Hello, world");
}

#[tokio::test]
async fn chat_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let client = ChatClient::new(&config, "gpt-4o-mini").unwrap();
    let completion = tokio::time::timeout(
        Duration::from_secs(10),
        client.complete_streaming(Some("Be brief."), "Say hello", None),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(completion.text, "Hello, world");
}

#[tokio::test]
async fn chat_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .expect(1)
        .mount(&server)
        .await;

    let config = fast_config(&server);
    let client = ChatClient::new(&config, "gpt-4o-mini").unwrap();
    let err = client
        .complete_streaming(None, "hi", None)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::HttpStatus { status: 401, .. }));
}
