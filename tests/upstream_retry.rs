//! Upstream client against real HTTP servers: retry, backoff, exhaustion.

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chat_gateway::client::{Upstream, UpstreamClientBuilder, UpstreamFormat};
use chat_gateway::normalize::{NormalizerConfig, RequestNormalizer};
use chat_gateway::types::{NormalizedRequest, RawChatRequest};
use chat_gateway::Error;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

async fn spawn_upstream(fail_first: usize, ok_body: Value) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/chat/completions",
        post(move || {
            let counter = counter.clone();
            let ok_body = ok_body.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= fail_first {
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "boom" })))
                } else {
                    (StatusCode::OK, Json(ok_body))
                }
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}

fn openai_body(text: &str) -> Value {
    json!({
        "model": "upstream-model",
        "choices": [{ "message": { "role": "assistant", "content": text } }],
        "usage": { "total_tokens": 12 }
    })
}

fn request() -> NormalizedRequest {
    RequestNormalizer::new(NormalizerConfig::default())
        .normalize(RawChatRequest::new(json!([{ "role": "user", "content": "hi" }])))
        .unwrap()
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

#[tokio::test]
async fn recovers_after_transient_failures_with_backoff() {
    let (url, hits) = spawn_upstream(2, openai_body("finally")).await;
    let client = UpstreamClientBuilder::new(url)
        .with_format(UpstreamFormat::OpenAi)
        .with_max_retries(2)
        .with_backoff(Duration::from_millis(50), Duration::from_millis(400))
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let resp = client
        .complete(&request(), far_deadline(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resp.content(), Some("finally"));
    assert_eq!(resp.usage.total_tokens, 12);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // 50ms before retry 1, 100ms before retry 2
    assert!(started.elapsed() >= Duration::from_millis(150));

    let stats = client.stats();
    assert_eq!(stats.calls, 1);
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn exhausted_retries_report_unavailable() {
    let (url, hits) = spawn_upstream(usize::MAX, openai_body("never")).await;
    let client = UpstreamClientBuilder::new(url)
        .with_max_retries(2)
        .with_backoff(Duration::from_millis(10), Duration::from_millis(20))
        .build()
        .unwrap();

    let err = client
        .complete(&request(), far_deadline(), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::UpstreamUnavailable { attempts, ref last } => {
            assert_eq!(attempts, 3);
            assert!(last.to_string().contains("500"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.status_code(), 500);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn malformed_success_body_is_retried() {
    let (url, hits) = spawn_upstream(0, json!({ "choices": [] })).await;
    let client = UpstreamClientBuilder::new(url)
        .with_max_retries(1)
        .with_backoff(Duration::from_millis(5), Duration::from_millis(5))
        .build()
        .unwrap();

    let err = client
        .complete(&request(), far_deadline(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UpstreamUnavailable { attempts: 2, ref last }
            if matches!(**last, Error::MalformedUpstreamResponse { .. })
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancellation_during_backoff_stops_retrying() {
    let (url, hits) = spawn_upstream(usize::MAX, openai_body("never")).await;
    let client = UpstreamClientBuilder::new(url)
        .with_max_retries(5)
        .with_backoff(Duration::from_secs(10), Duration::from_secs(10))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let err = client
        .complete(&request(), far_deadline(), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deadline_too_short_for_backoff_fails_fast() {
    let (url, hits) = spawn_upstream(usize::MAX, openai_body("never")).await;
    let client = UpstreamClientBuilder::new(url)
        .with_max_retries(3)
        .with_backoff(Duration::from_secs(5), Duration::from_secs(5))
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let err = client
        .complete(
            &request(),
            Instant::now() + Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UpstreamUnavailable { attempts: 1, .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn huggingface_format_against_mockito() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/models/Qwen/Qwen2.5-72B-Instruct")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"generated_text":"hello from hf"}]"#)
        .expect(1)
        .create_async()
        .await;

    let client = UpstreamClientBuilder::new(server.url())
        .with_format(UpstreamFormat::HuggingFace)
        .with_api_key("test-key")
        .build()
        .unwrap();

    let resp = client
        .complete(&request(), far_deadline(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.content(), Some("hello from hf"));
    assert_eq!(resp.model, "Qwen/Qwen2.5-72B-Instruct");
    mock.assert_async().await;
}
