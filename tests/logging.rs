//! Request and upstream log lines carry the worker slot.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chat_gateway::scheduler::SchedulerConfig;
use chat_gateway::server;
use common::{context, MockUpstream};
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn upstream_and_request_logs_carry_worker_id() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let ctx = context(Arc::new(MockUpstream::new()), SchedulerConfig::default())
        .with_worker_id(Some(3));
    let resp = server::build_router(Arc::new(ctx))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "messages": [{ "role": "user", "content": "hi" }] }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let lines = captured.lines();
    for message in ["mock upstream call", "chat completion"] {
        let line = lines
            .iter()
            .find(|l| l.contains(message))
            .unwrap_or_else(|| panic!("no log line for {message:?} in {lines:#?}"));
        assert!(line.contains("worker_id=3"), "{line}");
    }
}
