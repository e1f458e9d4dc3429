//! Graceful shutdown sequencing against a live scheduler.

mod common;

use chat_gateway::scheduler::SchedulerConfig;
use chat_gateway::shutdown::ShutdownCoordinator;
use chat_gateway::types::RawChatRequest;
use chat_gateway::Error;
use common::{context, MockUpstream};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn raw(i: usize) -> RawChatRequest {
    RawChatRequest::new(json!([{ "role": "user", "content": format!("question {i}") }]))
}

#[tokio::test]
async fn drain_discards_queue_and_lets_running_finish() {
    let upstream = Arc::new(MockUpstream::new().with_delay(Duration::from_millis(300)));
    let ctx = Arc::new(context(
        upstream.clone(),
        SchedulerConfig::default().with_concurrency(2),
    ));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.chat(raw(i)).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let coordinator = ShutdownCoordinator::new(Duration::from_secs(2));
    let report = coordinator.run(&ctx, None).await;
    assert_eq!(report.discarded, 8);
    assert!(!report.abandoned_running);
    assert_eq!(report.exit_code(), 0);
    assert!(coordinator.is_triggered());

    let mut ok = 0;
    let mut cancelled = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(Error::Cancelled { .. }) => cancelled += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 2);
    assert_eq!(cancelled, 8);
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn running_work_past_grace_is_abandoned() {
    let upstream = Arc::new(MockUpstream::new().with_delay(Duration::from_secs(30)));
    let ctx = Arc::new(context(upstream, SchedulerConfig::default()));

    let caller = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.chat(raw(0)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = ShutdownCoordinator::new(Duration::from_millis(100))
        .run(&ctx, None)
        .await;
    assert!(report.abandoned_running);
    assert_eq!(report.exit_code(), 0);

    let result = tokio::time::timeout(Duration::from_secs(2), caller)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled { .. })));
}

#[tokio::test]
async fn requests_after_shutdown_are_refused() {
    let upstream = Arc::new(MockUpstream::new());
    let ctx = context(upstream.clone(), SchedulerConfig::default());

    ShutdownCoordinator::new(Duration::from_millis(100))
        .run(&ctx, None)
        .await;

    let err = ctx.chat(raw(1)).await.unwrap_err();
    assert_eq!(err.status_code(), 503);
    assert_eq!(upstream.calls(), 0);
}
