//! Worker supervision with real child processes.
#![cfg(unix)]

use chat_gateway::pool::{PoolConfig, WorkerLauncher, WorkerPool, WORKER_ID_ENV};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

struct ShellLauncher(&'static str);

impl WorkerLauncher for ShellLauncher {
    fn launch(&self, slot: usize) -> std::io::Result<Child> {
        Command::new("sh")
            .arg("-c")
            .arg(self.0)
            .env(WORKER_ID_ENV, slot.to_string())
            .kill_on_drop(true)
            .spawn()
    }
}

fn stop_after(token: &CancellationToken, after: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        token.cancel();
    });
}

#[tokio::test]
async fn crash_loop_trips_breaker_after_threshold() {
    let pool = WorkerPool::new(
        PoolConfig::default()
            .with_workers(1)
            .with_restart_delay(Duration::from_millis(10), Duration::from_millis(40))
            .with_crash_breaker(3, Duration::from_secs(60))
            .with_stable_after(Duration::from_secs(10)),
        Arc::new(ShellLauncher("exit 1")),
    );
    let token = CancellationToken::new();
    stop_after(&token, Duration::from_millis(1500));

    let report = pool.run(token).await;
    assert_eq!(report.launches, vec![3]);
    assert_eq!(report.breaker_trips, vec![1]);
}

#[tokio::test]
async fn every_slot_gets_a_worker() {
    let pool = WorkerPool::new(
        PoolConfig::default()
            .with_workers(3)
            .with_shutdown_grace(Duration::from_secs(2)),
        Arc::new(ShellLauncher("sleep 30")),
    );
    let token = CancellationToken::new();
    stop_after(&token, Duration::from_millis(300));

    let report = pool.run(token).await;
    assert_eq!(report.launches, vec![1, 1, 1]);
    assert_eq!(report.total_launches(), 3);
}

#[tokio::test]
async fn workers_ignoring_sigterm_are_killed_after_grace() {
    let pool = WorkerPool::new(
        PoolConfig::default()
            .with_workers(1)
            .with_shutdown_grace(Duration::from_millis(200)),
        Arc::new(ShellLauncher("trap '' TERM; sleep 30")),
    );
    let token = CancellationToken::new();
    stop_after(&token, Duration::from_millis(300));

    let started = Instant::now();
    let report = pool.run(token).await;
    assert_eq!(report.launches, vec![1]);
    assert!(started.elapsed() < Duration::from_secs(10));
}
