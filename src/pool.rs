//! Worker pool: one supervisor process keeps N gateway workers alive.
//!
//! Each slot restarts its worker with capped exponential backoff. A worker
//! that lives at least `stable_after` counts as healthy and resets the slot.
//! Short-lived exits feed a per-slot [`CircuitBreaker`]; once it trips the
//! slot stays down for the cooldown instead of crash-looping.

use crate::resilience::{Backoff, CircuitBreaker, CircuitBreakerConfig};
use crate::{Error, ErrorContext, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Environment variable carrying a worker's slot index. Its presence is what
/// makes a process of this binary act as a worker instead of a supervisor.
pub const WORKER_ID_ENV: &str = "CHAT_GATEWAY_WORKER_ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// `0` means one per available core.
    pub workers: usize,
    pub restart_base_delay: Duration,
    pub restart_max_delay: Duration,
    pub crash_threshold: u32,
    pub breaker_cooldown: Duration,
    pub stable_after: Duration,
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            restart_base_delay: Duration::from_millis(500),
            restart_max_delay: Duration::from_secs(30),
            crash_threshold: 5,
            breaker_cooldown: Duration::from_secs(60),
            stable_after: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_restart_delay(mut self, base: Duration, max: Duration) -> Self {
        self.restart_base_delay = base;
        self.restart_max_delay = max;
        self
    }

    pub fn with_crash_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.crash_threshold = threshold;
        self.breaker_cooldown = cooldown;
        self
    }

    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn effective_workers(&self) -> usize {
        worker_count(self.workers)
    }
}

/// Resolve a configured worker count; `0` becomes the number of cores.
pub fn worker_count(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Read the slot index of the current process, if it is a worker.
pub fn current_worker_id() -> Option<usize> {
    std::env::var(WORKER_ID_ENV).ok()?.parse().ok()
}

/// Starts one worker process for a slot.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, slot: usize) -> std::io::Result<Child>;
}

/// Re-executes a program (by default the running binary) with the slot id in
/// [`WORKER_ID_ENV`].
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The current executable with the current arguments.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            Error::internal_with_context(
                "cannot locate current executable",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("worker_pool"),
            )
        })?;
        Ok(Self::new(program, std::env::args().skip(1).collect()))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, slot: usize) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ID_ENV, slot.to_string())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Per-slot counters after the pool has stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub launches: Vec<u64>,
    pub breaker_trips: Vec<u64>,
}

impl PoolReport {
    pub fn total_launches(&self) -> u64 {
        self.launches.iter().sum()
    }
}

pub struct WorkerPool {
    cfg: PoolConfig,
    launcher: Arc<dyn WorkerLauncher>,
}

impl WorkerPool {
    pub fn new(cfg: PoolConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self { cfg, launcher }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    /// Supervise every slot until `shutdown` fires, then terminate workers
    /// (SIGTERM, grace period, kill) and return per-slot counters.
    pub async fn run(&self, shutdown: CancellationToken) -> PoolReport {
        let slots = self.cfg.effective_workers();
        info!(workers = slots, "starting worker pool");

        let launches: Arc<Vec<AtomicU64>> =
            Arc::new((0..slots).map(|_| AtomicU64::new(0)).collect());
        let breakers: Arc<Vec<CircuitBreaker>> = Arc::new(
            (0..slots)
                .map(|_| {
                    CircuitBreaker::new(
                        CircuitBreakerConfig::new()
                            .with_failure_threshold(self.cfg.crash_threshold.max(1))
                            .with_cooldown(self.cfg.breaker_cooldown),
                    )
                })
                .collect(),
        );

        let handles: Vec<_> = (0..slots)
            .map(|slot| {
                let supervisor = SlotSupervisor {
                    slot,
                    cfg: self.cfg.clone(),
                    launcher: self.launcher.clone(),
                    launches: launches.clone(),
                    breakers: breakers.clone(),
                };
                tokio::spawn(supervisor.run(shutdown.clone()))
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "slot supervisor task failed");
            }
        }

        let report = PoolReport {
            launches: launches.iter().map(|c| c.load(Ordering::Relaxed)).collect(),
            breaker_trips: breakers.iter().map(|b| b.snapshot().trips).collect(),
        };
        info!(launches = report.total_launches(), "worker pool stopped");
        report
    }
}

struct SlotSupervisor {
    slot: usize,
    cfg: PoolConfig,
    launcher: Arc<dyn WorkerLauncher>,
    launches: Arc<Vec<AtomicU64>>,
    breakers: Arc<Vec<CircuitBreaker>>,
}

impl SlotSupervisor {
    async fn run(self, shutdown: CancellationToken) {
        let slot = self.slot;
        let breaker = &self.breakers[slot];
        let backoff = Backoff::new(self.cfg.restart_base_delay, self.cfg.restart_max_delay);

        while !shutdown.is_cancelled() {
            if let Err(remaining) = breaker.allow() {
                warn!(
                    slot,
                    cooldown_ms = remaining.as_millis() as u64,
                    "worker crash loop detected; restarts paused"
                );
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => continue,
                    _ = shutdown.cancelled() => break,
                }
            }

            let mut child = match self.launcher.launch(slot) {
                Ok(child) => child,
                Err(e) => {
                    error!(slot, error = %e, "failed to launch worker");
                    breaker.on_failure();
                    if !self.pause(&backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };
            self.launches[slot].fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            info!(slot, pid = child.id(), "worker started");

            tokio::select! {
                status = child.wait() => {
                    let lived = started.elapsed();
                    if lived >= self.cfg.stable_after {
                        breaker.on_success();
                    } else if breaker.on_failure() {
                        error!(
                            slot,
                            threshold = self.cfg.crash_threshold,
                            "worker exited too quickly too many times"
                        );
                    }
                    match status {
                        Ok(status) => warn!(
                            slot,
                            code = status.code(),
                            lived_ms = lived.as_millis() as u64,
                            "worker exited"
                        ),
                        Err(e) => error!(slot, error = %e, "failed to wait for worker"),
                    }
                    if !self.pause(&backoff, &shutdown).await {
                        break;
                    }
                }
                _ = shutdown.cancelled() => {
                    terminate(&mut child, self.cfg.shutdown_grace, slot).await;
                    break;
                }
            }
        }
    }

    /// Restart delay for the slot's current failure streak. Returns false if
    /// shutdown fired while waiting.
    async fn pause(&self, backoff: &Backoff, shutdown: &CancellationToken) -> bool {
        let streak = self.breakers[self.slot].snapshot().consecutive_failures;
        let delay = backoff.delay(streak.max(1));
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown.cancelled() => false,
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is a live child of this process that has not been reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.start_kill();
}

async fn terminate(child: &mut Child, grace: Duration, slot: usize) {
    request_exit(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!(slot, code = status.code(), "worker stopped"),
        Ok(Err(e)) => warn!(slot, error = %e, "failed to wait for worker"),
        Err(_) => {
            warn!(slot, grace_ms = grace.as_millis() as u64, "worker ignored SIGTERM; killing");
            let _ = child.kill().await;
        }
    }
}

/// Bind a listener that several worker processes can share on one port.
pub fn bind_shared(addr: SocketAddr) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(1024)?)
}
