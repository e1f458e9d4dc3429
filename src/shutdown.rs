//! Ordered shutdown of one gateway process.
//!
//! On trigger: stop accepting connections, discard queued work, give running
//! tasks and in-flight responses a grace period, close the cache, exit.

use crate::gateway::GatewayContext;
use crate::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queued tasks discarded by the drain.
    pub discarded: usize,
    /// Running tasks were still active when the grace period ran out.
    pub abandoned_running: bool,
    /// The HTTP server finished its in-flight responses within the grace period.
    pub server_finished: bool,
    pub errors: Vec<String>,
    /// A panic or fatal task error triggered the shutdown.
    pub failed: bool,
}

impl ShutdownReport {
    pub fn exit_code(&self) -> i32 {
        if self.failed || !self.errors.is_empty() {
            1
        } else {
            0
        }
    }
}

/// Owns the process-wide shutdown token.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
    failed: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown and make the process exit non-zero.
    pub fn fail(&self, reason: &str) {
        error!(reason, "fatal error; shutting down");
        self.failed.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    /// A panic or [`Self::fail`] has happened.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Exit code for a process whose shutdown ran without a [`ShutdownReport`].
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_failed())
    }

    /// Wait for an OS signal or an earlier trigger, then trigger.
    pub async fn wait_for_signal(&self) {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = self.token.cancelled() => {}
        }
        self.token.cancel();
    }

    /// Spawn a detached task. An error is logged and the process keeps
    /// running; only panics (see [`Self::install_panic_hook`]) take it down.
    pub fn spawn_logged<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                error!(task = name, error = %e, "background task failed");
            }
        })
    }

    /// Log panics, start a graceful shutdown, and force exit 1 if it has not
    /// completed after twice the grace period.
    pub fn install_panic_hook(&self) {
        let this = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            error!(panic = %info, "unhandled panic");
            this.fail("panic");
            let deadline = this.grace.saturating_mul(2);
            std::thread::spawn(move || {
                std::thread::sleep(deadline);
                std::process::exit(1);
            });
        }));
    }

    /// Run the shutdown sequence. Triggers the token if it has not fired yet,
    /// which stops the listener of a server started with it.
    pub async fn run(
        &self,
        ctx: &GatewayContext,
        server: Option<JoinHandle<Result<()>>>,
    ) -> ShutdownReport {
        self.token.cancel();
        let mut report = ShutdownReport::default();

        report.discarded = ctx.scheduler.drain();

        if !ctx.scheduler.wait_idle(self.grace).await {
            let snapshot = ctx.scheduler.snapshot();
            warn!(
                running = snapshot.running,
                grace_ms = self.grace.as_millis() as u64,
                "running tasks outlived the grace period; abandoning"
            );
            ctx.scheduler.abort_running();
            report.abandoned_running = true;
        }

        match server {
            Some(handle) => match tokio::time::timeout(self.grace, handle).await {
                Ok(Ok(Ok(()))) => report.server_finished = true,
                Ok(Ok(Err(e))) => report.errors.push(e.to_string()),
                Ok(Err(join)) => report.errors.push(format!("server task: {join}")),
                Err(_) => warn!("in-flight responses outlived the grace period"),
            },
            None => report.server_finished = true,
        }

        if let Err(e) = ctx.cache.close().await {
            report.errors.push(e.to_string());
        }

        // A panic during the sequence still counts.
        report.failed = self.has_failed();
        for e in &report.errors {
            error!(error = %e, "shutdown step failed");
        }
        info!(exit_code = report.exit_code(), "shutdown complete");
        report
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("triggered", &self.token.is_cancelled())
            .field("grace", &self.grace)
            .finish()
    }
}
