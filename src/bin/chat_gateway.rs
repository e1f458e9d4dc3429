//! chat-gateway — 聊天补全网关服务进程
//!
//! Usage:
//!   chat-gateway [--config <path>] [--workers <n>] [--check-config]
//!
//! Without `CHAT_GATEWAY_WORKER_ID` the process supervises a pool of workers
//! (re-executions of this binary). With it, the process serves HTTP.

use anyhow::{bail, Context};
use chat_gateway::cache::spawn_purge_task;
use chat_gateway::config::GatewayConfig;
use chat_gateway::gateway::GatewayContext;
use chat_gateway::pool::{self, ProcessLauncher, WorkerPool};
use chat_gateway::server;
use chat_gateway::shutdown::ShutdownCoordinator;
use chat_gateway::telemetry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    workers: Option<usize>,
    check_config: bool,
}

fn main() {
    let code = match real_main() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("chat-gateway: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn real_main() -> anyhow::Result<i32> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(opts) = parse_args(&args)? else {
        return Ok(0);
    };

    let mut cfg = match opts.config {
        Some(ref path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
    if let Some(n) = opts.workers {
        cfg.workers.count = n;
    }
    cfg.validate()?;

    if opts.check_config {
        println!(
            "configuration OK: {}:{} -> {} ({} worker(s))",
            cfg.server.host,
            cfg.server.port,
            cfg.upstream.base_url,
            pool::worker_count(cfg.workers.count)
        );
        return Ok(0);
    }

    telemetry::init_logging(&cfg.logging.level)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(async move {
        match pool::current_worker_id() {
            Some(id) => run_worker(cfg).instrument(info_span!("worker", worker_id = id)).await,
            None if pool::worker_count(cfg.workers.count) == 1 => {
                info!(
                    system_concurrency = cfg.system_concurrency(),
                    "serving inline with one worker"
                );
                run_worker(cfg).await
            }
            None => run_supervisor(cfg).await,
        }
    })
}

fn parse_args(args: &[String]) -> anyhow::Result<Option<Options>> {
    let mut opts = Options::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config requires a path")?;
                opts.config = Some(PathBuf::from(path));
            }
            "--workers" | "-w" => {
                let n = iter.next().context("--workers requires a number")?;
                opts.workers = Some(
                    n.parse()
                        .with_context(|| format!("invalid worker count: {n}"))?,
                );
            }
            "--check-config" => opts.check_config = true,
            "--version" | "-V" => {
                println!("chat-gateway {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            other => bail!("unknown argument: {other} (see --help)"),
        }
    }
    Ok(Some(opts))
}

fn print_usage() {
    println!(
        r#"chat-gateway — 聊天补全网关

USAGE:
    chat-gateway [OPTIONS]

OPTIONS:
    -c, --config <path>     YAML configuration file
    -w, --workers <n>       Worker processes (0 = one per core)
        --check-config      Validate configuration and exit
    -V, --version           Show version information
    -h, --help              Show this help message

ENVIRONMENT:
    CHAT_GATEWAY_HOST, CHAT_GATEWAY_PORT, CHAT_GATEWAY_UPSTREAM_URL,
    CHAT_GATEWAY_API_KEY, CHAT_GATEWAY_PROXY, CHAT_GATEWAY_REDIS_URL,
    CHAT_GATEWAY_WORKERS, CHAT_GATEWAY_CONCURRENCY, CHAT_GATEWAY_DEV_MODE,
    CHAT_GATEWAY_LOG        Override configuration values
    RUST_LOG                Log filter (overrides logging.level)"#
    );
}

async fn run_worker(cfg: GatewayConfig) -> anyhow::Result<i32> {
    let coordinator = ShutdownCoordinator::new(cfg.shutdown_grace());
    coordinator.install_panic_hook();

    let ctx = Arc::new(
        GatewayContext::from_config(&cfg)?.with_worker_id(pool::current_worker_id()),
    );
    let purge = spawn_purge_task(
        ctx.cache.clone(),
        Duration::from_secs(cfg.cache.purge_interval_secs.max(1)),
        coordinator.token(),
    );

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.server.host, cfg.server.port))?;
    let listener = pool::bind_shared(addr).with_context(|| format!("failed to bind {addr}"))?;

    let mut app = server::build_router(ctx.clone());
    if cfg.server.cors {
        app = server::with_cors(app);
    }
    let mut server_task =
        tokio::spawn(server::serve(listener, app, coordinator.token()).in_current_span());

    let early_exit = tokio::select! {
        _ = coordinator.wait_for_signal() => None,
        res = &mut server_task => Some(res),
    };
    let server_task = match early_exit {
        None => Some(server_task),
        Some(res) => {
            match res {
                Ok(Ok(())) => warn!("server stopped without a shutdown signal"),
                Ok(Err(e)) => error!(error = %e, "server failed"),
                Err(e) => error!(error = %e, "server task panicked"),
            }
            coordinator.fail("server");
            None
        }
    };

    let report = coordinator.run(&ctx, server_task).await;
    if let Err(e) = purge.await {
        warn!(error = %e, "cache purge task ended abnormally");
    }
    Ok(report.exit_code())
}

async fn run_supervisor(cfg: GatewayConfig) -> anyhow::Result<i32> {
    let pool_cfg = cfg.pool_config();
    let coordinator = ShutdownCoordinator::new(pool_cfg.shutdown_grace);
    coordinator.install_panic_hook();

    let launcher = ProcessLauncher::current_exe()?;
    let pool = WorkerPool::new(pool_cfg, Arc::new(launcher));
    info!(
        listen = %format!("{}:{}", cfg.server.host, cfg.server.port),
        workers = pool.config().effective_workers(),
        system_concurrency = cfg.system_concurrency(),
        "supervisor starting"
    );

    let signals = coordinator.clone();
    coordinator.spawn_logged("signals", async move {
        signals.wait_for_signal().await;
        Ok(())
    });

    let report = pool.run(coordinator.token()).await;
    let code = coordinator.exit_code();
    info!(
        launches = ?report.launches,
        trips = ?report.breaker_trips,
        exit_code = code,
        "supervisor exiting"
    );
    Ok(code)
}
