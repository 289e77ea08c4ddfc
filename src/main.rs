use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use rhino_compute_dispatcher::config::{ConfigOverrides, DaemonConfig};
use rhino_compute_dispatcher::{lifecycle::LifecycleController, rest, AppContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "compute-dispatcherd",
    about = "Dispatches HTTP compute requests across a pool of geometry worker processes",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Maximum number of simultaneously-live workers.
    #[arg(long, env = "RHINO_COMPUTE_SPAWN_COUNT", global = true)]
    spawn_count: Option<usize>,

    /// Seconds of parent inactivity after which a worker self-terminates (0 disables).
    #[arg(long, env = "RHINO_COMPUTE_CHILD_IDLE_SPAN_SECS", global = true)]
    child_idle_span_secs: Option<u64>,

    /// Spawn (and wait for) one worker before serving traffic.
    #[arg(long, env = "RHINO_COMPUTE_SPAWN_ON_STARTUP", global = true)]
    spawn_on_startup: Option<bool>,

    /// Port workers poll for `IdleSeconds()`.
    #[arg(long, env = "RHINO_COMPUTE_PARENT_PORT", global = true)]
    parent_port: Option<u16>,

    /// Port the dispatcher's own REST surface listens on.
    #[arg(long, env = "RHINO_COMPUTE_REST_PORT", global = true)]
    rest_port: Option<u16>,

    /// `-rhinosysdir` passed to every spawned worker.
    #[arg(long, env = "RHINO_COMPUTE_SYSDIR", global = true)]
    rhino_sysdir: Option<String>,

    /// Log level / env-filter string (e.g. "info", "debug").
    #[arg(long, env = "RHINO_COMPUTE_LOG", global = true)]
    log: Option<String>,

    /// Directory holding `dispatcher.toml`. Defaults to the current directory.
    #[arg(long, env = "RHINO_COMPUTE_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Path to the `compute.geometry` worker executable, overriding auto-detection.
    #[arg(long, env = "RHINO_COMPUTE_WORKER_EXECUTABLE", global = true)]
    worker_executable: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the dispatcher (default when no subcommand is given).
    Serve,
    /// Inspect resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the fully resolved configuration as JSON.
    Show,
    /// Validate configuration (e.g. worker executable can be located) and exit.
    Check,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            spawn_count: self.spawn_count,
            child_idle_span_secs: self.child_idle_span_secs,
            spawn_on_startup: self.spawn_on_startup,
            parent_port: self.parent_port,
            rest_port: self.rest_port,
            rhino_sysdir: self.rhino_sysdir.clone(),
            log: self.log.clone(),
            data_dir: self.data_dir.clone(),
            worker_executable: self.worker_executable.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.command {
        Some(Command::Config { action }) => {
            // Config subcommands run before logging is initialized — they
            // are meant for a human at a terminal, not for the daemon log.
            let config = DaemonConfig::load(args.overrides())
                .context("failed to resolve dispatcher configuration")?;
            match action {
                ConfigAction::Show => print_config(&config),
                ConfigAction::Check => {
                    print_config(&config);
                    println!("worker executable resolved: {}", config.worker_executable.display());
                }
            }
            Ok(())
        }
        None | Some(Command::Serve) => run_server(args).await,
    }
}

fn print_config(config: &DaemonConfig) {
    let json = serde_json::json!({
        "spawn_count": config.spawn_count,
        "child_idle_span_secs": config.child_idle_span_secs,
        "spawn_on_startup": config.spawn_on_startup,
        "parent_port": config.parent_port,
        "rest_port": config.rest_port,
        "rhino_sysdir": config.rhino_sysdir,
        "log": config.log,
        "worker_executable": config.worker_executable,
        "port_range": [config.port_range_start, config.port_range_start + config.port_range_len - 1],
    });
    println!("{}", serde_json::to_string_pretty(&json).unwrap());
}

async fn run_server(args: Args) -> Result<()> {
    let config = DaemonConfig::load(args.overrides())
        .context("failed to resolve dispatcher configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(config.log.clone())
        .compact()
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "compute-dispatcherd starting");
    info!(
        spawn_count = config.spawn_count,
        spawn_on_startup = config.spawn_on_startup,
        rest_port = config.rest_port,
        parent_port = config.parent_port,
        "configuration loaded",
    );

    let ctx = AppContext::new(config.clone());
    let lifecycle = Arc::new(LifecycleController::with_activity_clock(
        config.clone(),
        ctx.scheduler.registry().clone(),
        ctx.activity_clock.clone(),
    ));

    lifecycle
        .spawn_startup_workers()
        .await
        .context("failed to seed worker pool at startup")?;
    let _reap_task = lifecycle.clone().spawn_reap_loop();

    let rest_ctx = ctx.clone();
    let rest_task = tokio::spawn(async move {
        if let Err(e) = rest::serve_rest_api(rest_ctx).await {
            error!(error = %e, "REST API server exited");
        }
    });

    let idle_ctx = ctx.clone();
    let idle_task = tokio::spawn(async move {
        if let Err(e) = rest::serve_idle_seconds(idle_ctx).await {
            error!(error = %e, "parent-activity listener exited");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = rest_task => {
            error!("REST API task ended unexpectedly");
        }
        _ = idle_task => {
            error!("parent-activity listener task ended unexpectedly");
        }
    }

    info!("killing all tracked worker processes before exit");
    ctx.scheduler.registry().kill_all().await;

    Ok(())
}
