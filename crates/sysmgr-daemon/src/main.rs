//! sysmgr-daemon - session manager for the device user session.
//!
//! Brings the session from power-on to a usable state (Startup, FirstUse,
//! Normal), supervises native and web applications and enforces memory
//! quotas. All engine state lives on one current-thread runtime; watcher
//! threads and socket tasks only feed events into it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sysmgr_core::app::StaticCatalog;
use sysmgr_core::config::{DEFAULT_CONFIG_PATH, SysmgrConfig};
use sysmgr_core::memory::{MemoryPressure, ProcStatusSampler, protect_from_oom_killer};
use sysmgr_core::process::OsLauncher;
use sysmgr_core::session::{Session, SessionParts};
use sysmgr_daemon::bus::BusClient;
use sysmgr_daemon::delegate::{DelegateClient, run_connection};
use sysmgr_daemon::pressure::{PROC_MEMINFO, run_pressure_poller};
use sysmgr_daemon::{reaper, server, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// sysmgr - session manager daemon
#[derive(Parser, Debug)]
#[command(name = "sysmgr-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    // One thread: every engine mutation happens on the session loop.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")?;

    runtime.block_on(async_main(args))
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<SysmgrConfig> {
    if path.exists() {
        SysmgrConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))
    } else {
        info!(path = %path.display(), "no configuration file, using defaults");
        Ok(SysmgrConfig::default())
    }
}

async fn async_main(args: Args) -> Result<()> {
    let config = load_config(&args.config)?;
    info!(version = env!("CARGO_PKG_VERSION"), "sysmgr starting");

    if config.memory.protect_self {
        protect_from_oom_killer(Path::new("/proc/self"));
    }

    // Before anything can spawn a child.
    let sigchld = reaper::child_exits().context("failed to install SIGCHLD handler")?;

    let delegate = DelegateClient::new(config.delegate.call_timeout);
    let session = Session::new(
        &config,
        SessionParts {
            catalog: Arc::new(StaticCatalog::new(config.apps.clone())),
            launcher: Box::new(OsLauncher::new(&config.paths, &config.supervisor)),
            sampler: Box::new(ProcStatusSampler::default()),
            delegate: Arc::new(delegate.clone()),
            services: Arc::new(BusClient::new(
                &config.paths.bus_dir,
                config.delegate.call_timeout,
            )),
        },
    );
    let sink = session.sink();

    tokio::spawn(reaper::forward_child_exits(sigchld, sink.clone()));
    let shutdown_sink = sink.clone();
    tokio::spawn(async move {
        if let Err(e) = reaper::forward_shutdown(shutdown_sink).await {
            error!("failed to install shutdown signal handlers: {e}");
        }
    });

    watch::spawn_marker_watch(&config.paths.preferences_dir, sink.clone())
        .context("failed to watch preference markers")?;
    watch::spawn_compositor_watch(
        &config.paths.runtime_dir,
        config.paths.compositor_socket.as_os_str(),
        sink.clone(),
    )
    .context("failed to watch compositor socket")?;

    tokio::spawn(run_pressure_poller(
        MemoryPressure::from_config(&config.memory),
        PathBuf::from(PROC_MEMINFO),
        config.memory.pressure_poll_interval,
        sink.clone(),
    ));

    tokio::spawn(run_connection(
        delegate,
        config.delegate.socket.clone(),
        config.delegate.reconnect.clone(),
        sink.clone(),
    ));

    let listener =
        server::bind(&config.paths.control_socket).context("failed to bind control socket")?;
    tokio::spawn(server::serve(listener, sink));

    session.run().await;

    if let Err(e) = std::fs::remove_file(&config.paths.control_socket) {
        info!("control socket not removed: {e}");
    }
    info!("sysmgr stopped");
    Ok(())
}
