#![forbid(unsafe_code)]

//! `harness-host` — host-side test channel service.
//!
//! Stands in for the add-in embedded in the real host application:
//! owns the single-threaded execution marshal, the resource lifecycle
//! manager, and the channel listener, backed by the in-memory reference
//! host.  Listens on the channel name derived from its own process id
//! and build version, so a runner that discovers this process can
//! compute the same name without negotiation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use host_harness::channel::channel_name;
use host_harness::config::GlobalConfig;
use host_harness::host::diagnostics::{self, DIAGNOSTICS_ARTIFACT};
use host_harness::host::memory::MemoryHost;
use host_harness::host::module::StaticLoader;
use host_harness::host::HostService;
use host_harness::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "harness-host", about = "Host-side test channel service", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Listen on an explicit channel name instead of deriving one from
    /// this process's id (for supervised setups).
    #[arg(long)]
    channel_name: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("harness-host bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    let channel = args.channel_name.unwrap_or_else(|| {
        channel_name(
            &config.host.channel_prefix,
            env!("CARGO_PKG_VERSION"),
            std::process::id(),
        )
    });

    let mut loader = StaticLoader::new();
    loader.register(DIAGNOSTICS_ARTIFACT, || Box::new(diagnostics::module()));

    let service = HostService::new(
        Box::new(MemoryHost::new()),
        Arc::new(loader),
        channel.clone(),
        config.host.shutdown_grace(),
    )?;

    let ct = CancellationToken::new();
    let serve_ct = ct.clone();
    let serve_handle = tokio::spawn(async move {
        if let Err(err) = service.serve(serve_ct).await {
            error!(%err, "test channel service failed");
        }
    });

    info!(channel = %channel, "harness-host ready");

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let _ = serve_handle.await;
    info!("harness-host shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
