#![forbid(unsafe_code)]

//! `acp-engine`: protocol server over stdin/stdout.
//!
//! Stdout carries protocol frames only; all logging goes to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use acp_engine::acp::{register_tool_methods, EchoTools, HandshakeOptions};
use acp_engine::config::GlobalConfig;
use acp_engine::server::Server;
use acp_engine::transport::{FrameLimits, StreamTransport, Transport};
use acp_engine::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-engine", about = "Agent Client Protocol server over stdio", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Tracing filter used when `RUST_LOG` is unset; overrides the config.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.server.log_level.clone());
    init_tracing(args.log_format, &level)?;
    info!(version = env!("CARGO_PKG_VERSION"), "acp-engine bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config))
}

async fn run(config: GlobalConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let transport: Arc<dyn Transport> =
        Arc::new(StreamTransport::stdio(FrameLimits::from(&config.transport)));

    let handshake = HandshakeOptions::from_config(&config)
        .with_capabilities(json!({ "tools": { "listChanged": false } }));
    let server = Server::with_handshake(&config, handshake, transport, cancel.clone());
    register_tool_methods(server.router(), server.lifecycle(), Arc::new(EchoTools));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let outcome = server.run().await;
    cancel.cancel();
    outcome
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

fn init_tracing(log_format: LogFormat, default_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

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
