//! CrowdSec LAPI sidecar proxy.
//!
//! Filters and prioritizes decisions so the downstream bouncer stays within
//! its ipset capacity limits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crowdsec_sidecar::auditor;
use crowdsec_sidecar::config::Config;
use crowdsec_sidecar::handler::{build_router, AppState};
use crowdsec_sidecar::helpers::format_duration;

const SHUTDOWN_DRAIN_BUDGET: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "crowdsec-sidecar", disable_version_flag = true)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    if cli.version {
        println!(
            "crowdsec-sidecar {} (built {})",
            env!("CARGO_PKG_VERSION"),
            option_env!("SIDECAR_BUILD_TIME").unwrap_or("unknown")
        );
        return Ok(());
    }

    let cfg = match Config::load(&cli.config) {
        Ok(cfg) => Arc::new(cfg),
        Err(err) => {
            eprintln!("ERROR: failed to load config: {err:#}");
            std::process::exit(1);
        }
    };

    init_tracing(&cfg.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_addr = %cfg.listen_addr,
        upstream = %cfg.upstream_lapi_url,
        max_decisions = cfg.max_decisions,
        cache_ttl = %format_duration(cfg.cache_ttl),
        "starting crowdsec-sidecar"
    );

    let state = AppState::new(cfg.clone()).context("building upstream client")?;
    let auditor = auditor::spawn(state.clone());
    let router = build_router(state);

    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    info!(addr = %cfg.listen_addr, "listening");

    let shutdown = CancellationToken::new();
    let drain = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { drain.cancelled().await })
            .await
    });

    tokio::select! {
        result = &mut server => {
            match result {
                Ok(Err(err)) => error!(error = %err, "server error"),
                Err(err) => error!(error = %err, "server task failed"),
                Ok(Ok(())) => {}
            }
            std::process::exit(1);
        }
        signal = shutdown_signal() => {
            info!(signal, "shutting down");
        }
    }

    if let Some(auditor) = auditor {
        auditor.stop().await;
    }

    shutdown.cancel();
    match tokio::time::timeout(SHUTDOWN_DRAIN_BUDGET, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => error!(error = %err, "shutdown error"),
        Ok(Err(err)) => error!(error = %err, "server task failed"),
        Err(_) => error!("shutdown drain budget exceeded"),
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let level = match log_level {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return "SIGINT";
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        "SIGINT"
    }
}
