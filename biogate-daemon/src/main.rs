//! Biogate Daemon - fingerprint enrollment service
//!
//! Serves the scan WebSocket and arbitrates the capture device between
//! concurrent browser sessions.

use std::sync::Arc;

use anyhow::Context;
use biogate_daemon::config::ServeArgs;
use biogate_daemon::rate_limit::UpgradeRateLimiter;
use biogate_daemon::server::{self, AppState};
use biogate_daemon::{DeviceArbiter, SessionContext, SimulatedProvider};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// Biogate Daemon - Fingerprint enrollment service
#[derive(Parser)]
#[command(name = "biogate-daemon", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon server (default if no command given)
    Serve,

    /// Print the effective configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => cmd_serve(cli.serve).await,
        Commands::Config => cmd_config(&cli.serve),
    }
}

fn cmd_config(args: &ServeArgs) -> anyhow::Result<()> {
    let config = args.session_config().context("invalid session configuration")?;
    let script = args.simulation_script().context("invalid simulation script")?;

    println!("bind:              {}", args.bind);
    println!("quality threshold: {}", config.policy.threshold);
    println!("max attempts:      {}", config.policy.max_attempts);
    println!("capture timeout:   {:?}", config.capture_timeout);
    println!("session timeout:   {:?}", config.session_timeout);
    println!("lease wait:        {:?}", config.lease_wait);
    println!("template size:     {} bytes", args.template_size);
    println!("simulated steps:   {}", script.len());
    println!(
        "rate limit:        {}/s (burst {})",
        args.rate_limit_per_second, args.rate_limit_burst
    );
    Ok(())
}

/// Start the daemon server.
async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = args.session_config().context("invalid session configuration")?;
    let script = args.simulation_script().context("invalid simulation script")?;

    let provider = SimulatedProvider::new()
        .with_template_size(args.template_size)
        .with_script(script);

    let context = SessionContext::new(DeviceArbiter::new(), Arc::new(provider), config);
    let limiter = UpgradeRateLimiter::new(args.rate_limit_per_second, args.rate_limit_burst);
    let state = AppState::new(context.clone(), limiter);

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    tracing::info!(
        addr = %args.bind,
        provider = context.provider.name(),
        threshold = context.config.policy.threshold,
        max_attempts = context.config.policy.max_attempts,
        capture_timeout_ms = context.config.capture_timeout.as_millis() as u64,
        "Biogate daemon starting"
    );

    let result = server::serve(listener, state, server::shutdown_signal()).await;

    match result {
        Ok(()) => {
            tracing::info!("Daemon shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Daemon shutdown with error");
            Err(e).context("server error")
        }
    }
}
