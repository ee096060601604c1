//! `mailctl` server binary.
//!
//! Loads the YAML configuration (overridable through `MAILCTL_` environment variables), seeds the
//! admin account, default plan and validation servers, then serves the API until Ctrl+C or
//! SIGTERM. On shutdown in-flight requests drain first, then the validation daemon and the other
//! background services stop.

use clap::Parser;
use mailctl::{Application, Config, telemetry};
use tracing::info;

/// Resolves on the first Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    };
    info!(signal = received, "Stopping mailctl: draining requests, then background services");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The webhook sender and the HTTP checker build rustls clients
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = mailctl::config::Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!(
            "Configuration in {} is valid ({:?} checker, {} credit packages, {} pool servers).",
            args.config,
            config.validation.checker,
            config.billing.credit_packages.len(),
            config.servers.pool.len()
        );
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;
    info!(
        bind = %config.bind_address(),
        checker = ?config.validation.checker,
        daemon = config.daemon.enabled,
        unit_cost = config.credits.unit_cost,
        "Starting mailctl"
    );

    Application::new(config).await?.serve(shutdown_signal()).await
}
