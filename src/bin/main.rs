//! dns-sync binary entry point.

use clap::Parser;
use dns_sync::{telemetry, Config, DnsServer};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// DNS server that publishes records for labelled containers.
#[derive(Parser, Debug)]
#[command(name = "dns-sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "dns-sync.toml")]
    config: PathBuf,
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("DNS_SYNC")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    config.validate()?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr(),
        hosts = config.discovery.hosts.len(),
        plugins = ?config.discovery.plugins,
        "Starting dns-sync"
    );

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    // Run DNS server
    let server = DnsServer::new(config);
    let result = server.run(shutdown).await;

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("dns-sync shutdown complete");
    Ok(())
}
