//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::discovery::DiscoveryLoop;
use crate::engine::{EngineOptions, QueryEngine};
use crate::error::DnsError;
use crate::forwarder::{UdpTcpForwarder, Upstream};
use crate::handler::SyncRequestHandler;
use crate::plugin::Plugin;
use crate::rewrite::RewriteMatcher;
use crate::state::DnsState;

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically emit state metrics.
async fn metrics_loop(state: DnsState, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                state.emit_metrics();
                debug!(
                    generation = state.generation(),
                    domains = state.domains_count(),
                    records = state.records_count(),
                    "emitted state metrics"
                );
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// DNS server fed by the container discovery loop.
pub struct DnsServer {
    config: Config,
    state: DnsState,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: Config) -> Self {
        let state = DnsState::new(config.discovery.duplicate_policy);
        Self { config, state }
    }

    /// Get a reference to the DNS state.
    pub fn state(&self) -> &DnsState {
        &self.state
    }

    /// Build the query engine described by the `dns` section.
    pub fn build_engine(&self) -> Result<QueryEngine, DnsError> {
        let dns = &self.config.dns;
        let rewrites = RewriteMatcher::new(&dns.rewrites)?;

        let upstream = dns.upstream.as_ref().map(|u| {
            Arc::new(UdpTcpForwarder::new(u.addr(), dns.upstream_timeout())) as Arc<dyn Upstream>
        });

        let options = EngineOptions {
            forward_unmatched: dns.forward_unmatched,
            flatten_cnames: dns.flatten_cnames,
        };

        Ok(QueryEngine::new(self.state.clone(), rewrites, upstream, options))
    }

    fn build_discovery(&self) -> Result<DiscoveryLoop, DnsError> {
        let discovery = &self.config.discovery;
        let plugins = discovery
            .plugins
            .iter()
            .map(|name| Plugin::from_name(name, &self.state, discovery))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DiscoveryLoop::new(
            DiscoveryLoop::file_sources(&discovery.hosts),
            plugins,
            discovery.scan_interval(),
        ))
    }

    /// Run the discovery loop and the DNS server until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        let listen_addr = self.config.dns.listen_addr();
        info!(
            listen_addr = %listen_addr,
            upstream = ?self.config.dns.upstream.as_ref().map(|u| u.addr()),
            hosts = self.config.discovery.hosts.len(),
            rewrites = self.config.dns.rewrites.len(),
            "Starting dns-sync server"
        );

        let engine = Arc::new(self.build_engine()?);
        let discovery = self.build_discovery()?;

        let discovery_handle = tokio::spawn(discovery.run(shutdown.clone()));

        let handler = SyncRequestHandler::new(engine, self.config.dns.verbose);
        let mut server = ServerFuture::new(handler);

        // Bind UDP
        let udp_socket = UdpSocket::bind(listen_addr).await?;
        info!(addr = %listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(listen_addr).await?;
        info!(addr = %listen_addr, "DNS TCP listening");
        server.register_listener(
            tcp_listener,
            Duration::from_secs(self.config.dns.tcp_timeout_secs),
        );

        info!("DNS server ready to serve queries");

        let metrics_handle = tokio::spawn(metrics_loop(self.state.clone(), shutdown.clone()));
        self.state.emit_metrics();

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        // Stop the background tasks even when the server exited on its own.
        shutdown.cancel();
        let _ = metrics_handle.await;

        info!("Waiting for discovery loop to stop...");
        let _ = discovery_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryConfig, DnsConfig, TelemetryConfig, UpstreamConfig};
    use crate::records::DuplicatePolicy;

    fn config() -> Config {
        Config {
            dns: DnsConfig {
                port: 5353,
                listen_ip: "127.0.0.1".parse().unwrap(),
                upstream: Some(UpstreamConfig {
                    ip: "127.0.0.1".parse().unwrap(),
                    port: 53,
                }),
                ..DnsConfig::default()
            },
            discovery: DiscoveryConfig {
                duplicate_policy: DuplicatePolicy::FirstWins,
                ..DiscoveryConfig::default()
            },
            telemetry: TelemetryConfig::default(),
        }
    }

    #[test]
    fn test_server_creation() {
        let server = DnsServer::new(config());
        assert_eq!(server.state().generation(), 0);
        assert_eq!(server.state().policy(), DuplicatePolicy::FirstWins);
        assert!(server.build_engine().is_ok());
    }

    #[test]
    fn test_unknown_plugin_rejected() {
        let mut config = config();
        config.discovery.plugins = vec!["homer".to_string()];
        let server = DnsServer::new(config);
        assert!(server.build_discovery().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut config = config();
        config.dns.port = 0;
        config.dns.listen_ip = "127.0.0.1".parse().unwrap();
        let server = DnsServer::new(config);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
