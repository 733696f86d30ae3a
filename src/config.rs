//! Configuration types for dns-sync.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DnsError;
use crate::plugin;
use crate::records::{fqdn, DuplicatePolicy};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Container discovery configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Check every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), DnsError> {
        self.dns.validate()?;
        self.discovery.validate()
    }
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Port for the DNS server to listen on (UDP and TCP).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind the listeners to.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: IpAddr,

    /// Resolver that unmatched and rewritten queries are forwarded to.
    #[serde(default)]
    pub upstream: Option<UpstreamConfig>,

    /// Forward queries that match no local record.
    #[serde(default = "default_true")]
    pub forward_unmatched: bool,

    /// Collapse CNAME chains into A records bound to the queried name.
    #[serde(default = "default_true")]
    pub flatten_cnames: bool,

    /// Tag every query with a correlation id and log it at info level.
    #[serde(default)]
    pub verbose: bool,

    /// Source suffix -> replacement suffix, applied before forwarding.
    #[serde(default)]
    pub rewrites: BTreeMap<String, String>,

    /// Timeout for a single forwarded query, in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Idle timeout for inbound TCP connections, in seconds.
    #[serde(default = "default_tcp_timeout_secs")]
    pub tcp_timeout_secs: u64,
}

impl DnsConfig {
    /// Socket address the UDP and TCP listeners bind to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.port)
    }

    /// Timeout applied to every upstream exchange.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    fn validate(&self) -> Result<(), DnsError> {
        if self.port == 0 {
            return Err(DnsError::Config("dns.port must be in 1..=65535".into()));
        }

        if let Some(upstream) = &self.upstream {
            if upstream.port == 0 {
                return Err(DnsError::Config(
                    "dns.upstream.port must be in 1..=65535".into(),
                ));
            }
        }

        if self.upstream_timeout_ms == 0 {
            return Err(DnsError::Config(
                "dns.upstream_timeout_ms must be greater than 0".into(),
            ));
        }

        for (from, to) in &self.rewrites {
            fqdn(from).map_err(|e| {
                DnsError::Config(format!("invalid rewrite source '{}': {}", from, e))
            })?;
            fqdn(to).map_err(|e| {
                DnsError::Config(format!("invalid rewrite target '{}': {}", to, e))
            })?;
        }

        Ok(())
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            listen_ip: default_listen_ip(),
            upstream: None,
            forward_unmatched: true,
            flatten_cnames: true,
            verbose: false,
            rewrites: BTreeMap::new(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            tcp_timeout_secs: default_tcp_timeout_secs(),
        }
    }
}

/// Upstream resolver address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Resolver IP address.
    pub ip: IpAddr,

    /// Resolver port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl UpstreamConfig {
    /// Socket address of the resolver.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Container discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Seconds between discovery cycles.
    #[serde(default = "default_scan_frequency_secs")]
    pub scan_frequency_secs: u64,

    /// What to do when two containers claim the same domain.
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Plugins that receive the container list each cycle.
    #[serde(default = "default_plugins")]
    pub plugins: Vec<String>,

    /// Container hosts to poll.
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    /// Settings for the `print_all_labels` plugin.
    #[serde(default)]
    pub print_all_labels: PrintAllLabelsConfig,
}

impl DiscoveryConfig {
    /// Interval between discovery cycles.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_frequency_secs)
    }

    fn validate(&self) -> Result<(), DnsError> {
        if self.scan_frequency_secs == 0 {
            return Err(DnsError::Config(
                "discovery.scan_frequency_secs must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &self.plugins {
            if !plugin::is_registered(name) {
                return Err(DnsError::Config(format!(
                    "there is no plugin registered with the name '{}'",
                    name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(DnsError::Config(format!(
                    "plugin '{}' is listed more than once",
                    name
                )));
            }
        }

        for host in &self.hosts {
            host.validate()?;
        }

        Ok(())
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_frequency_secs: default_scan_frequency_secs(),
            duplicate_policy: DuplicatePolicy::default(),
            plugins: default_plugins(),
            hosts: Vec::new(),
            print_all_labels: PrintAllLabelsConfig::default(),
        }
    }
}

/// `print_all_labels` plugin settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintAllLabelsConfig {
    /// Log only the first cycle.
    #[serde(default = "default_true")]
    pub run_once: bool,
}

impl Default for PrintAllLabelsConfig {
    fn default() -> Self {
        Self { run_once: true }
    }
}

/// One container-runtime host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Short name used in logs and container names.
    pub name: String,

    /// Hostname that CNAME records of this host's containers point at.
    #[serde(default)]
    pub hostname: Option<String>,

    /// When set, containers get A records pointing at this address instead.
    #[serde(default)]
    pub ip_address: Option<Ipv4Addr>,

    /// JSON container listing for this host, re-read every cycle.
    pub containers_file: PathBuf,
}

impl HostConfig {
    /// Resolution target for containers on this host.
    pub fn target(&self) -> String {
        match (&self.ip_address, &self.hostname) {
            (Some(ip), _) => ip.to_string(),
            (None, Some(hostname)) => hostname.clone(),
            (None, None) => self.name.clone(),
        }
    }

    fn validate(&self) -> Result<(), DnsError> {
        if self.name.trim().is_empty() {
            return Err(DnsError::Config("discovery host with an empty name".into()));
        }

        match (&self.hostname, &self.ip_address) {
            (None, None) => Err(DnsError::Config(format!(
                "host '{}' needs a hostname or an ip_address",
                self.name
            ))),
            (Some(hostname), _) if hostname.trim().is_empty() => Err(DnsError::Config(format!(
                "invalid hostname override for host '{}'",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "dns_sync=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    53
}

fn default_listen_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_true() -> bool {
    true
}

fn default_upstream_timeout_ms() -> u64 {
    5000
}

fn default_tcp_timeout_secs() -> u64 {
    120
}

fn default_scan_frequency_secs() -> u64 {
    10
}

fn default_plugins() -> Vec<String> {
    vec![plugin::DNS_SERVER.to_string()]
}
