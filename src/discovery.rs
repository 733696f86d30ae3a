//! Container discovery feed.
//!
//! Every `scan_frequency_secs` the loop asks each configured host for its
//! containers, concatenates the results and hands the full list to every
//! plugin. A host that fails contributes nothing for that cycle; the others
//! are unaffected.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::container::ContainerRecord;
use crate::error::DnsError;
use crate::metrics::{self, Timer};
use crate::plugin::Plugin;

/// Prefix of the labels this system reads.
pub const LABEL_PREFIX: &str = "dns-sync.";

/// Label that opts a container in.
pub const ENABLE_LABEL: &str = "dns-sync.enable";

/// A host that can list its containers.
#[async_trait]
pub trait ContainerSource: Send + Sync {
    /// Host name, for logs.
    fn host(&self) -> &str;

    /// Current containers on this host.
    async fn fetch(&self) -> Result<Vec<ContainerRecord>, DnsError>;
}

/// One entry of a container runtime listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerListing {
    /// Container name, optionally with a leading `/`.
    pub name: String,
    /// Runtime state, e.g. `running` or `exited`.
    #[serde(default)]
    pub state: String,
    /// All container labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Reads a JSON container listing from a file every cycle.
#[derive(Debug, Clone)]
pub struct FileContainerSource {
    host: HostConfig,
}

impl FileContainerSource {
    /// Create a source for `host`.
    pub fn new(host: HostConfig) -> Self {
        Self { host }
    }

    /// Listing file path.
    pub fn path(&self) -> &PathBuf {
        &self.host.containers_file
    }
}

#[async_trait]
impl ContainerSource for FileContainerSource {
    fn host(&self) -> &str {
        &self.host.name
    }

    async fn fetch(&self) -> Result<Vec<ContainerRecord>, DnsError> {
        let raw = tokio::fs::read(&self.host.containers_file).await?;
        let listing: Vec<ContainerListing> = serde_json::from_slice(&raw)?;

        Ok(listing
            .into_iter()
            .filter_map(|c| container_record(&self.host, c))
            .collect())
    }
}

/// Translate a listing entry; containers without any `dns-sync.` label are ignored.
pub fn container_record(host: &HostConfig, listing: ContainerListing) -> Option<ContainerRecord> {
    let tags: BTreeMap<String, String> = listing
        .labels
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(LABEL_PREFIX)
                .map(|key| (key.to_string(), v.clone()))
        })
        .collect();

    if tags.is_empty() {
        return None;
    }

    let enabled = listing
        .labels
        .get(ENABLE_LABEL)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

    Some(ContainerRecord {
        container_name: format!("{}/{}", host.name, listing.name.trim_start_matches('/')),
        host: host.name.clone(),
        hostname: host.target(),
        is_active: listing.state == "running" && enabled,
        use_address_records: host.ip_address.is_some(),
        tags,
    })
}

/// Fixed-interval discovery cycle.
pub struct DiscoveryLoop {
    sources: Vec<Arc<dyn ContainerSource>>,
    plugins: Vec<Plugin>,
    interval: Duration,
}

impl DiscoveryLoop {
    /// Create a loop polling `sources` every `interval`.
    pub fn new(sources: Vec<Arc<dyn ContainerSource>>, plugins: Vec<Plugin>, interval: Duration) -> Self {
        Self {
            sources,
            plugins,
            interval,
        }
    }

    /// Build file-backed sources for every configured host.
    pub fn file_sources(hosts: &[HostConfig]) -> Vec<Arc<dyn ContainerSource>> {
        hosts
            .iter()
            .map(|h| Arc::new(FileContainerSource::new(h.clone())) as Arc<dyn ContainerSource>)
            .collect()
    }

    /// Fetch all hosts concurrently, isolating failures per host.
    pub async fn collect(&self) -> Vec<ContainerRecord> {
        let results = join_all(self.sources.iter().map(|source| async move {
            debug!(host = source.host(), "fetching containers");
            match source.fetch().await {
                Ok(containers) => {
                    for c in &containers {
                        debug!(container = %c.container_name, enabled = c.is_active, "found container");
                    }
                    containers
                }
                Err(e) => {
                    warn!(host = source.host(), error = %e, "error while fetching containers");
                    metrics::record_discovery_host_error(source.host());
                    Vec::new()
                }
            }
        }))
        .await;

        results.into_iter().flatten().collect()
    }

    /// Run one cycle: collect, then feed every plugin. Returns the container count.
    pub async fn run_once(&mut self) -> usize {
        let timer = Timer::start();
        let containers = self.collect().await;

        for plugin in &mut self.plugins {
            debug!(plugin = plugin.name(), "processing containers");
            plugin.process_containers(&containers);
        }

        metrics::record_discovery_cycle(containers.len(), timer.elapsed());
        containers.len()
    }

    /// Run cycles until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            hosts = self.sources.len(),
            plugins = self.plugins.len(),
            interval_secs = self.interval.as_secs(),
            "discovery loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let count = self.run_once().await;
                    debug!(containers = count, "discovery cycle complete");
                }
                _ = shutdown.cancelled() => {
                    debug!("discovery loop shutting down");
                    return;
                }
            }
        }
    }
}
