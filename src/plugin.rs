//! Static plugin registry.
//!
//! Plugins receive the full container list once per discovery cycle. The set
//! is closed: each name in [`REGISTRY`] maps to a constructor.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::DiscoveryConfig;
use crate::container::ContainerRecord;
use crate::error::DnsError;
use crate::state::DnsState;

/// Name of the plugin that feeds the DNS server.
pub const DNS_SERVER: &str = "dnsserver";

/// Name of the plugin that logs every tag key seen.
pub const PRINT_ALL_LABELS: &str = "print_all_labels";

type Constructor = fn(&DnsState, &DiscoveryConfig) -> Plugin;

/// Plugin names and their constructors.
pub const REGISTRY: &[(&str, Constructor)] = &[
    (DNS_SERVER, |state, _| Plugin::dns_server(state)),
    (PRINT_ALL_LABELS, |_, discovery| {
        Plugin::print_all_labels(discovery.print_all_labels.run_once)
    }),
];

/// True if `name` is a known plugin.
pub fn is_registered(name: &str) -> bool {
    REGISTRY.iter().any(|(n, _)| *n == name)
}

/// A consumer of the per-cycle container list.
#[derive(Debug)]
pub enum Plugin {
    /// Compiles the list into the record table served over DNS.
    DnsServer {
        /// Table the compiled records are published to.
        state: DnsState,
    },
    /// Logs how often each tag key occurs.
    PrintAllLabels {
        /// Only log on the first cycle.
        run_once: bool,
        /// Whether a cycle has been logged already.
        has_run: bool,
    },
}

impl Plugin {
    /// Plugin publishing to `state`.
    pub fn dns_server(state: &DnsState) -> Self {
        Self::DnsServer {
            state: state.clone(),
        }
    }

    /// Tag-frequency logger.
    pub fn print_all_labels(run_once: bool) -> Self {
        Self::PrintAllLabels {
            run_once,
            has_run: false,
        }
    }

    /// Look up a plugin by its registered name, configured from `discovery`.
    pub fn from_name(
        name: &str,
        state: &DnsState,
        discovery: &DiscoveryConfig,
    ) -> Result<Self, DnsError> {
        REGISTRY
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, build)| build(state, discovery))
            .ok_or_else(|| {
                DnsError::Config(format!(
                    "there is no plugin registered with the name '{}'",
                    name
                ))
            })
    }

    /// Registered name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DnsServer { .. } => DNS_SERVER,
            Self::PrintAllLabels { .. } => PRINT_ALL_LABELS,
        }
    }

    /// Consume one cycle's containers.
    pub fn process_containers(&mut self, containers: &[ContainerRecord]) {
        match self {
            Self::DnsServer { state } => {
                state.update(containers);
            }
            Self::PrintAllLabels { run_once, has_run } => {
                if *run_once && *has_run {
                    return;
                }

                let counts = label_counts(containers);
                if counts.is_empty() {
                    warn!("no container tags seen");
                }

                let mut sorted: Vec<_> = counts.into_iter().collect();
                sorted.sort_by(|a, b| b.1.cmp(&a.1));
                for (label, count) in sorted {
                    info!(label = %label, count, "container tag");
                }

                *has_run = true;
            }
        }
    }
}

fn label_counts(containers: &[ContainerRecord]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for container in containers {
        for key in container.tags.keys() {
            *counts.entry(key.as_str()).or_insert(0) += 1;
        }
    }
    counts
}
