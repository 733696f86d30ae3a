//! Locally-owned DNS records and the per-generation record table.
//!
//! A [`RecordTable`] is compiled from the container list of one discovery
//! cycle and never mutated afterwards. Updates build a new table and replace
//! the published one as a whole (see [`crate::state::DnsState`]).

use hickory_proto::rr::{LowerName, Name, RecordType};
use hickory_proto::ProtoError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::container::ContainerRecord;

/// Parse a domain as a fully-qualified name.
///
/// Table keys and query names are always fqdn; hickory compares the fqdn flag
/// as part of name equality.
pub fn fqdn(domain: &str) -> Result<Name, ProtoError> {
    let mut name = Name::from_ascii(domain)?;
    name.set_fqdn(true);
    Ok(name)
}

/// How to treat a domain claimed by more than one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Store every claim; all of them contribute answers.
    #[default]
    KeepAll,
    /// Keep the first claim, log and skip later ones.
    FirstWins,
}

/// What a local record resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordTarget {
    /// A record.
    Address(Ipv4Addr),
    /// CNAME record.
    Alias(Name),
}

/// One locally-owned mapping.
#[derive(Debug, Clone)]
pub struct ResolvedRecord {
    /// Domain this record answers for.
    pub domain: LowerName,
    /// Address or alias target.
    pub target: RecordTarget,
    /// Container that registered the record.
    pub container: Arc<ContainerRecord>,
}

impl ResolvedRecord {
    /// Record type served for this mapping.
    pub fn record_type(&self) -> RecordType {
        match self.target {
            RecordTarget::Address(_) => RecordType::A,
            RecordTarget::Alias(_) => RecordType::CNAME,
        }
    }
}

/// Immutable snapshot of every locally-owned record.
#[derive(Debug, Default)]
pub struct RecordTable {
    generation: u64,
    records: HashMap<LowerName, Vec<ResolvedRecord>>,
}

impl RecordTable {
    /// Compile the records requested by `containers`.
    pub fn compile(containers: &[ContainerRecord], policy: DuplicatePolicy) -> Self {
        let mut records: HashMap<LowerName, Vec<ResolvedRecord>> = HashMap::new();
        // domain -> container that first claimed it
        let mut owners: HashMap<LowerName, String> = HashMap::new();

        for container in containers {
            if !container.wants_registration() {
                debug!(container = %container.container_name, "DNS generation is disabled");
                continue;
            }

            let domains = container.domains();
            if domains.is_empty() {
                error!(
                    container = %container.container_name,
                    "container has no domains to register on DNS"
                );
                continue;
            }

            let shared = Arc::new(container.clone());

            for domain in domains {
                if same_name(domain, &container.hostname) {
                    error!(
                        container = %container.container_name,
                        domain,
                        "invalid record: domain and target are the same"
                    );
                    continue;
                }

                let name = match fqdn(domain) {
                    Ok(name) => LowerName::from(name),
                    Err(e) => {
                        warn!(container = %container.container_name, domain, error = %e, "skipping invalid domain");
                        continue;
                    }
                };

                let target = match build_target(container) {
                    Ok(target) => target,
                    Err(reason) => {
                        warn!(
                            container = %container.container_name,
                            domain,
                            target = %container.hostname,
                            reason,
                            "skipping record with invalid target"
                        );
                        continue;
                    }
                };

                if let Some(owner) = owners.get(&name) {
                    if owner != &container.container_name {
                        warn!(
                            container = %container.container_name,
                            domain,
                            owner = %owner,
                            "domain is already registered by another container"
                        );
                        if policy == DuplicatePolicy::FirstWins {
                            continue;
                        }
                    }
                } else {
                    owners.insert(name.clone(), container.container_name.clone());
                }

                records.entry(name.clone()).or_default().push(ResolvedRecord {
                    domain: name,
                    target,
                    container: Arc::clone(&shared),
                });
            }
        }

        debug!(domains = records.len(), "compiled record table");

        Self {
            generation: 0,
            records,
        }
    }

    /// Stamp the table with the generation it is published as.
    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Generation number assigned when the table was published.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Exact-match lookup; never matches parents or children of `name`.
    pub fn lookup(&self, name: &LowerName) -> &[ResolvedRecord] {
        self.records.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of domains with at least one record.
    pub fn domains_count(&self) -> usize {
        self.records.len()
    }

    /// Total number of records across all domains.
    pub fn records_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    /// True when no container registered anything.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn build_target(container: &ContainerRecord) -> Result<RecordTarget, &'static str> {
    if container.use_address_records {
        container
            .hostname
            .parse::<Ipv4Addr>()
            .map(RecordTarget::Address)
            .map_err(|_| "address records need an IPv4 target")
    } else {
        fqdn(&container.hostname)
            .map(RecordTarget::Alias)
            .map_err(|_| "alias target is not a valid domain name")
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}
