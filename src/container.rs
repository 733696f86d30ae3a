//! Container records produced by the discovery feed.
//!
//! A [`ContainerRecord`] is created fresh every discovery cycle and only ever
//! read afterwards. Tags carry the `dns-sync.` prefix stripped, so
//! `dns-sync.dns.domains` is looked up as `dns.domains`.

use std::collections::BTreeMap;
use std::fmt;

/// Tag keys that can disable registration on the DNS server.
pub const REGISTER_KEYS: &[&str] = &["dnsserver.register", "dns.register", "register_on_dns"];

/// Tag keys holding the comma-separated domain list.
pub const DOMAINS_KEYS: &[&str] = &["dnsserver.domains", "dns.domains", "domains"];

/// Tag key holding a human-readable description.
pub const DESCRIPTION_KEY: &str = "description";

/// One container as seen by a discovery cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRecord {
    /// `<host>/<container>` name, for logs.
    pub container_name: String,
    /// Name of the host the container runs on.
    pub host: String,
    /// Hostname or IPv4 literal the container's domains resolve to.
    pub hostname: String,
    /// Running and opted in via `dns-sync.enable=true`.
    pub is_active: bool,
    /// Emit A records (true) or CNAME records (false).
    pub use_address_records: bool,
    /// Tags with the `dns-sync.` prefix removed.
    pub tags: BTreeMap<String, String>,
}

impl ContainerRecord {
    /// First tag value found among `keys`, in order.
    pub fn tag(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|key| self.tags.get(*key))
            .map(String::as_str)
    }

    /// Tag interpreted as a boolean; unparseable or missing values yield `default`.
    pub fn tag_as_bool(&self, keys: &[&str], default: bool) -> bool {
        match self.tag(keys).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            _ => default,
        }
    }

    /// Whether this container should contribute DNS records.
    pub fn wants_registration(&self) -> bool {
        self.is_active && self.tag_as_bool(REGISTER_KEYS, true)
    }

    /// Domains requested by this container, trimmed, empty entries dropped.
    pub fn domains(&self) -> Vec<&str> {
        self.tag(DOMAINS_KEYS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Description tag, falling back to the raw domain list.
    pub fn description(&self) -> &str {
        self.tag(&[DESCRIPTION_KEY])
            .or_else(|| self.tag(DOMAINS_KEYS))
            .unwrap_or("")
    }
}

impl fmt::Display for ContainerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.container_name, self.hostname)
    }
}
