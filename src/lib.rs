//! dns-sync - A forwarding DNS front that serves records derived from container labels.
//!
//! Containers running on one or more hosts declare the domains they answer for
//! through `dns-sync.*` labels. A discovery loop polls every host on a fixed
//! interval, compiles the full container list into a record table and swaps it
//! in atomically. The DNS server answers from that table and forwards
//! everything else to an upstream resolver, optionally rewriting names first.
//!
//! ## Features
//!
//! - A records for hosts with a known IPv4 address, CNAMEs otherwise
//! - Optional CNAME flattening through the upstream resolver
//! - Suffix-based name rewrites for unmatched queries
//! - IPv6 suppression: every AAAA question gets an empty answer
//! - Graceful shutdown support
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          dns-sync                               │
//! │                                                                 │
//! │  ┌──────────────────┐    ┌──────────────────┐                  │
//! │  │ Discovery loop   │───▶│  DNS State       │                  │
//! │  │ (per-host feeds) │    │  (ArcSwap table) │                  │
//! │  └──────────────────┘    └────────┬─────────┘                  │
//! │         │                         │ snapshot per query          │
//! │         │ plugins:                ▼                             │
//! │         │ - dnsserver        ┌──────────────────┐              │
//! │         │ - print_all_labels │  Query engine    │◀── UDP/TCP   │
//! │         │                    │  + Hickory server│    :53       │
//! │         │                    └────────┬─────────┘              │
//! │         │                             │ forward / rewrite      │
//! │         │                             ▼                        │
//! │         │                    ┌──────────────────┐              │
//! │         │                    │ Upstream resolver│              │
//! │         │                    └──────────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! web.lan A?
//!   → local table hit, host has an IPv4   → A 10.0.0.5 (TTL 60)
//!   → local table hit, host has a name    → CNAME nas.lan, flattened upstream
//!   → no hit, rewrite web.lan → web.corp  → upstream answers for web.corp
//!   → no hit, no rewrite                  → upstream, or NXDOMAIN
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use dns_sync::{Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = load_config();
//!     config.validate().unwrap();
//!
//!     let shutdown = CancellationToken::new();
//!     let server = DnsServer::new(config);
//!     server.run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod container;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod forwarder;
pub mod handler;
pub mod metrics;
pub mod plugin;
pub mod records;
pub mod rewrite;
pub mod server;
pub mod state;
pub mod telemetry;

// Re-export main types
pub use config::{Config, DiscoveryConfig, DnsConfig, HostConfig, TelemetryConfig, UpstreamConfig};
pub use container::ContainerRecord;
pub use engine::{EngineOptions, QueryEngine};
pub use error::DnsError;
pub use handler::SyncRequestHandler;
pub use records::{DuplicatePolicy, RecordTable};
pub use server::DnsServer;
pub use state::DnsState;
