//! Metrics instrumentation for dns-sync.
//!
//! All metrics are prefixed with `dns_sync.`

use hickory_proto::op::ResponseCode;
use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::engine::Outcome;

/// Result label of a query: `local`, `forwarded`, `nxdomain`, `servfail`
/// or `ipv6_suppressed`. Any path that ends without answers is `nxdomain`.
pub fn query_result(outcome: Outcome, response_code: ResponseCode) -> &'static str {
    match (outcome, response_code) {
        (Outcome::Unsupported, _) => "servfail",
        (Outcome::Ipv6Suppressed, _) => "ipv6_suppressed",
        (_, ResponseCode::NXDomain) | (Outcome::Unmatched, _) => "nxdomain",
        (Outcome::Local, _) => "local",
        (Outcome::Forwarded, _) => "forwarded",
    }
}

/// Record a DNS query.
pub fn record_query(
    record_type: &str,
    outcome: Outcome,
    response_code: ResponseCode,
    duration: std::time::Duration,
) {
    let result = query_result(outcome, response_code);

    counter!("dns_sync.query.count", "type" => record_type.to_string(), "result" => result)
        .increment(1);
    histogram!("dns_sync.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Result of one upstream exchange.
#[derive(Debug, Clone, Copy)]
pub enum ForwardResult {
    /// Upstream returned at least one answer.
    Answered,
    /// Upstream responded without answers.
    Empty,
    /// Transport failure or timeout.
    Error,
}

/// Record an upstream exchange.
pub fn record_forward(result: ForwardResult) {
    let result_str = match result {
        ForwardResult::Answered => "answered",
        ForwardResult::Empty => "empty",
        ForwardResult::Error => "error",
    };

    counter!("dns_sync.forward.count", "result" => result_str).increment(1);
}

/// Record a record table swap.
pub fn record_table_swap(domains: usize, records: usize) {
    counter!("dns_sync.table.swap.count").increment(1);
    record_state_counts(domains, records);
}

/// Record state counts (call periodically or on change).
pub fn record_state_counts(domains: usize, records: usize) {
    gauge!("dns_sync.state.domains.count").set(domains as f64);
    gauge!("dns_sync.state.records.count").set(records as f64);
}

/// Record the generation of the published table.
pub fn record_generation(generation: u64) {
    gauge!("dns_sync.state.generation").set(generation as f64);
}

/// Record a discovery cycle.
pub fn record_discovery_cycle(containers: usize, duration: std::time::Duration) {
    counter!("dns_sync.discovery.cycle.count").increment(1);
    gauge!("dns_sync.discovery.containers.count").set(containers as f64);
    histogram!("dns_sync.discovery.duration.seconds").record(duration.as_secs_f64());
}

/// Record a host whose containers could not be fetched.
pub fn record_discovery_host_error(host: &str) {
    counter!("dns_sync.discovery.host_error.count", "host" => host.to_string()).increment(1);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
