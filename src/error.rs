//! Error types for dns-sync.

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Container listing could not be decoded
    #[error("Container listing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Failed to parse address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Upstream resolver answered with something unusable
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Upstream resolver did not answer in time
    #[error("Upstream timed out: {0}")]
    Timeout(String),
}
