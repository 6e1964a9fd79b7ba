//! Controller-specific error types.
//!
//! `ControllerError` covers failures of the controller itself.
//! `AllocationError` is the failure reason carried inside a response, so
//! every intent resolves to something a status writer can record.

use ipam_store::StoreError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Host IPAM Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Address store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A background task panicked or was cancelled
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// A pipeline channel closed while still in use
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

/// Startup configuration errors. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is not set
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),

    /// Environment variable has an unusable value
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    /// Range configuration produced no usable range
    #[error("no usable address range in '{0}'")]
    NoUsableRanges(String),
}

/// Why an intent could not be satisfied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    /// Known address on the intent is not a valid IPv4 address or lies outside its range
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Range on the intent is not `network/prefix`
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Range is well formed but not part of the configured pool
    #[error("range not in configured pool: {0}")]
    UnknownRange(String),

    /// No Available address left in the range
    #[error("no available addresses in range {0}")]
    PoolExhausted(String),

    /// Known address is already bound to another host
    #[error("address conflict: {0}")]
    AddressConflict(String),

    /// Single-binding policy: the host already holds an address in another range
    #[error("{host} already holds {address} in range {range}")]
    HostAlreadyBound {
        host: String,
        address: std::net::Ipv4Addr,
        range: String,
    },

    /// Store kept failing after retries
    #[error("persistence failure: {0}")]
    Persistence(String),
}
