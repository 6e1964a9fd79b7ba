//! Controller configuration, loaded from environment variables.

use crate::backoff::RetryPolicy;
use crate::error::ConfigError;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// A policy name that matches none of the accepted spellings
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}', expected one of: {expected}")]
pub struct UnknownOption {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl UnknownOption {
    fn new(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

/// How many bindings a hostname may hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BindingPolicy {
    /// One binding per hostname across all ranges
    #[default]
    SinglePerHost,
    /// One binding per `(hostname, range)` pair
    PerRange,
}

impl FromStr for BindingPolicy {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" | "single-per-host" => Ok(Self::SinglePerHost),
            "per-range" => Ok(Self::PerRange),
            _ => Err(UnknownOption::new("binding policy", s, "single, per-range")),
        }
    }
}

impl fmt::Display for BindingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SinglePerHost => write!(f, "single"),
            Self::PerRange => write!(f, "per-range"),
        }
    }
}

/// What the allocation loop does when the response queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseOverflow {
    /// Wait for the status writer to make room
    #[default]
    Backpressure,
    /// Log and discard the response
    DropNewest,
}

impl FromStr for ResponseOverflow {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backpressure" | "block" => Ok(Self::Backpressure),
            "drop" | "drop-newest" => Ok(Self::DropNewest),
            _ => Err(UnknownOption::new("overflow policy", s, "backpressure, drop")),
        }
    }
}

impl fmt::Display for ResponseOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backpressure => write!(f, "backpressure"),
            Self::DropNewest => write!(f, "drop"),
        }
    }
}

/// Everything the controller reads from its environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Range expression list, e.g. `10.0.0.10/24-10.0.0.20/24`
    pub ranges: String,
    pub namespace: String,
    pub binding_policy: BindingPolicy,
    /// Snapshot file for the file-backed store; in-memory when unset
    pub store_path: Option<PathBuf>,
    pub request_queue_capacity: usize,
    pub response_queue_capacity: usize,
    pub response_overflow: ResponseOverflow,
    pub store_retry: RetryPolicy,
}

impl ControllerConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let ranges = var("IPAM_RANGE").ok_or(ConfigError::MissingVar("IPAM_RANGE"))?;
        let namespace = var("WATCH_NAMESPACE").unwrap_or_else(|| "default".to_string());
        let binding_policy = parse_or_default(var("IPAM_BINDING_POLICY"), "IPAM_BINDING_POLICY")?;
        let store_path = var("IPAM_STORE_PATH").map(PathBuf::from);
        let request_queue_capacity =
            parse_capacity(var("IPAM_REQUEST_QUEUE_CAPACITY"), "IPAM_REQUEST_QUEUE_CAPACITY")?;
        let response_queue_capacity =
            parse_capacity(var("IPAM_RESPONSE_QUEUE_CAPACITY"), "IPAM_RESPONSE_QUEUE_CAPACITY")?;
        let response_overflow = parse_or_default(var("IPAM_RESPONSE_OVERFLOW"), "IPAM_RESPONSE_OVERFLOW")?;

        let max_attempts = match var("IPAM_STORE_MAX_RETRIES") {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidValue {
                    name: "IPAM_STORE_MAX_RETRIES",
                    value,
                })?,
            None => RetryPolicy::default().max_attempts,
        };

        Ok(Self {
            ranges,
            namespace,
            binding_policy,
            store_path,
            request_queue_capacity,
            response_queue_capacity,
            response_overflow,
            store_retry: RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
        })
    }
}

const DEFAULT_QUEUE_CAPACITY: usize = 256;

fn parse_or_default<T>(value: Option<String>, name: &'static str) -> Result<T, ConfigError>
where
    T: FromStr<Err = UnknownOption> + Default,
{
    match value {
        Some(value) => value.parse().map_err(|e: UnknownOption| {
            warn!("{}: {}", name, e);
            ConfigError::InvalidValue { name, value }
        }),
        None => Ok(T::default()),
    }
}

// tokio's bounded channels panic on a zero capacity
fn parse_capacity(value: Option<String>, name: &'static str) -> Result<usize, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::InvalidValue { name, value }),
        None => Ok(DEFAULT_QUEUE_CAPACITY),
    }
}
