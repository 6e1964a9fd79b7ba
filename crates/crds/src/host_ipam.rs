//! HostIPAM CRD
//!
//! Declares the hosts that need an address and records what was assigned.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "ipam.hostipam.io",
    version = "v1alpha1",
    kind = "HostIPAM",
    namespaced,
    status = "HostIPAMStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HostIPAMSpec {
    /// Hosts that need an address, each tied to a range
    #[serde(default)]
    pub host_specs: Vec<HostSpec>,
}

/// Desired declaration of a single host.
///
/// Identity is the `(host, cidr)` pair; duplicates in a spec collapse.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct HostSpec {
    /// Hostname to bind
    pub host: String,

    /// Range identifier (e.g. "10.0.0.0/24")
    pub cidr: String,
}

impl HostSpec {
    /// Create a host spec
    pub fn new(host: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            cidr: cidr.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostIPAMStatus {
    /// Recorded bindings, one per (host, cidr)
    #[serde(default)]
    pub ip_status: Vec<IPStatus>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

impl HostIPAMStatus {
    /// Find the entry recorded for `(host, cidr)`
    pub fn entry(&self, host: &str, cidr: &str) -> Option<&IPStatus> {
        self.ip_status
            .iter()
            .find(|s| s.host == host && s.cidr == cidr)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IPStatus {
    /// Hostname
    pub host: String,

    /// Range identifier the address came from
    pub cidr: String,

    /// Assigned address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Allocation state
    #[serde(default)]
    pub state: AllocationState,

    /// Error message if allocation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IPStatus {
    /// Entry for a successfully allocated address
    pub fn allocated(host: impl Into<String>, cidr: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            cidr: cidr.into(),
            ip: Some(ip.into()),
            state: AllocationState::Allocated,
            error: None,
        }
    }
}

/// Per-host allocation state
///
/// Serializes as PascalCase but also accepts lowercase on input.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum AllocationState {
    /// Allocation pending
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// Address allocated
    #[serde(alias = "allocated")]
    Allocated,

    /// Allocation failed
    #[serde(alias = "failed")]
    Failed,
}
