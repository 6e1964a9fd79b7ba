//! Intent and result messages exchanged between the pipeline stages.

use crate::error::AllocationError;
use kube::ResourceExt;
use std::fmt;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Identifies the resource an intent was derived from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    /// Key for `namespace/name`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a Kubernetes object, falling back to `default_namespace`
    /// for objects that carry no namespace.
    pub fn from_resource<K: ResourceExt>(resource: &K, default_namespace: &str) -> Self {
        Self {
            namespace: resource
                .namespace()
                .unwrap_or_else(|| default_namespace.to_string()),
            name: resource.name_any(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What an intent asks the pool to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A single Create or Delete intent for one `(host, cidr)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamRequest {
    pub id: Uuid,
    pub resource: ResourceKey,
    pub hostname: String,
    pub cidr: String,
    pub operation: Operation,
    /// Address already recorded for this host; set only on recovery replays
    pub ip_addr: Option<String>,
}

impl IpamRequest {
    /// Create intent with no recorded address
    pub fn create(resource: ResourceKey, hostname: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource,
            hostname: hostname.into(),
            cidr: cidr.into(),
            operation: Operation::Create,
            ip_addr: None,
        }
    }

    /// Create intent that re-claims a previously recorded address
    pub fn replay(
        resource: ResourceKey,
        hostname: impl Into<String>,
        cidr: impl Into<String>,
        ip_addr: impl Into<String>,
    ) -> Self {
        Self {
            ip_addr: Some(ip_addr.into()),
            ..Self::create(resource, hostname, cidr)
        }
    }

    /// Delete intent for `(hostname, cidr)`
    pub fn delete(resource: ResourceKey, hostname: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            operation: Operation::Delete,
            ..Self::create(resource, hostname, cidr)
        }
    }
}

impl fmt::Display for IpamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} in {} for {} ({})",
            self.operation, self.hostname, self.cidr, self.resource, self.id
        )
    }
}

/// Outcome of exactly one [`IpamRequest`].
///
/// `Ok(Some(addr))` is the allocated (Create) or released (Delete) address,
/// `Ok(None)` a Delete for a hostname that held nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamResponse {
    pub request: IpamRequest,
    pub outcome: Result<Option<Ipv4Addr>, AllocationError>,
}

impl IpamResponse {
    /// Successful outcome for `request`
    pub fn success(request: IpamRequest, address: Option<Ipv4Addr>) -> Self {
        Self {
            request,
            outcome: Ok(address),
        }
    }

    /// Failed outcome for `request`
    pub fn failure(request: IpamRequest, error: AllocationError) -> Self {
        Self {
            request,
            outcome: Err(error),
        }
    }

    /// Whether the intent succeeded
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Address on a successful outcome, if any
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.outcome.as_ref().ok().copied().flatten()
    }

    /// Error on a failed outcome
    pub fn error(&self) -> Option<&AllocationError> {
        self.outcome.as_ref().err()
    }
}
