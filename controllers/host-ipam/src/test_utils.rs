//! Test utilities
//!
//! Builders for `HostIPAM` objects and an in-memory [`StatusClient`].

use crate::error::ControllerError;
use crate::request::ResourceKey;
use crate::status::StatusClient;
use async_trait::async_trait;
use crds::{HostIPAM, HostIPAMSpec, HostIPAMStatus, HostSpec, IPStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const TEST_NAMESPACE: &str = "default";

/// `HostIPAM` in the test namespace with the given `(host, cidr)` specs
pub fn host_ipam(name: &str, specs: &[(&str, &str)]) -> HostIPAM {
    HostIPAM {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: HostIPAMSpec {
            host_specs: specs.iter().map(|(host, cidr)| HostSpec::new(*host, *cidr)).collect(),
        },
        status: None,
    }
}

pub fn with_status(mut resource: HostIPAM, entries: Vec<IPStatus>) -> HostIPAM {
    resource.status = Some(HostIPAMStatus {
        ip_status: entries,
        last_reconciled: None,
    });
    resource
}

/// In-memory stand-in for the Kubernetes API
#[derive(Debug, Default)]
pub struct MockStatusClient {
    resources: Mutex<HashMap<ResourceKey, HostIPAM>>,
    updates: AtomicUsize,
}

impl MockStatusClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: HostIPAM) {
        let key = ResourceKey::from_resource(&resource, TEST_NAMESPACE);
        self.resources.lock().unwrap().insert(key, resource);
    }

    pub fn status(&self, key: &ResourceKey) -> Option<HostIPAMStatus> {
        self.resources
            .lock()
            .unwrap()
            .get(key)
            .and_then(|r| r.status.clone())
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusClient for MockStatusClient {
    async fn get(&self, key: &ResourceKey) -> Result<Option<HostIPAM>, ControllerError> {
        Ok(self.resources.lock().unwrap().get(key).cloned())
    }

    async fn update(&self, key: &ResourceKey, status: HostIPAMStatus) -> Result<HostIPAM, ControllerError> {
        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(key)
            .ok_or_else(|| ControllerError::NotFound(format!("HostIPAM {}", key)))?;
        resource.status = Some(status);
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(resource.clone())
    }

    async fn list(&self) -> Result<Vec<HostIPAM>, ControllerError> {
        let mut resources: Vec<HostIPAM> = self.resources.lock().unwrap().values().cloned().collect();
        resources.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(resources)
    }
}
