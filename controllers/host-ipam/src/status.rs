//! Status write-back
//!
//! [`StatusWriter`] folds allocation responses into the `status.ipStatus`
//! list of the resource that produced them. Access to the cluster goes
//! through [`StatusClient`] so the writer can run against an in-memory
//! mock in tests.

use crate::error::ControllerError;
use crate::request::{IpamResponse, Operation, ResourceKey};
use async_trait::async_trait;
use chrono::Utc;
use crds::{AllocationState, HostIPAM, HostIPAMStatus, IPStatus};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Read and write access to `HostIPAM` resources
#[async_trait]
pub trait StatusClient: Send + Sync {
    /// Fetch a resource; `None` if it no longer exists
    async fn get(&self, key: &ResourceKey) -> Result<Option<HostIPAM>, ControllerError>;

    /// Replace the status of a resource
    async fn update(&self, key: &ResourceKey, status: HostIPAMStatus) -> Result<HostIPAM, ControllerError>;

    /// Every resource in the watched namespace
    async fn list(&self) -> Result<Vec<HostIPAM>, ControllerError>;
}

/// [`StatusClient`] backed by the Kubernetes API
pub struct KubeStatusClient {
    client: Client,
    namespace: String,
}

impl KubeStatusClient {
    /// Client for `HostIPAM` objects in `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self, namespace: &str) -> Api<HostIPAM> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl StatusClient for KubeStatusClient {
    async fn get(&self, key: &ResourceKey) -> Result<Option<HostIPAM>, ControllerError> {
        Ok(self.api(&key.namespace).get_opt(&key.name).await?)
    }

    async fn update(&self, key: &ResourceKey, status: HostIPAMStatus) -> Result<HostIPAM, ControllerError> {
        // Merge patch replaces the ipStatus array as a whole
        let status_patch = serde_json::json!({
            "status": status
        });

        let pp = PatchParams::default();
        Ok(self
            .api(&key.namespace)
            .patch_status(&key.name, &pp, &Patch::Merge(&status_patch))
            .await?)
    }

    async fn list(&self) -> Result<Vec<HostIPAM>, ControllerError> {
        let list = self.api(&self.namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }
}

/// Folds a response into a status document.
///
/// - Create success: upsert the entry as Allocated
/// - Create failure: mark the entry Failed, keeping any recorded address
/// - Delete: remove the entry
pub fn merge_response(status: &mut HostIPAMStatus, response: &IpamResponse) {
    let request = &response.request;
    let position = status
        .ip_status
        .iter()
        .position(|s| s.host == request.hostname && s.cidr == request.cidr);

    match (request.operation, &response.outcome) {
        (Operation::Delete, _) => {
            if let Some(index) = position {
                status.ip_status.remove(index);
            }
        }
        (Operation::Create, Ok(Some(address))) => {
            let entry = IPStatus::allocated(&request.hostname, &request.cidr, address.to_string());
            match position {
                Some(index) => status.ip_status[index] = entry,
                None => status.ip_status.push(entry),
            }
        }
        (Operation::Create, Ok(None)) => {
            warn!("Create for {} succeeded without an address; status unchanged", request.hostname);
        }
        (Operation::Create, Err(e)) => {
            let ip = position.and_then(|index| status.ip_status[index].ip.clone());
            let entry = IPStatus {
                host: request.hostname.clone(),
                cidr: request.cidr.clone(),
                ip,
                state: AllocationState::Failed,
                error: Some(e.to_string()),
            };
            match position {
                Some(index) => status.ip_status[index] = entry,
                None => status.ip_status.push(entry),
            }
        }
    }
}

/// Single consumer of the response queue
pub struct StatusWriter {
    client: Arc<dyn StatusClient>,
}

impl StatusWriter {
    /// Writer backed by `client`
    pub fn new(client: Arc<dyn StatusClient>) -> Self {
        Self { client }
    }

    /// Read-modify-write the status of the response's resource.
    ///
    /// A resource that no longer exists is skipped.
    pub async fn apply(&self, response: &IpamResponse) -> Result<(), ControllerError> {
        let key = &response.request.resource;

        let Some(resource) = self.client.get(key).await? else {
            debug!("HostIPAM {} not found; dropping status for {}", key, response.request);
            return Ok(());
        };

        let mut status = resource.status.unwrap_or_default();
        merge_response(&mut status, response);
        status.last_reconciled = Some(Utc::now());

        self.client.update(key, status).await?;
        Ok(())
    }

    /// Drain `responses` until every sender is gone
    pub async fn run(self, mut responses: mpsc::Receiver<IpamResponse>) {
        info!("Status writer running");

        while let Some(response) = responses.recv().await {
            if let Err(e) = self.apply(&response).await {
                error!(
                    "Failed to write status for {} ({}): {}",
                    response.request.resource, response.request, e
                );
            }
        }

        info!("Response queue closed; status writer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AllocationError;
    use crate::request::IpamRequest;
    use crate::test_utils::{MockStatusClient, host_ipam, with_status};
    use std::net::Ipv4Addr;

    fn key() -> ResourceKey {
        ResourceKey::new("default", "rack-1")
    }

    fn allocated(host: &str, last: u8) -> IpamResponse {
        IpamResponse::success(
            IpamRequest::create(key(), host, "10.0.0.0/24"),
            Some(Ipv4Addr::new(10, 0, 0, last)),
        )
    }

    #[test]
    fn test_merge_upserts_allocated_entry() {
        let mut status = HostIPAMStatus::default();

        merge_response(&mut status, &allocated("h1", 1));
        merge_response(&mut status, &allocated("h1", 1));

        assert_eq!(status.ip_status, vec![IPStatus::allocated("h1", "10.0.0.0/24", "10.0.0.1")]);
    }

    #[test]
    fn test_merge_failure_keeps_recorded_address() {
        let mut status = HostIPAMStatus {
            ip_status: vec![IPStatus::allocated("h1", "10.0.0.0/24", "10.0.0.1")],
            last_reconciled: None,
        };
        let failed = IpamResponse::failure(
            IpamRequest::replay(key(), "h1", "10.0.0.0/24", "10.0.0.1"),
            AllocationError::AddressConflict("10.0.0.1 is bound to h2".to_string()),
        );

        merge_response(&mut status, &failed);

        let entry = status.entry("h1", "10.0.0.0/24").unwrap();
        assert_eq!(entry.state, AllocationState::Failed);
        assert_eq!(entry.ip.as_deref(), Some("10.0.0.1"));
        assert!(entry.error.as_deref().unwrap().contains("bound to h2"));
    }

    #[test]
    fn test_merge_failure_without_entry_records_error() {
        let mut status = HostIPAMStatus::default();
        let failed = IpamResponse::failure(
            IpamRequest::create(key(), "h1", "10.0.0.0/24"),
            AllocationError::PoolExhausted("10.0.0.0/24".to_string()),
        );

        merge_response(&mut status, &failed);

        assert_eq!(status.ip_status.len(), 1);
        assert_eq!(status.ip_status[0].ip, None);
        assert_eq!(status.ip_status[0].state, AllocationState::Failed);
    }

    #[test]
    fn test_merge_delete_removes_entry() {
        let mut status = HostIPAMStatus {
            ip_status: vec![
                IPStatus::allocated("h1", "10.0.0.0/24", "10.0.0.1"),
                IPStatus::allocated("h2", "10.0.0.0/24", "10.0.0.2"),
            ],
            last_reconciled: None,
        };

        merge_response(
            &mut status,
            &IpamResponse::success(IpamRequest::delete(key(), "h1", "10.0.0.0/24"), None),
        );

        assert_eq!(status.ip_status, vec![IPStatus::allocated("h2", "10.0.0.0/24", "10.0.0.2")]);
    }

    #[tokio::test]
    async fn test_apply_writes_status_and_timestamp() {
        let client = Arc::new(MockStatusClient::new());
        client.insert(host_ipam("rack-1", &[("h1", "10.0.0.0/24")]));
        let writer = StatusWriter::new(client.clone());

        writer.apply(&allocated("h1", 7)).await.unwrap();

        let status = client.status(&key()).unwrap();
        assert_eq!(status.entry("h1", "10.0.0.0/24").unwrap().ip.as_deref(), Some("10.0.0.7"));
        assert!(status.last_reconciled.is_some());
    }

    #[tokio::test]
    async fn test_apply_skips_missing_resource() {
        let client = Arc::new(MockStatusClient::new());
        let writer = StatusWriter::new(client.clone());

        writer.apply(&allocated("h1", 7)).await.unwrap();

        assert_eq!(client.update_count(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_until_queue_closes() {
        let client = Arc::new(MockStatusClient::new());
        client.insert(with_status(
            host_ipam("rack-1", &[("h2", "10.0.0.0/24")]),
            vec![IPStatus::allocated("h1", "10.0.0.0/24", "10.0.0.1")],
        ));
        let writer = StatusWriter::new(client.clone());

        let (tx, rx) = mpsc::channel(4);
        tx.send(IpamResponse::success(
            IpamRequest::delete(key(), "h1", "10.0.0.0/24"),
            Some(Ipv4Addr::new(10, 0, 0, 1)),
        ))
        .await
        .unwrap();
        tx.send(allocated("h2", 2)).await.unwrap();
        drop(tx);

        writer.run(rx).await;

        let status = client.status(&key()).unwrap();
        assert_eq!(status.ip_status, vec![IPStatus::allocated("h2", "10.0.0.0/24", "10.0.0.2")]);
        assert_eq!(client.update_count(), 2);
    }
}
