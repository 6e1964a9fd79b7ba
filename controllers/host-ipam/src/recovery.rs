//! Startup recovery
//!
//! The store is rebuilt empty on every start, so addresses handed out by a
//! previous run only survive in resource statuses. Before the watcher
//! starts, every existing `HostIPAM` is replayed through the allocation
//! controller in two phases: the recorded addresses of all resources are
//! claimed back first, and only then are stale entries released and specs
//! without an address given a fresh one.

use crate::allocation::AllocationController;
use crate::differ::ReconcileDiffer;
use crate::error::ControllerError;
use crate::request::ResourceKey;
use crate::status::{StatusClient, StatusWriter};
use tracing::{debug, error, info};

/// Counters reported once recovery finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub resources: usize,
    pub intents: usize,
    /// Intents that ended in a failure response
    pub failures: usize,
}

/// Replay every existing resource. Only a failure to list is fatal;
/// individual intent or status failures are logged and counted.
pub async fn recover(
    controller: &AllocationController,
    client: &dyn StatusClient,
    writer: &StatusWriter,
    default_namespace: &str,
) -> Result<RecoverySummary, ControllerError> {
    let resources = client.list().await?;
    info!("Recovering {} HostIPAM resources", resources.len());

    let mut summary = RecoverySummary::default();
    let mut replays = Vec::new();
    let mut rest = Vec::new();
    for resource in &resources {
        let key = ResourceKey::from_resource(resource, default_namespace);
        summary.resources += 1;

        let (replay, other): (Vec<_>, Vec<_>) = ReconcileDiffer::recovery_intents(&key, resource)
            .into_iter()
            .partition(|intent| intent.ip_addr.is_some());
        replays.extend(replay);
        rest.extend(other);
    }
    debug!("Recovery: {} replays, {} other intents", replays.len(), rest.len());

    for intent in replays.into_iter().chain(rest) {
        summary.intents += 1;
        let response = controller.handle(intent).await;
        if !response.is_success() {
            summary.failures += 1;
        }
        if let Err(e) = writer.apply(&response).await {
            error!("Failed to write recovered status for {}: {}", response.request.resource, e);
        }
    }

    info!(
        "Recovery complete: {} resources, {} intents, {} failures",
        summary.resources, summary.intents, summary.failures
    );
    Ok(summary)
}
