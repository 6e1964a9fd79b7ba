//! Reconcile differ
//!
//! Turns a resource event into the Create/Delete intents needed to move the
//! pool from the previous desired state to the current one.

use crate::request::{IpamRequest, ResourceKey};
use crds::{HostIPAM, HostSpec, IPStatus};
use std::collections::BTreeSet;
use tracing::debug;

/// How a resource changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
}

/// A change to one `HostIPAM` resource, as seen by the watcher.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub key: ResourceKey,
    pub kind: EventKind,
    pub previous: Option<HostIPAM>,
    pub current: Option<HostIPAM>,
}

impl ResourceEvent {
    /// Resource seen for the first time
    pub fn added(key: ResourceKey, current: HostIPAM) -> Self {
        Self {
            key,
            kind: EventKind::Added,
            previous: None,
            current: Some(current),
        }
    }

    /// Resource whose spec changed from `previous` to `current`
    pub fn updated(key: ResourceKey, previous: HostIPAM, current: HostIPAM) -> Self {
        Self {
            key,
            kind: EventKind::Updated,
            previous: Some(previous),
            current: Some(current),
        }
    }

    /// Resource removed; `last_seen` is its final state
    pub fn deleted(key: ResourceKey, last_seen: HostIPAM) -> Self {
        Self {
            key,
            kind: EventKind::Deleted,
            previous: None,
            current: Some(last_seen),
        }
    }
}

/// Stateless mapping from resource events to intents
pub struct ReconcileDiffer;

impl ReconcileDiffer {
    /// Intents for `event`. On Added, recovery replays come first and
    /// stale Deletes precede Creates; otherwise order is not significant.
    pub fn diff(event: &ResourceEvent) -> Vec<IpamRequest> {
        let intents = match (event.kind, &event.previous, &event.current) {
            (EventKind::Deleted, previous, current) => match current.as_ref().or(previous.as_ref()) {
                Some(last_seen) => Self::deleted(&event.key, last_seen),
                None => Vec::new(),
            },
            (EventKind::Updated, Some(previous), Some(current)) => {
                Self::updated(&event.key, previous, current)
            }
            (_, _, Some(current)) => Self::added(&event.key, current),
            (_, _, None) => Vec::new(),
        };

        debug!("{:?} event for {} produced {} intents", event.kind, event.key, intents.len());
        intents
    }

    /// Intents the controller runs for an existing resource at startup
    pub fn recovery_intents(key: &ResourceKey, resource: &HostIPAM) -> Vec<IpamRequest> {
        Self::added(key, resource)
    }

    // Replays every recorded address first so a restart re-claims what was
    // handed out before. Status entries whose spec is gone then get a Delete
    // so their address returns to the pool before any desired spec is
    // created; a host that moved ranges is unbound from the old one first.
    fn added(key: &ResourceKey, current: &HostIPAM) -> Vec<IpamRequest> {
        let desired = spec_set(current);
        let recorded = status_entries(current);

        let replays = recorded.iter().filter_map(|status| {
            status
                .ip
                .as_ref()
                .map(|ip| IpamRequest::replay(key.clone(), &status.host, &status.cidr, ip))
        });
        let creates = desired
            .iter()
            .map(|spec| IpamRequest::create(key.clone(), &spec.host, &spec.cidr));
        let stale = recorded
            .iter()
            .filter(|status| !desired.contains(&HostSpec::new(&status.host, &status.cidr)))
            .map(|status| IpamRequest::delete(key.clone(), &status.host, &status.cidr));

        replays.chain(stale).chain(creates).collect()
    }

    fn updated(key: &ResourceKey, previous: &HostIPAM, current: &HostIPAM) -> Vec<IpamRequest> {
        let before = spec_set(previous);
        let after = spec_set(current);

        let deletes = before
            .difference(&after)
            .map(|spec| IpamRequest::delete(key.clone(), &spec.host, &spec.cidr));
        let creates = after
            .difference(&before)
            .map(|spec| IpamRequest::create(key.clone(), &spec.host, &spec.cidr));

        deletes.chain(creates).collect()
    }

    // Covers specs whose Create has not reached the status yet as well as
    // recorded entries.
    fn deleted(key: &ResourceKey, last_seen: &HostIPAM) -> Vec<IpamRequest> {
        let mut targets = spec_set(last_seen);
        targets.extend(
            status_entries(last_seen)
                .into_iter()
                .map(|status| HostSpec::new(&status.host, &status.cidr)),
        );

        targets
            .into_iter()
            .map(|spec| IpamRequest::delete(key.clone(), spec.host, spec.cidr))
            .collect()
    }
}

fn spec_set(resource: &HostIPAM) -> BTreeSet<HostSpec> {
    resource.spec.host_specs.iter().cloned().collect()
}

// Deduplicated on (host, cidr); the first entry wins
fn status_entries(resource: &HostIPAM) -> Vec<&IPStatus> {
    let mut seen = BTreeSet::new();
    resource
        .status
        .iter()
        .flat_map(|status| status.ip_status.iter())
        .filter(|status| seen.insert((status.host.as_str(), status.cidr.as_str())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Operation;
    use crate::test_utils::{host_ipam, with_status};

    fn key() -> ResourceKey {
        ResourceKey::new("default", "rack-1")
    }

    fn summary(intents: &[IpamRequest]) -> Vec<(Operation, &str, &str, Option<&str>)> {
        intents
            .iter()
            .map(|i| (i.operation, i.hostname.as_str(), i.cidr.as_str(), i.ip_addr.as_deref()))
            .collect()
    }

    #[test]
    fn test_added_collapses_duplicate_specs() {
        let resource = host_ipam("rack-1", &[("h1", "10.0.0.0/24"), ("h1", "10.0.0.0/24")]);
        let intents = ReconcileDiffer::diff(&ResourceEvent::added(key(), resource));

        assert_eq!(summary(&intents), vec![(Operation::Create, "h1", "10.0.0.0/24", None)]);
        assert_eq!(intents[0].resource, key());
    }

    #[test]
    fn test_updated_removed_spec_yields_delete() {
        let previous = host_ipam("rack-1", &[("h1", "10.0.0.0/24")]);
        let current = host_ipam("rack-1", &[]);
        let intents = ReconcileDiffer::diff(&ResourceEvent::updated(key(), previous, current));

        assert_eq!(summary(&intents), vec![(Operation::Delete, "h1", "10.0.0.0/24", None)]);
    }

    #[test]
    fn test_updated_new_spec_yields_create() {
        let previous = host_ipam("rack-1", &[]);
        let current = host_ipam("rack-1", &[("h2", "10.0.1.0/24")]);
        let intents = ReconcileDiffer::diff(&ResourceEvent::updated(key(), previous, current));

        assert_eq!(summary(&intents), vec![(Operation::Create, "h2", "10.0.1.0/24", None)]);
    }

    #[test]
    fn test_updated_unchanged_specs_emit_nothing() {
        let previous = host_ipam("rack-1", &[("h1", "10.0.0.0/24"), ("h2", "10.0.0.0/24")]);
        let current = host_ipam("rack-1", &[("h2", "10.0.0.0/24"), ("h1", "10.0.0.0/24")]);
        assert!(ReconcileDiffer::diff(&ResourceEvent::updated(key(), previous, current)).is_empty());
    }

    #[test]
    fn test_updated_cidr_change_is_delete_plus_create() {
        let previous = host_ipam("rack-1", &[("h1", "10.0.0.0/24")]);
        let current = host_ipam("rack-1", &[("h1", "10.0.1.0/24")]);
        let intents = ReconcileDiffer::diff(&ResourceEvent::updated(key(), previous, current));

        assert_eq!(
            summary(&intents),
            vec![
                (Operation::Delete, "h1", "10.0.0.0/24", None),
                (Operation::Create, "h1", "10.0.1.0/24", None),
            ]
        );
    }

    #[test]
    fn test_updated_without_previous_is_treated_as_added() {
        let event = ResourceEvent {
            key: key(),
            kind: EventKind::Updated,
            previous: None,
            current: Some(host_ipam("rack-1", &[("h1", "10.0.0.0/24")])),
        };
        assert_eq!(
            summary(&ReconcileDiffer::diff(&event)),
            vec![(Operation::Create, "h1", "10.0.0.0/24", None)]
        );
    }

    #[test]
    fn test_added_replays_recorded_addresses_first() {
        let resource = with_status(
            host_ipam("rack-1", &[("h1", "10.0.0.0/24"), ("h2", "10.0.0.0/24")]),
            vec![
                IPStatus::allocated("h1", "10.0.0.0/24", "10.0.0.7"),
                IPStatus::allocated("h1", "10.0.0.0/24", "10.0.0.7"),
            ],
        );
        let intents = ReconcileDiffer::recovery_intents(&key(), &resource);

        assert_eq!(
            summary(&intents),
            vec![
                (Operation::Create, "h1", "10.0.0.0/24", Some("10.0.0.7")),
                (Operation::Create, "h1", "10.0.0.0/24", None),
                (Operation::Create, "h2", "10.0.0.0/24", None),
            ]
        );
    }

    #[test]
    fn test_added_deletes_entries_without_spec() {
        let resource = with_status(
            host_ipam("rack-1", &[]),
            vec![IPStatus::allocated("gone", "10.0.0.0/24", "10.0.0.3")],
        );
        let intents = ReconcileDiffer::diff(&ResourceEvent::added(key(), resource));

        assert_eq!(
            summary(&intents),
            vec![
                (Operation::Create, "gone", "10.0.0.0/24", Some("10.0.0.3")),
                (Operation::Delete, "gone", "10.0.0.0/24", None),
            ]
        );
    }

    #[test]
    fn test_added_releases_moved_host_before_creating() {
        let resource = with_status(
            host_ipam("rack-1", &[("h1", "10.0.1.0/24")]),
            vec![IPStatus::allocated("h1", "10.0.0.0/24", "10.0.0.1")],
        );
        let intents = ReconcileDiffer::recovery_intents(&key(), &resource);

        assert_eq!(
            summary(&intents),
            vec![
                (Operation::Create, "h1", "10.0.0.0/24", Some("10.0.0.1")),
                (Operation::Delete, "h1", "10.0.0.0/24", None),
                (Operation::Create, "h1", "10.0.1.0/24", None),
            ]
        );
    }

    #[test]
    fn test_deleted_releases_recorded_and_declared_hosts() {
        let resource = with_status(
            host_ipam("rack-1", &[("h1", "10.0.0.0/24"), ("h2", "10.0.0.0/24")]),
            vec![IPStatus::allocated("h1", "10.0.0.0/24", "10.0.0.1")],
        );
        let intents = ReconcileDiffer::diff(&ResourceEvent::deleted(key(), resource));

        assert_eq!(
            summary(&intents),
            vec![
                (Operation::Delete, "h1", "10.0.0.0/24", None),
                (Operation::Delete, "h2", "10.0.0.0/24", None),
            ]
        );
    }

    #[test]
    fn test_deleted_falls_back_to_previous_snapshot() {
        let event = ResourceEvent {
            key: key(),
            kind: EventKind::Deleted,
            previous: Some(host_ipam("rack-1", &[("h1", "10.0.0.0/24")])),
            current: None,
        };
        assert_eq!(
            summary(&ReconcileDiffer::diff(&event)),
            vec![(Operation::Delete, "h1", "10.0.0.0/24", None)]
        );
    }
}
