//! Kubernetes resource watcher.
//!
//! Watches `HostIPAM` resources, turns the raw watch stream into
//! Added/Updated/Deleted events and feeds the resulting intents into the
//! request queue.

use crate::backoff::FibonacciBackoff;
use crate::differ::{ReconcileDiffer, ResourceEvent};
use crate::error::ControllerError;
use crate::request::{IpamRequest, ResourceKey};
use crds::HostIPAM;
use futures::StreamExt;
use kube::Api;
use kube_runtime::watcher;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Remembers the last seen version of every resource so each watch event
/// can be classified.
#[derive(Debug, Default)]
pub struct EventTracker {
    default_namespace: String,
    cache: HashMap<ResourceKey, HostIPAM>,
    // Keys seen since the last Init; `None` outside a relist
    relisted: Option<HashSet<ResourceKey>>,
}

impl EventTracker {
    /// Empty tracker; keys without a namespace use `default_namespace`
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            ..Self::default()
        }
    }

    /// Classify one raw watch event.
    ///
    /// Updates that leave the spec untouched (such as status writes) yield
    /// nothing. After a relist, resources that did not come back are
    /// reported as deleted.
    pub fn observe(&mut self, event: watcher::Event<HostIPAM>) -> Vec<ResourceEvent> {
        match event {
            watcher::Event::Init => {
                debug!("HostIPAM watcher relisting");
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(resource) => {
                let key = self.key(&resource);
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(key.clone());
                }
                self.applied(key, resource).into_iter().collect()
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<ResourceKey> = self
                    .cache
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|key| {
                        let last_seen = self.cache.remove(&key)?;
                        info!("HostIPAM {} disappeared while disconnected", key);
                        Some(ResourceEvent::deleted(key, last_seen))
                    })
                    .collect()
            }
            watcher::Event::Apply(resource) => {
                let key = self.key(&resource);
                self.applied(key, resource).into_iter().collect()
            }
            watcher::Event::Delete(resource) => {
                let key = self.key(&resource);
                self.cache.remove(&key);
                info!("HostIPAM deleted: {}", key);
                vec![ResourceEvent::deleted(key, resource)]
            }
        }
    }

    fn applied(&mut self, key: ResourceKey, resource: HostIPAM) -> Option<ResourceEvent> {
        match self.cache.insert(key.clone(), resource.clone()) {
            None => {
                info!("HostIPAM added: {}", key);
                Some(ResourceEvent::added(key, resource))
            }
            Some(previous) if previous.spec == resource.spec => {
                debug!("HostIPAM {} changed without a spec change", key);
                None
            }
            Some(previous) => {
                info!("HostIPAM updated: {}", key);
                Some(ResourceEvent::updated(key, previous, resource))
            }
        }
    }

    fn key(&self, resource: &HostIPAM) -> ResourceKey {
        ResourceKey::from_resource(resource, &self.default_namespace)
    }
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    api: Api<HostIPAM>,
    tracker: EventTracker,
    requests: mpsc::Sender<IpamRequest>,
}

impl Watcher {
    /// Watcher that feeds intents into `requests`
    pub fn new(api: Api<HostIPAM>, namespace: &str, requests: mpsc::Sender<IpamRequest>) -> Self {
        Self {
            api,
            tracker: EventTracker::new(namespace),
            requests,
        }
    }

    /// Runs until the shutdown signal fires.
    ///
    /// Stream errors are retried with backoff; the watch itself re-lists
    /// on the next poll.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        info!("Starting HostIPAM watcher");

        let mut stream = Box::pin(watcher(self.api.clone(), watcher::Config::default()));
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(30));

        'watch: loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    backoff.reset();
                    for event in self.tracker.observe(event) {
                        if let Err(e) = self.dispatch(&event).await {
                            // The allocation loop drops its queue on shutdown
                            if *shutdown.borrow() {
                                break 'watch;
                            }
                            return Err(e);
                        }
                    }
                }
                Some(Err(e)) => {
                    let delay = backoff.next_backoff();
                    warn!("HostIPAM watch error: {}; retrying in {:?}", e, delay);
                    tokio::select! {
                        biased;
                        _ = shutdown.wait_for(|stop| *stop) => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    return Err(ControllerError::Watch("HostIPAM watch stream ended".to_string()));
                }
            }
        }

        info!("HostIPAM watcher stopped");
        Ok(())
    }

    async fn dispatch(&self, event: &ResourceEvent) -> Result<(), ControllerError> {
        for intent in ReconcileDiffer::diff(event) {
            self.requests
                .send(intent)
                .await
                .map_err(|_| ControllerError::ChannelClosed("request queue".to_string()))?;
        }
        Ok(())
    }
}
