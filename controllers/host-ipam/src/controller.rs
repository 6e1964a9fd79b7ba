//! Main controller implementation.
//!
//! Builds the pipeline at startup and supervises its tasks:
//!
//! ```text
//! Watcher ──requests──▶ AllocationController ──responses──▶ StatusWriter
//! ```
//!
//! Recovery runs to completion before the watcher is started.

use crate::allocation::AllocationController;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::pool::PoolAllocator;
use crate::recovery::recover;
use crate::status::{KubeStatusClient, StatusClient, StatusWriter};
use crate::watcher::Watcher;
use crds::HostIPAM;
use ipam_store::{FileStore, MemoryStore, PersistentStore};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info};

type TaskResult = (&'static str, Result<(), ControllerError>);

/// Main controller for host address management.
pub struct Controller {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<TaskResult>,
    status_writer: JoinHandle<()>,
}

impl Controller {
    /// Creates the pipeline, runs recovery and starts the background tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Host IPAM Controller");

        let kube_client = Client::try_default().await?;

        let store: Arc<dyn PersistentStore> = match &config.store_path {
            Some(path) => {
                info!("Using file store at {}", path.display());
                Arc::new(FileStore::open(path).await?)
            }
            None => {
                info!("Using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let pool = PoolAllocator::from_config(&config.ranges, store, config.store_retry).await?;
        for range in pool.ranges() {
            info!("Range {}: {} addresses available", range, pool.available_count(range).await?);
        }
        let allocation = AllocationController::new(pool, config.binding_policy);

        let status_client: Arc<dyn StatusClient> =
            Arc::new(KubeStatusClient::new(kube_client.clone(), &config.namespace));
        let status_writer = StatusWriter::new(Arc::clone(&status_client));

        recover(&allocation, status_client.as_ref(), &status_writer, &config.namespace).await?;

        let (request_tx, request_rx) = mpsc::channel(config.request_queue_capacity);
        let (response_tx, response_rx) = mpsc::channel(config.response_queue_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let api: Api<HostIPAM> = Api::namespaced(kube_client, &config.namespace);
        let watcher = Watcher::new(api, &config.namespace, request_tx);

        let mut tasks = JoinSet::new();
        let overflow = config.response_overflow;
        let allocation_shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            let result = allocation
                .run(request_rx, response_tx, overflow, allocation_shutdown)
                .await;
            ("allocation controller", result)
        });
        tasks.spawn(async move { ("watcher", watcher.run(shutdown_rx).await) });

        let status_writer = tokio::spawn(status_writer.run(response_rx));

        Ok(Self {
            shutdown,
            tasks,
            status_writer,
        })
    }

    /// Runs until a shutdown signal arrives or a task exits, then stops
    /// the pipeline and lets the status writer drain.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Host IPAM Controller running");

        let first = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received");
                Ok(())
            }
            Some(joined) = self.tasks.join_next() => task_result(joined),
        };

        // Receivers may already be gone
        let _ = self.shutdown.send(true);

        let mut result = first;
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = task_result(joined) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        if let Err(e) = self.status_writer.await {
            error!("Status writer task failed: {}", e);
        }

        info!("Host IPAM Controller stopped");
        result
    }
}

fn task_result(joined: Result<TaskResult, JoinError>) -> Result<(), ControllerError> {
    match joined {
        Ok((name, Ok(()))) => {
            info!("{} stopped", name);
            Ok(())
        }
        Ok((name, Err(e))) => {
            error!("{} failed: {}", name, e);
            Err(e)
        }
        Err(e) => {
            error!("Task failed: {}", e);
            Err(ControllerError::TaskFailed(e.to_string()))
        }
    }
}
