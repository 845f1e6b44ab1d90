//! Main reconciler for workload exposure
//!
//! Wires the watcher, cache and work queue together and runs the worker
//! loops that pull identity keys and drive the sync engine. A sync
//! failure requeues the key with backoff; it never terminates a worker.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::Client;
use kube_runtime::reflector::Store;
use tracing::{debug, error, info, warn};

use crate::controller::queue::WorkQueue;
use crate::controller::resources::ExposureMode;
use crate::controller::sync;
use crate::controller::watcher::{split_key, workload_api, WorkloadWatcher};
use crate::error::{Error, Result};

/// Runtime options for the controller
#[derive(Clone, Debug)]
pub struct ControllerOptions {
    /// Namespace scope; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Exposure mode applied to every workload
    pub mode: ExposureMode,
    /// Number of concurrent reconcile workers
    pub workers: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            mode: ExposureMode::External,
            workers: 1,
        }
    }
}

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    /// Read side of the workload cache, written only by the watcher
    pub store: Store<Deployment>,
    pub mode: ExposureMode,
}

/// The exposure controller: watcher, queue and workers wired together
pub struct ExposeController {
    state: Arc<ControllerState>,
    queue: Arc<WorkQueue<String>>,
    watcher: WorkloadWatcher,
    workers: usize,
}

impl ExposeController {
    /// Wire up the watcher, cache and queue for the configured scope.
    ///
    /// The watcher's handlers are bound to this controller's queue here,
    /// at construction time; nothing is registered globally.
    pub fn new(client: Client, options: ControllerOptions) -> Self {
        let queue = Arc::new(WorkQueue::new());
        let api = workload_api(client.clone(), options.namespace.as_deref());
        let (watcher, store) = WorkloadWatcher::new(api, Arc::clone(&queue));
        let state = Arc::new(ControllerState {
            client,
            store,
            mode: options.mode,
        });

        Self {
            state,
            queue,
            watcher,
            workers: options.workers.max(1),
        }
    }

    /// Run until the process receives SIGINT or the watch stream dies.
    pub async fn run(self) -> Result<()> {
        let ExposeController {
            state,
            queue,
            watcher,
            workers,
        } = self;

        info!("Starting exposure controller");

        let mut watch_task = tokio::spawn(watcher.run());

        // Cold-start barrier: reconciling against a partially populated
        // cache would read absence where the cluster has workloads.
        state
            .store
            .wait_until_ready()
            .await
            .map_err(|_| Error::ConfigError("workload watch ended before initial sync".to_string()))?;
        info!("Workload cache synced, starting {} workers", workers);

        let mut worker_tasks = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let state = Arc::clone(&state);
            worker_tasks.push(tokio::spawn(async move {
                while process_next(&queue, &state).await {}
            }));
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, draining work queue");
            }
            _ = &mut watch_task => {
                warn!("Workload watch task ended, shutting down");
            }
        }

        queue.shut_down();
        for worker in worker_tasks {
            let _ = worker.await;
        }
        watch_task.abort();

        info!("Exposure controller stopped");
        Ok(())
    }
}

/// Process one work item.
///
/// Returns `false` once the queue has shut down and drained, ending the
/// worker loop. Every other outcome, including sync failure, returns
/// `true`: a single bad reconcile must never stop future reconciliation.
pub(crate) async fn process_next(queue: &Arc<WorkQueue<String>>, state: &ControllerState) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    match reconcile_key(state, &key).await {
        Ok(()) => {
            debug!("Reconciled {}", key);
            queue.forget(&key);
        }
        Err(err) if err.is_retryable() => {
            warn!("Error syncing {}, requeueing: {}", key, err);
            queue.requeue_rate_limited(key.clone());
        }
        Err(err) => {
            // Retrying cannot fix a terminal failure; drop the item.
            error!("Dropping work item {}: {}", key, err);
            queue.forget(&key);
        }
    }

    queue.done(&key);
    true
}

/// Split a queue key into its identity and hand it to the sync engine.
pub(crate) async fn reconcile_key(state: &ControllerState, key: &str) -> Result<()> {
    let (namespace, name) = split_key(key)?;
    sync::sync_exposure(state, namespace, name).await
}
