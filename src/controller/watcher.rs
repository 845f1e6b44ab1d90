//! Workload event watcher
//!
//! Maintains a reflector-backed cache of Deployment workloads and feeds
//! identity keys into the work queue on every add or delete notification.
//! No filtering or diffing happens here: the sync engine recomputes
//! desired state from scratch, so redundant enqueues are harmless.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{reflector, store, Store};
use kube_runtime::watcher::{watcher, Config, Event};
use kube_runtime::WatchStreamExt;
use tracing::{debug, warn};

use crate::controller::queue::WorkQueue;
use crate::error::{Error, Result};

/// Cache and queue key for a workload: `namespace/name`.
pub fn workload_key(workload: &Deployment) -> String {
    format!(
        "{}/{}",
        workload.namespace().unwrap_or_default(),
        workload.name_any()
    )
}

/// Split a queue key back into its namespace and name halves.
///
/// Keys carry no payload, so this is the only parsing a work item needs.
/// Anything that does not split into two non-empty segments is malformed
/// and terminal for that item.
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('/') {
        Some((namespace, name))
            if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((namespace, name))
        }
        _ => Err(Error::MalformedKey(key.to_string())),
    }
}

/// Build the workload Api for the configured scope.
pub fn workload_api(client: Client, namespace: Option<&str>) -> Api<Deployment> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Watches Deployment workloads and enqueues their identities.
///
/// The queue handle is bound at construction time; `new` also hands back
/// the read side of the cache, whose `wait_until_ready` gates the first
/// reconcile.
pub struct WorkloadWatcher {
    api: Api<Deployment>,
    writer: Writer<Deployment>,
    queue: Arc<WorkQueue<String>>,
}

impl WorkloadWatcher {
    pub fn new(
        api: Api<Deployment>,
        queue: Arc<WorkQueue<String>>,
    ) -> (Self, Store<Deployment>) {
        let (reader, writer) = store();
        (Self { api, writer, queue }, reader)
    }

    /// Drive the watch stream until it terminates.
    ///
    /// Watch errors are logged and the stream resumes with backoff; they
    /// never propagate into the reconcile path.
    pub async fn run(self) {
        let WorkloadWatcher { api, writer, queue } = self;

        let stream = watcher(api, Config::default()).default_backoff();
        let mut events = reflector(writer, stream).boxed();

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => observe(&queue, &event),
                Err(err) => warn!("Workload watch error, retrying: {}", err),
            }
        }

        warn!("Workload watch stream ended");
    }
}

/// Translate one watch event into queue traffic.
///
/// Adds and deletes both enqueue the identity unconditionally; the event
/// type is a wake-up hint, never a source of truth.
pub(crate) fn observe(queue: &WorkQueue<String>, event: &Event<Deployment>) {
    match event {
        Event::Apply(workload) | Event::InitApply(workload) | Event::Delete(workload) => {
            let key = workload_key(workload);
            debug!("Workload change observed for {}", key);
            queue.add(key);
        }
        Event::Init | Event::InitDone => {}
    }
}
