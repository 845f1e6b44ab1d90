//! Sync engine for workload exposure
//!
//! Given one workload identity, converges the actual exposure objects
//! toward desired state: present workloads get a Service (and, in
//! external mode, an Ingress); vanished workloads get both torn down.
//! Desired state is recomputed from scratch on every cycle instead of
//! diffed against a cached copy.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use kube::Client;
use kube_runtime::reflector::ObjectRef;
use tracing::instrument;

use crate::controller::reconciler::ControllerState;
use crate::controller::resources::{self, ExposureMode};
use crate::error::{Error, Result};

/// Pod-template labels of a workload, used verbatim as the Service
/// selector. Missing labels produce an empty selector.
pub fn pod_template_labels(workload: &Deployment) -> BTreeMap<String, String> {
    workload
        .spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.labels.clone())
        .unwrap_or_default()
}

/// Converge exposure state for one workload identity.
///
/// Presence is decided by a fresh read of the workload cache at
/// processing time; the event that queued the key is only a wake-up
/// hint. A missing workload is the authoritative delete signal.
#[instrument(skip(state))]
pub async fn sync_exposure(state: &ControllerState, namespace: &str, name: &str) -> Result<()> {
    match state.store.get(&ObjectRef::new(name).within(namespace)) {
        Some(workload) => {
            let selector = pod_template_labels(&workload);
            resources::ensure_service(&state.client, namespace, name, selector, state.mode)
                .await?;
            if state.mode == ExposureMode::External {
                resources::ensure_ingress(&state.client, namespace, name).await?;
            }
            Ok(())
        }
        None => teardown_exposure(&state.client, namespace, name).await,
    }
}

/// Remove both exposure objects for a vanished workload.
///
/// The two deletions are independent: a failure on one never prevents
/// the attempt on the other. The Ingress is deleted regardless of the
/// current exposure mode, so a mode change cannot strand one.
pub async fn teardown_exposure(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let service = resources::delete_service(client, namespace, name).await;
    let ingress = resources::delete_ingress(client, namespace, name).await;

    match (service, ingress) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
        (Err(service_err), Err(ingress_err)) => Err(Error::TeardownFailed {
            key: format!("{}/{}", namespace, name),
            details: format!("service: {}; ingress: {}", service_err, ingress_err),
        }),
    }
}
