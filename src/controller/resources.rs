//! Kubernetes resource builders for workload exposure
//!
//! This module creates and deletes the exposure objects (Service and
//! Ingress) derived from a workload. Exposure objects share the
//! workload's name and namespace, which makes creation idempotent and
//! deletion possible without extra bookkeeping.

use std::collections::BTreeMap;

use clap::ValueEnum;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};

/// Port every exposure Service listens on
pub const EXPOSURE_PORT: i32 = 80;

/// Name of the single exposure port
pub const EXPOSURE_PORT_NAME: &str = "http";

/// How widely a workload is exposed
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ExposureMode {
    /// Cluster-internal Service only
    ClusterLocal,
    /// LoadBalancer Service plus an HTTP Ingress route
    External,
}

impl ExposureMode {
    /// Kubernetes Service type used for this mode
    pub fn service_type(&self) -> &'static str {
        match self {
            ExposureMode::ClusterLocal => "ClusterIP",
            ExposureMode::External => "LoadBalancer",
        }
    }
}

/// Get the standard labels stamped on every exposure object
pub fn managed_labels(workload_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        workload_name.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "expose-operator".to_string(),
    );
    labels
}

// ============================================================================
// Service
// ============================================================================

/// Build the exposure Service for a workload.
///
/// The selector is the workload's pod-template labels, taken verbatim:
/// the Service must address exactly the pods the workload runs.
pub fn build_service(
    namespace: &str,
    name: &str,
    selector: BTreeMap<String, String>,
    mode: ExposureMode,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels(name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(mode.service_type().to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some(EXPOSURE_PORT_NAME.to_string()),
                port: EXPOSURE_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Ensure the exposure Service exists for a workload.
///
/// A create that races with another reconcile and reports AlreadyExists
/// is success: the object carries the desired name either way.
#[instrument(skip(client, selector))]
pub async fn ensure_service(
    client: &Client,
    namespace: &str,
    name: &str,
    selector: BTreeMap<String, String>,
    mode: ExposureMode,
) -> Result<()> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    let service = build_service(namespace, name, selector, mode);

    match api.create(&PostParams::default(), &service).await {
        Ok(_) => info!("Created Service {}/{}", namespace, name),
        Err(kube::Error::Api(e)) if e.code == 409 => {
            debug!("Service {}/{} already exists", namespace, name);
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(())
}

/// Delete the exposure Service for a workload
#[instrument(skip(client))]
pub async fn delete_service(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);

    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => info!("Deleted Service {}/{}", namespace, name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!("Service {}/{} not found, already deleted", namespace, name);
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(())
}

// ============================================================================
// Ingress
// ============================================================================

/// Build the exposure Ingress for a workload.
///
/// One HTTP rule routing the `/name` prefix to the exposure Service on
/// port 80.
pub fn build_ingress(namespace: &str, name: &str) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels(name)),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: None,
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(format!("/{}", name)),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: name.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(EXPOSURE_PORT),
                                    name: None,
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Ensure the exposure Ingress exists for a workload.
///
/// AlreadyExists is tolerated exactly as for the Service.
#[instrument(skip(client))]
pub async fn ensure_ingress(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Ingress> = Api::namespaced(client.clone(), namespace);
    let ingress = build_ingress(namespace, name);

    match api.create(&PostParams::default(), &ingress).await {
        Ok(_) => info!("Created Ingress {}/{}", namespace, name),
        Err(kube::Error::Api(e)) if e.code == 409 => {
            debug!("Ingress {}/{} already exists", namespace, name);
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(())
}

/// Delete the exposure Ingress for a workload
#[instrument(skip(client))]
pub async fn delete_ingress(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Ingress> = Api::namespaced(client.clone(), namespace);

    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => info!("Deleted Ingress {}/{}", namespace, name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!("Ingress {}/{} not found, already deleted", namespace, name);
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(())
}
