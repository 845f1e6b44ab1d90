//! Expose-K8s: automatic network exposure for Kubernetes workloads
//!
//! This crate provides a Kubernetes operator that watches Deployment
//! workloads and provisions the Service and Ingress objects needed to
//! reach them, removing both again when the workload disappears.

pub mod controller;
pub mod error;

pub use crate::error::{Error, Result};
