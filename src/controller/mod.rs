//! Controller module for workload exposure reconciliation
//! This module contains the event watcher, the deduplicating work queue,
//! the reconciler loop, and the sync engine that manages exposure objects.

pub mod queue;
mod reconciler;
pub mod resources;
mod sync;
#[cfg(test)]
mod sync_test;
pub mod watcher;

pub use queue::WorkQueue;
pub use reconciler::{ControllerOptions, ControllerState, ExposeController};
pub use resources::ExposureMode;
pub use sync::{pod_template_labels, sync_exposure, teardown_exposure};
pub use watcher::{split_key, workload_api, workload_key, WorkloadWatcher};
