//! The compute API as seen by the VM set store.
//!
//! The store never talks to the network itself. It goes through a [`ComputeClient`], which lists
//! resources of a single resource group, and a [`NodeResourceGroupResolver`], which knows which
//! resource group a node lives in.

use futures::future::BoxFuture;
use thiserror::Error;

mod models;
mod snapshot;

pub use models::*;
pub use snapshot::{ResourceGroupSnapshot, Snapshot, SnapshotClient};

/// An error returned by the compute API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The resource group does not exist.
    ///
    /// This is distinct from a failed request: the API answered, there is just nothing there.
    #[error("resource group {0:?} not found")]
    ResourceGroupNotFound(String),
    /// The request failed.
    #[error("{0}")]
    Request(String),
}

/// Lists compute resources of a resource group.
///
/// Implementations are expected to apply their own retry policy. Callers bound every call with a
/// timeout.
pub trait ComputeClient: Send + Sync + 'static {
    /// Lists all virtual machines, including instances of flexible scale sets.
    fn list_vms<'a>(
        &'a self,
        resource_group: &'a str,
    ) -> BoxFuture<'a, Result<Vec<VirtualMachine>, ClientError>>;

    fn list_scale_sets<'a>(
        &'a self,
        resource_group: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ScaleSet>, ClientError>>;

    /// Lists the instances of a scale set in uniform orchestration mode.
    fn list_scale_set_vms<'a>(
        &'a self,
        resource_group: &'a str,
        scale_set: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ScaleSetVm>, ClientError>>;

    fn list_availability_sets<'a>(
        &'a self,
        resource_group: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AvailabilitySet>, ClientError>>;
}

/// Resolves the resource group that holds the VM backing a node.
pub trait NodeResourceGroupResolver: Send + Sync + 'static {
    fn resource_group(&self, node_name: &str) -> Result<String, ClientError>;
}
