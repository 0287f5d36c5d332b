//! The VM set store: cached views of the compute resources of a subscription.
//!
//! The store consists of four [`TimedCache`](crate::caching::TimedCache)s:
//!
//! - VMs by resource group, the source of truth for VMs. Each value maps VM names to entries and
//!   includes the instances of uniform scale sets.
//! - VMs by node name, a secondary index that resolves the node's resource group and looks the
//!   VM up in the first cache.
//! - Scale sets by resource group.
//! - Availability sets by resource group.
//!
//! Values are immutable maps that are replaced as a whole when reloaded, so a reader always sees
//! either the old or the new listing of a resource group.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::caching::{CacheEntry, CacheError, Clock, ReadPolicy, SystemClock};
use crate::compute::{AvailabilitySet, ClientError, ComputeClient, NodeResourceGroupResolver, ScaleSet};
use crate::config::Config;
use crate::virtualmachine::VirtualMachine;

mod vm;
mod vmas;
mod vmss;

pub use vm::{VmEntry, VmMap, VmStore};
pub use vmas::{AvailabilitySetEntry, AvailabilitySetMap, AvailabilitySetStore};
pub use vmss::{ScaleSetEntry, ScaleSetMap, ScaleSetStore};

/// Options for a single store query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub read_policy: ReadPolicy,
}

impl StoreOptions {
    /// Reloads the data before answering.
    pub fn force_refresh() -> Self {
        Self {
            read_policy: ReadPolicy::ForceRefresh,
        }
    }

    /// Answers from whatever is cached, no matter how old.
    pub fn unsafe_read() -> Self {
        Self {
            read_policy: ReadPolicy::UnsafeRead,
        }
    }
}

/// Runs a compute API call, bounded by `timeout`.
async fn call_client<T>(
    timeout: Duration,
    request: impl Future<Output = Result<T, ClientError>>,
) -> CacheEntry<T> {
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result.map_err(CacheError::from),
        Err(_elapsed) => Err(CacheError::Timeout(timeout)),
    }
}

/// The composed VM set store.
#[derive(Clone, Debug)]
pub struct VmSetStore {
    vm: VmStore,
    vmss: ScaleSetStore,
    vmas: AvailabilitySetStore,
}

impl VmSetStore {
    pub fn new(
        config: &Config,
        client: Arc<dyn ComputeClient>,
        resolver: Arc<dyn NodeResourceGroupResolver>,
    ) -> Self {
        Self::with_clock(config, client, resolver, Arc::new(SystemClock))
    }

    /// Same as [`new`](Self::new), with all caches reading the time from `clock`.
    pub fn with_clock(
        config: &Config,
        client: Arc<dyn ComputeClient>,
        resolver: Arc<dyn NodeResourceGroupResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timeout = config.client_timeout;

        let vmss = ScaleSetStore::new(
            config.caches.vmss.into(),
            timeout,
            Arc::clone(&client),
            Arc::clone(&clock),
        );
        let vmas = AvailabilitySetStore::new(
            config.caches.availability_sets.into(),
            timeout,
            Arc::clone(&client),
            Arc::clone(&clock),
        );
        let vm = VmStore::new(
            config.caches.vm.into(),
            timeout,
            client,
            resolver,
            vmss.clone(),
            clock,
        );

        Self { vm, vmss, vmas }
    }

    /// Returns the VM backing the node `name`.
    ///
    /// See [`VmStore::get_vm_by_name`] for how the read policy applies.
    pub async fn get_vm_by_name(
        &self,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        self.vm.get_vm_by_name(name, opts).await
    }

    /// Returns all VMs of a resource group, by name.
    pub async fn vms_by_resource_group(
        &self,
        resource_group: &str,
        opts: StoreOptions,
    ) -> CacheEntry<VmMap> {
        self.vm.vms_by_resource_group(resource_group, opts).await
    }

    pub async fn get_vm_by_resource_group_and_name(
        &self,
        resource_group: &str,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        self.vm
            .get_vm_by_resource_group_and_name(resource_group, name, opts)
            .await
    }

    pub async fn list_vms_by_scale_set(
        &self,
        resource_group: &str,
        scale_set: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Vec<Arc<VirtualMachine>>> {
        self.vm
            .list_vms_by_scale_set(resource_group, scale_set, opts)
            .await
    }

    pub async fn get_vm_by_scale_set_and_instance_id(
        &self,
        resource_group: &str,
        scale_set: &str,
        instance_id: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        self.vm
            .get_vm_by_scale_set_and_instance_id(resource_group, scale_set, instance_id, opts)
            .await
    }

    pub async fn get_vm_by_scale_set_and_name(
        &self,
        resource_group: &str,
        scale_set: &str,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        self.vm
            .get_vm_by_scale_set_and_name(resource_group, scale_set, name, opts)
            .await
    }

    /// Drops the cached VM of node `name`, so that the next read looks it up again.
    pub fn delete_vm_by_name(&self, name: &str) {
        self.vm.delete_vm_by_name(name)
    }

    pub async fn get_scale_set_by_name(
        &self,
        resource_group: &str,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Option<Arc<ScaleSet>>> {
        self.vmss
            .get_scale_set_by_name(resource_group, name, opts)
            .await
    }

    pub async fn get_availability_set_by_name(
        &self,
        resource_group: &str,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Option<Arc<AvailabilitySet>>> {
        self.vmas
            .get_availability_set_by_name(resource_group, name, opts)
            .await
    }
}
