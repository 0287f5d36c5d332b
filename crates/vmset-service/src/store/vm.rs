use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, try_join_all};

use super::{ScaleSetStore, StoreOptions, call_client};
use crate::caching::{CacheEntry, CacheError, CacheLoader, CacheName, Clock, ReadPolicy, TimedCache};
use crate::compute::{ComputeClient, NodeResourceGroupResolver};
use crate::config::CacheConfig;
use crate::virtualmachine::VirtualMachine;

#[derive(Clone, Debug)]
pub struct VmEntry {
    pub vm: Arc<VirtualMachine>,
    pub last_updated: DateTime<Utc>,
}

impl VmEntry {
    fn new(vm: VirtualMachine, last_updated: DateTime<Utc>) -> Self {
        Self {
            vm: Arc::new(vm),
            last_updated,
        }
    }
}

/// The VMs of a resource group, by name.
pub type VmMap = Arc<HashMap<String, VmEntry>>;

struct VmByResourceGroupLoader {
    client: Arc<dyn ComputeClient>,
    scale_sets: ScaleSetStore,
    timeout: Duration,
}

impl VmByResourceGroupLoader {
    async fn load_resource_group(&self, resource_group: &str) -> CacheEntry<VmMap> {
        let vms = match call_client(self.timeout, self.client.list_vms(resource_group)).await {
            Ok(vms) => vms,
            Err(CacheError::ResourceGroupNotFound(_)) => {
                tracing::debug!(resource_group, "Resource group not found, caching empty VM list");
                return Ok(Default::default());
            }
            Err(e) => {
                tracing::error!(resource_group, error = %e, "Failed to list virtual machines");
                return Err(e);
            }
        };

        let now = Utc::now();
        let mut entries = HashMap::with_capacity(vms.len());
        for vm in vms {
            if vm.name.as_deref().is_none_or(str::is_empty) {
                tracing::warn!(resource_group, "Skipping virtual machine without a name");
                continue;
            }
            let vm = VirtualMachine::from_virtual_machine(resource_group, vm);
            entries.insert(vm.name().to_owned(), VmEntry::new(vm, now));
        }

        // Instances of flexible scale sets are regular VMs and are listed above already.
        let scale_sets = self
            .scale_sets
            .scale_sets_by_resource_group(resource_group, StoreOptions::default())
            .await?;
        let listings = scale_sets
            .iter()
            .filter(|(_, entry)| !entry.scale_set.is_flexible())
            .map(|(name, _)| async move {
                let request = self.client.list_scale_set_vms(resource_group, name);
                let instances = call_client(self.timeout, request).await.inspect_err(|e| {
                    tracing::error!(resource_group, scale_set = name.as_str(), error = %e, "Failed to list scale set instances");
                })?;
                Ok::<_, CacheError>((name, instances))
            });

        for (scale_set, instances) in try_join_all(listings).await? {
            for instance in instances {
                if instance.name.as_deref().is_none_or(str::is_empty) {
                    tracing::warn!(resource_group, scale_set = scale_set.as_str(), "Skipping scale set instance without a name");
                    continue;
                }
                let vm = VirtualMachine::from_scale_set_vm(resource_group, instance, scale_set);
                entries.insert(vm.name().to_owned(), VmEntry::new(vm, now));
            }
        }

        Ok(Arc::new(entries))
    }
}

impl CacheLoader for VmByResourceGroupLoader {
    type Key = String;
    type Value = VmMap;

    fn load<'a>(&'a self, key: &'a String) -> BoxFuture<'a, CacheEntry<VmMap>> {
        Box::pin(self.load_resource_group(key))
    }
}

struct VmByNameLoader {
    resolver: Arc<dyn NodeResourceGroupResolver>,
    by_resource_group: TimedCache<VmByResourceGroupLoader>,
}

impl VmByNameLoader {
    async fn load_vm(&self, name: &str) -> CacheEntry<Arc<VirtualMachine>> {
        let resource_group = self.resolver.resource_group(name)?;
        let vms = self
            .by_resource_group
            .get(&resource_group, ReadPolicy::Default)
            .await?;

        match vms.get(name) {
            Some(entry) => Ok(Arc::clone(&entry.vm)),
            None => Err(CacheError::NotFound),
        }
    }
}

impl CacheLoader for VmByNameLoader {
    type Key = String;
    type Value = Arc<VirtualMachine>;

    fn load<'a>(&'a self, key: &'a String) -> BoxFuture<'a, CacheEntry<Arc<VirtualMachine>>> {
        Box::pin(self.load_vm(key))
    }
}

/// The VM indices, by resource group and by node name.
#[derive(Clone, Debug)]
pub struct VmStore {
    by_resource_group: TimedCache<VmByResourceGroupLoader>,
    by_name: TimedCache<VmByNameLoader>,
}

impl VmStore {
    pub(crate) fn new(
        config: CacheConfig,
        timeout: Duration,
        client: Arc<dyn ComputeClient>,
        resolver: Arc<dyn NodeResourceGroupResolver>,
        scale_sets: ScaleSetStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let by_resource_group = TimedCache::with_clock(
            CacheName::VmByResourceGroup,
            config.ttl,
            config.idle_timeout,
            VmByResourceGroupLoader {
                client,
                scale_sets,
                timeout,
            },
            Arc::clone(&clock),
        );
        let by_name = TimedCache::with_clock(
            CacheName::VmByName,
            config.ttl,
            config.idle_timeout,
            VmByNameLoader {
                resolver,
                by_resource_group: by_resource_group.clone(),
            },
            clock,
        );

        Self {
            by_resource_group,
            by_name,
        }
    }

    /// Returns the VM backing the node `name`.
    ///
    /// Fails with [`CacheError::NotFound`] if the node's resource group has no VM of that name.
    ///
    /// The read policy applies to the name index only. Its loader reads the resource group
    /// listing with the default policy, so [`StoreOptions::force_refresh`] does not fetch a new
    /// listing while the cached one is fresh. Use [`vms_by_resource_group`](Self::vms_by_resource_group)
    /// with a forced refresh for that.
    pub async fn get_vm_by_name(
        &self,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        self.by_name.get(&name.to_owned(), opts.read_policy).await
    }

    pub fn delete_vm_by_name(&self, name: &str) {
        self.by_name.delete(&name.to_owned());
    }

    pub async fn vms_by_resource_group(
        &self,
        resource_group: &str,
        opts: StoreOptions,
    ) -> CacheEntry<VmMap> {
        self.by_resource_group
            .get(&resource_group.to_owned(), opts.read_policy)
            .await
    }

    pub async fn get_vm_by_resource_group_and_name(
        &self,
        resource_group: &str,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        let vms = self.vms_by_resource_group(resource_group, opts).await?;
        match vms.get(name) {
            Some(entry) => Ok(Arc::clone(&entry.vm)),
            None => Err(CacheError::NotFound),
        }
    }

    /// Returns all VMs managed by `scale_set`, in no particular order.
    ///
    /// Fails with [`CacheError::NotFound`] if no VM belongs to the scale set.
    pub async fn list_vms_by_scale_set(
        &self,
        resource_group: &str,
        scale_set: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Vec<Arc<VirtualMachine>>> {
        let vms = self.vms_by_resource_group(resource_group, opts).await?;
        let members: Vec<_> = vms
            .values()
            .filter(|entry| entry.vm.vmss_name() == Some(scale_set))
            .map(|entry| Arc::clone(&entry.vm))
            .collect();

        if members.is_empty() {
            return Err(CacheError::NotFound);
        }
        Ok(members)
    }

    /// Returns the instance `instance_id` of the uniform scale set `scale_set`.
    pub async fn get_vm_by_scale_set_and_instance_id(
        &self,
        resource_group: &str,
        scale_set: &str,
        instance_id: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        self.find_in_scale_set(resource_group, scale_set, opts, |vm| {
            vm.is_scale_set_vm_variant() && vm.instance_id() == Some(instance_id)
        })
        .await
    }

    /// Returns the VM `name` managed by `scale_set`.
    pub async fn get_vm_by_scale_set_and_name(
        &self,
        resource_group: &str,
        scale_set: &str,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        self.find_in_scale_set(resource_group, scale_set, opts, |vm| vm.name() == name)
            .await
    }

    async fn find_in_scale_set(
        &self,
        resource_group: &str,
        scale_set: &str,
        opts: StoreOptions,
        predicate: impl Fn(&VirtualMachine) -> bool,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        let vms = self.vms_by_resource_group(resource_group, opts).await?;
        for entry in vms.values() {
            let vm: &VirtualMachine = &entry.vm;
            if vm.vmss_name() == Some(scale_set) && predicate(vm) {
                return Ok(Arc::clone(&entry.vm));
            }
        }
        Err(CacheError::NotFound)
    }
}
