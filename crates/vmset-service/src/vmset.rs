//! Node queries answered from the [`VmSetStore`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::caching::{CacheEntry, CacheError};
use crate::provider_id::{ProviderId, ProviderIdError};
use crate::store::{StoreOptions, VmSetStore};
use crate::virtualmachine::VirtualMachine;

/// The tag on a scale set or availability set holding the IPv4 node CIDR mask size.
pub const CIDR_MASK_IPV4_TAG: &str = "kubernetesNodeCIDRMaskIPV4";
/// The tag on a scale set or availability set holding the IPv6 node CIDR mask size.
pub const CIDR_MASK_IPV6_TAG: &str = "kubernetesNodeCIDRMaskIPV6";

const DEFAULT_CIDR_MASK_IPV4: u8 = 24;
const DEFAULT_CIDR_MASK_IPV6: u8 = 64;

const POWER_STATE_PREFIX: &str = "PowerState/";
const POWER_STATE_STOPPED: &str = "stopped";

#[derive(Debug, Error)]
pub enum VmSetError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    ProviderId(#[from] ProviderIdError),
}

/// The node CIDR mask sizes configured on a VM set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeCidrMasks {
    pub ipv4: u8,
    pub ipv6: u8,
}

impl Default for NodeCidrMasks {
    fn default() -> Self {
        Self {
            ipv4: DEFAULT_CIDR_MASK_IPV4,
            ipv6: DEFAULT_CIDR_MASK_IPV6,
        }
    }
}

impl NodeCidrMasks {
    /// Reads the mask sizes from the tags of a VM set.
    ///
    /// A missing or malformed tag yields a mask size of `0`.
    fn from_tags(tags: &BTreeMap<String, String>) -> Self {
        Self {
            ipv4: parse_mask(tags, CIDR_MASK_IPV4_TAG),
            ipv6: parse_mask(tags, CIDR_MASK_IPV6_TAG),
        }
    }
}

fn parse_mask(tags: &BTreeMap<String, String>, key: &str) -> u8 {
    let Some(value) = tags.get(key) else {
        return 0;
    };
    match value.trim().parse() {
        Ok(mask) => mask,
        Err(e) => {
            tracing::error!(tag = key, value = value.as_str(), error = %e, "Failed to parse node CIDR mask size");
            0
        }
    }
}

/// Reads from whatever is cached first, and only loads if nothing is cached yet.
///
/// Used by queries on hot paths that prefer a stale answer over waiting on the compute API.
async fn read_cached_first<T, F, Fut>(read: F) -> CacheEntry<T>
where
    F: Fn(StoreOptions) -> Fut,
    Fut: Future<Output = CacheEntry<T>>,
{
    match read(StoreOptions::unsafe_read()).await {
        Err(CacheError::NotFound) => read(StoreOptions::default()).await,
        result => result,
    }
}

/// Answers questions about nodes and the VM sets they belong to.
#[derive(Clone, Debug)]
pub struct VmSet {
    store: VmSetStore,
}

impl VmSet {
    pub fn new(store: VmSetStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &VmSetStore {
        &self.store
    }

    /// Returns the VM identified by a provider ID.
    ///
    /// Availability set and standalone VMs are looked up by name, instances of uniform scale sets
    /// by instance ID, and instances of flexible scale sets by name within the scale set.
    pub async fn vm_by_provider_id(
        &self,
        provider_id: &str,
        opts: StoreOptions,
    ) -> Result<Arc<VirtualMachine>, VmSetError> {
        let id = ProviderId::parse(provider_id)?;
        Ok(self.vm_by_parsed_id(&id, opts).await?)
    }

    async fn vm_by_parsed_id(
        &self,
        id: &ProviderId,
        opts: StoreOptions,
    ) -> CacheEntry<Arc<VirtualMachine>> {
        let resource_group = id.resource_group();
        let Some(vmss_name) = id.vmss_name() else {
            return self
                .store
                .get_vm_by_resource_group_and_name(resource_group, id.vm_name(), opts)
                .await;
        };

        if id.vmss_orchestration().is_uniform() {
            self.store
                .get_vm_by_scale_set_and_instance_id(
                    resource_group,
                    vmss_name,
                    id.uniform_instance_id(),
                    opts,
                )
                .await
        } else {
            self.store
                .get_vm_by_scale_set_and_name(resource_group, vmss_name, id.vm_name(), opts)
                .await
        }
    }

    /// Returns the node name of the VM identified by a provider ID.
    ///
    /// For availability set VMs this is the VM name. For scale set instances it is the lowercased
    /// computer name, or `None` if the VM does not report one.
    pub async fn node_name_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<String>, VmSetError> {
        let id = ProviderId::parse(provider_id)?;
        if id.is_availability_set_managed() {
            return Ok(Some(id.vm_name().to_owned()));
        }

        let vm = read_cached_first(|opts| self.vm_by_parsed_id(&id, opts)).await?;
        Ok(vm
            .os_profile()
            .and_then(|profile| profile.computer_name.as_deref())
            .map(str::to_lowercase))
    }

    /// Returns the VM size of a node, or an empty string if it is unknown.
    pub async fn instance_type_by_node_name(&self, name: &str) -> Result<String, VmSetError> {
        let vm = self.hot_vm_by_name(name).await?;

        let instance_type = if vm.is_scale_set_vm_variant() {
            vm.sku().and_then(|sku| sku.name.as_deref())
        } else {
            vm.hardware_profile()
                .and_then(|profile| profile.vm_size.as_deref())
        };
        Ok(instance_type.unwrap_or_default().to_owned())
    }

    /// Returns the power state of a node, such as `running` or `deallocated`.
    ///
    /// A VM without a power state in its instance view, which happens while it is being deleted,
    /// is reported as `stopped`.
    pub async fn power_status_by_node_name(&self, name: &str) -> Result<String, VmSetError> {
        let vm = self.hot_vm_by_name(name).await?;

        let power_state = vm
            .instance_view_statuses()
            .iter()
            .filter_map(|status| status.code.as_deref())
            .find_map(|code| code.strip_prefix(POWER_STATE_PREFIX));

        match power_state {
            Some(state) => Ok(state.to_owned()),
            None => {
                tracing::debug!(node = name, "No power state in instance view, assuming stopped");
                Ok(POWER_STATE_STOPPED.to_owned())
            }
        }
    }

    pub async fn provisioning_state_by_node_name(
        &self,
        name: &str,
    ) -> Result<Option<String>, VmSetError> {
        let vm = self
            .store
            .get_vm_by_name(name, StoreOptions::default())
            .await?;
        Ok(vm.provisioning_state().map(str::to_owned))
    }

    /// Returns the name of the scale set or availability set a node belongs to.
    pub async fn node_vm_set_name(&self, name: &str) -> Result<Option<String>, VmSetError> {
        let vm = self
            .store
            .get_vm_by_name(name, StoreOptions::default())
            .await?;
        Ok(vm.vmss_name().or(vm.vmas_name()).map(str::to_owned))
    }

    /// Returns the distinct VM set names of `nodes`, in order of first appearance.
    ///
    /// Nodes without a VM set are skipped.
    pub async fn agent_pool_vm_set_names(
        &self,
        nodes: &[String],
    ) -> Result<Vec<String>, VmSetError> {
        let mut names: Vec<String> = Vec::new();
        for node in nodes {
            let Some(name) = self.node_vm_set_name(node).await? else {
                tracing::debug!(node = node.as_str(), "Node does not belong to a VM set");
                continue;
            };
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Returns the node CIDR mask sizes configured on the VM set of a node.
    ///
    /// VMs in no availability set, or in one that is not known, get the default mask sizes.
    pub async fn node_cidr_masks_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<NodeCidrMasks, VmSetError> {
        let id = ProviderId::parse(provider_id)?;
        let resource_group = id.resource_group();
        let opts = StoreOptions::default();

        if let Some(vmss_name) = id.vmss_name() {
            let scale_set = self
                .store
                .get_scale_set_by_name(resource_group, vmss_name, opts)
                .await?
                .ok_or(CacheError::NotFound)?;
            return Ok(NodeCidrMasks::from_tags(&scale_set.tags));
        }

        let vm = self.vm_by_parsed_id(&id, opts).await?;
        let Some(vmas_name) = vm.vmas_name() else {
            return Ok(NodeCidrMasks::default());
        };
        let availability_set = self
            .store
            .get_availability_set_by_name(resource_group, vmas_name, opts)
            .await?;

        Ok(match availability_set {
            Some(availability_set) => NodeCidrMasks::from_tags(&availability_set.tags),
            None => NodeCidrMasks::default(),
        })
    }

    async fn hot_vm_by_name(&self, name: &str) -> CacheEntry<Arc<VirtualMachine>> {
        read_cached_first(|opts| self.store.get_vm_by_name(name, opts)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_masks_from_tags() {
        let masks = NodeCidrMasks::from_tags(&tags(&[
            (CIDR_MASK_IPV4_TAG, "26"),
            (CIDR_MASK_IPV6_TAG, "80"),
        ]));
        assert_eq!(masks, NodeCidrMasks { ipv4: 26, ipv6: 80 });
    }

    #[test]
    fn test_masks_from_bad_tags() {
        vmset_test::setup();
        let masks = NodeCidrMasks::from_tags(&tags(&[(CIDR_MASK_IPV4_TAG, "wide")]));
        assert_eq!(masks, NodeCidrMasks { ipv4: 0, ipv6: 0 });
    }

    #[test]
    fn test_default_masks() {
        assert_eq!(NodeCidrMasks::default(), NodeCidrMasks { ipv4: 24, ipv6: 64 });
    }
}
