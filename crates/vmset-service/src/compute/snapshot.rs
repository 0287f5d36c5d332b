use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{
    AvailabilitySet, ClientError, ComputeClient, NodeResourceGroupResolver, ScaleSet, ScaleSetVm,
    VirtualMachine,
};

/// All compute resources of one resource group.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupSnapshot {
    #[serde(default)]
    pub virtual_machines: Vec<VirtualMachine>,
    #[serde(default)]
    pub scale_sets: Vec<ScaleSet>,
    /// Instances of uniform scale sets, by scale set name.
    #[serde(default)]
    pub scale_set_vms: BTreeMap<String, Vec<ScaleSetVm>>,
    #[serde(default)]
    pub availability_sets: Vec<AvailabilitySet>,
}

/// A point-in-time dump of the compute resources of a subscription.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// The resource group of nodes that are not listed in `node_resource_groups`.
    #[serde(default)]
    pub default_resource_group: Option<String>,
    /// Nodes that live outside of the default resource group.
    #[serde(default)]
    pub node_resource_groups: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_groups: BTreeMap<String, ResourceGroupSnapshot>,
}

/// A [`ComputeClient`] that answers from a [`Snapshot`] instead of the network.
#[derive(Debug, Clone)]
pub struct SnapshotClient {
    snapshot: Snapshot,
}

impl SnapshotClient {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    /// Reads a JSON snapshot from `path`.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
        Ok(Self::new(snapshot))
    }

    fn group(&self, resource_group: &str) -> Result<&ResourceGroupSnapshot, ClientError> {
        self.snapshot
            .resource_groups
            .get(resource_group)
            .ok_or_else(|| ClientError::ResourceGroupNotFound(resource_group.to_owned()))
    }
}

impl ComputeClient for SnapshotClient {
    fn list_vms<'a>(
        &'a self,
        resource_group: &'a str,
    ) -> BoxFuture<'a, Result<Vec<VirtualMachine>, ClientError>> {
        Box::pin(async move { Ok(self.group(resource_group)?.virtual_machines.clone()) })
    }

    fn list_scale_sets<'a>(
        &'a self,
        resource_group: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ScaleSet>, ClientError>> {
        Box::pin(async move { Ok(self.group(resource_group)?.scale_sets.clone()) })
    }

    fn list_scale_set_vms<'a>(
        &'a self,
        resource_group: &'a str,
        scale_set: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ScaleSetVm>, ClientError>> {
        Box::pin(async move {
            let group = self.group(resource_group)?;
            Ok(group
                .scale_set_vms
                .get(scale_set)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn list_availability_sets<'a>(
        &'a self,
        resource_group: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AvailabilitySet>, ClientError>> {
        Box::pin(async move { Ok(self.group(resource_group)?.availability_sets.clone()) })
    }
}

impl NodeResourceGroupResolver for SnapshotClient {
    fn resource_group(&self, node_name: &str) -> Result<String, ClientError> {
        self.snapshot
            .node_resource_groups
            .get(node_name)
            .or(self.snapshot.default_resource_group.as_ref())
            .cloned()
            .ok_or_else(|| ClientError::Request(format!("no resource group known for node {node_name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SnapshotClient {
        let snapshot = serde_json::from_str(
            r#"{
                "defaultResourceGroup": "rg",
                "nodeResourceGroups": {"external-node": "other-rg"},
                "resourceGroups": {
                    "rg": {
                        "virtualMachines": [{"name": "vm1"}],
                        "scaleSetVms": {"ss1": [{"name": "ss1_0", "instanceId": "0"}]}
                    }
                }
            }"#,
        )
        .unwrap();
        SnapshotClient::new(snapshot)
    }

    #[tokio::test]
    async fn test_list_known_group() {
        let client = client();

        let vms = client.list_vms("rg").await.unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].name.as_deref(), Some("vm1"));

        let instances = client.list_scale_set_vms("rg", "ss1").await.unwrap();
        assert_eq!(instances[0].instance_id.as_deref(), Some("0"));
        assert!(client.list_scale_set_vms("rg", "ss2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_unknown_group() {
        let client = client();

        assert_eq!(
            client.list_scale_sets("missing").await,
            Err(ClientError::ResourceGroupNotFound("missing".into()))
        );
    }

    #[test]
    fn test_node_resource_group() {
        let client = client();

        assert_eq!(client.resource_group("node-1").unwrap(), "rg");
        assert_eq!(client.resource_group("external-node").unwrap(), "other-rg");

        let client = SnapshotClient::new(Snapshot::default());
        assert!(client.resource_group("node-1").is_err());
    }
}
