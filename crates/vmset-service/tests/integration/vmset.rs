use std::sync::Arc;
use std::time::Duration;

use vmset_service::caching::CacheError;
use vmset_service::store::StoreOptions;
use vmset_service::vmset::{NodeCidrMasks, VmSet, VmSetError};

use crate::utils::{FakeCompute, setup_store, setup_vm_set};

fn vm_id(name: &str) -> String {
    format!("azure:///subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/{name}")
}

fn vmss_id(scale_set: &str, name: &str) -> String {
    format!(
        "azure:///subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachineScaleSets/{scale_set}/virtualMachines/{name}"
    )
}

#[tokio::test]
async fn test_vm_by_provider_id() {
    let (vm_set, _compute) = setup_vm_set();
    let opts = StoreOptions::default();

    let vm = vm_set.vm_by_provider_id(&vm_id("vm1"), opts).await.unwrap();
    assert!(vm.is_availability_set_managed());

    let vm = vm_set
        .vm_by_provider_id(&vmss_id("ss1", "ss1_0"), opts)
        .await
        .unwrap();
    assert_eq!(vm.instance_id(), Some("0"));

    let vm = vm_set
        .vm_by_provider_id(&vmss_id("flex", "flex-a1b2"), opts)
        .await
        .unwrap();
    assert_eq!(vm.vmss_name(), Some("flex"));

    let result = vm_set.vm_by_provider_id("aws:///eu-west-1/i-0abc", opts).await;
    assert!(matches!(result, Err(VmSetError::ProviderId(_))));
}

#[tokio::test]
async fn test_node_name_by_provider_id() {
    let (vm_set, compute) = setup_vm_set();

    let name = vm_set.node_name_by_provider_id(&vm_id("vm1")).await.unwrap();
    assert_eq!(name.as_deref(), Some("vm1"));
    // Availability set VMs are named after the VM, no lookup needed.
    assert_eq!(compute.calls().list_vms(), 0);

    let name = vm_set
        .node_name_by_provider_id(&vmss_id("ss1", "ss1_3"))
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("aks-ss1-000003"));

    let name = vm_set
        .node_name_by_provider_id(&vmss_id("ss1", "ss1_0"))
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("aks-ss1-000000"));

    let name = vm_set
        .node_name_by_provider_id(&vmss_id("flex", "flex-a1b2"))
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("flex-node-0"));

    let result = vm_set
        .node_name_by_provider_id(&vmss_id("ss1", "ss1_9"))
        .await;
    assert!(matches!(
        result,
        Err(VmSetError::Cache(CacheError::NotFound))
    ));
}

#[tokio::test]
async fn test_instance_type_by_node_name() {
    let (vm_set, _compute) = setup_vm_set();

    let instance_type = vm_set.instance_type_by_node_name("ss1_0").await.unwrap();
    assert_eq!(instance_type, "Standard_D4s_v3");
    let instance_type = vm_set.instance_type_by_node_name("vm1").await.unwrap();
    assert_eq!(instance_type, "Standard_D2s_v3");
    let instance_type = vm_set.instance_type_by_node_name("edge-vm").await.unwrap();
    assert_eq!(instance_type, "Standard_B1s");
}

#[tokio::test]
async fn test_power_status_by_node_name() {
    let (vm_set, _compute) = setup_vm_set();

    assert_eq!(vm_set.power_status_by_node_name("vm1").await.unwrap(), "running");
    assert_eq!(vm_set.power_status_by_node_name("vm2").await.unwrap(), "stopped");
    assert_eq!(
        vm_set.power_status_by_node_name("flex-a1b2").await.unwrap(),
        "deallocated"
    );
    assert_eq!(vm_set.power_status_by_node_name("ss1_3").await.unwrap(), "starting");

    let result = vm_set.power_status_by_node_name("ghost").await;
    assert!(matches!(
        result,
        Err(VmSetError::Cache(CacheError::NotFound))
    ));
}

#[tokio::test]
async fn test_provisioning_state_and_vm_set_name() {
    let (vm_set, _compute) = setup_vm_set();

    let state = vm_set.provisioning_state_by_node_name("ss1_3").await.unwrap();
    assert_eq!(state.as_deref(), Some("Updating"));
    let state = vm_set.provisioning_state_by_node_name("vm2").await.unwrap();
    assert_eq!(state.as_deref(), Some("Deleting"));
    let state = vm_set.provisioning_state_by_node_name("edge-vm").await.unwrap();
    assert_eq!(state, None);

    let name = vm_set.node_vm_set_name("flex-a1b2").await.unwrap();
    assert_eq!(name.as_deref(), Some("flex"));
    let name = vm_set.node_vm_set_name("vm2").await.unwrap();
    assert_eq!(name, None);
}

#[tokio::test]
async fn test_agent_pool_vm_set_names() {
    let (vm_set, _compute) = setup_vm_set();

    let nodes: Vec<String> = ["vm1", "vm2", "ss1_0", "flex-a1b2", "ss1_3"]
        .into_iter()
        .map(String::from)
        .collect();
    let names = vm_set.agent_pool_vm_set_names(&nodes).await.unwrap();

    insta::assert_debug_snapshot!(names, @r###"
    [
        "AS1",
        "ss1",
        "flex",
    ]
    "###);
}

#[tokio::test]
async fn test_node_cidr_masks() {
    let (vm_set, _compute) = setup_vm_set();

    let masks = vm_set.node_cidr_masks_by_provider_id(&vm_id("vm1")).await.unwrap();
    assert_eq!(masks, NodeCidrMasks { ipv4: 25, ipv6: 96 });

    // Not in any availability set.
    let masks = vm_set.node_cidr_masks_by_provider_id(&vm_id("vm2")).await.unwrap();
    assert_eq!(masks, NodeCidrMasks::default());

    let masks = vm_set
        .node_cidr_masks_by_provider_id(&vmss_id("ss1", "ss1_0"))
        .await
        .unwrap();
    assert_eq!(masks, NodeCidrMasks { ipv4: 26, ipv6: 0 });

    let masks = vm_set
        .node_cidr_masks_by_provider_id(&vmss_id("flex", "flex-a1b2"))
        .await
        .unwrap();
    assert_eq!(masks, NodeCidrMasks { ipv4: 0, ipv6: 0 });

    let result = vm_set
        .node_cidr_masks_by_provider_id(&vmss_id("ss9", "ss9_0"))
        .await;
    assert!(matches!(
        result,
        Err(VmSetError::Cache(CacheError::NotFound))
    ));
}

#[tokio::test]
async fn test_hot_path_serves_stale_entries() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, clock) = setup_store(&compute, |_| {});
    let vm_set = VmSet::new(store);

    assert_eq!(vm_set.power_status_by_node_name("vm1").await.unwrap(), "running");

    clock.advance(Duration::from_secs(120));
    compute.fail("rg");

    // Hot path queries answer from the stale entry without asking the compute API.
    assert_eq!(vm_set.power_status_by_node_name("vm1").await.unwrap(), "running");
    assert_eq!(
        vm_set.instance_type_by_node_name("vm1").await.unwrap(),
        "Standard_D2s_v3"
    );
    assert_eq!(compute.calls().list_vms(), 1);

    let result = vm_set.provisioning_state_by_node_name("vm1").await;
    assert!(matches!(
        result,
        Err(VmSetError::Cache(CacheError::Request(_)))
    ));
    assert_eq!(compute.calls().list_vms(), 2);
}
