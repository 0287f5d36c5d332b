use serde::Serialize;
use vmset_service::provider_id::ProviderId;
use vmset_service::virtualmachine::{Manage, VirtualMachine, VmssMode};
use vmset_service::vmset::NodeCidrMasks;

/// A parsed provider ID, with the properties derived from it.
#[derive(Debug, Serialize)]
pub struct ParsedProviderId<'a> {
    #[serde(flatten)]
    pub id: &'a ProviderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<VmssMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<&'a str>,
}

impl<'a> ParsedProviderId<'a> {
    pub fn new(id: &'a ProviderId) -> Self {
        let orchestration = id.is_scale_set_managed().then(|| id.vmss_orchestration());
        let instance_id = orchestration
            .filter(|mode| mode.is_uniform())
            .map(|_| id.uniform_instance_id());

        Self {
            id,
            orchestration,
            instance_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VmSummary<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub resource_group: &'a str,
    pub variant: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<Manage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_set: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<&'a str>,
    pub zones: &'a [String],
}

impl<'a> VmSummary<'a> {
    pub fn new(vm: &'a VirtualMachine) -> Self {
        Self {
            id: vm.id(),
            name: vm.name(),
            resource_group: vm.resource_group(),
            variant: if vm.is_scale_set_vm_variant() {
                "scale_set_vm"
            } else {
                "standalone"
            },
            managed_by: vm.manage(),
            vm_set: vm.vmss_name().or(vm.vmas_name()),
            instance_id: vm.instance_id(),
            computer_name: vm
                .os_profile()
                .and_then(|profile| profile.computer_name.as_deref()),
            provisioning_state: vm.provisioning_state(),
            location: vm.location(),
            zones: vm.zones(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LookupOutput<'a> {
    pub vm: VmSummary<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub cidr_masks: NodeCidrMasks,
}

#[derive(Debug, Serialize)]
pub struct NodeOutput<'a> {
    pub node: &'a str,
    pub vm: VmSummary<'a>,
    pub instance_type: String,
    pub power_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_set_name: Option<String>,
}

/// Renders `output` as pretty JSON.
pub fn to_json<T: Serialize + ?Sized>(output: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(output)?)
}
