//! A single view over the two shapes a virtual machine can come in.
//!
//! The compute API returns standalone VMs (including availability set members and instances of
//! flexible scale sets) as [`compute::VirtualMachine`], and instances of uniform scale sets as
//! [`compute::ScaleSetVm`]. [`VirtualMachine`] wraps either one, works out once how the VM is
//! managed, and exposes the fields both shapes have in common.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::compute::{
    self, HardwareProfile, InstanceViewStatus, NetworkProfile, OsProfile, Plan, Sku,
    VirtualMachineIdentity,
};

/// The raw resource a [`VirtualMachine`] was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmSource {
    Standalone(compute::VirtualMachine),
    ScaleSetVm(compute::ScaleSetVm),
}

/// The kind of set that manages a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Manage {
    /// An availability set.
    Vmas,
    /// A scale set.
    Vmss,
}

impl fmt::Display for Manage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vmas => f.write_str("vmas"),
            Self::Vmss => f.write_str("vmss"),
        }
    }
}

/// The orchestration mode of a scale set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VmssMode {
    /// Instances are named `<scale set>_<instance id>`.
    Uniform,
    Flexible,
}

impl VmssMode {
    pub fn is_uniform(self) -> bool {
        self == Self::Uniform
    }

    pub fn is_flexible(self) -> bool {
        self == Self::Flexible
    }
}

/// Reads a field that both raw shapes have at the top level.
macro_rules! common_field {
    ($source:expr, $field:ident) => {
        match $source {
            VmSource::Standalone(vm) => &vm.$field,
            VmSource::ScaleSetVm(vm) => &vm.$field,
        }
    };
}

/// Reads an optional field that both raw shapes have in their properties.
macro_rules! common_property {
    ($source:expr, $field:ident) => {
        match $source {
            VmSource::Standalone(vm) => vm.properties.as_ref().and_then(|p| p.$field.as_ref()),
            VmSource::ScaleSetVm(vm) => vm.properties.as_ref().and_then(|p| p.$field.as_ref()),
        }
    };
}

/// A virtual machine, normalized over standalone VMs and scale set instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachine {
    source: VmSource,
    resource_group: String,
    id: String,
    name: String,
    manage: Option<Manage>,
    vmss_name: Option<String>,
    vmas_name: Option<String>,
}

impl VirtualMachine {
    /// Wraps a standalone VM.
    ///
    /// A VM that references a scale set is managed by that scale set, even if it also references
    /// an availability set. A VM that references neither is unmanaged.
    pub fn from_virtual_machine(resource_group: impl Into<String>, vm: compute::VirtualMachine) -> Self {
        let mut manage = None;
        let mut vmss_name = None;
        let mut vmas_name = None;

        if let Some(props) = &vm.properties {
            let scale_set = props.virtual_machine_scale_set.as_ref().and_then(|s| s.name());
            let availability_set = props.availability_set.as_ref().and_then(|s| s.name());

            if let Some(name) = scale_set {
                manage = Some(Manage::Vmss);
                vmss_name = Some(name.to_owned());
            } else if let Some(name) = availability_set {
                manage = Some(Manage::Vmas);
                vmas_name = Some(name.to_owned());
            }
        }

        Self {
            resource_group: resource_group.into(),
            id: vm.id.clone().unwrap_or_default(),
            name: vm.name.clone().unwrap_or_default(),
            manage,
            vmss_name,
            vmas_name,
            source: VmSource::Standalone(vm),
        }
    }

    /// Wraps an instance of the uniform scale set `scale_set_name`.
    pub fn from_scale_set_vm(
        resource_group: impl Into<String>,
        vm: compute::ScaleSetVm,
        scale_set_name: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            id: vm.id.clone().unwrap_or_default(),
            name: vm.name.clone().unwrap_or_default(),
            manage: Some(Manage::Vmss),
            vmss_name: Some(scale_set_name.into()),
            vmas_name: None,
            source: VmSource::ScaleSetVm(vm),
        }
    }

    pub fn source(&self) -> &VmSource {
        &self.source
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kind of set managing this VM, or `None` if it is unmanaged.
    pub fn manage(&self) -> Option<Manage> {
        self.manage
    }

    /// The name of the scale set managing this VM.
    pub fn vmss_name(&self) -> Option<&str> {
        self.vmss_name.as_deref()
    }

    /// The name of the availability set managing this VM.
    pub fn vmas_name(&self) -> Option<&str> {
        self.vmas_name.as_deref()
    }

    pub fn is_scale_set_managed(&self) -> bool {
        self.manage == Some(Manage::Vmss)
    }

    pub fn is_availability_set_managed(&self) -> bool {
        self.manage == Some(Manage::Vmas)
    }

    pub fn is_standalone_variant(&self) -> bool {
        matches!(self.source, VmSource::Standalone(_))
    }

    pub fn is_scale_set_vm_variant(&self) -> bool {
        matches!(self.source, VmSource::ScaleSetVm(_))
    }

    pub fn as_virtual_machine(&self) -> Option<&compute::VirtualMachine> {
        match &self.source {
            VmSource::Standalone(vm) => Some(vm),
            VmSource::ScaleSetVm(_) => None,
        }
    }

    pub fn as_scale_set_vm(&self) -> Option<&compute::ScaleSetVm> {
        match &self.source {
            VmSource::Standalone(_) => None,
            VmSource::ScaleSetVm(vm) => Some(vm),
        }
    }

    pub fn location(&self) -> Option<&str> {
        common_field!(&self.source, location).as_deref()
    }

    pub fn resource_type(&self) -> Option<&str> {
        common_field!(&self.source, resource_type).as_deref()
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        common_field!(&self.source, tags)
    }

    pub fn zones(&self) -> &[String] {
        common_field!(&self.source, zones)
    }

    pub fn plan(&self) -> Option<&Plan> {
        common_field!(&self.source, plan).as_ref()
    }

    pub fn hardware_profile(&self) -> Option<&HardwareProfile> {
        common_property!(&self.source, hardware_profile)
    }

    pub fn os_profile(&self) -> Option<&OsProfile> {
        common_property!(&self.source, os_profile)
    }

    pub fn network_profile(&self) -> Option<&NetworkProfile> {
        common_property!(&self.source, network_profile)
    }

    pub fn provisioning_state(&self) -> Option<&str> {
        common_property!(&self.source, provisioning_state).map(String::as_str)
    }

    /// The statuses of the instance view, empty if the listing did not include one.
    pub fn instance_view_statuses(&self) -> &[InstanceViewStatus] {
        common_property!(&self.source, instance_view)
            .map(|view| view.statuses.as_slice())
            .unwrap_or_default()
    }

    /// The managed identity. Only standalone VMs carry one.
    pub fn identity(&self) -> Option<&VirtualMachineIdentity> {
        self.as_virtual_machine()?.identity.as_ref()
    }

    /// The instance ID within the scale set. Only scale set instances carry one.
    pub fn instance_id(&self) -> Option<&str> {
        self.as_scale_set_vm()?.instance_id.as_deref()
    }

    /// The SKU of the scale set instance. Only scale set instances carry one.
    pub fn sku(&self) -> Option<&Sku> {
        self.as_scale_set_vm()?.sku.as_ref()
    }
}
