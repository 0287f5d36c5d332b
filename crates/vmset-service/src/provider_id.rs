//! Parsing of node provider IDs.
//!
//! Kubernetes identifies the VM behind a node by its provider ID, which comes in two shapes:
//!
//! ```text
//! azure:///subscriptions/<sub>/resourceGroups/<rg>/providers/Microsoft.Compute/virtualMachines/<vm>
//! azure:///subscriptions/<sub>/resourceGroups/<rg>/providers/Microsoft.Compute/virtualMachineScaleSets/<vmss>/virtualMachines/<vm>
//! ```
//!
//! The first shape is used for standalone and availability set VMs, the second one for scale set
//! instances. Instances of uniform scale sets are named `<vmss>_<instance id>`, while instances of
//! flexible scale sets have arbitrary names.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::virtualmachine::{Manage, VmssMode};

static VM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^azure:///subscriptions/([^/]+)/resourceGroups/([^/]+)/providers/Microsoft\.Compute/virtualMachines/([^/]+)$",
    )
    .unwrap()
});

static VMSS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^azure:///subscriptions/([^/]+)/resourceGroups/([^/]+)/providers/Microsoft\.Compute/virtualMachineScaleSets/([^/]+)/virtualMachines/([^/]+)$",
    )
    .unwrap()
});

/// An error parsing a [`ProviderId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderIdError {
    #[error("invalid provider id {0:?}")]
    Invalid(String),
}

/// The parsed form of a node provider ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProviderId {
    subscription_id: String,
    resource_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    vmss_name: Option<String>,
    vm_name: String,
    managed_by: Manage,
}

impl ProviderId {
    /// The provider ID of a standalone or availability set VM.
    pub fn availability_set(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        vm_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            vmss_name: None,
            vm_name: vm_name.into(),
            managed_by: Manage::Vmas,
        }
    }

    /// The provider ID of a scale set instance.
    pub fn scale_set(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        vmss_name: impl Into<String>,
        vm_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            vmss_name: Some(vmss_name.into()),
            vm_name: vm_name.into(),
            managed_by: Manage::Vmss,
        }
    }

    /// Parses a provider ID string.
    pub fn parse(id: &str) -> Result<Self, ProviderIdError> {
        if let Some(captures) = VM_REGEX.captures(id) {
            return Ok(Self::availability_set(
                &captures[1],
                &captures[2],
                &captures[3],
            ));
        }

        if let Some(captures) = VMSS_REGEX.captures(id) {
            return Ok(Self::scale_set(
                &captures[1],
                &captures[2],
                &captures[3],
                &captures[4],
            ));
        }

        Err(ProviderIdError::Invalid(id.to_owned()))
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    /// The scale set name, present iff the ID is managed by a scale set.
    pub fn vmss_name(&self) -> Option<&str> {
        self.vmss_name.as_deref()
    }

    pub fn vm_name(&self) -> &str {
        &self.vm_name
    }

    pub fn managed_by(&self) -> Manage {
        self.managed_by
    }

    pub fn is_availability_set_managed(&self) -> bool {
        self.managed_by == Manage::Vmas
    }

    pub fn is_scale_set_managed(&self) -> bool {
        self.managed_by == Manage::Vmss
    }

    /// The orchestration mode of the owning scale set, inferred from the VM name.
    ///
    /// # Panics
    ///
    /// Panics if the ID is not managed by a scale set.
    pub fn vmss_orchestration(&self) -> VmssMode {
        let Some(vmss_name) = self.vmss_name.as_deref() else {
            panic!("vmss_orchestration called on provider id without scale set: {self}");
        };

        let instance = self
            .vm_name
            .strip_prefix(vmss_name)
            .and_then(|rest| rest.strip_prefix('_'));

        match instance {
            Some(id) if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) => {
                VmssMode::Uniform
            }
            _ => VmssMode::Flexible,
        }
    }

    /// The instance ID of a uniform scale set instance, which is the last `_`-delimited part of
    /// the VM name.
    ///
    /// # Panics
    ///
    /// Panics if the ID does not belong to a uniform scale set.
    pub fn uniform_instance_id(&self) -> &str {
        if !self.vmss_orchestration().is_uniform() {
            panic!("uniform_instance_id called on non-uniform provider id: {self}");
        }

        match self.vm_name.rsplit_once('_') {
            Some((_, instance_id)) => instance_id,
            None => panic!("invalid scale set instance name {:?}", self.vm_name),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "azure:///subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/",
            self.subscription_id, self.resource_group
        )?;
        match &self.vmss_name {
            Some(vmss_name) => write!(
                f,
                "virtualMachineScaleSets/{vmss_name}/virtualMachines/{}",
                self.vm_name
            ),
            None => write!(f, "virtualMachines/{}", self.vm_name),
        }
    }
}

impl FromStr for ProviderId {
    type Err = ProviderIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
