use std::fmt;

/// All known cache names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheName {
    VmByResourceGroup,
    VmByName,
    ScaleSetByResourceGroup,
    AvailabilitySetByResourceGroup,
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        match self {
            Self::VmByResourceGroup => "vm_by_resource_group",
            Self::VmByName => "vm_by_name",
            Self::ScaleSetByResourceGroup => "vmss_by_resource_group",
            Self::AvailabilitySetByResourceGroup => "vmas_by_resource_group",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}
