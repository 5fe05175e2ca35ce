//! Device Registry
//!
//! Immutable catalog of machine types and the field-bus devices each of them
//! is assembled from. The registry is built once, either from the built-in
//! table or from a JSON file named in the client settings, and only read
//! afterwards.

pub mod assignment;
pub mod matcher;
pub mod properties;

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use qc_protocol::MachineIdentification;
use serde::Deserialize;
use tracing::{debug, info};

use crate::constants::limits;
use crate::error::{ControlError, Result};

pub use assignment::{
    check_assignment, group_devices_by_identification, validate_no_role_duplicates,
    validate_same_machine_identification_unique, AssignmentReport, DeviceCheck, DeviceGrouping,
};
pub use matcher::{match_roles, matching_roles, role_accepts};
pub use properties::{DeviceRole, MachineProperties, VendorProperties};

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegistry {
    machines: Vec<MachineProperties>,
    vendors: Vec<VendorProperties>,
}

/// On-disk shape of a registry file
#[derive(Debug, Deserialize)]
struct RegistryFile {
    machines: Vec<MachineProperties>,
    #[serde(default = "properties::builtin_vendors")]
    vendors: Vec<VendorProperties>,
}

impl DeviceRegistry {
    /// Build a registry, checking the catalog invariants
    pub fn new(machines: Vec<MachineProperties>, vendors: Vec<VendorProperties>) -> Result<Self> {
        validate_machines(&machines)?;

        let mut vendor_ids = HashSet::new();
        for vendor in &vendors {
            if !vendor_ids.insert(vendor.id) {
                return Err(ControlError::registry(format!(
                    "vendor id {:#06x} declared twice",
                    vendor.id
                )));
            }
        }

        Ok(Self { machines, vendors })
    }

    /// The catalog compiled into the client
    pub fn builtin() -> Self {
        Self {
            machines: properties::builtin_machines(),
            vendors: properties::builtin_vendors(),
        }
    }

    /// Parse a registry from its JSON representation
    pub fn from_json(json: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(json)?;
        Self::new(file.machines, file.vendors)
    }

    pub fn lookup_machine(
        &self,
        identification: &MachineIdentification,
    ) -> Option<&MachineProperties> {
        self.machines
            .iter()
            .find(|m| m.machine_identification == *identification)
    }

    pub fn lookup_slug(&self, slug: &str) -> Option<&MachineProperties> {
        self.machines.iter().find(|m| m.slug == slug)
    }

    pub fn lookup_vendor(&self, vendor: u16) -> Option<&VendorProperties> {
        self.vendors.iter().find(|v| v.id == vendor)
    }

    pub fn machines(&self) -> impl Iterator<Item = &MachineProperties> {
        self.machines.iter()
    }

    pub fn vendors(&self) -> impl Iterator<Item = &VendorProperties> {
        self.vendors.iter()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

fn validate_machines(machines: &[MachineProperties]) -> Result<()> {
    let mut identifications = HashSet::new();
    let mut slugs = HashSet::new();

    for machine in machines {
        if !identifications.insert(machine.machine_identification) {
            return Err(ControlError::registry(format!(
                "machine identification {} declared twice",
                machine.machine_identification
            )));
        }
        if !slugs.insert(machine.slug.as_str()) {
            return Err(ControlError::registry(format!(
                "slug '{}' declared twice",
                machine.slug
            )));
        }

        let mut roles = HashSet::new();
        for role in &machine.device_roles {
            if !roles.insert(role.role) {
                return Err(ControlError::registry(format!(
                    "role {} declared twice in '{}'",
                    role.role, machine.slug
                )));
            }
        }
    }

    Ok(())
}

/// Read and validate a registry file
pub fn load_registry(path: &Path) -> Result<DeviceRegistry> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ControlError::FileNotFound(path.to_path_buf()),
        _ => ControlError::FileRead {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    if metadata.len() > limits::MAX_REGISTRY_FILE_SIZE {
        return Err(ControlError::registry(format!(
            "{} exceeds {} bytes",
            path.display(),
            limits::MAX_REGISTRY_FILE_SIZE
        )));
    }

    let content = fs::read_to_string(path).map_err(|e| ControlError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let registry = DeviceRegistry::from_json(&content)?;
    debug!(path = %path.display(), machines = registry.len(), "Loaded device registry");
    Ok(registry)
}

// ============================================================================
// Process-wide Instance
// ============================================================================

static REGISTRY: OnceLock<DeviceRegistry> = OnceLock::new();

/// Install the process-wide registry. Only the first call (or the first
/// `registry()` access) takes effect.
pub fn init_registry(registry: DeviceRegistry) -> Result<&'static DeviceRegistry> {
    let mut installed = false;
    let current = REGISTRY.get_or_init(|| {
        installed = true;
        registry
    });

    if !installed {
        return Err(ControlError::registry("registry already initialised"));
    }

    info!(machines = current.len(), "Device registry initialised");
    Ok(current)
}

/// The process-wide registry, falling back to the built-in table
pub fn registry() -> &'static DeviceRegistry {
    REGISTRY.get_or_init(DeviceRegistry::builtin)
}
