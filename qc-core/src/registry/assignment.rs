//! Commissioning checks
//!
//! Groups discovered bus devices by the machine they were assigned to and
//! checks each group against the registry's role table.

use qc_protocol::{DiscoveredDevice, MachineIdentificationUnique};
use tracing::debug;

use super::matcher::role_accepts;
use super::DeviceRegistry;
use crate::error::{ControlError, Result};

/// Result of partitioning a bus scan by machine assignment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceGrouping {
    /// One group per assigned machine, in first-seen order
    pub device_groups: Vec<Vec<DiscoveredDevice>>,
    /// Devices without a (non-zero) machine assignment
    pub unidentified_devices: Vec<DiscoveredDevice>,
}

pub fn group_devices_by_identification(devices: &[DiscoveredDevice]) -> DeviceGrouping {
    let mut grouping = DeviceGrouping::default();

    for device in devices {
        let Some(assignment) = device.assignment() else {
            grouping.unidentified_devices.push(device.clone());
            continue;
        };

        let key = assignment.machine_identification_unique;
        let existing = grouping
            .device_groups
            .iter_mut()
            .find(|group| group_key(group) == Some(key));

        match existing {
            Some(group) => group.push(device.clone()),
            None => grouping.device_groups.push(vec![device.clone()]),
        }
    }

    debug!(
        groups = grouping.device_groups.len(),
        unidentified = grouping.unidentified_devices.len(),
        "Grouped discovered devices"
    );
    grouping
}

fn group_key(group: &[DiscoveredDevice]) -> Option<MachineIdentificationUnique> {
    group
        .first()
        .and_then(|d| d.assignment())
        .map(|a| a.machine_identification_unique)
}

/// Every device in `group` is assigned to the same physical machine
pub fn validate_same_machine_identification_unique(
    group: &[DiscoveredDevice],
) -> Result<MachineIdentificationUnique> {
    let expected = group_key(group).ok_or_else(|| {
        ControlError::DeviceAssignment("device group is empty or unassigned".into())
    })?;

    for device in group {
        let actual = device.assignment().map(|a| a.machine_identification_unique);
        if actual != Some(expected) {
            return Err(ControlError::DeviceAssignment(format!(
                "device at {} is not assigned to {}",
                device.configured_address, expected
            )));
        }
    }

    Ok(expected)
}

/// No role is filled by more than one device in `group`
pub fn validate_no_role_duplicates(group: &[DiscoveredDevice]) -> Result<()> {
    let mut seen = Vec::with_capacity(group.len());
    for device in group {
        let Some(assignment) = device.assignment() else {
            continue;
        };
        if seen.contains(&assignment.role) {
            return Err(ControlError::DeviceAssignment(format!(
                "role {} assigned to more than one device",
                assignment.role
            )));
        }
        seen.push(assignment.role);
    }
    Ok(())
}

/// The device filling `role`, if any
pub fn device_by_role(group: &[DiscoveredDevice], role: u16) -> Option<&DiscoveredDevice> {
    group
        .iter()
        .find(|d| d.assignment().map(|a| a.role) == Some(role))
}

// ============================================================================
// Assignment Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCheck {
    pub configured_address: u16,
    pub role: u16,
    /// The machine type declares this role
    pub role_declared: bool,
    /// The declared role lists the device's fingerprint
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentReport {
    pub machine_identification_unique: MachineIdentificationUnique,
    pub machine_known: bool,
    pub devices: Vec<DeviceCheck>,
    /// Declared roles without a device
    pub missing_roles: Vec<u16>,
}

impl AssignmentReport {
    pub fn is_complete(&self) -> bool {
        self.machine_known
            && self.missing_roles.is_empty()
            && self.devices.iter().all(|d| d.role_declared && d.accepted)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &DeviceCheck> {
        self.devices.iter().filter(|d| !(d.role_declared && d.accepted))
    }
}

/// Check one machine's device group against the registry.
///
/// Structural problems (mixed machines, duplicate roles) are errors. Devices
/// that sit in the wrong slot are reported, not raised.
pub fn check_assignment(
    registry: &DeviceRegistry,
    group: &[DiscoveredDevice],
) -> Result<AssignmentReport> {
    let unique = validate_same_machine_identification_unique(group)?;
    validate_no_role_duplicates(group)?;

    let machine = registry.lookup_machine(&unique.machine_identification);

    let devices = group
        .iter()
        .filter_map(|device| {
            let role = device.assignment()?.role;
            let declared = machine.and_then(|m| m.role(role));
            Some(DeviceCheck {
                configured_address: device.configured_address,
                role,
                role_declared: declared.is_some(),
                accepted: declared.is_some_and(|r| role_accepts(r, &device.fingerprint)),
            })
        })
        .collect::<Vec<_>>();

    let missing_roles = machine
        .map(|m| {
            m.device_roles
                .iter()
                .map(|r| r.role)
                .filter(|role| !devices.iter().any(|d| d.role == *role))
                .collect()
        })
        .unwrap_or_default();

    Ok(AssignmentReport {
        machine_identification_unique: unique,
        machine_known: machine.is_some(),
        devices,
        missing_roles,
    })
}
