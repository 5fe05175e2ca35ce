//! Static machine catalog
//!
//! Each machine type declares the field-bus device roles it is built from and,
//! per role, every hardware/firmware revision that is accepted in that slot.

use qc_protocol::{DeviceFingerprint, MachineIdentification};
use serde::{Deserialize, Serialize};

use crate::constants::ids::*;

/// One slot in a machine's device layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRole {
    /// Ordinal, unique within one machine
    pub role: u16,
    pub role_label: String,
    /// Accepted fingerprints; order carries no meaning
    pub allowed_devices: Vec<DeviceFingerprint>,
}

/// Static description of a machine type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineProperties {
    pub name: String,
    pub version: String,
    pub slug: String,
    pub icon: String,
    pub machine_identification: MachineIdentification,
    #[serde(default)]
    pub device_roles: Vec<DeviceRole>,
}

impl MachineProperties {
    /// Find a declared role by its ordinal
    pub fn role(&self, role: u16) -> Option<&DeviceRole> {
        self.device_roles.iter().find(|r| r.role == role)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VendorProperties {
    pub id: u16,
    pub name: String,
}

// ============================================================================
// Built-in Table
// ============================================================================

/// Beckhoff Automation vendor id as reported on the bus
const BECKHOFF: u32 = 2;

const EK1100: u32 = 0x44c2c52;
const EL1002: u32 = 0x3ea3052;
const EL2002: u32 = 0x7d23052;
const EL2004: u32 = 0x7d43052;
const EL2008: u32 = 0x7d83052;
const EL3021: u32 = 0xbcd3052;
const EL3204: u32 = 0xc843052;
const EL4002: u32 = 0xfa23052;
const EL5152: u32 = 0x14203052;
const EL6021: u32 = 0x17853052;
const EL7031: u32 = 0x1b773052;
const EL7041_0052: u32 = 0x1b813052;

const fn fp(vendor_id: u32, product_id: u32, revision: u32) -> DeviceFingerprint {
    DeviceFingerprint::new(vendor_id, product_id, revision)
}

fn role(role: u16, label: &str, allowed_devices: &[DeviceFingerprint]) -> DeviceRole {
    DeviceRole {
        role,
        role_label: label.to_string(),
        allowed_devices: allowed_devices.to_vec(),
    }
}

fn machine(
    name: &str,
    version: &str,
    slug: &str,
    icon: &str,
    machine: u16,
    device_roles: Vec<DeviceRole>,
) -> MachineProperties {
    MachineProperties {
        name: name.to_string(),
        version: version.to_string(),
        slug: slug.to_string(),
        icon: icon.to_string(),
        machine_identification: MachineIdentification::new(VENDOR_QITECH, machine),
        device_roles,
    }
}

fn bus_coupler() -> DeviceRole {
    role(0, "Bus Coupler", &[fp(BECKHOFF, EK1100, 0x120000)])
}

pub fn builtin_vendors() -> Vec<VendorProperties> {
    vec![VendorProperties {
        id: VENDOR_QITECH,
        name: "QiTech Industries GmbH".to_string(),
    }]
}

/// The machine catalog shipped with the client
pub fn builtin_machines() -> Vec<MachineProperties> {
    let inverter = [
        fp(BECKHOFF, EL6021, 0x150000),
        fp(BECKHOFF, EL6021, 0x140000),
        fp(BECKHOFF, EL6021, 0x160000),
        fp(BECKHOFF, EL6021, 0x100000),
    ];
    let heating = [fp(BECKHOFF, EL2004, 0x120000)];
    let pressure = [fp(BECKHOFF, EL3021, 0x140000)];
    let thermometers = [fp(BECKHOFF, EL3204, 0x160000), fp(BECKHOFF, EL3204, 0x150000)];

    vec![
        machine(
            "Winder",
            "V2",
            "winder2",
            "lu:Disc3",
            MACHINE_WINDER_V2,
            vec![
                bus_coupler(),
                role(
                    1,
                    "2x Digital Output",
                    &[fp(BECKHOFF, EL2002, 0x110000), fp(BECKHOFF, EL2002, 0x120000)],
                ),
                role(2, "1x Stepper Spool", &[fp(BECKHOFF, EL7041_0052, 0x100034)]),
                role(
                    3,
                    "1x Stepper Traverse",
                    &[fp(BECKHOFF, EL7031, 0x1a0000), fp(BECKHOFF, EL7031, 0x190000)],
                ),
                role(4, "1x Stepper Puller", &[fp(BECKHOFF, EL7031, 0x10001e)]),
            ],
        ),
        machine(
            "Extruder V3",
            "V3",
            "extruder3",
            "qi:Extruder",
            MACHINE_EXTRUDER_V3,
            vec![
                bus_coupler(),
                role(1, "Inverter Interface", &inverter),
                role(2, "Heating Elements", &heating),
                role(3, "Pressure Sensor", &pressure),
                role(4, "Thermometers", &thermometers),
            ],
        ),
        machine(
            "Extruder",
            "V2",
            "extruder2",
            "qi:Extruder",
            MACHINE_EXTRUDER_V2,
            vec![
                bus_coupler(),
                role(1, "Digital Input", &[fp(BECKHOFF, EL1002, 0x120000)]),
                role(2, "Inverter Interface", &inverter),
                role(3, "Heating Elements", &heating),
                role(4, "Pressure Sensor", &pressure),
                role(5, "Thermometers", &thermometers),
            ],
        ),
        machine("Laser", "V1", "laser1", "lu:Sun", MACHINE_LASER_V1, vec![]),
        machine("Mock", "V1", "mock1", "lu:FlaskConical", MACHINE_MOCK, vec![]),
        machine(
            "Buffer",
            "V1",
            "buffer1",
            "lu:Disc3",
            MACHINE_BUFFER_V1,
            vec![
                bus_coupler(),
                role(1, "1x Stepper Spool", &[fp(BECKHOFF, EL7041_0052, 0x100034)]),
                role(2, "1x Stepper Puller", &[fp(BECKHOFF, EL7031, 0x10001e)]),
            ],
        ),
        machine(
            "Aquapath",
            "V1",
            "aquapath1",
            "lu:Waves",
            MACHINE_AQUAPATH_V1,
            vec![
                bus_coupler(),
                role(1, "EL2008", &[fp(BECKHOFF, EL2008, 0x110000)]),
                role(2, "EL4002", &[fp(BECKHOFF, EL4002, 0x140000)]),
                role(3, "EL3204", &[fp(BECKHOFF, EL3204, 0x160000)]),
                role(4, "EL5152", &[fp(BECKHOFF, EL5152, 0x140000)]),
            ],
        ),
        machine(
            "TestMachine",
            "V1",
            "testmachine",
            "lu:Disc3",
            TEST_MACHINE,
            vec![
                bus_coupler(),
                role(
                    1,
                    "EL2004",
                    &[fp(BECKHOFF, EL2004, 0x120000), fp(BECKHOFF, EL2004, 0x110000)],
                ),
            ],
        ),
        machine(
            "TestEL2008",
            "V1",
            "testel2008machine",
            "lu:Disc3",
            TEST_EL2008_MACHINE,
            vec![
                bus_coupler(),
                role(
                    1,
                    "EL2008",
                    &[
                        fp(BECKHOFF, EL2008, 0x110000),
                        fp(BECKHOFF, EL2008, 0x120000),
                        fp(BECKHOFF, EL2008, 0x100000),
                    ],
                ),
            ],
        ),
        machine(
            "AnalogTest",
            "V1",
            "analogInputTestMachine",
            "lu:Clock",
            ANALOG_INPUT_TEST_MACHINE,
            vec![bus_coupler(), role(1, "EL3021", &[fp(BECKHOFF, EL3021, 0x140000)])],
        ),
        machine(
            "IP20 Test",
            "V1",
            "ip20testmachine",
            "lu:ToggleLeft",
            IP20_TEST_MACHINE,
            vec![role(0, "IP20-EC-DI8-DO8", &[fp(0x741, 0x117b6722, 0x1)])],
        ),
    ]
}
