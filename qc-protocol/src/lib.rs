use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum encoded message size for a single framed line (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Maximum length of a mutation action name
const MAX_ACTION_LENGTH: usize = 64;

/// Maximum length of an event name
const MAX_EVENT_NAME_LENGTH: usize = 64;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// ============================================================================
// Machine Identity
// ============================================================================

/// Identifies a machine type (vendor + machine model)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MachineIdentification {
    pub vendor: u16,
    pub machine: u16,
}

impl MachineIdentification {
    pub const fn new(vendor: u16, machine: u16) -> Self {
        Self { vendor, machine }
    }

    /// Check if values are non-zero
    pub const fn is_valid(&self) -> bool {
        self.vendor != 0 && self.machine != 0
    }
}

impl fmt::Display for MachineIdentification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vendor, self.machine)
    }
}

/// Identifies one physical machine: the machine type plus the unit serial.
///
/// This is the only addressing key for namespaces and mutations. Equality is
/// field-wise; nothing else about the tuple should be interpreted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MachineIdentificationUnique {
    pub machine_identification: MachineIdentification,
    pub serial: u16,
}

impl MachineIdentificationUnique {
    pub const fn new(machine_identification: MachineIdentification, serial: u16) -> Self {
        Self {
            machine_identification,
            serial,
        }
    }

    /// The all-zero identity used when an address could not be resolved
    pub const fn inert() -> Self {
        Self {
            machine_identification: MachineIdentification::new(0, 0),
            serial: 0,
        }
    }

    /// Check if values are non-zero
    pub const fn is_valid(&self) -> bool {
        self.machine_identification.is_valid() && self.serial != 0
    }
}

impl fmt::Display for MachineIdentificationUnique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.machine_identification.vendor, self.machine_identification.machine, self.serial
        )
    }
}

// ============================================================================
// Field-bus Device Identity
// ============================================================================

/// Hardware identity reported by a field-bus slave
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceFingerprint {
    pub vendor_id: u32,
    pub product_id: u32,
    pub revision: u32,
}

impl DeviceFingerprint {
    pub const fn new(vendor_id: u32, product_id: u32, revision: u32) -> Self {
        Self {
            vendor_id,
            product_id,
            revision,
        }
    }
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x}:{:#x}:{:#x}",
            self.vendor_id, self.product_id, self.revision
        )
    }
}

/// Machine assignment written into a device's EEPROM during commissioning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceMachineIdentification {
    pub machine_identification_unique: MachineIdentificationUnique,
    pub role: u16,
}

impl DeviceMachineIdentification {
    /// Check if values are non-zero
    pub const fn is_valid(&self) -> bool {
        self.machine_identification_unique.is_valid()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceHardwareIdentification {
    Ethercat(DeviceHardwareIdentificationEthercat),
    Serial(DeviceHardwareIdentificationSerial),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceHardwareIdentificationEthercat {
    pub subdevice_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceHardwareIdentificationSerial {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub device_machine_identification: Option<DeviceMachineIdentification>,
    pub device_hardware_identification: DeviceHardwareIdentification,
}

/// Metadata the server publishes for every device found on the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub configured_address: u16,
    pub name: String,
    #[serde(flatten)]
    pub fingerprint: DeviceFingerprint,
    pub device_identification: DeviceIdentification,
}

impl DiscoveredDevice {
    /// The machine assignment, if one was written and is non-zero
    pub fn assignment(&self) -> Option<&DeviceMachineIdentification> {
        self.device_identification
            .device_machine_identification
            .as_ref()
            .filter(|id| id.is_valid())
    }
}

// ============================================================================
// Namespaces and Inbound Events
// ============================================================================

/// A named event pushed by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event<T> {
    pub name: String,
    pub data: T,
}

/// An event whose payload has not been validated yet
pub type RawEvent = Event<Value>;

impl<T> Event<T> {
    pub fn new(name: impl Into<String>, data: T) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// An inbound event scoped to one machine namespace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamespacedEvent {
    pub machine_identification_unique: MachineIdentificationUnique,
    #[serde(flatten)]
    pub event: RawEvent,
}

// ============================================================================
// Outbound Mutations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationData {
    pub action: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationEnvelope {
    pub machine_identification_unique: MachineIdentificationUnique,
    pub data: MutationData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationRequest {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    #[serde(flatten)]
    pub envelope: MutationEnvelope,
}

impl MutationRequest {
    pub fn new(envelope: MutationEnvelope) -> Self {
        Self {
            id: generate_request_id(),
            envelope,
        }
    }

    pub fn with_id(envelope: MutationEnvelope, id: u64) -> Self {
        Self { id, envelope }
    }

    pub fn target(&self) -> &MachineIdentificationUnique {
        &self.envelope.machine_identification_unique
    }

    pub fn action(&self) -> &str {
        &self.envelope.data.action
    }
}

impl MutationData {
    /// Split an adjacently tagged mutation (`{"action": .., "value": ..}`)
    /// into the envelope shape. Unit actions carry `null`.
    pub fn encode<M: Serialize>(mutation: &M) -> Result<Self, String> {
        let value = serde_json::to_value(mutation)
            .map_err(|e| format!("Failed to serialize mutation: {}", e))?;

        let Value::Object(mut map) = value else {
            return Err("Mutation must serialize to an object".into());
        };

        let action = match map.remove("action") {
            Some(Value::String(action)) => action,
            _ => return Err("Mutation is missing a string `action` tag".into()),
        };
        validate_action_name(&action)?;

        Ok(Self {
            action,
            value: map.remove("value").unwrap_or(Value::Null),
        })
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Encode a message as one newline-terminated JSON line
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, String> {
    let mut json =
        serde_json::to_vec(message).map_err(|e| format!("Failed to serialize message: {}", e))?;
    json.push(b'\n');

    if json.len() > MAX_MESSAGE_SIZE {
        return Err(format!(
            "Message too large: {} bytes (max {} bytes)",
            json.len(),
            MAX_MESSAGE_SIZE
        ));
    }

    Ok(json)
}

/// Decode one JSON line, tolerating the trailing newline
pub fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<T, String> {
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(format!(
            "Message too large: {} bytes (max {} bytes)",
            line.len(),
            MAX_MESSAGE_SIZE
        ));
    }

    let trimmed = line.strip_suffix(b"\n").unwrap_or(line);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    serde_json::from_slice(trimmed).map_err(|e| format!("Failed to parse message: {}", e))
}

// ============================================================================
// Validation
// ============================================================================

pub fn validate_action_name(action: &str) -> Result<(), String> {
    validate_identifier("Action", action, MAX_ACTION_LENGTH)
}

pub fn validate_event_name(name: &str) -> Result<(), String> {
    validate_identifier("Event name", name, MAX_EVENT_NAME_LENGTH)
}

fn validate_identifier(kind: &str, value: &str, max_len: usize) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} cannot be empty", kind));
    }

    if value.len() > max_len {
        return Err(format!(
            "{} too long: {} > {} chars",
            kind,
            value.len(),
            max_len
        ));
    }

    if let Some(c) = value.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(format!("{} contains invalid character: {:?}", kind, c));
    }

    Ok(())
}
