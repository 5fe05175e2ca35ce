//! Unified error handling for QiTech Control
//!
//! This crate provides the single error type shared by every client component.
//! Variants are grouped by the layer that raises them so callers can decide
//! locally whether a failure is fatal for the current event, recoverable, or
//! only worth a log line.

use std::io;
use std::path::PathBuf;

/// Result type alias using ControlError
pub type Result<T> = std::result::Result<T, ControlError>;

/// Unified error type for all client operations
#[derive(thiserror::Error, Debug)]
pub enum ControlError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // ============================================================================
    // Configuration and Registry Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid device registry: {0}")]
    Registry(String),

    #[error("Invalid device assignment: {0}")]
    DeviceAssignment(String),

    // ============================================================================
    // Addressing Errors
    // ============================================================================
    #[error("\"{input}\" is not a valid serial number")]
    InvalidSerial {
        input: String,
    },

    #[error("Machine address {target} is not a valid target")]
    InvalidAddress {
        target: String,
    },

    #[error("Mutation for machine type {expected} addressed to {actual}")]
    AddressMismatch {
        expected: String,
        actual: String,
    },

    // ============================================================================
    // Inbound Event Errors
    // ============================================================================
    #[error("Event {event} failed schema validation: {reason}")]
    SchemaValidation {
        event: String,
        reason: String,
    },

    #[error("Malformed inbound message: {0}")]
    MalformedMessage(String),

    #[error("Unhandled event: {event}")]
    UnhandledEvent {
        event: String,
    },

    #[error("No namespace handler registered for machine type {machine_identification}")]
    UnknownMachineType {
        machine_identification: String,
    },

    // ============================================================================
    // Outbound Mutation Errors
    // ============================================================================
    #[error("Invalid mutation action: {0}")]
    InvalidAction(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Target unreachable: {target}")]
    TargetUnreachable {
        target: String,
    },

    // ============================================================================
    // Runtime Errors
    // ============================================================================
    #[error("Sync loop is not running")]
    ChannelClosed,
}

impl ControlError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a registry error from a string
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a transport error from a string
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a schema validation error for an inbound event
    pub fn schema(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaValidation {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Create an unhandled event error
    pub fn unhandled(event: impl Into<String>) -> Self {
        Self::UnhandledEvent {
            event: event.into(),
        }
    }

    /// A broken client/server contract. The offending event must be surfaced,
    /// never retried or masked.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SchemaValidation { .. })
    }

    /// Failures the caller can report and carry on from without tearing down
    /// the sync pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidSerial { .. }
                | Self::InvalidAddress { .. }
                | Self::AddressMismatch { .. }
                | Self::MalformedMessage(_)
                | Self::UnhandledEvent { .. }
                | Self::UnknownMachineType { .. }
                | Self::InvalidAction(_)
                | Self::MessageTooLarge { .. }
                | Self::Transport(_)
                | Self::TargetUnreachable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_schema_failures_are_fatal() {
        assert!(ControlError::schema("StateEvent", "missing field `mode`").is_fatal());
        assert!(!ControlError::unhandled("Unknown").is_fatal());
        assert!(!ControlError::transport("socket closed").is_fatal());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(ControlError::unhandled("Unknown").is_recoverable());
        assert!(ControlError::TargetUnreachable { target: "1/54/7".into() }.is_recoverable());
        assert!(ControlError::InvalidSerial { input: "abc".into() }.is_recoverable());
        assert!(ControlError::MalformedMessage("expected value".into()).is_recoverable());
        assert!(!ControlError::schema("StateEvent", "bad").is_recoverable());
        assert!(!ControlError::registry("duplicate slug").is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = ControlError::InvalidSerial { input: "12x".into() };
        assert_eq!(err.to_string(), "\"12x\" is not a valid serial number");

        let err = ControlError::schema("StateEvent", "invalid length 7");
        assert_eq!(
            err.to_string(),
            "Event StateEvent failed schema validation: invalid length 7"
        );
    }
}
