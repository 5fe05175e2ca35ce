//! Machine addressing from user input
//!
//! Control pages receive the serial number as text (a route parameter, a CLI
//! argument). Unparsable text never breaks the subscription pipeline: the page
//! gets the inert identity plus a notice to show the operator.

use qc_protocol::{MachineIdentification, MachineIdentificationUnique};
use tracing::warn;

use crate::error::ControlError;

/// Human-readable notice for the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub unique: MachineIdentificationUnique,
    pub notice: Option<UserNotice>,
}

impl ResolvedAddress {
    pub fn is_inert(&self) -> bool {
        self.unique == MachineIdentificationUnique::inert()
    }
}

/// Strict decimal serial number in `u16` range
pub fn parse_serial(text: &str) -> Result<u16, ControlError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ControlError::InvalidSerial {
            input: text.to_string(),
        });
    }
    trimmed.parse().map_err(|_| ControlError::InvalidSerial {
        input: text.to_string(),
    })
}

pub fn resolve_machine_address(
    machine_identification: MachineIdentification,
    serial_text: &str,
) -> ResolvedAddress {
    match parse_serial(serial_text) {
        Ok(serial) => ResolvedAddress {
            unique: MachineIdentificationUnique::new(machine_identification, serial),
            notice: None,
        },
        Err(err) => {
            warn!(machine = %machine_identification, error = %err, "Falling back to inert address");
            ResolvedAddress {
                unique: MachineIdentificationUnique::inert(),
                notice: Some(UserNotice {
                    title: "Invalid Serial Number".to_string(),
                    message: format!("\"{}\" is not a valid serial number.", serial_text),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EL2008: MachineIdentification = MachineIdentification::new(1, 0x36);

    #[test]
    fn test_valid_serial() {
        let resolved = resolve_machine_address(EL2008, " 42 ");
        assert_eq!(resolved.unique, MachineIdentificationUnique::new(EL2008, 42));
        assert!(resolved.notice.is_none());
        assert!(!resolved.is_inert());
    }

    #[test]
    fn test_invalid_serials_fall_back_to_inert() {
        for text in ["", "abc", "12x", "-3", "+7", "65536", "1.5"] {
            let resolved = resolve_machine_address(EL2008, text);
            assert!(resolved.is_inert(), "{text:?} should not resolve");
            let notice = resolved.notice.unwrap();
            assert_eq!(notice.title, "Invalid Serial Number");
            assert_eq!(notice.message, format!("\"{text}\" is not a valid serial number."));
        }
    }

    #[test]
    fn test_parse_serial_error() {
        let err = parse_serial("x1").unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "\"x1\" is not a valid serial number");
    }
}
