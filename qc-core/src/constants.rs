//! Constants and configuration values for QiTech Control
//!
//! Centralizes identities, timing defaults and paths so the rest of the crate
//! never carries magic numbers.

/// Vendor and machine type identifiers
pub mod ids {
    pub const VENDOR_QITECH: u16 = 0x0001;

    pub const MACHINE_WINDER_V2: u16 = 0x0002;
    pub const MACHINE_EXTRUDER_V2: u16 = 0x0004;
    pub const MACHINE_LASER_V1: u16 = 0x0006;
    pub const MACHINE_MOCK: u16 = 0x0007;
    pub const MACHINE_BUFFER_V1: u16 = 0x0008;
    pub const MACHINE_AQUAPATH_V1: u16 = 0x0009;
    pub const MACHINE_EXTRUDER_V3: u16 = 0x0016;
    pub const TEST_MACHINE: u16 = 0x0033;
    pub const IP20_TEST_MACHINE: u16 = 0x0034;
    pub const ANALOG_INPUT_TEST_MACHINE: u16 = 0x0035;
    pub const TEST_EL2008_MACHINE: u16 = 0x0036;
}

/// State synchronization timing
pub mod sync {
    /// Default minimum interval between two commits to a namespace store (~30 Hz)
    pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 33;

    /// Lower bound accepted from settings
    pub const MIN_THROTTLE_INTERVAL_MS: u64 = 1;

    /// Capacity of the inbound event channel feeding the sync loop
    pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

    /// Inbound event errors held for the error receiver before new ones are dropped
    pub const ERROR_CHANNEL_CAPACITY: usize = 64;
}

/// File system locations
pub mod paths {
    use std::path::PathBuf;

    /// Directory name below the platform config directory
    pub const APP_DIR: &str = "qitech-control";

    /// Settings file name
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Environment variable overriding the config directory
    pub const CONFIG_DIR_ENV: &str = "QC_CONFIG_DIR";

    /// User configuration directory
    pub fn user_config_dir() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            if !dir.is_empty() {
                return Some(PathBuf::from(dir));
            }
        }
        dirs::config_dir().map(|base| base.join(APP_DIR))
    }
}

/// Size limits for untrusted input
pub mod limits {
    /// Largest registry file accepted from disk (1 MiB)
    pub const MAX_REGISTRY_FILE_SIZE: u64 = 1024 * 1024;

    /// Largest settings file accepted from disk (256 KiB)
    pub const MAX_SETTINGS_FILE_SIZE: u64 = 256 * 1024;
}
