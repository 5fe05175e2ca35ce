//! QiTech Control Core Library
//!
//! Client-side state synchronization for a fleet of industrial machines.
//!
//! # Features
//!
//! - **Device Registry**: Static catalog of machine types and the field-bus devices they accept
//! - **Fingerprint Matching**: Per-role validation of discovered vendor/product/revision triples
//! - **Commissioning Checks**: Grouping of discovered devices and role assignment reports
//! - **Namespaces**: One throttled, fan-out state store per physical machine
//! - **Optimistic Overlay**: Instant local projections, always superseded by the server
//! - **Mutations**: Typed, per-machine action vocabularies addressed to one physical unit
//!
//! # Module Structure
//!
//! - `registry/` - Machine catalog, fingerprint matcher, commissioning checks
//! - `namespace/` - Event tables, throttle, stores, router and the sync loop actor
//! - `machines/` - Concrete machine types and their controllers
//!
//! # Example
//!
//! ```no_run
//! use qc_core::{registry, match_roles, DeviceFingerprint};
//!
//! let winder = registry().lookup_slug("winder2").unwrap();
//! let fp = DeviceFingerprint::new(2, 0x1b813052, 0x100034);
//! let fits = match_roles(&fp, Some(&winder.device_roles));
//! assert_eq!(fits, vec![false, false, true, false, false]);
//! ```

// Grouped modules
pub mod machines;
pub mod namespace;
pub mod registry;

// Standalone modules
pub mod addressing;
pub mod constants;
pub mod error;
pub mod mutation;
pub mod optimistic;
pub mod settings;

// Re-export error types
pub use error::{ControlError, Result};

// Re-export wire identities
pub use qc_protocol::{
    DeviceFingerprint, DiscoveredDevice, MachineIdentification, MachineIdentificationUnique,
    MutationRequest, NamespacedEvent, RawEvent,
};

// Re-export registry
pub use registry::{
    check_assignment, group_devices_by_identification, init_registry, load_registry, match_roles,
    matching_roles, registry, role_accepts, AssignmentReport, DeviceRegistry, DeviceRole,
    MachineProperties, VendorProperties,
};

// Re-export namespace runtime
pub use namespace::{
    Commit, EventRouter, EventTable, MachineNamespace, Subscription, SyncHandle, SyncLoop,
};

// Re-export overlay, mutations and machines
pub use addressing::{resolve_machine_address, ResolvedAddress, UserNotice};
pub use machines::{MachineController, TestEl2008Controller, TestEl2008Machine, TestMachine};
pub use mutation::{ChannelTransport, LineTransport, MutationDispatcher, MutationTransport};
pub use optimistic::{OptimisticOverlay, OptimisticState};

// Re-export settings
pub use settings::{
    get_cached_settings, invalidate_settings_cache, load_settings, save_settings, ClientSettings,
};
