//! Namespaced state synchronization
//!
//! One namespace per physical machine. Inbound events are validated against the
//! machine type's event table, reduced, coalesced by a throttle and committed to
//! the namespace store, which fans the commit out to every subscriber.
//!
//! ```text
//! NamespacedEvent -> EventRouter -> NamespaceHub<M> -> EventTable (validate)
//!                                                   -> Throttle   (coalesce)
//!                                                   -> NamespaceStore (commit)
//!                                                   -> Subscription x N
//! ```

pub mod dispatcher;
pub mod hub;
pub mod router;
pub mod store;
pub mod sync_loop;
pub mod throttle;

pub use dispatcher::{EventTable, MachineNamespace};
pub use hub::{NamespaceHub, NamespaceSink};
pub use router::EventRouter;
pub use store::{Commit, NamespaceStore, Subscription};
pub use sync_loop::{SyncHandle, SyncLoop};
pub use throttle::Throttle;
