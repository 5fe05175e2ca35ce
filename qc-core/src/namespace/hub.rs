//! Per machine type namespace hub
//!
//! Owns the stores and throttles of every observed machine of one type and
//! drives inbound events through dispatch, throttling and commit.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use qc_protocol::{MachineIdentification, MachineIdentificationUnique, RawEvent};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::dispatcher::{EventTable, MachineNamespace};
use super::store::{NamespaceStore, ReleaseSignal, Subscription};
use super::throttle::Throttle;
use crate::error::Result;

struct Namespace<S> {
    store: NamespaceStore<S>,
    throttle: Throttle<S>,
}

pub struct NamespaceHub<M: MachineNamespace> {
    table: EventTable<M::State>,
    interval: Duration,
    namespaces: HashMap<MachineIdentificationUnique, Namespace<M::State>>,
    release: Option<ReleaseSignal>,
}

impl<M: MachineNamespace> NamespaceHub<M> {
    pub fn new(interval: Duration) -> Self {
        Self::with_release(interval, None)
    }

    pub(crate) fn with_release(interval: Duration, release: Option<ReleaseSignal>) -> Self {
        Self {
            table: M::event_table(),
            interval,
            namespaces: HashMap::new(),
            release,
        }
    }

    /// Subscribe to `key`, creating its store on first use.
    ///
    /// A store left behind by earlier subscribers is replaced, never revived.
    pub fn subscribe(&mut self, key: MachineIdentificationUnique) -> Subscription<M::State> {
        self.release(&key);

        let interval = self.interval;
        let release = self.release.clone();
        let namespace = self.namespaces.entry(key).or_insert_with(|| {
            debug!(namespace = %key, machine = M::SLUG, "Created namespace store");
            Namespace {
                store: NamespaceStore::with_release(key, release),
                throttle: Throttle::new(interval),
            }
        });
        namespace.store.subscribe()
    }

    /// Discard the store for `key` once its last subscriber is gone.
    ///
    /// Returns whether a store was discarded.
    pub fn release(&mut self, key: &MachineIdentificationUnique) -> bool {
        let orphaned = self
            .namespaces
            .get(key)
            .is_some_and(|ns| ns.store.is_orphaned());
        if orphaned {
            debug!(namespace = %key, "Released namespace store");
            self.namespaces.remove(key);
        }
        orphaned
    }

    pub fn current(&self, key: &MachineIdentificationUnique) -> Option<Arc<M::State>> {
        self.namespaces.get(key).and_then(|ns| ns.store.current())
    }

    /// Validate `event`, reduce it and stage the result for the next commit
    pub fn handle_event(
        &mut self,
        key: MachineIdentificationUnique,
        event: &RawEvent,
        now: Instant,
    ) -> Result<()> {
        if let Err(err) = self.table.accepts(&event.name) {
            if err.is_fatal() {
                error!(
                    namespace = %key,
                    event = %event.name,
                    error = %err,
                    "Rejected inbound event"
                );
            } else {
                warn!(namespace = %key, event = %event.name, "Unhandled event");
            }
            return Err(err);
        }

        let Some(namespace) = self.namespaces.get_mut(&key) else {
            trace!(namespace = %key, event = %event.name, "Dropped event for unobserved namespace");
            return Ok(());
        };

        if namespace.store.is_orphaned() {
            debug!(namespace = %key, "Discarded namespace store without subscribers");
            self.namespaces.remove(&key);
            return Ok(());
        }

        let current = namespace.store.current();
        let base = namespace.throttle.pending().or(current.as_deref());

        let next = self.table.dispatch(event, base).map_err(|err| {
            error!(namespace = %key, event = %event.name, error = %err, "Rejected inbound event");
            err
        })?;

        namespace.throttle.offer(next, now);
        Ok(())
    }

    /// Commit every namespace whose throttle window has elapsed
    pub fn flush_due(&mut self, now: Instant) -> usize {
        let mut commits = 0;
        for namespace in self.namespaces.values_mut() {
            if let Some(value) = namespace.throttle.poll(now) {
                namespace.store.commit(value);
                commits += 1;
            }
        }
        self.prune();
        commits
    }

    /// Commit everything staged, ignoring throttle windows
    pub fn flush_all(&mut self) -> usize {
        let mut commits = 0;
        for namespace in self.namespaces.values_mut() {
            if let Some(value) = namespace.throttle.flush() {
                namespace.store.commit(value);
                commits += 1;
            }
        }
        self.prune();
        commits
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.namespaces
            .values()
            .filter_map(|ns| ns.throttle.deadline())
            .min()
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    fn prune(&mut self) {
        self.namespaces.retain(|key, ns| {
            let live = !ns.store.is_orphaned();
            if !live {
                debug!(namespace = %key, "Discarded namespace store without subscribers");
            }
            live
        });
    }
}

/// Type-erased hub, so one router can hold every machine type
pub trait NamespaceSink: Send {
    fn machine_identification(&self) -> MachineIdentification;

    fn handle_event(
        &mut self,
        key: MachineIdentificationUnique,
        event: &RawEvent,
        now: Instant,
    ) -> Result<()>;

    fn flush_due(&mut self, now: Instant) -> usize;

    fn flush_all(&mut self) -> usize;

    fn next_deadline(&self) -> Option<Instant>;

    fn namespace_count(&self) -> usize;

    fn release(&mut self, key: &MachineIdentificationUnique) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<M: MachineNamespace> NamespaceSink for NamespaceHub<M> {
    fn machine_identification(&self) -> MachineIdentification {
        M::MACHINE_IDENTIFICATION
    }

    fn handle_event(
        &mut self,
        key: MachineIdentificationUnique,
        event: &RawEvent,
        now: Instant,
    ) -> Result<()> {
        NamespaceHub::handle_event(self, key, event, now)
    }

    fn flush_due(&mut self, now: Instant) -> usize {
        NamespaceHub::flush_due(self, now)
    }

    fn flush_all(&mut self) -> usize {
        NamespaceHub::flush_all(self)
    }

    fn next_deadline(&self) -> Option<Instant> {
        NamespaceHub::next_deadline(self)
    }

    fn namespace_count(&self) -> usize {
        NamespaceHub::namespace_count(self)
    }

    fn release(&mut self, key: &MachineIdentificationUnique) -> bool {
        NamespaceHub::release(self, key)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
