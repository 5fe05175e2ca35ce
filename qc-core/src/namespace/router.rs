//! Routes inbound events to the hub of the addressed machine type

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use qc_protocol::{MachineIdentification, MachineIdentificationUnique, NamespacedEvent};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::dispatcher::MachineNamespace;
use super::hub::{NamespaceHub, NamespaceSink};
use super::store::{ReleaseSignal, Subscription};
use crate::error::{ControlError, Result};
use crate::machines::{TestEl2008Machine, TestMachine};

pub struct EventRouter {
    interval: Duration,
    hubs: HashMap<MachineIdentification, Box<dyn NamespaceSink>>,
    release: ReleaseSignal,
    released: mpsc::UnboundedReceiver<MachineIdentificationUnique>,
}

impl EventRouter {
    pub fn new(interval: Duration) -> Self {
        let (release, released) = ReleaseSignal::channel();
        Self {
            interval,
            hubs: HashMap::new(),
            release,
            released,
        }
    }

    /// A router knowing every machine type with a client namespace
    pub fn with_default_machines(interval: Duration) -> Self {
        let mut router = Self::new(interval);
        router.register::<TestEl2008Machine>();
        router.register::<TestMachine>();
        router
    }

    /// Register the hub for `M`. Registering twice keeps the existing hub.
    pub fn register<M: MachineNamespace>(&mut self) -> &mut Self {
        let interval = self.interval;
        let release = self.release.clone();
        self.hubs.entry(M::MACHINE_IDENTIFICATION).or_insert_with(|| {
            debug!(machine = M::SLUG, "Registered namespace hub");
            Box::new(NamespaceHub::<M>::with_release(interval, Some(release)))
        });
        self
    }

    pub fn is_registered(&self, machine_identification: &MachineIdentification) -> bool {
        self.hubs.contains_key(machine_identification)
    }

    pub fn hub<M: MachineNamespace>(&self) -> Result<&NamespaceHub<M>> {
        self.hubs
            .get(&M::MACHINE_IDENTIFICATION)
            .and_then(|hub| hub.as_any().downcast_ref::<NamespaceHub<M>>())
            .ok_or_else(|| unknown_machine(&M::MACHINE_IDENTIFICATION))
    }

    pub fn hub_mut<M: MachineNamespace>(&mut self) -> Result<&mut NamespaceHub<M>> {
        self.hubs
            .get_mut(&M::MACHINE_IDENTIFICATION)
            .and_then(|hub| hub.as_any_mut().downcast_mut::<NamespaceHub<M>>())
            .ok_or_else(|| unknown_machine(&M::MACHINE_IDENTIFICATION))
    }

    /// Subscribe to one machine of type `M`.
    ///
    /// The inert identity is accepted so a page with an unparsable address
    /// still gets a (permanently empty) subscription.
    pub fn subscribe<M: MachineNamespace>(
        &mut self,
        key: MachineIdentificationUnique,
    ) -> Result<Subscription<M::State>> {
        check_key::<M>(&key)?;
        Ok(self.hub_mut::<M>()?.subscribe(key))
    }

    pub fn current<M: MachineNamespace>(
        &self,
        key: &MachineIdentificationUnique,
    ) -> Result<Option<Arc<M::State>>> {
        Ok(self.hub::<M>()?.current(key))
    }

    pub fn route(&mut self, event: &NamespacedEvent, now: Instant) -> Result<()> {
        let key = event.machine_identification_unique;
        let Some(hub) = self.hubs.get_mut(&key.machine_identification) else {
            warn!(namespace = %key, event = %event.event.name, "No hub for machine type");
            return Err(unknown_machine(&key.machine_identification));
        };
        hub.handle_event(key, &event.event, now)
    }

    pub fn flush_due(&mut self, now: Instant) -> usize {
        self.hubs.values_mut().map(|hub| hub.flush_due(now)).sum()
    }

    pub fn flush_all(&mut self) -> usize {
        self.hubs.values_mut().map(|hub| hub.flush_all()).sum()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.hubs.values().filter_map(|hub| hub.next_deadline()).min()
    }

    pub fn namespace_count(&self) -> usize {
        self.hubs.values().map(|hub| hub.namespace_count()).sum()
    }

    /// Notified each time a subscription handed out by this router is dropped
    pub fn release_notifier(&self) -> Arc<Notify> {
        self.release.notifier()
    }

    /// Discard every store whose last subscriber has been dropped since the
    /// previous call. Returns the number of stores discarded.
    pub fn release_detached(&mut self) -> usize {
        let mut released = 0;
        while let Ok(key) = self.released.try_recv() {
            for hub in self.hubs.values_mut() {
                if hub.release(&key) {
                    released += 1;
                }
            }
        }
        released
    }
}

fn check_key<M: MachineNamespace>(key: &MachineIdentificationUnique) -> Result<()> {
    if *key == MachineIdentificationUnique::inert()
        || key.machine_identification == M::MACHINE_IDENTIFICATION
    {
        return Ok(());
    }
    Err(ControlError::AddressMismatch {
        expected: M::MACHINE_IDENTIFICATION.to_string(),
        actual: key.to_string(),
    })
}

fn unknown_machine(machine_identification: &MachineIdentification) -> ControlError {
    ControlError::UnknownMachineType {
        machine_identification: machine_identification.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_protocol::RawEvent;
    use serde_json::json;

    const WINDOW: Duration = Duration::from_millis(33);

    fn test_machine(serial: u16) -> MachineIdentificationUnique {
        MachineIdentificationUnique::new(TestMachine::MACHINE_IDENTIFICATION, serial)
    }

    fn leds(key: MachineIdentificationUnique, on: [bool; 4]) -> NamespacedEvent {
        NamespacedEvent {
            machine_identification_unique: key,
            event: RawEvent::new("StateEvent", json!({ "led_on": on })),
        }
    }

    #[test]
    fn test_routes_by_machine_type_and_serial() {
        let start = Instant::now();
        let mut router = EventRouter::with_default_machines(WINDOW);
        let mut one = router.subscribe::<TestMachine>(test_machine(1)).unwrap();
        let mut two = router.subscribe::<TestMachine>(test_machine(2)).unwrap();

        router
            .route(&leds(test_machine(1), [true, false, false, false]), start)
            .unwrap();
        router
            .route(&leds(test_machine(2), [false, true, false, false]), start)
            .unwrap();
        assert_eq!(router.flush_due(start + WINDOW), 2);

        assert_eq!(one.try_recv().unwrap().value.led_on, [true, false, false, false]);
        assert_eq!(two.try_recv().unwrap().value.led_on, [false, true, false, false]);
    }

    #[test]
    fn test_unknown_machine_type_is_soft_error() {
        let mut router = EventRouter::with_default_machines(WINDOW);
        let stranger =
            MachineIdentificationUnique::new(MachineIdentification::new(1, 0x0002), 1);
        let err = router
            .route(&leds(stranger, [false; 4]), Instant::now())
            .unwrap_err();
        assert!(matches!(err, ControlError::UnknownMachineType { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_subscribe_checks_machine_type() {
        let mut router = EventRouter::with_default_machines(WINDOW);
        let el2008 =
            MachineIdentificationUnique::new(TestEl2008Machine::MACHINE_IDENTIFICATION, 1);
        assert!(matches!(
            router.subscribe::<TestMachine>(el2008),
            Err(ControlError::AddressMismatch { .. })
        ));

        let inert = router
            .subscribe::<TestMachine>(MachineIdentificationUnique::inert())
            .unwrap();
        assert!(inert.current().is_none());
    }

    #[test]
    fn test_unregistered_hub() {
        let mut router = EventRouter::new(WINDOW);
        assert!(router.subscribe::<TestMachine>(test_machine(1)).is_err());
        router.register::<TestMachine>().register::<TestMachine>();
        assert!(router.is_registered(&TestMachine::MACHINE_IDENTIFICATION));
        assert!(router.subscribe::<TestMachine>(test_machine(1)).is_ok());
    }

    #[test]
    fn test_dropped_subscriptions_are_released() {
        let mut router = EventRouter::with_default_machines(WINDOW);
        let one = router.subscribe::<TestMachine>(test_machine(1)).unwrap();
        let _two = router.subscribe::<TestMachine>(test_machine(2)).unwrap();
        let inert = router
            .subscribe::<TestMachine>(MachineIdentificationUnique::inert())
            .unwrap();
        assert_eq!(router.namespace_count(), 3);

        drop(one);
        drop(inert);
        assert_eq!(router.release_detached(), 2);
        assert_eq!(router.namespace_count(), 1);
        assert_eq!(router.release_detached(), 0);
    }
}
