//! End-to-end behaviour of the client runtime: registry matching, the sync
//! loop, optimistic overlays and mutation delivery working together.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use qc_core::machines::test_el2008::{MachineState, Mode, StateEvent, LED_COUNT};
use qc_core::{
    match_roles, registry, resolve_machine_address, ChannelTransport, ControlError,
    DeviceFingerprint, DeviceRegistry, EventRouter, MachineIdentificationUnique, MachineNamespace,
    MutationDispatcher, MutationRequest, MutationTransport, NamespacedEvent, RawEvent, SyncLoop,
    TestEl2008Controller, TestEl2008Machine, TestMachine,
};
use serde_json::json;
use serial_test::serial;
use tempfile::TempDir;

const WINDOW: Duration = Duration::from_millis(33);

mockall::mock! {
    pub Transport {}

    impl MutationTransport for Transport {
        fn deliver(&self, request: &MutationRequest) -> qc_core::Result<()>;
    }
}

fn el2008(serial: u16) -> MachineIdentificationUnique {
    MachineIdentificationUnique::new(TestEl2008Machine::MACHINE_IDENTIFICATION, serial)
}

fn state(mode: &str, led0: bool) -> serde_json::Value {
    json!({
        "led_on": [led0, false, false, false, false, false, false, false],
        "mode": mode,
        "machine_state": "Stopped",
        "automatic_delay_ms": 100,
    })
}

fn state_event(key: MachineIdentificationUnique, data: serde_json::Value) -> NamespacedEvent {
    NamespacedEvent {
        machine_identification_unique: key,
        event: RawEvent::new("StateEvent", data),
    }
}

// ============================================================================
// Registry and matching
// ============================================================================

#[test]
fn test_winder_stepper_fingerprint_matches_spool_role_only() {
    let winder = registry().lookup_slug("winder2").unwrap();
    assert_eq!(winder.machine_identification.vendor, 0x0001);
    assert_eq!(winder.machine_identification.machine, 0x0002);

    let fp = DeviceFingerprint::new(2, 0x1b813052, 0x100034);
    let fits = match_roles(&fp, Some(&winder.device_roles));

    assert_eq!(fits.len(), winder.device_roles.len());
    for (index, fit) in fits.iter().enumerate() {
        assert_eq!(*fit, index == 2, "role {index}");
    }
    assert_eq!(winder.device_roles[2].role_label, "1x Stepper Spool");
}

#[test]
fn test_machine_without_roles_matches_nothing() {
    let fp = DeviceFingerprint::new(2, 0x1b813052, 0x100034);
    assert!(match_roles(&fp, None).is_empty());
    assert!(match_roles(&fp, Some(&[])).is_empty());
}

#[test]
fn test_custom_registry_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("registry.json");
    std::fs::write(
        &path,
        r#"{
            "machines": [{
                "name": "Bench",
                "version": "V1",
                "slug": "bench",
                "icon": "lu:Cog",
                "machine_identification": {"vendor": 1, "machine": 99},
                "device_roles": [{
                    "role": 0,
                    "role_label": "Coupler",
                    "allowed_devices": [
                        {"vendor_id": 2, "product_id": 72100946, "revision": 1114112}
                    ]
                }]
            }]
        }"#,
    )
    .unwrap();

    let custom = qc_core::load_registry(&path).unwrap();
    let bench = custom.lookup_slug("bench").unwrap();
    assert_eq!(
        match_roles(&DeviceFingerprint::new(2, 72100946, 1114112), Some(&bench.device_roles)),
        vec![true]
    );
    assert!(custom.lookup_vendor(1).is_some());
}

#[test]
fn test_duplicate_slug_is_rejected() {
    let mut machines: Vec<_> = DeviceRegistry::builtin().machines().cloned().collect();
    let mut copy = machines[0].clone();
    copy.machine_identification.machine = 999;
    machines.push(copy);

    let err = DeviceRegistry::new(machines, Vec::new()).unwrap_err();
    assert!(matches!(err, ControlError::Registry(_)));
}

// ============================================================================
// Sync loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unknown_event_leaves_store_unchanged() {
    let (handle, mut errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));
    let key = el2008(3);
    let mut sub = handle.subscribe::<TestEl2008Machine>(key).await.unwrap();

    handle.push(state_event(key, state("Manual", true))).await.unwrap();
    let first = sub.recv().await.unwrap();

    handle
        .push(NamespacedEvent {
            machine_identification_unique: key,
            event: RawEvent::new("Unknown", json!({})),
        })
        .await
        .unwrap();

    let err = errors.recv().await.unwrap();
    assert!(matches!(err, ControlError::UnhandledEvent { ref event } if event == "Unknown"));
    assert!(!err.is_fatal());

    tokio::time::sleep(WINDOW * 3).await;
    assert!(sub.try_recv().is_none());
    let current = handle.current::<TestEl2008Machine>(key).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&current, &first.value));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_schema_failure_is_reported_as_fatal() {
    let (handle, mut errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));
    let key = el2008(4);
    let _sub = handle.subscribe::<TestEl2008Machine>(key).await.unwrap();

    handle
        .push(state_event(key, json!({"led_on": "everything"})))
        .await
        .unwrap();

    let err = errors.recv().await.unwrap();
    assert!(err.is_fatal());
    assert_eq!(handle.current::<TestEl2008Machine>(key).await.unwrap(), None);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_two_subscribers_observe_identical_sequences() {
    let (handle, _errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));
    let key = el2008(5);
    let mut first = handle.subscribe::<TestEl2008Machine>(key).await.unwrap();
    let mut second = handle.subscribe::<TestEl2008Machine>(key).await.unwrap();

    for mode in ["Manual", "Home", "Automatic"] {
        handle.push(state_event(key, state(mode, false))).await.unwrap();
        tokio::time::sleep(WINDOW * 2).await;
    }

    let mut seen_first = Vec::new();
    let mut seen_second = Vec::new();
    for _ in 0..3 {
        seen_first.push(first.recv().await.unwrap());
        seen_second.push(second.recv().await.unwrap());
    }

    let modes: Vec<Mode> = seen_first.iter().map(|c| c.value.mode).collect();
    assert_eq!(modes, vec![Mode::Manual, Mode::Home, Mode::Automatic]);
    for (a, b) in seen_first.iter().zip(&seen_second) {
        assert_eq!(a.sequence, b.sequence);
        assert!(Arc::ptr_eq(&a.value, &b.value));
    }

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_burst_commits_once_per_window_with_final_value() {
    let (handle, _errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));
    let key = el2008(6);
    let mut sub = handle.subscribe::<TestEl2008Machine>(key).await.unwrap();

    for delay in 0..20u64 {
        let data = json!({
            "led_on": vec![false; LED_COUNT],
            "mode": "Manual",
            "machine_state": "Running",
            "automatic_delay_ms": delay,
        });
        handle.push(state_event(key, data)).await.unwrap();
    }

    let commit = sub.recv().await.unwrap();
    assert_eq!(commit.value.automatic_delay_ms, 19);
    assert_eq!(commit.value.machine_state, MachineState::Running);

    tokio::time::sleep(WINDOW * 3).await;
    assert!(sub.try_recv().is_none());

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_identical_states_do_not_report_change() {
    let (handle, _errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));
    let key = el2008(7);
    let mut sub = handle.subscribe::<TestEl2008Machine>(key).await.unwrap();

    handle.push(state_event(key, state("Home", true))).await.unwrap();
    let first = sub.recv().await.unwrap();
    assert!(first.changed);

    handle.push(state_event(key, state("Home", true))).await.unwrap();
    let second = sub.recv().await.unwrap();
    assert!(!second.changed);
    assert!(Arc::ptr_eq(&first.value, &second.value));
    assert!(second.sequence > first.sequence);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_namespaces_are_isolated_and_released() {
    let (handle, _errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));
    let a = el2008(8);
    let b = el2008(9);
    let mut sub_a = handle.subscribe::<TestEl2008Machine>(a).await.unwrap();
    let sub_b = handle.subscribe::<TestEl2008Machine>(b).await.unwrap();
    assert_eq!(handle.namespace_count().await.unwrap(), 2);

    handle.push(state_event(a, state("Automatic", true))).await.unwrap();
    sub_a.recv().await.unwrap();
    assert!(sub_b.current().is_none());

    drop(sub_b);
    handle.push(state_event(b, state("Manual", false))).await.unwrap();
    tokio::time::sleep(WINDOW * 2).await;
    assert_eq!(handle.namespace_count().await.unwrap(), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

// ============================================================================
// Controllers and optimistic state
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_optimistic_mode_is_superseded_by_server_state() {
    let (handle, _errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));
    let key = el2008(10);

    let mut transport = MockTransport::new();
    transport
        .expect_deliver()
        .withf(|req| {
            req.action() == "SetMode" && req.envelope.data.value == json!({"mode": "Automatic"})
        })
        .times(1)
        .returning(|_| Ok(()));

    let mut machine: TestEl2008Controller<MockTransport> =
        TestEl2008Controller::connect(&handle, key, MutationDispatcher::new(transport))
            .await
            .unwrap();

    handle.push(state_event(key, state("Manual", false))).await.unwrap();
    machine.changed().await.unwrap();

    machine.set_mode(Mode::Automatic).unwrap();
    assert_eq!(machine.state().unwrap().mode, Mode::Automatic);
    assert!(machine.overlay().state().is_optimistic());

    handle.push(state_event(key, state("Manual", false))).await.unwrap();
    machine.changed().await.unwrap();
    assert_eq!(machine.state().unwrap().mode, Mode::Manual);
    assert!(!machine.overlay().state().is_optimistic());

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_keeps_projection() {
    let (handle, _errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));
    let key = el2008(11);

    let (transport, outbox) = ChannelTransport::new();
    drop(outbox);
    let mut machine =
        TestEl2008Controller::connect(&handle, key, MutationDispatcher::new(transport))
            .await
            .unwrap();

    handle.push(state_event(key, state("Manual", false))).await.unwrap();
    machine.changed().await.unwrap();

    let err = machine.start().unwrap_err();
    assert!(matches!(err, ControlError::TargetUnreachable { .. }));
    assert!(err.is_recoverable());
    assert_eq!(machine.state().unwrap().machine_state, MachineState::Running);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_invalid_serial_gives_inert_controller() {
    let (handle, _errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));

    let resolved = resolve_machine_address(TestEl2008Machine::MACHINE_IDENTIFICATION, "abc");
    assert!(resolved.is_inert());
    assert_eq!(resolved.notice.unwrap().title, "Invalid Serial Number");

    let mut transport = MockTransport::new();
    transport.expect_deliver().never();
    let mut machine =
        TestEl2008Controller::connect(&handle, resolved.unique, MutationDispatcher::new(transport))
            .await
            .unwrap();

    assert!(machine.state().is_none());
    let err = machine.reset().unwrap_err();
    assert!(matches!(err, ControlError::InvalidAddress { .. }));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_subscribe_for_wrong_machine_type_is_rejected() {
    let (handle, _errors, task) = SyncLoop::spawn(EventRouter::with_default_machines(WINDOW));

    let err = handle.subscribe::<TestMachine>(el2008(12)).await.unwrap_err();
    assert!(matches!(err, ControlError::AddressMismatch { .. }));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(handle.is_closed());
}

#[test]
fn test_channel_outbox_carries_envelope() {
    let (transport, mut outbox) = ChannelTransport::new();
    let dispatcher = MutationDispatcher::new(transport);

    let id = dispatcher
        .send::<TestEl2008Machine>(
            el2008(13),
            &qc_core::machines::test_el2008::Mutation::SetLed { index: 7, on: true },
        )
        .unwrap();

    let request = outbox.try_recv().unwrap();
    assert_eq!(request.id, id);
    assert_eq!(request.target(), &el2008(13));
    assert_eq!(
        serde_json::to_value(&request.envelope.data).unwrap(),
        json!({"action": "SetLed", "value": {"index": 7, "on": true}})
    );
}

// ============================================================================
// Replay and settings
// ============================================================================

#[test]
fn test_replay_of_recorded_session() {
    let recording = [
        r#"{"at_ms": 0, "name": "StateEvent", "data": {"led_on": [true,false,false,false,false,false,false,false], "mode": "Manual", "machine_state": "Stopped", "automatic_delay_ms": 100}}"#,
        r#"{"at_ms": 100, "name": "StateEvent", "data": {"led_on": [true,false,false,false,false,false,false,false], "mode": "Manual", "machine_state": "Stopped", "automatic_delay_ms": 100}}"#,
        r#"{"at_ms": 200, "name": "StateEvent", "data": {"led_on": [true,true,false,false,false,false,false,false], "mode": "Automatic", "machine_state": "Running", "automatic_delay_ms": 100}}"#,
    ]
    .join("\n");

    let report = qitech_control::replay::replay::<TestEl2008Machine, _>(
        Cursor::new(recording),
        el2008(14),
        WINDOW,
    )
    .unwrap();

    assert!(report.errors.is_empty());
    let flags: Vec<bool> = report.commits.iter().map(|c| c.changed).collect();
    assert_eq!(flags, vec![true, false, true]);
    let last: &StateEvent = &report.commits[2].value;
    assert_eq!(last.mode, Mode::Automatic);
    assert_eq!(last.machine_state, MachineState::Running);
}

#[test]
#[serial]
fn test_settings_roundtrip_through_config_dir() {
    let dir = TempDir::new().unwrap();
    std::env::set_var("QC_CONFIG_DIR", dir.path());
    qc_core::invalidate_settings_cache();

    let mut settings = qc_core::load_settings().unwrap();
    assert_eq!(settings.sync.throttle_interval(), WINDOW);

    settings.sync.throttle_interval_ms = 50;
    settings.registry.path = Some(dir.path().join("registry.json"));
    qc_core::save_settings(&settings).unwrap();

    qc_core::invalidate_settings_cache();
    let reloaded = qc_core::get_cached_settings();
    assert_eq!(reloaded, settings);
    assert!(matches!(
        reloaded.registry.load(),
        Err(ControlError::FileNotFound(_))
    ));

    std::env::remove_var("QC_CONFIG_DIR");
    qc_core::invalidate_settings_cache();
}
