//! The process-wide registry accepts exactly one initialisation.
//!
//! Kept in its own test binary so no other test touches the global first.

use qc_core::{init_registry, registry, ControlError, DeviceRegistry};

#[test]
fn test_first_initialisation_wins() {
    let custom = DeviceRegistry::from_json(
        r#"{"machines": [{
            "name": "Bench",
            "version": "V1",
            "slug": "bench",
            "icon": "lu:Cog",
            "machine_identification": {"vendor": 1, "machine": 99}
        }]}"#,
    )
    .unwrap();

    let installed = init_registry(custom).unwrap();
    assert_eq!(installed.len(), 1);
    assert!(registry().lookup_slug("bench").is_some());
    assert!(registry().lookup_slug("winder2").is_none());

    let err = init_registry(DeviceRegistry::builtin()).unwrap_err();
    assert!(matches!(err, ControlError::Registry(_)));
    assert_eq!(registry().len(), 1);
}
