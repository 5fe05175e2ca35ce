//! Fingerprint Matching
//!
//! Decides which of a machine's declared roles a discovered bus device may
//! fill. Matching is exact on all three fingerprint fields; a device that fits
//! no role is an ordinary outcome and is reported as `false`, never as an error.

use qc_protocol::DeviceFingerprint;
use tracing::trace;

use super::properties::DeviceRole;

/// Whether `role` lists `fingerprint` among its allowed devices
pub fn role_accepts(role: &DeviceRole, fingerprint: &DeviceFingerprint) -> bool {
    role.allowed_devices.iter().any(|allowed| allowed == fingerprint)
}

/// Per-role membership of `fingerprint`, one entry per role in input order.
///
/// Absent roles yield an empty result. A machine type without roles is
/// vacuously satisfied, so callers must not read `[]` as a failure.
pub fn match_roles(fingerprint: &DeviceFingerprint, roles: Option<&[DeviceRole]>) -> Vec<bool> {
    let Some(roles) = roles else {
        return Vec::new();
    };

    let matches: Vec<bool> = roles
        .iter()
        .map(|role| role_accepts(role, fingerprint))
        .collect();

    trace!(fingerprint = %fingerprint, ?matches, "Matched device against role table");
    matches
}

/// Roles `fingerprint` could be assigned to
pub fn matching_roles<'a>(
    fingerprint: &DeviceFingerprint,
    roles: &'a [DeviceRole],
) -> Vec<&'a DeviceRole> {
    roles
        .iter()
        .filter(|role| role_accepts(role, fingerprint))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::builtin()
    }

    #[test]
    fn test_winder_stepper_spool_matches_only_its_role() {
        let registry = registry();
        let winder = registry.lookup_slug("winder2").unwrap();
        let fp = DeviceFingerprint::new(2, 0x1b813052, 0x100034);

        let result = match_roles(&fp, Some(&winder.device_roles));
        assert_eq!(result, vec![false, false, true, false, false]);
    }

    #[test]
    fn test_absent_roles_yield_empty() {
        let fp = DeviceFingerprint::new(2, 0x1b813052, 0x100034);
        assert!(match_roles(&fp, None).is_empty());
    }

    #[test]
    fn test_machines_without_roles_yield_empty() {
        let registry = registry();
        let fp = DeviceFingerprint::new(2, 0x44c2c52, 0x120000);
        for slug in ["laser1", "mock1"] {
            let machine = registry.lookup_slug(slug).unwrap();
            assert!(match_roles(&fp, Some(&machine.device_roles)).is_empty());
        }
    }

    #[test]
    fn test_result_length_and_membership_over_whole_registry() {
        let registry = registry();
        let fingerprints: Vec<DeviceFingerprint> = registry
            .machines()
            .flat_map(|m| m.device_roles.iter())
            .flat_map(|r| r.allowed_devices.iter().copied())
            .chain([DeviceFingerprint::new(0, 0, 0), DeviceFingerprint::new(2, 1, 1)])
            .collect();

        for machine in registry.machines() {
            for fp in &fingerprints {
                let result = match_roles(fp, Some(&machine.device_roles));
                assert_eq!(result.len(), machine.device_roles.len());
                for (i, role) in machine.device_roles.iter().enumerate() {
                    assert_eq!(result[i], role.allowed_devices.contains(fp));
                }
            }
        }
    }

    #[test]
    fn test_every_revision_variant_is_accepted() {
        let registry = registry();
        let extruder = registry.lookup_slug("extruder3").unwrap();
        let inverter = extruder.role(1).unwrap();
        assert_eq!(inverter.allowed_devices.len(), 4);
        for fp in &inverter.allowed_devices {
            assert!(role_accepts(inverter, fp));
        }

        // Same product, unlisted revision
        let unlisted = DeviceFingerprint::new(2, 394604626, 0x170000);
        assert!(!role_accepts(inverter, &unlisted));
    }

    #[test]
    fn test_partial_field_match_is_rejected() {
        let registry = registry();
        let winder = registry.lookup_slug("winder2").unwrap();
        let wrong_vendor = DeviceFingerprint::new(3, 0x1b813052, 0x100034);
        assert_eq!(
            match_roles(&wrong_vendor, Some(&winder.device_roles)),
            vec![false; 5]
        );
    }

    #[test]
    fn test_matching_roles_lists_candidates() {
        let registry = registry();
        let buffer = registry.lookup_slug("buffer1").unwrap();
        let puller = DeviceFingerprint::new(2, 0x1b773052, 0x10001e);

        let candidates = matching_roles(&puller, &buffer.device_roles);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].role_label, "1x Stepper Puller");
    }
}
