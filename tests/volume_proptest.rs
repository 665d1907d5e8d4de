use airsync::audio::volume::{attenuation_to_fix_volume, flat_vol2attn, vol2attn};
use airsync::audio::{UNITY_VOLUME, VolumeDecision, VolumeProfile, resolve_volume};
use airsync::types::VolumeConfig;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_standard_curve_stays_in_range(vol in -30.0f64..=0.0, max_db in -2000i32..=0, span in 100i32..9000) {
        let min_db = max_db - span;
        let attn = vol2attn(vol, max_db, min_db);
        prop_assert!(attn <= f64::from(max_db) + 1e-9);
        prop_assert!(attn >= f64::from(min_db) - 1e-9);
    }

    #[test]
    fn test_standard_curve_is_monotonic(a in -30.0f64..=0.0, b in -30.0f64..=0.0) {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        prop_assert!(vol2attn(lo, 0, -9630) <= vol2attn(hi, 0, -9630) + 1e-9);
    }

    #[test]
    fn test_flat_curve_is_monotonic(a in -30.0f64..=0.0, b in -30.0f64..=0.0) {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        prop_assert!(flat_vol2attn(lo, 0, -4800) <= flat_vol2attn(hi, 0, -4800) + 1e-9);
    }

    #[test]
    fn test_fix_volume_never_exceeds_unity(attn in -9630.0f64..=0.0) {
        let fix = attenuation_to_fix_volume(attn);
        prop_assert!(fix <= UNITY_VOLUME);
        prop_assert!(fix >= 0);
    }

    #[test]
    fn test_software_only_volume_is_attenuation(vol in -30.0f64..=0.0) {
        let config = VolumeConfig {
            profile: VolumeProfile::Flat,
            ..VolumeConfig::default()
        };
        match resolve_volume(vol, None, &config) {
            VolumeDecision::Set { hardware_db, fix_volume, scaled_db } => {
                prop_assert!(hardware_db.is_none());
                prop_assert!(fix_volume <= UNITY_VOLUME);
                prop_assert!(scaled_db <= 0.0);
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }
}
