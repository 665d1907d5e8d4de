//! AirPlay volume to attenuation mapping
//!
//! AirPlay volume runs from 0.0 (full) to -30.0 (quietest), with -144.0
//! meaning mute. Attenuations are in hundredths of a dB.

use serde::{Deserialize, Serialize};

use super::output::VolumeRange;
use crate::types::VolumeConfig;

/// AirPlay volume value meaning "muted"
pub const AIRPLAY_MUTE: f64 = -144.0;

/// Software attenuation floor, in hundredths of a dB
const SOFTWARE_MIN_CENTIBELS: i32 = -9630;

/// Shape of the volume transfer function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeProfile {
    /// Three-segment curve that is gentle at the top and steep at the bottom
    #[default]
    Standard,
    /// Linear in dB
    Flat,
}

/// Standard transfer function.
///
/// Maps `vol` onto the range `[min_db, max_db]` (hundredths of a dB) through
/// three straight lines meeting at the top of the range.
#[must_use]
pub fn vol2attn(vol: f64, max_db: i32, min_db: i32) -> f64 {
    if !(-30.0..=0.0).contains(&vol) {
        if (vol - AIRPLAY_MUTE).abs() > f64::EPSILON {
            tracing::debug!(vol, "Volume request out of range");
        }
        return f64::from(min_db);
    }
    let range_db = f64::from(max_db - min_db);
    let first_slope = -range_db / 2.0;
    let lines = [
        (0.0, first_slope),
        (-5.0, first_slope - (range_db + first_slope) / 2.0),
        (-17.0, -range_db),
    ];
    let mut setting = 0.0_f64;
    for (start, end) in lines {
        if vol <= start {
            let on_line = end * (vol - start) / (-30.0 - start);
            setting = setting.min(on_line);
        }
    }
    setting + f64::from(max_db)
}

/// Linear transfer function.
#[must_use]
pub fn flat_vol2attn(vol: f64, max_db: i32, min_db: i32) -> f64 {
    if (-30.0..=0.0).contains(&vol) {
        f64::from(max_db - min_db) * (30.0 + vol) / 30.0 + f64::from(min_db)
    } else {
        if (vol - AIRPLAY_MUTE).abs() > f64::EPSILON {
            tracing::debug!(vol, "Linear volume request out of range");
        }
        f64::from(min_db)
    }
}

/// Convert a software attenuation (hundredths of a dB) into a fixed-point gain.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    reason = "Gain is at most 65536 for non-positive attenuations"
)]
pub fn attenuation_to_fix_volume(attenuation: f64) -> i32 {
    (65536.0 * 10f64.powf(attenuation / 2000.0)) as i32
}

/// What a volume request resolves to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeDecision {
    /// Volume control is disabled; leave everything as it is
    Ignore,
    /// Mute the output
    Mute,
    /// Apply attenuations
    Set {
        /// Hardware attenuation in dB, when the sink has a mixer
        hardware_db: Option<f64>,
        /// Software gain, 0x10000 at unity
        fix_volume: i32,
        /// Overall attenuation on the profile curve, in dB
        scaled_db: f64,
    },
}

/// Resolve an AirPlay volume against the sink's mixer range and the settings.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    reason = "Configured dB values are small"
)]
pub fn resolve_volume(
    airplay_volume: f64,
    hardware: Option<VolumeRange>,
    config: &VolumeConfig,
) -> VolumeDecision {
    if config.ignore_volume_control {
        return VolumeDecision::Ignore;
    }
    if (airplay_volume - AIRPLAY_MUTE).abs() < f64::EPSILON {
        return VolumeDecision::Mute;
    }

    let mut sw_max = 0;
    let mut sw_min = SOFTWARE_MIN_CENTIBELS;
    let requested_max = config.max_db.map(|db| (db * 100.0) as i32);
    let requested_range = config.range_db.map(|db| (db * 100.0).trunc() as i32);

    let Some(hw) = hardware else {
        if let Some(max) = requested_max.filter(|m| (sw_min..=sw_max).contains(m)) {
            sw_max = max;
        }
        if let Some(range) = requested_range {
            if range > sw_max - sw_min {
                tracing::warn!(range, "Requested volume range too large, ignored");
            } else {
                sw_min = sw_max - range;
            }
        }
        let scaled = profile_attenuation(config.profile, airplay_volume, sw_max, sw_min);
        return VolumeDecision::Set {
            hardware_db: None,
            fix_volume: attenuation_to_fix_volume(scaled),
            scaled_db: scaled / 100.0,
        };
    };

    let hw_min = (hw.min_db * 100.0) as i32;
    let mut hw_max = (hw.max_db * 100.0) as i32;
    if let Some(max) = requested_max {
        if (hw_min..=hw_max).contains(&max) {
            hw_max = max;
        } else if requested_range.is_some() {
            hw_max = hw_min;
            sw_max = max - hw_min;
        } else {
            tracing::warn!(max, "Maximum output level outside the hardware mixer range, ignored");
        }
    }

    let mut both = false;
    if let Some(range) = requested_range {
        if range > hw_max - hw_min {
            both = true;
            let sw_range = range - (hw_max - hw_min);
            if sw_max - sw_range < sw_min {
                tracing::warn!(range, "Requested volume range too large, ignored");
            } else {
                sw_min = sw_max - sw_range;
            }
        }
    }

    if !both {
        let scaled = profile_attenuation(config.profile, airplay_volume, hw_max, hw_min);
        return VolumeDecision::Set {
            hardware_db: Some(scaled / 100.0),
            fix_volume: super::convert::UNITY_VOLUME,
            scaled_db: scaled / 100.0,
        };
    }

    let hw_span = f64::from(hw_max - hw_min);
    let sw_span = f64::from(sw_max - sw_min);
    let top = (hw_max - hw_min) + (sw_max - sw_min);
    let scaled = profile_attenuation(config.profile, airplay_volume, top, 0);
    let (hardware, software) = if config.hw_priority {
        if sw_span > scaled {
            (f64::from(hw_min), f64::from(sw_min) + scaled)
        } else {
            (f64::from(hw_min) + scaled - sw_span, f64::from(sw_max))
        }
    } else if hw_span > scaled {
        (f64::from(hw_min) + scaled, f64::from(sw_min))
    } else {
        (f64::from(hw_max), f64::from(sw_min) + scaled - hw_span)
    };
    VolumeDecision::Set {
        hardware_db: Some(hardware / 100.0),
        fix_volume: attenuation_to_fix_volume(software),
        scaled_db: scaled / 100.0,
    }
}

fn profile_attenuation(profile: VolumeProfile, vol: f64, max_db: i32, min_db: i32) -> f64 {
    match profile {
        VolumeProfile::Standard => vol2attn(vol, max_db, min_db),
        VolumeProfile::Flat => flat_vol2attn(vol, max_db, min_db),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_standard_curve_endpoints() {
        assert!(close(vol2attn(0.0, 0, -6000), 0.0));
        assert!(close(vol2attn(-30.0, 0, -6000), -6000.0));
        assert!(close(vol2attn(-144.0, 0, -6000), -6000.0));
        // Gentle at the top: the first 5 steps cost less than a fifth of the range.
        assert!(vol2attn(-5.0, 0, -6000) > -1200.0);
    }

    #[test]
    fn test_standard_curve_is_monotonic() {
        let mut last = f64::INFINITY;
        for step in 0..=300 {
            let vol = -f64::from(step) / 10.0;
            let attn = vol2attn(vol, 0, -9630);
            assert!(attn <= last);
            last = attn;
        }
    }

    #[test]
    fn test_flat_curve() {
        assert!(close(flat_vol2attn(-15.0, 0, -6000), -3000.0));
        assert!(close(flat_vol2attn(0.0, 0, -6000), 0.0));
        assert!(close(flat_vol2attn(-144.0, 0, -6000), -6000.0));
    }

    #[test]
    fn test_fix_volume() {
        assert_eq!(attenuation_to_fix_volume(0.0), 65536);
        // -20 dB is a tenth in amplitude.
        assert_eq!(attenuation_to_fix_volume(-2000.0), 6553);
    }

    #[test]
    fn test_software_only() {
        let config = VolumeConfig::default();
        match resolve_volume(0.0, None, &config) {
            VolumeDecision::Set {
                hardware_db,
                fix_volume,
                ..
            } => {
                assert_eq!(hardware_db, None);
                assert_eq!(fix_volume, 65536);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(resolve_volume(-144.0, None, &config), VolumeDecision::Mute);
    }

    #[test]
    fn test_hardware_only() {
        let config = VolumeConfig::default();
        let hw = VolumeRange {
            min_db: -60.0,
            max_db: 0.0,
        };
        match resolve_volume(-30.0, Some(hw), &config) {
            VolumeDecision::Set {
                hardware_db,
                fix_volume,
                ..
            } => {
                assert!(close(hardware_db.unwrap(), -60.0));
                assert_eq!(fix_volume, 65536);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_hardware_priority_split() {
        let config = VolumeConfig {
            range_db: Some(80.0),
            hw_priority: true,
            ..VolumeConfig::default()
        };
        let hw = VolumeRange {
            min_db: -60.0,
            max_db: 0.0,
        };
        // At the bottom of the curve the hardware is at its floor and software
        // supplies the remaining 20 dB.
        match resolve_volume(-30.0, Some(hw), &config) {
            VolumeDecision::Set {
                hardware_db,
                fix_volume,
                ..
            } => {
                assert!(close(hardware_db.unwrap(), -60.0));
                assert_eq!(fix_volume, attenuation_to_fix_volume(-2000.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ignore_volume_control() {
        let config = VolumeConfig {
            ignore_volume_control: true,
            ..VolumeConfig::default()
        };
        assert_eq!(resolve_volume(-10.0, None, &config), VolumeDecision::Ignore);
    }
}
