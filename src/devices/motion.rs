// MIT License - Copyright (c) 2026 Peter Wright
// Motion sensor

use serde::Serialize;
use serde_json::{json, Value};

use super::PropertyUpdate;
use crate::constants::res;

/// Last detected motion.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Motion {
    pub active: bool,
    /// Epoch milliseconds of the last detection
    pub at: Option<i64>,
}

/// Motion sensor properties (`lumi.sensor_motion.aq2`).
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MotionProps {
    pub motion: Motion,
    pub battery_voltage: f64,
}

/// Decode one report resource; `at` stamps a detection. Only detections are reported.
pub fn decode_report(res_name: &str, raw: &Value, at: i64) -> Option<PropertyUpdate> {
    match res_name {
        res::STATE if raw.as_f64() == Some(1.0) => Some(PropertyUpdate::new(
            "motion",
            json!({ "active": true, "at": at }),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection() {
        let update = decode_report("3.1.85", &json!(1), 1_700_000_000_123).unwrap();
        assert_eq!(update.name, "motion");
        assert_eq!(update.value, json!({"active": true, "at": 1_700_000_000_123i64}));
    }

    #[test]
    fn test_non_detection_ignored() {
        assert!(decode_report("3.1.85", &json!(0), 1).is_none());
        assert!(decode_report("0.1.85", &json!(1), 1).is_none());
    }

    #[test]
    fn test_initial_properties() {
        let props = serde_json::to_value(MotionProps::default()).unwrap();
        assert_eq!(
            props,
            json!({"motion": {"active": false, "at": null}, "battery_voltage": 0.0})
        );
    }
}
