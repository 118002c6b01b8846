// MIT License - Copyright (c) 2026 Peter Wright
// Door/window contact sensor

use serde::Serialize;
use serde_json::{json, Value};

use super::PropertyUpdate;
use crate::constants::res;

/// Contact sensor properties (`lumi.sensor_magnet.aq2`).
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MagnetProps {
    pub open: bool,
    pub battery_voltage: f64,
}

pub fn decode_report(res_name: &str, raw: &Value) -> Option<PropertyUpdate> {
    match res_name {
        res::STATE => Some(PropertyUpdate::new("open", json!(raw.as_f64() == Some(1.0)))),
        _ => None,
    }
}
