// MIT License - Copyright (c) 2026 Peter Wright
// Temperature / humidity / pressure sensor

use serde::Serialize;
use serde_json::{json, Value};

use super::PropertyUpdate;
use crate::constants::res;

/// Weather sensor properties (`lumi.weather.v1`, `lumi.sensor_ht`).
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WeatherProps {
    /// Celsius
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    /// hPa
    pub pressure: f64,
    pub battery_voltage: f64,
}

/// Decode one report resource. Raw values are hundredths; out-of-range readings are ignored.
pub fn decode_report(res_name: &str, raw: &Value) -> Option<PropertyUpdate> {
    let scaled = raw.as_f64()? / 100.0;
    match res_name {
        res::TEMPERATURE if scaled > -50.0 => Some(PropertyUpdate::new("temperature", json!(scaled))),
        res::HUMIDITY if scaled > 0.0 && scaled < 100.0 => {
            Some(PropertyUpdate::new("humidity", json!(scaled)))
        }
        res::PRESSURE if scaled > 0.0 => Some(PropertyUpdate::new("pressure", json!(scaled))),
        _ => None,
    }
}
