// MIT License - Copyright (c) 2026 Peter Wright
// Managed devices

pub mod humidifier;
pub mod magnet;
pub mod motion;
pub mod state;
pub mod weather;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use crate::constants::res;
use crate::protocol::CallResult;
use crate::zigbee::{LinkQuality, ZigbeeParam};

pub use humidifier::Humidifier;
pub use state::{ChangeSet, DeviceStateStore};

/// A single decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate {
    pub name: &'static str,
    pub value: Value,
}

impl PropertyUpdate {
    pub fn new(name: &'static str, value: Value) -> Self {
        Self { name, value }
    }
}

/// Heartbeat resources shared by every battery-powered child.
pub fn decode_heartbeat(res_name: &str, raw: &Value) -> Option<PropertyUpdate> {
    match res_name {
        res::BATTERY_VOLTAGE => {
            let volts = raw.as_f64()? / 1000.0;
            Some(PropertyUpdate::new("battery_voltage", json!(volts)))
        }
        _ => None,
    }
}

/// Kinds of Zigbee children the gateway can manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    WeatherSensor,
    MotionSensor,
    MagnetSensor,
}

impl ChildKind {
    pub fn from_model(model: &str) -> Option<Self> {
        match model {
            "lumi.weather.v1" | "lumi.sensor_ht" => Some(Self::WeatherSensor),
            "lumi.sensor_motion.aq2" => Some(Self::MotionSensor),
            "lumi.sensor_magnet.aq2" => Some(Self::MagnetSensor),
            _ => None,
        }
    }

    pub fn initial_properties(&self) -> Value {
        let props = match self {
            Self::WeatherSensor => serde_json::to_value(weather::WeatherProps::default()),
            Self::MotionSensor => serde_json::to_value(motion::MotionProps::default()),
            Self::MagnetSensor => serde_json::to_value(magnet::MagnetProps::default()),
        };
        props.unwrap_or_else(|_| json!({}))
    }

    /// Decode a report resource. `now_ms` stamps motion detections.
    pub fn decode_report(&self, res_name: &str, raw: &Value, now_ms: i64) -> Option<PropertyUpdate> {
        match self {
            Self::WeatherSensor => weather::decode_report(res_name, raw),
            Self::MotionSensor => motion::decode_report(res_name, raw, now_ms),
            Self::MagnetSensor => magnet::decode_report(res_name, raw),
        }
    }
}

/// A Zigbee device behind a gateway.
#[derive(Debug, Clone)]
pub struct ChildDevice {
    did: String,
    model: String,
    kind: ChildKind,
    state: DeviceStateStore,
    quality: Option<LinkQuality>,
}

impl ChildDevice {
    pub fn new(did: impl Into<String>, model: impl Into<String>, kind: ChildKind) -> Self {
        Self {
            did: did.into(),
            model: model.into(),
            state: DeviceStateStore::with_initial(kind.initial_properties()),
            kind,
            quality: None,
        }
    }

    /// Instantiate from a vendor model; `None` for unsupported models.
    pub fn from_model(did: impl Into<String>, model: &str) -> Option<Self> {
        ChildKind::from_model(model).map(|kind| Self::new(did, model, kind))
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn kind(&self) -> ChildKind {
        self.kind
    }

    pub fn quality(&self) -> Option<LinkQuality> {
        self.quality
    }

    pub fn properties(&self) -> Value {
        self.state.snapshot()
    }

    pub fn handle_report(&mut self, params: &[ZigbeeParam], quality: LinkQuality) -> ChangeSet {
        self.quality = Some(quality);
        let now_ms = Utc::now().timestamp_millis();
        let updates: Vec<_> = params
            .iter()
            .filter_map(|p| self.kind.decode_report(&p.res_name, &p.value, now_ms))
            .map(|u| (u.name.to_string(), u.value))
            .collect();
        let changes = self.state.update(updates);
        debug!("Report for {} ({}): {:?}", self.did, self.model, changes);
        changes
    }

    pub fn handle_heartbeat(&mut self, params: &[ZigbeeParam], quality: LinkQuality) -> ChangeSet {
        self.quality = Some(quality);
        let updates: Vec<_> = params
            .iter()
            .filter_map(|p| decode_heartbeat(&p.res_name, &p.value))
            .map(|u| (u.name.to_string(), u.value))
            .collect();
        self.state.update(updates)
    }

    /// Children expose no callable methods.
    pub fn call(&self, _method: &str, _params: &Value) -> CallResult {
        CallResult::failure("Method not exists")
    }
}
