// MIT License - Copyright (c) 2026 Peter Wright
// Device configuration

use std::time::Duration;

use crate::constants::{
    CALL_TIMEOUT_MS, CONTROL_PORT, HANDSHAKE_TIMEOUT_MS, MODEL_GATEWAY, MODEL_HUMIDIFIER,
    REPORT_PORT, REPORT_TOPIC,
};

/// Device models the hub knows how to manage directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceModel {
    /// Multimode gateway with Zigbee children and an alarm siren.
    Gateway,
    /// Evaporative humidifier.
    Humidifier,
}

impl DeviceModel {
    pub fn from_model(model: &str) -> Option<Self> {
        match model {
            MODEL_GATEWAY => Some(Self::Gateway),
            MODEL_HUMIDIFIER => Some(Self::Humidifier),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gateway => MODEL_GATEWAY,
            Self::Humidifier => MODEL_HUMIDIFIER,
        }
    }
}

/// Configuration for one directly reachable device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Local identifier used on the bus.
    pub id: String,
    /// Device IP address or hostname
    pub host: String,
    /// Control port (default: 54321)
    pub port: u16,
    /// Hex-encoded shared secret
    pub token: String,
    /// Vendor device id, required for gateway alarm writes
    pub did: Option<String>,
    /// Vendor model; queried with `miIO.info` when absent
    pub model: Option<String>,
    /// Wait for a handshake acknowledgement (default: 3000)
    pub handshake_timeout_ms: u64,
    /// Wait for a call reply (default: 5000)
    pub call_timeout_ms: u64,
    /// Gateway MQTT broker port carrying Zigbee reports (default: 1883)
    pub report_port: u16,
    /// Gateway report topic (default: "zigbee/send")
    pub report_topic: String,
    /// Humidifier state poll interval (default: 60000)
    pub poll_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            host: "192.168.1.100".to_string(),
            port: CONTROL_PORT,
            token: String::new(),
            did: None,
            model: None,
            handshake_timeout_ms: HANDSHAKE_TIMEOUT_MS,
            call_timeout_ms: CALL_TIMEOUT_MS,
            report_port: REPORT_PORT,
            report_topic: REPORT_TOPIC.to_string(),
            poll_interval_ms: 60_000,
        }
    }
}

impl DeviceConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> DeviceConfigBuilder {
        DeviceConfigBuilder::default()
    }

    /// `host:port` of the control endpoint.
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Builder for DeviceConfig.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfigBuilder {
    config: DeviceConfig,
}

impl DeviceConfigBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = token.into();
        self
    }

    pub fn did(mut self, did: impl Into<String>) -> Self {
        self.config.did = Some(did.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.config.handshake_timeout_ms = ms;
        self
    }

    pub fn call_timeout_ms(mut self, ms: u64) -> Self {
        self.config.call_timeout_ms = ms;
        self
    }

    pub fn report_port(mut self, port: u16) -> Self {
        self.config.report_port = port;
        self
    }

    pub fn report_topic(mut self, topic: impl Into<String>) -> Self {
        self.config.report_topic = topic.into();
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn build(self) -> DeviceConfig {
        self.config
    }
}
