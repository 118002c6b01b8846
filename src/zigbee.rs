// MIT License - Copyright (c) 2026 Peter Wright
// Zigbee report ingestion over the gateway's MQTT broker

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::error::{MiioError, Result};

/// One `(res_name, value)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZigbeeParam {
    pub res_name: String,
    #[serde(default)]
    pub value: Value,
}

/// Radio link quality attached to a report or heartbeat entry.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct LinkQuality {
    pub rssi: i64,
    pub zseq: i64,
}

/// Resource updates for a single child.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ZigbeeReport {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub rssi: i64,
    #[serde(default)]
    pub zseq: i64,
    pub did: String,
    #[serde(default)]
    pub params: Vec<ZigbeeParam>,
}

impl ZigbeeReport {
    pub fn quality(&self) -> LinkQuality {
        LinkQuality {
            rssi: self.rssi,
            zseq: self.zseq,
        }
    }
}

/// Per-child section of a heartbeat.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HeartbeatEntry {
    pub did: String,
    #[serde(default)]
    pub zseq: i64,
    #[serde(default)]
    pub res_list: Vec<ZigbeeParam>,
}

/// Periodic status for several children.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ZigbeeHeartbeat {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub rssi: i64,
    #[serde(default)]
    pub params: Vec<HeartbeatEntry>,
}

impl ZigbeeHeartbeat {
    pub fn quality_of(&self, entry: &HeartbeatEntry) -> LinkQuality {
        LinkQuality {
            rssi: self.rssi,
            zseq: entry.zseq,
        }
    }
}

/// Message published on the report topic, discriminated by `cmd`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ZigbeeMessage {
    Report(ZigbeeReport),
    Heartbeat(ZigbeeHeartbeat),
    #[serde(other)]
    Unknown,
}

pub fn parse_message(payload: &[u8]) -> Result<ZigbeeMessage> {
    Ok(serde_json::from_slice(payload)?)
}

/// Subscribes to the gateway's report topic and forwards decoded messages.
///
/// Unknown and unparseable messages are logged and dropped here; the
/// receiver only sees reports and heartbeats.
pub struct ReportIngestor {
    gateway_id: String,
    host: String,
    port: u16,
    topic: String,
    handle: Option<JoinHandle<()>>,
}

impl ReportIngestor {
    pub fn new(
        gateway_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            host: host.into(),
            port,
            topic: topic.into(),
            handle: None,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            config.id.clone(),
            config.host.clone(),
            config.report_port,
            config.report_topic.clone(),
        )
    }

    /// Start the subscription. A second call fails with
    /// [`MiioError::AlreadyStarted`] and leaves the running task alone.
    pub fn start(&mut self) -> Result<mpsc::Receiver<ZigbeeMessage>> {
        if self.handle.is_some() {
            error!("[{}] Report ingestor started already", self.gateway_id);
            return Err(MiioError::AlreadyStarted);
        }

        let client_id = format!("miio-lan-bridge-{}-{}", self.gateway_id, std::process::id());
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(options, 16);

        let (tx, rx) = mpsc::channel(64);
        info!(
            "[{}] Subscribing to {} on {}:{}",
            self.gateway_id, self.topic, self.host, self.port
        );
        self.handle = Some(tokio::spawn(run_subscription(
            self.gateway_id.clone(),
            self.topic.clone(),
            client,
            eventloop,
            tx,
        )));
        Ok(rx)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("[{}] Stopping report ingestor", self.gateway_id);
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ReportIngestor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_subscription(
    gateway_id: String,
    topic: String,
    client: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
    tx: mpsc::Sender<ZigbeeMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // rumqttc does not resubscribe after a reconnect
                debug!("[{}] Report broker connected, subscribing", gateway_id);
                if let Err(e) = client.subscribe(&topic, QoS::AtMostOnce).await {
                    error!("[{}] Failed to subscribe to {}: {}", gateway_id, topic, e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(msg))) if msg.topic == topic => {
                match parse_message(&msg.payload) {
                    Ok(ZigbeeMessage::Unknown) => {
                        debug!(
                            "[{}] Unexpected zigbee message: {}",
                            gateway_id,
                            String::from_utf8_lossy(&msg.payload)
                        );
                    }
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            debug!("[{}] Report receiver dropped", gateway_id);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("[{}] Failed to parse zigbee message: {}", gateway_id, e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("[{}] Report broker error: {}", gateway_id, e);
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
