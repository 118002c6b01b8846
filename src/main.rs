// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use miio_lan_bridge::constants::{
    CALL_TIMEOUT_MS, CONTROL_PORT, HANDSHAKE_TIMEOUT_MS, REPORT_PORT, REPORT_TOPIC,
};
use miio_lan_bridge::{ChangeSet, DeviceConfig, DeviceEvent, Hub};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "miio2mqtt")]
#[command(about = "Bridge between local miIO devices and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    mqtt: MqttToml,
    #[serde(default)]
    devices: Vec<DeviceToml>,
}

#[derive(Debug, Deserialize)]
struct DeviceToml {
    id: String,
    host: String,
    token: String,
    #[serde(default)]
    did: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_handshake_timeout")]
    handshake_timeout_ms: u64,
    #[serde(default = "default_call_timeout")]
    call_timeout_ms: u64,
    #[serde(default = "default_report_port")]
    report_port: u16,
    #[serde(default = "default_report_topic")]
    report_topic: String,
    #[serde(default = "default_poll_interval")]
    poll_interval_ms: u64,
}

fn default_port() -> u16 {
    CONTROL_PORT
}
fn default_handshake_timeout() -> u64 {
    HANDSHAKE_TIMEOUT_MS
}
fn default_call_timeout() -> u64 {
    CALL_TIMEOUT_MS
}
fn default_report_port() -> u16 {
    REPORT_PORT
}
fn default_report_topic() -> String {
    REPORT_TOPIC.to_string()
}
fn default_poll_interval() -> u64 {
    60_000
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
}

fn default_client_id() -> String {
    "miio-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "miio/cmd".to_string()
}
fn default_publish_topic() -> String {
    "miio".to_string()
}

fn build_device_config(toml: &DeviceToml) -> DeviceConfig {
    let mut builder = DeviceConfig::builder()
        .id(&toml.id)
        .host(&toml.host)
        .port(toml.port)
        .token(&toml.token)
        .handshake_timeout_ms(toml.handshake_timeout_ms)
        .call_timeout_ms(toml.call_timeout_ms)
        .report_port(toml.report_port)
        .report_topic(&toml.report_topic)
        .poll_interval_ms(toml.poll_interval_ms);
    if let Some(did) = &toml.did {
        builder = builder.did(did);
    }
    if let Some(model) = &toml.model {
        builder = builder.model(model);
    }
    builder.build()
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages share a flat {now, op, ...} structure

#[derive(Serialize)]
struct MqttDeviceUpdate<'a> {
    now: u64,
    op: &'static str,
    device: &'a str,
    update: &'a ChangeSet,
    properties: &'a Value,
}

#[derive(Serialize)]
struct MqttDiscoverResponse {
    now: u64,
    op: &'static str,
    device: String,
    model: String,
    properties: Value,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: &'static str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<Value>,
    data: Option<Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK",
        success,
        src,
        data,
    };
    publish_json(client, topic, &msg).await;
}

async fn publish_discovery(client: &AsyncClient, topic: &str, hub: &Hub) {
    for device in hub.discover().await {
        let msg = MqttDiscoverResponse {
            now: now_epoch_ms(),
            op: "DISCOVER_RESPONSE",
            device: device.device,
            model: device.model,
            properties: device.properties,
        };
        publish_json(client, topic, &msg).await;
    }
}

// ---------------------------------------------------------------------------
// Device event handler
// ---------------------------------------------------------------------------

async fn handle_device_event(event: DeviceEvent, client: &AsyncClient, topic: &str) {
    match event {
        DeviceEvent::Updated {
            device_id,
            changes,
            properties,
            ..
        } => {
            debug!("Device {device_id} updated: {changes:?}");
            let msg = MqttDeviceUpdate {
                now: now_epoch_ms(),
                op: "DEVICE_UPDATE",
                device: &device_id,
                update: &changes,
                properties: &properties,
            };
            publish_json(client, topic, &msg).await;
        }
        DeviceEvent::ChildrenLoaded { gateway_id, count } => {
            info!("Gateway {gateway_id}: {count} child device(s) loaded");
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

async fn handle_command(
    payload_str: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    hub: &Hub,
) {
    // Parse the raw payload as a JSON value for the CMD_ACK src field
    let src_json = serde_json::from_str::<Value>(payload_str).ok();

    match cmd.op.as_str() {
        "PING" => {
            info!("Command: PING");
            publish_cmd_ack(client, topic, true, src_json, None).await;
        }

        "STATUS" => {
            let status = serde_json::to_value(hub.status().await).ok();
            publish_cmd_ack(client, topic, true, src_json, status).await;
        }

        "DISCOVER" => {
            info!("Command: DISCOVER");
            publish_discovery(client, topic, hub).await;
            publish_cmd_ack(client, topic, true, src_json, None).await;
        }

        "DEVICE_CALL" => {
            let (Some(device), Some(method)) = (cmd.device.as_deref(), cmd.method.as_deref()) else {
                warn!("DEVICE_CALL: missing device or method");
                publish_cmd_ack(client, topic, false, src_json, None).await;
                return;
            };
            let params = cmd.params.unwrap_or(Value::Null);
            info!("Command: DEVICE_CALL {device} {method}");
            let result = hub.call(device, method, &params).await;
            if !result.is_ok() {
                warn!("DEVICE_CALL {device} {method}: {} {}", result.code, result.data);
            }
            let data = serde_json::to_value(&result).ok();
            publish_cmd_ack(client, topic, result.is_ok(), src_json, data).await;
        }

        other => {
            warn!("Unknown command: {other}");
            publish_cmd_ack(client, topic, false, src_json, None).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=miio_lan_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
        let publish_topic = config.mqtt.publish_topic.clone();
        let subscribe_topic = config.mqtt.subscribe_topic.clone();

        let device_configs: Vec<DeviceConfig> =
            config.devices.iter().map(build_device_config).collect();
        info!("Loading {} configured device(s)", device_configs.len());
        let mut hub = Hub::new();
        let event_rx = hub.subscribe();
        hub.setup(&device_configs).await;
        let hub = Arc::new(hub);

        // Set up MQTT
        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        // Task 1: device event listener
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let event_handle = tokio::spawn(async move {
            let mut rx = event_rx;
            loop {
                match rx.recv().await {
                    Ok(event) => handle_device_event(event, &client_events, &topic_events).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, handles commands)
        let hub_cmds = Arc::clone(&hub);
        let client_cmds = client.clone();
        let topic_cmds = publish_topic.clone();
        let sub_topic = subscribe_topic.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not auto-resubscribe after a broker reconnect
                        info!("MQTT: connected, subscribing to {sub_topic}");
                        if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to {sub_topic}: {e}");
                        }
                        publish_discovery(&client_cmds, &topic_cmds, &hub_cmds).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic == sub_topic {
                            let payload = String::from_utf8_lossy(&msg.payload).to_string();
                            match serde_json::from_str::<MqttCommand>(&payload) {
                                Ok(cmd) => {
                                    debug!("MQTT command received: {payload}");
                                    // Device calls may wait seconds for a reply
                                    let hub = Arc::clone(&hub_cmds);
                                    let client = client_cmds.clone();
                                    let topic = topic_cmds.clone();
                                    tokio::spawn(async move {
                                        handle_command(&payload, cmd, &client, &topic, &hub).await;
                                    });
                                }
                                Err(e) => {
                                    warn!("Failed to parse MQTT command: {e}");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting connections...");
                true
            }
        };

        event_handle.abort();
        mqtt_handle.abort();
        hub.shutdown().await;

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => match parse_mqtt_url(&new_config.mqtt.url) {
                Ok(_) => {
                    config = new_config;
                    info!("Config reloaded successfully");
                }
                Err(e) => warn!("Invalid MQTT URL in new config, keeping previous: {e}"),
            },
            Err(e) => warn!("Failed to reload config, keeping previous: {e}"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
