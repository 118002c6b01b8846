// MIT License - Copyright (c) 2026 Peter Wright
//
//! # miio-lan-bridge
//!
//! Local control of miIO devices over the encrypted UDP control protocol,
//! plus Zigbee report ingestion for the children of a multimode gateway.
//!
//! The library speaks directly to devices on the LAN (port 54321) and to
//! the gateway's own MQTT broker for sensor reports, without the vendor
//! cloud.
//!
//! ## Quick Start
//!
//! ```no_run
//! use miio_lan_bridge::{DeviceConfig, ProtocolClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DeviceConfig::builder()
//!         .id("humidifier")
//!         .host("192.168.1.50")
//!         .token("00112233445566778899aabbccddeeff")
//!         .build();
//!
//!     let client = ProtocolClient::connect(&config).await?;
//!     let result = client.call("get_prop", json!(["power", "humidity"])).await?;
//!     println!("{} {}", result.code, result.data);
//!     Ok(())
//! }
//! ```
//!
//! For a complete setup including gateway children, create a [`Hub`],
//! take a receiver with [`Hub::subscribe`], then call [`Hub::setup`] and
//! consume [`DeviceEvent`]s.

pub mod config;
pub mod constants;
pub mod crypto;
pub mod devices;
pub mod directory;
pub mod error;
pub mod event;
pub mod gateway;
pub mod hub;
pub mod protocol;
pub mod transport;
pub mod zigbee;

// Re-exports for convenience
pub use config::{DeviceConfig, DeviceConfigBuilder, DeviceModel};
pub use crypto::{DecodedPacket, PacketCodec, PacketHeader};
pub use devices::{ChangeSet, ChildDevice, ChildKind, DeviceStateStore, Humidifier};
pub use error::{MiioError, Result};
pub use event::{DeviceEvent, EventReceiver, EventSender};
pub use gateway::Gateway;
pub use hub::{DiscoveredDevice, Hub, HubStatus};
pub use protocol::{CallResult, DeviceInfo, Method};
pub use transport::{DeviceCaller, ProtocolClient};
pub use zigbee::{ReportIngestor, ZigbeeMessage};
