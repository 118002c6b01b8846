// MIT License - Copyright (c) 2026 Peter Wright
// Registry of managed devices

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use sysinfo::{ProcessesToUpdate, System};
use tracing::{error, info, warn};

use crate::config::{DeviceConfig, DeviceModel};
use crate::devices::Humidifier;
use crate::error::{MiioError, Result};
use crate::event::{event_channel, EventReceiver, EventSender};
use crate::gateway::Gateway;
use crate::protocol::CallResult;
use crate::transport::ProtocolClient;

/// A device entry as announced on discovery.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiscoveredDevice {
    pub device: String,
    pub model: String,
    pub properties: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HubStatus {
    pub uptime_secs: u64,
    /// Resident set size of this process, 0 when unavailable.
    pub memory_bytes: u64,
    pub devices: usize,
}

/// A directly reachable device.
pub enum ManagedDevice {
    Gateway(Gateway),
    Humidifier(Humidifier),
}

impl ManagedDevice {
    pub fn id(&self) -> &str {
        match self {
            ManagedDevice::Gateway(g) => g.id(),
            ManagedDevice::Humidifier(h) => h.id(),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ManagedDevice::Gateway(g) => g.model(),
            ManagedDevice::Humidifier(h) => h.model(),
        }
    }

    async fn properties(&self) -> Value {
        match self {
            ManagedDevice::Gateway(g) => g.properties().await,
            ManagedDevice::Humidifier(h) => h.properties().await,
        }
    }

    async fn call(&self, method: &str, params: &Value) -> CallResult {
        match self {
            ManagedDevice::Gateway(g) => g.call(method, params).await,
            ManagedDevice::Humidifier(h) => h.call(method, params).await,
        }
    }

    async fn shutdown(&self) {
        match self {
            ManagedDevice::Gateway(g) => g.shutdown().await,
            ManagedDevice::Humidifier(h) => h.shutdown().await,
        }
    }
}

/// All devices loaded from configuration, plus the children of every gateway.
///
/// Subscribe before [`Hub::setup`] to see the events raised while devices
/// load (child enumeration, first state poll).
pub struct Hub {
    devices: Vec<ManagedDevice>,
    event_tx: EventSender,
    started_at: Instant,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (event_tx, _) = event_channel(256);
        Self {
            devices: Vec::new(),
            event_tx,
            started_at: Instant::now(),
        }
    }

    /// Load every configured device.
    ///
    /// Devices that cannot be reached or have an unsupported model are
    /// logged and skipped. Returns the number of devices loaded.
    pub async fn setup(&mut self, configs: &[DeviceConfig]) -> usize {
        let mut loaded = 0;
        for config in configs {
            match load_device(config, self.event_tx.clone()).await {
                Ok(device) => {
                    info!("Device #{} ({}) is loaded", device.id(), device.model());
                    self.devices.push(device);
                    loaded += 1;
                }
                Err(e) => error!("Device #{} not loaded: {}", config.id, e),
            }
        }

        info!("Hub is ready, devices loaded: {}", self.devices.len());
        loaded
    }

    /// Subscribe to device events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    pub fn devices(&self) -> &[ManagedDevice] {
        &self.devices
    }

    /// Route a call to a device or gateway child by id.
    pub async fn call(&self, device_id: &str, method: &str, params: &Value) -> CallResult {
        if let Some(device) = self.devices.iter().find(|d| d.id() == device_id) {
            return device.call(method, params).await;
        }
        for device in &self.devices {
            if let ManagedDevice::Gateway(gateway) = device {
                if let Some(result) = gateway.child_call(device_id, method, params).await {
                    return result;
                }
            }
        }
        warn!("Call for unknown device {}", device_id);
        CallResult::failure("Device not found")
    }

    /// Every managed device and gateway child with its current properties.
    pub async fn discover(&self) -> Vec<DiscoveredDevice> {
        let mut out = Vec::new();
        for device in &self.devices {
            out.push(DiscoveredDevice {
                device: device.id().to_string(),
                model: device.model().to_string(),
                properties: device.properties().await,
            });
            if let ManagedDevice::Gateway(gateway) = device {
                out.extend(gateway.children().await.into_iter().map(|c| DiscoveredDevice {
                    device: c.did,
                    model: c.model,
                    properties: c.properties,
                }));
            }
        }
        out
    }

    pub async fn status(&self) -> HubStatus {
        HubStatus {
            uptime_secs: self.started_at.elapsed().as_secs(),
            memory_bytes: resident_memory(),
            devices: self.discover().await.len(),
        }
    }

    /// Stop report ingestion, polling and every control client.
    pub async fn shutdown(&self) {
        for device in &self.devices {
            device.shutdown().await;
        }
        info!("Hub stopped");
    }
}

fn resident_memory() -> u64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(|p| p.memory()).unwrap_or(0)
}

async fn load_device(config: &DeviceConfig, event_tx: EventSender) -> Result<ManagedDevice> {
    let client = Arc::new(ProtocolClient::connect(config).await?);

    let model = match &config.model {
        Some(model) => model.clone(),
        None => match client.info().await {
            Ok(info) => info.model,
            Err(e) => {
                client.shutdown();
                return Err(e);
            }
        },
    };

    let Some(kind) = DeviceModel::from_model(&model) else {
        client.shutdown();
        warn!("{} isn't supported device model", model);
        return Err(MiioError::UnsupportedModel { model });
    };

    match kind {
        DeviceModel::Gateway => {
            let gateway = Gateway::new(config, model, client, event_tx);
            if let Err(e) = gateway.setup().await {
                gateway.shutdown().await;
                return Err(e);
            }
            Ok(ManagedDevice::Gateway(gateway))
        }
        DeviceModel::Humidifier => {
            let humidifier = Humidifier::new(config.id.clone(), model, client, event_tx);
            humidifier.start_polling(config.poll_interval()).await;
            Ok(ManagedDevice::Humidifier(humidifier))
        }
    }
}
