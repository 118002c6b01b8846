// MIT License - Copyright (c) 2026 Peter Wright
// Multimode gateway (lumi.gateway.mgl03)

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::devices::{ChangeSet, ChildDevice, DeviceStateStore};
use crate::directory;
use crate::error::Result;
use crate::event::{publish_changes, DeviceEvent, EventSender};
use crate::protocol::{CallResult, Method};
use crate::transport::ProtocolClient;
use crate::zigbee::{ReportIngestor, ZigbeeMessage};

/// Summary of a child for discovery.
#[derive(Debug, Clone)]
pub struct ChildSummary {
    pub did: String,
    pub model: String,
    pub properties: Value,
}

/// Apply one report or heartbeat to the matching children.
///
/// Returns an update event for every child whose properties changed.
/// Messages for unknown dids are ignored.
pub fn route_message(children: &mut [ChildDevice], message: &ZigbeeMessage) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    let mut emit = |child: &ChildDevice, changes: ChangeSet| {
        if !changes.is_empty() {
            events.push(DeviceEvent::Updated {
                device_id: child.did().to_string(),
                model: child.model().to_string(),
                changes,
                properties: child.properties(),
            });
        }
    };

    match message {
        ZigbeeMessage::Report(report) => {
            match children.iter_mut().find(|c| c.did() == report.did) {
                Some(child) => {
                    let changes = child.handle_report(&report.params, report.quality());
                    emit(&*child, changes);
                }
                None => debug!("Report for unknown did {}", report.did),
            }
        }
        ZigbeeMessage::Heartbeat(heartbeat) => {
            for entry in &heartbeat.params {
                if let Some(child) = children.iter_mut().find(|c| c.did() == entry.did) {
                    let changes = child.handle_heartbeat(&entry.res_list, heartbeat.quality_of(entry));
                    emit(&*child, changes);
                }
            }
        }
        ZigbeeMessage::Unknown => {}
    }
    events
}

struct Shared {
    id: String,
    model: String,
    did: Option<String>,
    client: Arc<ProtocolClient>,
    state: Mutex<DeviceStateStore>,
    children: RwLock<Vec<ChildDevice>>,
    events: EventSender,
    alarm_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Write the siren property and record it on success.
    async fn set_alarm(&self, enable: bool) -> Result<CallResult> {
        let Some(did) = self.did.clone() else {
            warn!("[{}] Cannot trigger alarm: gateway did is not configured", self.id);
            return Ok(CallResult::failure("Gateway did is not configured"));
        };

        let result = self.client.call_method(&Method::SetAlarm { did, enable }).await?;
        if result.is_ok() {
            let mut state = self.state.lock().await;
            let changes = state.update([("alarm".to_string(), json!(enable))]);
            publish_changes(&self.events, &self.id, &self.model, changes, state.snapshot());
        } else {
            warn!("[{}] Alarm write rejected: {} {}", self.id, result.code, result.data);
        }
        Ok(result)
    }
}

/// Zigbee gateway: owns the control client, the report subscription and the child list.
pub struct Gateway {
    shared: Arc<Shared>,
    ingestor: Mutex<ReportIngestor>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(
        config: &DeviceConfig,
        model: impl Into<String>,
        client: Arc<ProtocolClient>,
        events: EventSender,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: config.id.clone(),
                model: model.into(),
                did: config.did.clone(),
                client,
                state: Mutex::new(DeviceStateStore::with_initial(json!({ "alarm": false }))),
                children: RwLock::new(Vec::new()),
                events,
                alarm_timer: Mutex::new(None),
            }),
            ingestor: Mutex::new(ReportIngestor::from_config(config)),
            router: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn model(&self) -> &str {
        &self.shared.model
    }

    /// Start report ingestion, enumerate children and begin routing.
    ///
    /// Reports that arrive during enumeration are buffered and routed once
    /// the child list is in place.
    pub async fn setup(&self) -> Result<usize> {
        let rx = self.ingestor.lock().await.start()?;
        let count = self.load_children().await?;
        self.route_from(rx).await;
        Ok(count)
    }

    /// Enumerate children, replacing the current child list.
    pub async fn load_children(&self) -> Result<usize> {
        let listing = directory::enumerate(self.shared.client.as_ref()).await?;
        let count = listing.children.len();
        *self.shared.children.write().await = listing.children;
        info!("[{}] Child devices loaded: count={}", self.shared.id, count);
        let _ = self.shared.events.send(DeviceEvent::ChildrenLoaded {
            gateway_id: self.shared.id.clone(),
            count,
        });
        Ok(count)
    }

    /// Route reports and heartbeats from `rx` to the children until it closes.
    pub async fn route_from(&self, rx: mpsc::Receiver<ZigbeeMessage>) {
        let handle = spawn_router_task(self.shared.clone(), rx);
        if let Some(previous) = self.router.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn properties(&self) -> Value {
        self.shared.state.lock().await.snapshot()
    }

    pub async fn children(&self) -> Vec<ChildSummary> {
        self.shared
            .children
            .read()
            .await
            .iter()
            .map(|c| ChildSummary {
                did: c.did().to_string(),
                model: c.model().to_string(),
                properties: c.properties(),
            })
            .collect()
    }

    /// Call a method on the child with `did`, if this gateway owns it.
    pub async fn child_call(&self, did: &str, method: &str, params: &Value) -> Option<CallResult> {
        let children = self.shared.children.read().await;
        children
            .iter()
            .find(|c| c.did() == did)
            .map(|c| c.call(method, params))
    }

    /// Switch the siren; with `duration` seconds, switch it off again afterwards.
    ///
    /// The switch-off is scheduled even when the first write fails.
    pub async fn trigger_alarm(&self, enable: bool, duration: Option<u64>) -> Result<CallResult> {
        let result = self.shared.set_alarm(enable).await;

        if let Some(secs) = duration {
            let shared = self.shared.clone();
            let handle = tokio::spawn(async move {
                sleep(Duration::from_secs(secs)).await;
                debug!("[{}] Alarm duration elapsed", shared.id);
                if let Err(e) = shared.set_alarm(false).await {
                    warn!("[{}] Failed to stop alarm: {}", shared.id, e);
                }
            });
            if let Some(previous) = self.shared.alarm_timer.lock().await.replace(handle) {
                previous.abort();
            }
        }
        result
    }

    /// Raw control-protocol call on the gateway itself.
    pub async fn miio_call(&self, method: &str, params: Value) -> Result<CallResult> {
        self.shared.client.call(method, params).await
    }

    /// Bus-level call dispatch.
    ///
    /// * `triggerAlarm {enable, duration?}` → `{properties}`
    /// * `miio.call {method, params}` → the raw call result
    pub async fn call(&self, method: &str, params: &Value) -> CallResult {
        match method {
            "triggerAlarm" => {
                let Some(enable) = params.get("enable").and_then(Value::as_bool) else {
                    return CallResult::failure("Bad parameter \"enable\"");
                };
                let duration = params.get("duration").and_then(Value::as_u64);
                if let Err(e) = self.trigger_alarm(enable, duration).await {
                    return CallResult::failure(e.to_string());
                }
                CallResult::ok(json!({ "properties": self.properties().await }))
            }
            "miio.call" => {
                let (Some(raw_method), Some(raw_params)) = (
                    params.get("method").and_then(Value::as_str),
                    params.get("params"),
                ) else {
                    return CallResult::failure("Bad parameters");
                };
                match self.miio_call(raw_method, raw_params.clone()).await {
                    Ok(result) => CallResult::ok(json!({ "code": result.code, "data": result.data })),
                    Err(e) => CallResult::failure(e.to_string()),
                }
            }
            _ => CallResult::failure("Bad method"),
        }
    }

    /// Stop routing, the report subscription, any pending alarm timer and the control client.
    pub async fn shutdown(&self) {
        self.ingestor.lock().await.stop();
        if let Some(handle) = self.router.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.shared.alarm_timer.lock().await.take() {
            handle.abort();
        }
        self.shared.client.shutdown();
    }
}

fn spawn_router_task(shared: Arc<Shared>, mut rx: mpsc::Receiver<ZigbeeMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let events = {
                let mut children = shared.children.write().await;
                route_message(&mut children, &message)
            };
            for event in events {
                debug!("[{}] Child update: {:?}", shared.id, event);
                let _ = shared.events.send(event);
            }
        }
        debug!("[{}] Report channel closed", shared.id);
    })
}
