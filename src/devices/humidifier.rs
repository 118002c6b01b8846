// MIT License - Copyright (c) 2026 Peter Wright
// Humidifier (zhimi.humidifier.ca1)

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::devices::state::DeviceStateStore;
use crate::error::Result;
use crate::event::{publish_changes, EventSender};
use crate::protocol::{CallResult, Method};
use crate::transport::ProtocolClient;

/// Properties read with `get_prop`, in request order.
pub const STATE_PROPS: [&str; 5] = ["power", "mode", "temp_dec", "humidity", "depth"];

/// Water tank depth reading of a full tank.
const FULL_TANK_DEPTH: f64 = 120.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HumidifierProps {
    pub enabled: bool,
    pub mode: String,
    /// Celsius
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    /// Percent of a full tank
    pub water_level: f64,
}

impl Default for HumidifierProps {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: "off".to_string(),
            temperature: 0.0,
            humidity: 0.0,
            water_level: 0.0,
        }
    }
}

impl HumidifierProps {
    /// Parse the positional `get_prop` result for [`STATE_PROPS`].
    pub fn from_prop_values(data: &Value) -> Option<Self> {
        let values = data.as_array()?;
        let depth = values.get(4)?.as_f64()?;
        Some(Self {
            enabled: values.first()?.as_str()? == "on",
            mode: values.get(1)?.as_str()?.to_string(),
            temperature: values.get(2)?.as_f64()? / 10.0,
            humidity: values.get(3)?.as_f64()?,
            water_level: (depth / FULL_TANK_DEPTH * 100.0).min(100.0),
        })
    }

    fn into_pairs(self) -> Vec<(String, Value)> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

struct Shared {
    id: String,
    model: String,
    client: Arc<ProtocolClient>,
    state: Mutex<DeviceStateStore>,
    events: EventSender,
}

impl Shared {
    async fn apply(&self, pairs: Vec<(String, Value)>) {
        let mut state = self.state.lock().await;
        let changes = state.update(pairs);
        publish_changes(&self.events, &self.id, &self.model, changes, state.snapshot());
    }

    async fn load_state(&self) -> Result<bool> {
        let names = STATE_PROPS.iter().map(|s| s.to_string()).collect();
        let result = self.client.call_method(&Method::GetProp { names }).await?;
        if !result.is_ok() {
            error!("[{}] Loading state failed: {} {}", self.id, result.code, result.data);
            return Ok(false);
        }
        match HumidifierProps::from_prop_values(&result.data) {
            Some(props) => {
                self.apply(props.into_pairs()).await;
                Ok(true)
            }
            None => {
                error!("[{}] Unexpected get_prop result: {}", self.id, result.data);
                Ok(false)
            }
        }
    }

    async fn set_power(&self, on: bool) -> Result<CallResult> {
        let result = self.client.call_method(&Method::SetPower { on }).await?;
        if result.is_ok_ack() {
            self.apply(vec![("enabled".to_string(), json!(on))]).await;
        } else {
            debug!("[{}] set_power {} not acknowledged: {:?}", self.id, on, result);
        }
        Ok(result)
    }
}

/// Directly controlled humidifier, polled for state.
pub struct Humidifier {
    shared: Arc<Shared>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Humidifier {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        client: Arc<ProtocolClient>,
        events: EventSender,
    ) -> Self {
        let initial = serde_json::to_value(HumidifierProps::default()).unwrap_or_else(|_| json!({}));
        Self {
            shared: Arc::new(Shared {
                id: id.into(),
                model: model.into(),
                client,
                state: Mutex::new(DeviceStateStore::with_initial(initial)),
                events,
            }),
            poller: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn model(&self) -> &str {
        &self.shared.model
    }

    pub async fn properties(&self) -> Value {
        self.shared.state.lock().await.snapshot()
    }

    /// Poll state now and then every `period`.
    pub async fn start_polling(&self, period: Duration) {
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = shared.load_state().await {
                    error!("[{}] State poll failed: {}", shared.id, e);
                }
            }
        });
        if let Some(previous) = self.poller.lock().await.replace(handle) {
            previous.abort();
        }
        info!("[{}] Polling state every {:?}", self.shared.id, period);
    }

    /// Read state once. Returns false when the device answered with an error.
    pub async fn load_state(&self) -> Result<bool> {
        self.shared.load_state().await
    }

    pub async fn enable(&self) -> Result<CallResult> {
        self.shared.set_power(true).await
    }

    pub async fn disable(&self) -> Result<CallResult> {
        self.shared.set_power(false).await
    }

    pub async fn call(&self, method: &str, _params: &Value) -> CallResult {
        let outcome = match method {
            "enable" => self.enable().await,
            "disable" => self.disable().await,
            _ => return CallResult::failure("Bad method"),
        };
        if let Err(e) = outcome {
            return CallResult::failure(e.to_string());
        }
        CallResult::ok(json!({ "properties": self.properties().await }))
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
        self.shared.client.shutdown();
    }
}
