// MIT License - Copyright (c) 2026 Peter Wright
// Call payloads and results

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{ALARM_PIID, ALARM_SIID, STATUS_FAILURE};

/// Methods issued over the control protocol.
///
/// # Payload
///
/// Every call is the JSON object `{"id": <int>, "method": <name>, "params": <array|object>}`,
/// encrypted into a single packet. The device answers with
/// `{"id": <int>, "result": <any>}` or `{"id": <int>, "error": {"code": <int>, "message": <str>}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    /// `miIO.info`: Device identity (model, firmware, MAC, ...).
    Info,
    /// `get_device_list`: One page of Zigbee children behind a gateway.
    /// Result: `[{did, model, num, total}, ...]`.
    GetDeviceList,
    /// `set_properties`: MIoT property write on the gateway alarm siren.
    SetAlarm { did: String, enable: bool },
    /// `get_prop`: Legacy property read (humidifier).
    GetProp { names: Vec<String> },
    /// `set_power`: Legacy power switch (humidifier).
    SetPower { on: bool },
    /// Any other method with caller-supplied params.
    Raw { method: String, params: Value },
}

impl Method {
    /// The method name on the wire.
    pub fn name(&self) -> &str {
        match self {
            Method::Info => "miIO.info",
            Method::GetDeviceList => "get_device_list",
            Method::SetAlarm { .. } => "set_properties",
            Method::GetProp { .. } => "get_prop",
            Method::SetPower { .. } => "set_power",
            Method::Raw { method, .. } => method,
        }
    }

    /// The `params` value on the wire.
    pub fn params(&self) -> Value {
        match self {
            Method::Info | Method::GetDeviceList => json!([]),
            Method::SetAlarm { did, enable } => json!([{
                "did": did,
                "siid": ALARM_SIID,
                "piid": ALARM_PIID,
                "value": if *enable { 1 } else { 0 },
            }]),
            Method::GetProp { names } => json!(names),
            Method::SetPower { on } => json!([if *on { "on" } else { "off" }]),
            Method::Raw { params, .. } => params.clone(),
        }
    }
}

/// Outbound call payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRequest {
    pub id: u32,
    pub method: String,
    pub params: Value,
}

/// Vendor error object carried in a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VendorError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Inbound reply payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CallReply {
    pub id: u32,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl CallReply {
    /// Convert the reply into a status-coded result.
    ///
    /// A present `error` wins: its numeric `code` becomes the status and the
    /// error object itself becomes the data.
    pub fn into_result(self) -> CallResult {
        match self.error {
            Some(error) => {
                let code = error
                    .get("code")
                    .and_then(Value::as_i64)
                    .unwrap_or(STATUS_FAILURE);
                CallResult { code, data: error }
            }
            None => CallResult {
                code: 0,
                data: self.result.unwrap_or(Value::Null),
            },
        }
    }
}

/// Status-coded outcome of a device call.
///
/// `code` is 0 on success, the vendor error code when the device rejected
/// the call, and -1 for timeouts and local failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallResult {
    pub code: i64,
    pub data: Value,
}

impl CallResult {
    pub fn ok(data: Value) -> Self {
        Self { code: 0, data }
    }

    /// Local failure with `{"error": message}` as data.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: STATUS_FAILURE,
            data: json!({ "error": message.into() }),
        }
    }

    pub fn timeout() -> Self {
        Self::failure("Timeout")
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    pub fn is_timeout(&self) -> bool {
        self.code == STATUS_FAILURE
            && self.data.get("error").and_then(Value::as_str) == Some("Timeout")
    }

    /// Vendor error object, if the device returned one.
    pub fn vendor_error(&self) -> Option<VendorError> {
        if self.code == 0 {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Whether the result is the `["ok"]` acknowledgement legacy methods return.
    pub fn is_ok_ack(&self) -> bool {
        self.is_ok() && self.data.get(0).and_then(Value::as_str) == Some("ok")
    }
}

/// Parsed `miIO.info` result.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub model: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub life: Option<u64>,
    #[serde(default)]
    pub uid: Option<u64>,
    #[serde(default)]
    pub fw_ver: Option<String>,
}
