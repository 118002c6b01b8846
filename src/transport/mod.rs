// MIT License - Copyright (c) 2026 Peter Wright
// Control-protocol transport

pub mod call;
pub mod client;
pub mod handshake;

use serde_json::Value;

use crate::error::Result;
use crate::protocol::CallResult;

pub use client::ProtocolClient;

/// Anything that can issue a control-protocol call.
///
/// Implemented by [`ProtocolClient`]; enumeration and device logic are
/// written against this trait so they can run against a scripted caller.
#[allow(async_fn_in_trait)]
pub trait DeviceCaller: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<CallResult>;
}

impl DeviceCaller for ProtocolClient {
    async fn call(&self, method: &str, params: Value) -> Result<CallResult> {
        ProtocolClient::call(self, method, params).await
    }
}
