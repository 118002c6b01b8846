// MIT License - Copyright (c) 2026 Peter Wright
// Pending call table and request/reply payload helpers

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::constants::{REQUEST_ID_MAX, REQUEST_ID_MIN};
use crate::error::Result;
use crate::protocol::{CallReply, CallRequest, CallResult};

/// One outstanding call awaiting its reply.
#[derive(Debug)]
pub struct PendingCall {
    pub issued_at: Instant,
    slot: oneshot::Sender<CallResult>,
}

/// Outstanding calls keyed by request id.
///
/// Each entry is fulfilled at most once: by a matching reply through
/// [`resolve`](Self::resolve), or removed by the caller's timeout through
/// [`cancel`](Self::cancel).
#[derive(Debug, Default)]
pub struct CallTable {
    pending: HashMap<u32, PendingCall>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call before its packet is sent.
    pub fn register(&mut self, id: u32) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                issued_at: Instant::now(),
                slot: tx,
            },
        );
        rx
    }

    /// Fulfil the call with `id`. Returns false for unknown ids.
    pub fn resolve(&mut self, id: u32, result: CallResult) -> bool {
        match self.pending.remove(&id) {
            Some(call) => {
                trace!("Reply for {} after {:?}", id, call.issued_at.elapsed());
                // Receiver may be gone if the caller was dropped mid-wait.
                let _ = call.slot.send(result);
                true
            }
            None => {
                debug!("Dropping reply with unknown id {}", id);
                false
            }
        }
    }

    /// Remove the entry for `id`, returning how long it was outstanding.
    pub fn cancel(&mut self, id: u32) -> Option<Duration> {
        self.pending.remove(&id).map(|call| call.issued_at.elapsed())
    }

    pub fn contains(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Draw a request id. Collisions with outstanding ids are not checked.
pub fn next_request_id() -> u32 {
    rand::thread_rng().gen_range(REQUEST_ID_MIN..REQUEST_ID_MAX)
}

pub fn encode_request(id: u32, method: &str, params: Value) -> Result<Vec<u8>> {
    let request = CallRequest {
        id,
        method: method.to_string(),
        params,
    };
    Ok(serde_json::to_vec(&request)?)
}

/// Parse a decrypted reply payload. Devices pad replies with trailing NULs.
pub fn parse_reply(payload: &[u8]) -> Result<CallReply> {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    Ok(serde_json::from_slice(&payload[..end])?)
}
