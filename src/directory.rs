// MIT License - Copyright (c) 2026 Peter Wright
// Paginated enumeration of gateway children

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::constants::MAX_LIST_PAGES;
use crate::devices::ChildDevice;
use crate::error::Result;
use crate::protocol::Method;
use crate::transport::DeviceCaller;

/// One item of a `get_device_list` page.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChildEntry {
    pub did: String,
    pub model: String,
    #[serde(default)]
    pub num: u64,
    #[serde(default)]
    pub total: u64,
}

/// Outcome of one enumeration run.
#[derive(Debug, Default)]
pub struct Enumeration {
    /// Children with a supported model, in listing order.
    pub children: Vec<ChildDevice>,
    /// Entries with an unsupported model.
    pub skipped: Vec<ChildEntry>,
    /// Number of `get_device_list` round trips.
    pub pages: usize,
}

/// Fetch one page. A failed call or an unexpected result shape is an empty page.
pub async fn fetch_page<C: DeviceCaller>(caller: &C) -> Result<Vec<ChildEntry>> {
    let method = Method::GetDeviceList;
    let result = caller.call(method.name(), method.params()).await?;
    if !result.is_ok() {
        warn!("get_device_list failed: {} {}", result.code, result.data);
        return Ok(Vec::new());
    }
    Ok(parse_page(result.data))
}

fn parse_page(data: Value) -> Vec<ChildEntry> {
    match serde_json::from_value(data) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Unexpected get_device_list result: {}", e);
            Vec::new()
        }
    }
}

/// List every child of a gateway.
///
/// Pages are requested until the received count reaches the `total` of the
/// first non-empty page. An empty page before that ends the run early, and
/// at most [`MAX_LIST_PAGES`] pages are requested.
pub async fn enumerate<C: DeviceCaller>(caller: &C) -> Result<Enumeration> {
    let mut out = Enumeration::default();
    let mut total: Option<u64> = None;
    let mut loaded: u64 = 0;

    loop {
        if out.pages >= MAX_LIST_PAGES {
            warn!(
                "Stopping child enumeration after {} pages ({} of {:?} received)",
                out.pages, loaded, total
            );
            break;
        }

        let page = fetch_page(caller).await?;
        out.pages += 1;

        if page.is_empty() {
            if total.is_some_and(|t| loaded < t) {
                warn!(
                    "Empty device list page, stopping with {} of {:?} children",
                    loaded, total
                );
            }
            break;
        }

        if total.is_none() {
            total = Some(page[0].total);
        }
        loaded += page.len() as u64;
        debug!("Device list page {}: {} entries", out.pages, page.len());

        for entry in page {
            match ChildDevice::from_model(entry.did.clone(), &entry.model) {
                Some(child) => out.children.push(child),
                None => {
                    warn!("Unknown device model \"{}\" for did={}", entry.model, entry.did);
                    out.skipped.push(entry);
                }
            }
        }

        if total.is_some_and(|t| loaded >= t) {
            break;
        }
    }

    info!(
        "Child devices loaded: count={} skipped={} pages={}",
        out.children.len(),
        out.skipped.len(),
        out.pages
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MiioError;
    use crate::protocol::CallResult;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted results for `get_device_list`.
    struct ScriptedCaller {
        pages: Mutex<VecDeque<CallResult>>,
        calls: Mutex<usize>,
    }

    impl ScriptedCaller {
        fn new(pages: Vec<CallResult>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl DeviceCaller for ScriptedCaller {
        async fn call(&self, method: &str, params: Value) -> Result<CallResult> {
            assert_eq!(method, "get_device_list");
            assert_eq!(params, json!([]));
            *self.calls.lock().unwrap() += 1;
            Ok(self
                .pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CallResult::ok(json!([]))))
        }
    }

    fn entry(did: &str, model: &str, num: u64, total: u64) -> Value {
        json!({"did": did, "model": model, "num": num, "total": total})
    }

    #[tokio::test]
    async fn test_three_pages() {
        let caller = ScriptedCaller::new(vec![
            CallResult::ok(json!([
                entry("lumi.1", "lumi.weather.v1", 0, 5),
                entry("lumi.2", "lumi.sensor_ht", 1, 5)
            ])),
            CallResult::ok(json!([
                entry("lumi.3", "lumi.sensor_motion.aq2", 2, 5),
                entry("lumi.4", "lumi.sensor_magnet.aq2", 3, 5)
            ])),
            CallResult::ok(json!([entry("lumi.5", "lumi.weather.v1", 4, 5)])),
        ]);

        let out = enumerate(&caller).await.unwrap();
        assert_eq!(caller.calls(), 3);
        assert_eq!(out.pages, 3);
        assert_eq!(out.children.len(), 5);
        assert_eq!(out.children[2].did(), "lumi.3");
        assert!(out.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_skipped() {
        let caller = ScriptedCaller::new(vec![
            CallResult::ok(json!([
                entry("lumi.1", "lumi.plug.v1", 0, 3),
                entry("lumi.2", "lumi.weather.v1", 1, 3)
            ])),
            CallResult::ok(json!([entry("lumi.3", "lumi.sensor_magnet.aq2", 2, 3)])),
        ]);

        let out = enumerate(&caller).await.unwrap();
        assert_eq!(caller.calls(), 2);
        assert_eq!(out.children.len(), 2);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].model, "lumi.plug.v1");
    }

    #[tokio::test]
    async fn test_empty_page_stops() {
        let caller = ScriptedCaller::new(vec![
            CallResult::ok(json!([entry("lumi.1", "lumi.weather.v1", 0, 4)])),
            CallResult::ok(json!([])),
        ]);

        let out = enumerate(&caller).await.unwrap();
        assert_eq!(caller.calls(), 2);
        assert_eq!(out.children.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_counts_as_empty_page() {
        let caller = ScriptedCaller::new(vec![CallResult::timeout()]);
        let out = enumerate(&caller).await.unwrap();
        assert_eq!(caller.calls(), 1);
        assert!(out.children.is_empty());
    }

    #[tokio::test]
    async fn test_page_cap() {
        // A page that never advances toward total
        let pages = (0..100)
            .map(|i| CallResult::ok(json!([entry(&format!("lumi.{i}"), "lumi.weather.v1", i, 1000)])))
            .collect();
        let caller = ScriptedCaller::new(pages);

        let out = enumerate(&caller).await.unwrap();
        assert_eq!(caller.calls(), MAX_LIST_PAGES);
        assert_eq!(out.children.len(), MAX_LIST_PAGES);
    }

    #[tokio::test]
    async fn test_handshake_error_propagates() {
        struct Unreachable;
        impl DeviceCaller for Unreachable {
            async fn call(&self, _method: &str, _params: Value) -> Result<CallResult> {
                Err(MiioError::HandshakeTimeout)
            }
        }
        assert!(matches!(
            enumerate(&Unreachable).await,
            Err(MiioError::HandshakeTimeout)
        ));
    }

    #[test]
    fn test_malformed_page() {
        assert!(parse_page(json!({"did": "x"})).is_empty());
        assert!(parse_page(json!([{"model": "m"}])).is_empty());
    }
}
