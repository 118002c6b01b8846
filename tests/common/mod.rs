// Simulated miIO device on the loopback interface
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::net::UdpSocket;

use miio_lan_bridge::constants::{ACK_CHECKSUM, HELLO_PACKET};
use miio_lan_bridge::{DecodedPacket, DeviceConfig, DeviceConfigBuilder, PacketCodec, PacketHeader};

pub const TOKEN: &str = "00112233445566778899aabbccddeeff";

/// What the simulated device sends back for one request.
pub enum Reply {
    Json(Value),
    Raw(Vec<u8>),
}

pub struct FakeDevice {
    pub port: u16,
    pub hellos: Arc<AtomicUsize>,
    pub requests: Arc<AtomicUsize>,
    /// Every decoded request, in arrival order.
    pub received: Arc<Mutex<Vec<Value>>>,
}

impl FakeDevice {
    /// Answer hellos with an ack and each request with `handler`'s replies.
    pub async fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> Vec<Reply> + Send + 'static,
    {
        Self::start(true, handler).await
    }

    /// Count hellos but never acknowledge them.
    pub async fn spawn_mute() -> Self {
        Self::start(false, |_| Vec::new()).await
    }

    async fn start<F>(ack_hello: bool, handler: F) -> Self
    where
        F: Fn(&Value) -> Vec<Reply> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let hellos = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let codec = PacketCodec::from_hex_token(TOKEN).unwrap();

        let (hello_count, request_count, log) = (hellos.clone(), requests.clone(), received.clone());
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65_535];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let bytes = &buf[..n];

                if bytes == &HELLO_PACKET[..] {
                    hello_count.fetch_add(1, Ordering::SeqCst);
                    if ack_hello {
                        let ack = PacketHeader {
                            device_type: 0x0123,
                            device_id: 0x4567,
                            timestamp: 1_000,
                            checksum: ACK_CHECKSUM,
                            ..Default::default()
                        };
                        let _ = socket.send_to(&ack.to_bytes(), peer).await;
                    }
                    continue;
                }

                let Ok(DecodedPacket::Message { payload, .. }) = codec.decode(bytes) else {
                    continue;
                };
                let Ok(request) = serde_json::from_slice::<Value>(&payload) else {
                    continue;
                };
                request_count.fetch_add(1, Ordering::SeqCst);
                log.lock().unwrap().push(request.clone());

                for reply in handler(&request) {
                    let packet = match reply {
                        Reply::Json(value) => codec
                            .encode(PacketHeader::default(), value.to_string().as_bytes())
                            .unwrap(),
                        Reply::Raw(bytes) => bytes,
                    };
                    let _ = socket.send_to(&packet, peer).await;
                }
            }
        });

        Self {
            port,
            hellos,
            requests,
            received,
        }
    }

    /// Config pointing at this device with short timeouts.
    pub fn builder(&self) -> DeviceConfigBuilder {
        DeviceConfig::builder()
            .id("fake")
            .host("127.0.0.1")
            .port(self.port)
            .token(TOKEN)
            .handshake_timeout_ms(500)
            .call_timeout_ms(500)
            // Nothing listens here; the report subscription just retries
            .report_port(1)
    }

    pub fn config(&self) -> DeviceConfig {
        self.builder().build()
    }

    pub fn hello_count(&self) -> usize {
        self.hellos.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Methods received so far, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r["method"].as_str().map(str::to_string))
            .collect()
    }
}

pub fn request_id(request: &Value) -> Value {
    request["id"].clone()
}
