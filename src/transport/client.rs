// MIT License - Copyright (c) 2026 Peter Wright
// UDP control-protocol client

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, trace, warn};

use crate::config::DeviceConfig;
use crate::constants::HELLO_PACKET;
use crate::crypto::{DecodedPacket, PacketCodec};
use crate::error::{MiioError, Result};
use crate::protocol::{CallResult, DeviceInfo, Method};
use crate::transport::call::{encode_request, next_request_id, parse_reply, CallTable};
use crate::transport::handshake::{Acquire, HandshakeSession, HandshakeTracker};

/// State shared between callers and the reader task.
#[derive(Debug, Default)]
pub(crate) struct ClientState {
    pub handshake: HandshakeTracker,
    pub calls: CallTable,
}

/// Control-protocol client for a single device.
///
/// Owns one UDP socket connected to the device's control port and a
/// background task that decodes every inbound datagram. Calls may be
/// issued concurrently; replies are matched by request id.
pub struct ProtocolClient {
    id: String,
    socket: Arc<UdpSocket>,
    codec: Arc<PacketCodec>,
    state: Arc<Mutex<ClientState>>,
    handshake_timeout: Duration,
    call_timeout: Duration,
    reader_handle: JoinHandle<()>,
}

impl ProtocolClient {
    /// Bind a local socket and connect it to the configured device.
    ///
    /// No packet is sent until the first call.
    pub async fn connect(config: &DeviceConfig) -> Result<Self> {
        let codec = Arc::new(PacketCodec::from_hex_token(&config.token)?);

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(config.control_addr()).await.map_err(|e| {
            error!("[{}] Cannot resolve {}: {}", config.id, config.control_addr(), e);
            MiioError::Io(e)
        })?;
        let socket = Arc::new(socket);
        info!("[{}] Control socket ready for {}", config.id, config.control_addr());

        let state = Arc::new(Mutex::new(ClientState::default()));
        let reader_handle = spawn_reader_task(
            config.id.clone(),
            socket.clone(),
            codec.clone(),
            state.clone(),
        );

        Ok(Self {
            id: config.id.clone(),
            socket,
            codec,
            state,
            handshake_timeout: config.handshake_timeout(),
            call_timeout: config.call_timeout(),
            reader_handle,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Return a fresh handshake session, negotiating one if needed.
    ///
    /// Concurrent callers share a single outstanding hello.
    pub async fn acquire_handshake(&self) -> Result<HandshakeSession> {
        let acquire = self.state.lock().await.handshake.acquire(Instant::now());
        let (receiver, send_hello) = match acquire {
            Acquire::Ready(session) => return Ok(session),
            Acquire::Wait {
                receiver,
                send_hello,
            } => (receiver, send_hello),
        };

        if send_hello {
            debug!("[{}] Sending hello", self.id);
            if let Err(e) = self.socket.send(&HELLO_PACKET).await {
                drop(receiver);
                self.state.lock().await.handshake.abandon();
                return Err(MiioError::Io(e));
            }
        }

        let outcome = timeout(self.handshake_timeout, receiver).await;
        match outcome {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(_)) => Err(MiioError::ChannelClosed),
            Err(_) => {
                self.state.lock().await.handshake.abandon();
                warn!("[{}] Handshake timeout", self.id);
                Err(MiioError::HandshakeTimeout)
            }
        }
    }

    /// Issue a call and wait for its reply.
    ///
    /// A missing reply resolves as [`CallResult::timeout`]; only handshake
    /// and socket failures are errors.
    pub async fn call(&self, method: &str, params: Value) -> Result<CallResult> {
        debug!("[{}] Call {} {}", self.id, method, params);

        let session = self.acquire_handshake().await?;
        let id = next_request_id();
        let payload = encode_request(id, method, params)?;
        let packet = self.codec.encode(session.header_at(Instant::now()), &payload)?;

        let receiver = self.state.lock().await.calls.register(id);
        if let Err(e) = self.socket.send(&packet).await {
            self.state.lock().await.calls.cancel(id);
            error!("[{}] Failed to send call {}: {}", self.id, id, e);
            return Err(MiioError::Io(e));
        }

        let outcome = timeout(self.call_timeout, receiver).await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.state.lock().await.calls.cancel(id);
                return Err(MiioError::ChannelClosed);
            }
            Err(_) => {
                self.state.lock().await.calls.cancel(id);
                debug!("[{}] Call timeout: {} {}", self.id, id, method);
                CallResult::timeout()
            }
        };

        debug!("[{}] Call result {} {}", self.id, result.code, result.data);
        Ok(result)
    }

    pub async fn call_method(&self, method: &Method) -> Result<CallResult> {
        self.call(method.name(), method.params()).await
    }

    /// Query device identity with `miIO.info`.
    pub async fn info(&self) -> Result<DeviceInfo> {
        let result = self.call_method(&Method::Info).await?;
        if !result.is_ok() {
            warn!("[{}] miIO.info failed: {} {}", self.id, result.code, result.data);
            return Err(MiioError::InfoUnavailable {
                id: self.id.clone(),
            });
        }
        serde_json::from_value(result.data).map_err(|e| {
            warn!("[{}] Unexpected miIO.info result: {}", self.id, e);
            MiioError::InfoUnavailable {
                id: self.id.clone(),
            }
        })
    }

    /// Stop the reader task. Outstanding calls resolve by timeout.
    pub fn shutdown(&self) {
        debug!("[{}] Shutting down control client", self.id);
        self.reader_handle.abort();
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Spawn the reader task that processes datagrams from the device.
fn spawn_reader_task(
    id: String,
    socket: Arc<UdpSocket>,
    codec: Arc<PacketCodec>,
    state: Arc<Mutex<ClientState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];

        loop {
            let n = match socket.recv(&mut buf).await {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    // ICMP port unreachable from a previous send
                    debug!("[{}] Device refused datagram", id);
                    continue;
                }
                Err(e) => {
                    error!("[{}] Reader: socket error: {}", id, e);
                    break;
                }
            };
            trace!("[{}] Received {} bytes", id, n);

            let mut guard = state.lock().await;
            if let Err(e) = dispatch_datagram(&mut guard, &codec, &buf[..n], Instant::now()) {
                if e.is_framing() {
                    warn!("[{}] Dropping malformed datagram: {}", id, e);
                } else {
                    warn!("[{}] Dropping undecodable datagram: {}", id, e);
                }
            }
        }
    })
}

/// Apply one inbound datagram to the client state.
pub(crate) fn dispatch_datagram(
    state: &mut ClientState,
    codec: &PacketCodec,
    bytes: &[u8],
    now: Instant,
) -> Result<()> {
    match codec.decode(bytes)? {
        DecodedPacket::HandshakeAck(header) => {
            let session = HandshakeSession::from_ack(&header, now);
            let resolved = state.handshake.complete(session);
            debug!(
                "Handshake completed (type {:#06x}, id {:#06x}, ts {}), {} waiter(s)",
                session.device_type, session.device_id, session.timestamp, resolved
            );
        }
        DecodedPacket::Message { payload, .. } => {
            let reply = parse_reply(&payload)?;
            state.calls.resolve(reply.id, reply.into_result());
        }
    }
    Ok(())
}
