// MIT License - Copyright (c) 2026 Peter Wright
// Handshake session and acquisition state machine

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use crate::constants::HANDSHAKE_TTL_SECS;
use crate::crypto::PacketHeader;

/// Identity and clock negotiated with a device by a hello/ack exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeSession {
    pub device_type: u16,
    pub device_id: u16,
    /// Device timestamp carried by the ack.
    pub timestamp: u32,
    /// Local time the ack was received.
    pub completed_at: Instant,
}

impl HandshakeSession {
    pub fn from_ack(ack: &PacketHeader, completed_at: Instant) -> Self {
        Self {
            device_type: ack.device_type,
            device_id: ack.device_id,
            timestamp: ack.timestamp,
            completed_at,
        }
    }

    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.completed_at) < Duration::from_secs(HANDSHAKE_TTL_SECS)
    }

    /// Header for an outbound packet sent at `now`.
    ///
    /// The timestamp advances by whole seconds elapsed since the ack.
    pub fn header_at(&self, now: Instant) -> PacketHeader {
        let elapsed = now.saturating_duration_since(self.completed_at).as_secs() as u32;
        PacketHeader {
            device_type: self.device_type,
            device_id: self.device_id,
            timestamp: self.timestamp.wrapping_add(elapsed),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Empty,
    InProgress,
    Completed(HandshakeSession),
}

/// Outcome of [`HandshakeTracker::acquire`].
#[derive(Debug)]
pub enum Acquire {
    /// A fresh session is available.
    Ready(HandshakeSession),
    /// The caller was queued. When `send_hello` is set the caller must
    /// transmit the hello packet.
    Wait {
        receiver: oneshot::Receiver<HandshakeSession>,
        send_hello: bool,
    },
}

/// Handshake state for one device: `Empty -> InProgress -> Completed`.
///
/// Waiters are resolved in registration order. A waiter cancels itself by
/// dropping its receiver; closed senders are skipped on completion.
#[derive(Debug)]
pub struct HandshakeTracker {
    state: HandshakeState,
    waiters: VecDeque<oneshot::Sender<HandshakeSession>>,
}

impl Default for HandshakeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeTracker {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Empty,
            waiters: VecDeque::new(),
        }
    }

    pub fn acquire(&mut self, now: Instant) -> Acquire {
        if let HandshakeState::Completed(session) = self.state {
            if session.is_fresh_at(now) {
                return Acquire::Ready(session);
            }
            debug!("Handshake session is stale, renegotiating");
            self.state = HandshakeState::Empty;
        }

        let send_hello = self.state == HandshakeState::Empty;
        if send_hello {
            self.state = HandshakeState::InProgress;
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        Acquire::Wait {
            receiver: rx,
            send_hello,
        }
    }

    /// Record a received ack and release every queued waiter.
    ///
    /// Returns the number of waiters that received the session.
    pub fn complete(&mut self, session: HandshakeSession) -> usize {
        self.state = HandshakeState::Completed(session);
        let mut resolved = 0;
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.send(session).is_ok() {
                resolved += 1;
            }
        }
        resolved
    }

    /// Called after a waiter gave up. Drops cancelled entries and, when no
    /// live waiter is left on an unanswered hello, resets to `Empty`.
    pub fn abandon(&mut self) {
        self.waiters.retain(|w| !w.is_closed());
        if self.waiters.is_empty() && self.state == HandshakeState::InProgress {
            debug!("Handshake abandoned, next caller will send a new hello");
            self.state = HandshakeState::Empty;
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.state == HandshakeState::InProgress
    }

    pub fn session(&self) -> Option<HandshakeSession> {
        match self.state {
            HandshakeState::Completed(session) => Some(session),
            _ => None,
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}
