//! Scripted transport: a test double for the broker connection.
//!
//! Tests push [`InboundEvent`]s; the gateway's reader thread picks them up
//! exactly as it would from a socket. Every request the gateway sends is
//! recorded for assertions.
//!
//! [`ScriptedTransport::settle`] blocks until every pushed event has been
//! dispatched, so a test can push, settle, then assert without sleeping.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tbot_gateway::{InboundEvent, OutboundRequest, Transport, TransportError};
use tracing::debug;

const SIGNAL_POLL: Duration = Duration::from_millis(25);

#[derive(Default)]
struct Inner {
    connected: bool,
    refuse_connect: bool,
    inbox: VecDeque<InboundEvent>,
    pushed: u64,
    processed: u64,
    sent: Vec<OutboundRequest>,
    connect_calls: Vec<(String, u16, i32)>,
    on_connect: Vec<InboundEvent>,
}

pub struct ScriptedTransport {
    inner: Mutex<Inner>,
    signal: Condvar,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Connect replies with next-valid-id 1 and a single managed account.
    pub fn new() -> Self {
        Self::with_handshake(vec![
            InboundEvent::NextValidId { order_id: 1 },
            InboundEvent::ManagedAccounts {
                accounts: "DU0001".to_string(),
            },
        ])
    }

    /// Connect replies with `handshake`, in order.
    pub fn with_handshake(handshake: Vec<InboundEvent>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                on_connect: handshake,
                ..Inner::default()
            }),
            signal: Condvar::new(),
        }
    }

    /// Subsequent connects fail with `ConnectFailed`.
    pub fn refuse_connections(&self) {
        self.inner.lock().refuse_connect = true;
    }

    pub fn push(&self, event: InboundEvent) {
        let mut inner = self.inner.lock();
        inner.inbox.push_back(event);
        inner.pushed += 1;
        self.signal.notify_all();
    }

    pub fn push_all(&self, events: impl IntoIterator<Item = InboundEvent>) {
        for event in events {
            self.push(event);
        }
    }

    /// Simulates the broker dropping the socket.
    pub fn close_remotely(&self) {
        let mut inner = self.inner.lock();
        inner.connected = false;
        self.signal.notify_all();
    }

    /// Blocks until every pushed event has been dispatched. Returns `false`
    /// on timeout.
    pub fn settle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.processed < inner.pushed {
            if self.signal.wait_until(&mut inner, deadline).timed_out() {
                return inner.processed >= inner.pushed;
            }
        }
        true
    }

    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.inner.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.lock().sent.len()
    }

    pub fn clear_sent(&self) {
        self.inner.lock().sent.clear();
    }

    pub fn connect_calls(&self) -> Vec<(String, u16, i32)> {
        self.inner.lock().connect_calls.clone()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.connect_calls.push((host.to_string(), port, client_id));
        if inner.refuse_connect {
            return Err(TransportError::ConnectFailed {
                host: host.to_string(),
                port,
                reason: "refused by script".to_string(),
            });
        }
        inner.connected = true;
        let handshake = inner.on_connect.clone();
        inner.pushed += handshake.len() as u64;
        inner.inbox.extend(handshake);
        self.signal.notify_all();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    fn send(&self, request: OutboundRequest) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        debug!(?request, "scripted send");
        inner.sent.push(request);
        Ok(())
    }

    fn wait_for_signal(&self) {
        let mut inner = self.inner.lock();
        if inner.inbox.is_empty() && inner.connected {
            self.signal.wait_for(&mut inner, SIGNAL_POLL);
        }
    }

    fn process_messages(&self, sink: &mut dyn FnMut(InboundEvent)) -> Result<(), TransportError> {
        loop {
            // The lock is released before dispatch: handlers send requests.
            let next = self.inner.lock().inbox.pop_front();
            let Some(event) = next else {
                return Ok(());
            };
            sink(event);
            let mut inner = self.inner.lock();
            inner.processed += 1;
            self.signal.notify_all();
        }
    }

    fn disconnect(&self) {
        self.close_remotely();
    }
}
