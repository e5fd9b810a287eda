//! [`PaperBroker`] behind the gateway's [`Transport`] boundary.
//!
//! `send` runs the request through the book and queues the replies; the
//! gateway's reader thread drains the queue exactly as it would a socket.
//! The lock is never held during dispatch, so handlers may send from inside
//! a callback.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tbot_gateway::{InboundEvent, OrderStatus, OutboundRequest, Transport, TransportError};
use tracing::{debug, info};

use crate::{PaperBroker, PaperSettings};

const SIGNAL_POLL: Duration = Duration::from_millis(50);

struct Inner {
    connected: bool,
    broker: PaperBroker,
    inbox: VecDeque<InboundEvent>,
}

pub struct PaperTransport {
    inner: Mutex<Inner>,
    signal: Condvar,
}

impl PaperTransport {
    pub fn new(settings: PaperSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                connected: false,
                broker: PaperBroker::new(settings),
                inbox: VecDeque::new(),
            }),
            signal: Condvar::new(),
        }
    }

    /// Moves a symbol's quote; see [`PaperBroker::set_quote`].
    pub fn set_quote(&self, symbol: &str, price: f64) {
        let mut inner = self.inner.lock();
        let events = inner.broker.set_quote(symbol, price);
        if inner.connected {
            inner.inbox.extend(events);
            self.signal.notify_all();
        }
    }

    /// Read access to the book, for assertions and reporting.
    pub fn with_broker<R>(&self, f: impl FnOnce(&PaperBroker) -> R) -> R {
        f(&self.inner.lock().broker)
    }

    pub fn filled_orders(&self) -> usize {
        self.with_broker(|b| {
            b.orders()
                .iter()
                .filter(|o| o.status == OrderStatus::Filled)
                .count()
        })
    }
}

impl Default for PaperTransport {
    fn default() -> Self {
        Self::new(PaperSettings::default())
    }
}

impl Transport for PaperTransport {
    fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.connected {
            return Err(TransportError::ConnectFailed {
                host: host.to_string(),
                port,
                reason: "paper broker already connected".to_string(),
            });
        }
        inner.connected = true;
        let handshake = inner.broker.handshake();
        inner.inbox.extend(handshake);
        self.signal.notify_all();
        info!(host, port, client_id, "paper broker connected");
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
        let replies = inner.broker.handle(request);
        if !replies.is_empty() {
            inner.inbox.extend(replies);
            self.signal.notify_all();
        }
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
            let next = self.inner.lock().inbox.pop_front();
            let Some(event) = next else {
                return Ok(());
            };
            sink(event);
        }
    }

    fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if inner.connected {
            inner.connected = false;
            let dropped = inner.inbox.len();
            inner.inbox.clear();
            debug!(dropped, "paper broker disconnected");
        }
        self.signal.notify_all();
    }
}
