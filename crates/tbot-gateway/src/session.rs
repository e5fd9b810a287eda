//! Connection session: the single duplex connection plus its reader thread.
//!
//! # Delivery invariant
//!
//! Exactly one reader thread per connection. It blocks on the transport's
//! signal, drains every buffered message, and hands each event to the sink
//! synchronously and in arrival order. Nothing else ever calls the sink, so
//! dispatch is never concurrent with itself.
//!
//! # Close notification
//!
//! Whether the session ends through [`ConnectionSession::disconnect`], a
//! connection-closed event, or the reader noticing the transport went away,
//! exactly one of those paths reports "first close" (returns `true`). The
//! caller on that path notifies the lifecycle observer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::events::InboundEvent;
use crate::transport::Transport;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Receiver of everything the reader thread produces.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: InboundEvent);

    /// The reader loop ended because the transport stopped being connected.
    fn reader_exited(&self);
}

pub struct ConnectionSession {
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    close_reported: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(SessionState::Disconnected),
            close_reported: AtomicBool::new(false),
            reader: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected && self.transport.is_connected()
    }

    /// Disconnected → Connecting → Connected, then starts the reader thread.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        client_id: i32,
        sink: Weak<dyn EventSink>,
    ) -> Result<(), GatewayError> {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Disconnected {
                return Err(GatewayError::AlreadyConnected);
            }
            *state = SessionState::Connecting;
        }

        // A reader left over from a remotely closed session has already
        // exited its loop; reap it before starting another.
        self.reap_reader();

        info!(host, port, client_id, "connecting");
        if let Err(e) = self.transport.connect(host, port, client_id) {
            *self.state.lock() = SessionState::Disconnected;
            return Err(e.into());
        }
        self.close_reported.store(false, Ordering::SeqCst);

        // Connected before the reader starts: the first event (next valid id)
        // may trigger requests from the connected callback.
        *self.state.lock() = SessionState::Connected;

        let transport = Arc::clone(&self.transport);
        let spawned = thread::Builder::new()
            .name(format!("tbot-reader-{client_id}"))
            .spawn(move || reader_loop(transport, sink));

        match spawned {
            Ok(handle) => {
                *self.reader.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.transport.disconnect();
                *self.state.lock() = SessionState::Disconnected;
                Err(GatewayError::ReaderSpawn(e.to_string()))
            }
        }
    }

    /// Connected → Disconnecting → Disconnected. Returns `true` when this
    /// call is the first to report the close.
    pub fn disconnect(&self) -> bool {
        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Disconnected | SessionState::Disconnecting => return false,
                SessionState::Connecting | SessionState::Connected => {
                    *state = SessionState::Disconnecting;
                }
            }
        }

        info!("disconnecting");
        self.transport.disconnect();
        let first = self.report_close();
        self.reap_reader();
        *self.state.lock() = SessionState::Disconnected;
        first
    }

    /// Transport-initiated close, observed on the reader thread. Returns
    /// `true` when this call is the first to report the close.
    pub fn on_remote_close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Connected {
                *state = SessionState::Disconnected;
            }
        }
        self.report_close()
    }

    fn report_close(&self) -> bool {
        !self.close_reported.swap(true, Ordering::SeqCst)
    }

    fn reap_reader(&self) {
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            // Disconnect may be requested by a handler running on the reader
            // itself; that thread cannot join itself.
            if handle.thread().id() == thread::current().id() {
                debug!("disconnect requested from reader thread; not joining");
                return;
            }
            if handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }
}

fn reader_loop(transport: Arc<dyn Transport>, sink: Weak<dyn EventSink>) {
    debug!("reader started");
    while transport.is_connected() {
        transport.wait_for_signal();

        let Some(sink) = sink.upgrade() else {
            debug!("event sink dropped; reader exiting");
            return;
        };

        let result = transport.process_messages(&mut |event| sink.dispatch(event));
        if let Err(e) = result {
            warn!(error = %e, "inbound processing failed");
            sink.dispatch(InboundEvent::TransportFailure {
                message: e.to_string(),
            });
        }
    }

    if let Some(sink) = sink.upgrade() {
        sink.reader_exited();
    }
    debug!("reader stopped");
}
