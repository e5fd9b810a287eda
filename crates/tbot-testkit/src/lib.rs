//! Test support shared by the scenario tests of every tbot crate.

use std::sync::Arc;
use std::time::Duration;

use tbot_gateway::BrokerGateway;

pub mod recorders;
pub mod transport;

pub use recorders::{
    wait_until, RecordingBars, RecordingConnection, RecordingDetails, RecordingLiveOrders,
    RecordingOrder, RecordingTicks,
};
pub use transport::ScriptedTransport;

/// Generous bound for cross-thread waits; tests normally finish in microseconds.
pub const SETTLE: Duration = Duration::from_secs(5);

/// A gateway wired to a scripted transport and a recording connection
/// observer, connected and past the handshake.
pub struct Harness {
    pub gateway: Arc<BrokerGateway>,
    pub transport: Arc<ScriptedTransport>,
    pub connection: Arc<RecordingConnection>,
}

impl Harness {
    /// Not yet connected.
    pub fn new() -> Self {
        Self::with_transport(ScriptedTransport::new())
    }

    pub fn with_transport(transport: ScriptedTransport) -> Self {
        let transport = Arc::new(transport);
        let connection = Arc::new(RecordingConnection::default());
        let gateway = BrokerGateway::new(transport.clone(), connection.clone());
        Self {
            gateway,
            transport,
            connection,
        }
    }

    /// Connects and waits for the gateway to become ready.
    pub fn connected() -> Self {
        let h = Self::new();
        h.connect();
        h
    }

    pub fn connect(&self) {
        if let Err(e) = self.gateway.connect("127.0.0.1", 7497, 0) {
            panic!("scripted connect failed: {e}");
        }
        assert!(self.transport.settle(SETTLE), "handshake not dispatched");
        assert!(self.gateway.is_connected(), "gateway not ready after handshake");
    }

    /// Pushes events and waits until all of them are dispatched.
    pub fn deliver(&self, events: impl IntoIterator<Item = tbot_gateway::InboundEvent>) {
        self.transport.push_all(events);
        assert!(self.transport.settle(SETTLE), "events not dispatched in time");
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.gateway.disconnect();
    }
}

/// Installs a test subscriber honoring `RUST_LOG`; safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}
