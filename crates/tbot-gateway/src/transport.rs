//! Transport boundary.
//!
//! A transport owns the duplex connection and its wire codec. The gateway
//! only needs to send typed requests and receive typed events; how bytes
//! move is the transport's business.
//!
//! Contract for implementors:
//! - `wait_for_signal` blocks until inbound data may be available **or** the
//!   transport disconnects. It must never block forever after `disconnect`.
//! - `process_messages` decodes zero or more buffered messages and hands each
//!   to `sink`, synchronously and in arrival order, then returns.
//! - `send` never waits for a broker round trip.

use crate::error::TransportError;
use crate::events::InboundEvent;
use crate::requests::OutboundRequest;

pub trait Transport: Send + Sync {
    fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn send(&self, request: OutboundRequest) -> Result<(), TransportError>;

    fn wait_for_signal(&self);

    fn process_messages(&self, sink: &mut dyn FnMut(InboundEvent)) -> Result<(), TransportError>;

    fn disconnect(&self);
}
