//! Gateway and transport error types.
//!
//! None of these ever reach the caller of a `request_*` / `place_*` method:
//! the gateway reports them through the [`ConnectionHandler`] instead.
//! They are returned by the lower layers (transport, session) so the gateway
//! can decide how to surface them.
//!
//! [`ConnectionHandler`]: crate::handlers::ConnectionHandler

use std::fmt;

/// Broker code used for "not connected" reports on the message channel.
pub const NOT_CONNECTED_CODE: i32 = 504;

/// Broker code for "no security definition has been found for the request".
/// Like any error carrying a details request id, it ends that request.
pub const NO_SECURITY_DEFINITION_CODE: i32 = 200;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be opened.
    ConnectFailed { host: String, port: u16, reason: String },
    /// A request was handed to a transport that is not connected.
    NotConnected,
    /// The request could not be written to the connection.
    SendFailed(String),
    /// Inbound bytes could not be decoded into an event.
    Decode(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectFailed { host, port, reason } => {
                write!(f, "TRANSPORT: connect to {host}:{port} failed: {reason}")
            }
            TransportError::NotConnected => write!(f, "TRANSPORT: not connected"),
            TransportError::SendFailed(reason) => write!(f, "TRANSPORT: send failed: {reason}"),
            TransportError::Decode(reason) => write!(f, "TRANSPORT: decode failed: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Errors produced by the session / gateway layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// An outbound call was made before the broker delivered a next-valid-id.
    NotConnected,
    /// `connect` was called while a session is already open or closing.
    AlreadyConnected,
    /// The reader thread could not be spawned.
    ReaderSpawn(String),
    Transport(TransportError),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NotConnected => write!(f, "Not connected"),
            GatewayError::AlreadyConnected => write!(f, "GATEWAY: session already open"),
            GatewayError::ReaderSpawn(reason) => {
                write!(f, "GATEWAY: failed to spawn reader thread: {reason}")
            }
            GatewayError::Transport(e) => write!(f, "GATEWAY: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for GatewayError {
    fn from(e: TransportError) -> Self {
        GatewayError::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_renders_broker_text() {
        assert_eq!(GatewayError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn transport_error_is_the_source() {
        use std::error::Error;
        let e = GatewayError::from(TransportError::SendFailed("broken pipe".into()));
        assert!(e.source().is_some());
        assert!(e.to_string().contains("broken pipe"));
    }
}
