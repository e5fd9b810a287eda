//! tbot-gateway: the broker gateway.
//!
//! Owns the single broker connection, correlates asynchronous responses with
//! the handlers that asked for them, and keeps order ids unique. Callers talk
//! to [`BrokerGateway`]; the wire protocol lives behind [`Transport`].

pub mod error;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod ids;
pub mod prices;
pub mod registry;
pub mod requests;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{GatewayError, TransportError, NOT_CONNECTED_CODE, NO_SECURITY_DEFINITION_CODE};
pub use events::InboundEvent;
pub use gateway::{parse_bar_time, BrokerGateway, HISTORICAL_END_MARKER};
pub use handlers::*;
pub use prices::{fix_price_variance, PricingError, DEFAULT_MIN_TICK};
pub use requests::{HistoricalDataQuery, HistoricalTicksQuery, OutboundRequest};
pub use session::SessionState;
pub use transport::Transport;
pub use types::*;
