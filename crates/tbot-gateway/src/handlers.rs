//! Consumer-facing handler traits.
//!
//! One trait per request category. Every method has a no-op default so a
//! handler overrides only what it consumes. Handlers are shared as
//! `Arc<dyn Trait>`; the `Arc` address is the handler's identity for
//! cancellation.
//!
//! All methods are invoked on the connection's reader thread, strictly in
//! arrival order. A panicking handler is isolated: the panic is logged and
//! delivery continues with the next handler / event.

use crate::types::{
    AccountSummaryTag, Bar, BulletinType, CommissionReport, Contract, ContractDetails,
    DeepOperation, DeepSide, Execution, HistoricalTick, HistoricalTickBidAsk, HistoricalTickLast,
    MarketDataType, Order, OrderState, OrderStatusUpdate, PortfolioPosition, TickByTick, TickType,
};

/// Process-wide connection observer. Also the channel for NotConnected and
/// every broker error/message.
pub trait ConnectionHandler: Send + Sync {
    fn connected(&self) {}
    fn disconnected(&self) {}
    fn account_list(&self, _accounts: &[String]) {}
    /// Transport-level failures (socket, decode, send).
    fn error(&self, _error: &str) {}
    fn message(&self, _id: i32, _code: i32, _message: &str) {}
    fn show(&self, _text: &str) {}
}

/// Per-order status callbacks, registered under the order id.
pub trait OrderHandler: Send + Sync {
    fn order_state(&self, _state: &OrderState) {}
    fn order_status(&self, _update: &OrderStatusUpdate) {}
    /// Broker error whose id is this handler's order id.
    fn handle(&self, _code: i32, _message: &str) {}
}

/// Observer of every order on the account.
pub trait LiveOrderHandler: Send + Sync {
    fn open_order(&self, _contract: &Contract, _order: &Order, _state: &OrderState) {}
    fn open_order_end(&self) {}
    fn order_status(&self, _update: &OrderStatusUpdate) {}
    fn handle(&self, _order_id: i32, _code: i32, _message: &str) {}
}

pub trait TopMktDataHandler: Send + Sync {
    fn tick_price(&self, _tick_type: TickType, _price: f64) {}
    fn tick_size(&self, _tick_type: TickType, _size: i64) {}
    fn tick_string(&self, _tick_type: TickType, _value: &str) {}
    fn tick_generic(&self, _tick_type: TickType, _value: f64) {}
    fn tick_snapshot_end(&self) {}
    fn market_data_type(&self, _data_type: MarketDataType) {}
}

pub trait DeepMktDataHandler: Send + Sync {
    fn update_mkt_depth(
        &self,
        _position: i32,
        _market_maker: Option<&str>,
        _operation: DeepOperation,
        _side: DeepSide,
        _price: f64,
        _size: i64,
    ) {
    }
}

pub trait HistoricalDataHandler: Send + Sync {
    fn historical_data(&self, _bar: &Bar) {}
    fn historical_data_end(&self) {}
}

pub trait HistoricalTickHandler: Send + Sync {
    fn historical_ticks(&self, _req_id: i32, _ticks: &[HistoricalTick], _done: bool) {}
    fn historical_ticks_bid_ask(&self, _req_id: i32, _ticks: &[HistoricalTickBidAsk], _done: bool) {
    }
    fn historical_ticks_last(&self, _req_id: i32, _ticks: &[HistoricalTickLast], _done: bool) {}
}

pub trait RealTimeBarHandler: Send + Sync {
    fn real_time_bar(&self, _bar: &Bar) {}
}

pub trait AccountHandler: Send + Sync {
    fn account_value(&self, _account: &str, _key: &str, _value: &str, _currency: &str) {}
    fn account_time(&self, _timestamp: &str) {}
    fn account_download_end(&self, _account: &str) {}
    fn update_portfolio(&self, _position: &PortfolioPosition) {}
}

pub trait AccountSummaryHandler: Send + Sync {
    fn account_summary(&self, _account: &str, _tag: AccountSummaryTag, _value: &str, _currency: &str) {
    }
    fn account_summary_end(&self) {}
}

pub trait PositionHandler: Send + Sync {
    fn position(&self, _account: &str, _contract: &Contract, _position: f64, _avg_cost: f64) {}
    fn position_end(&self) {}
}

pub trait PositionMultiHandler: Send + Sync {
    fn position_multi(
        &self,
        _account: &str,
        _model_code: &str,
        _contract: &Contract,
        _position: f64,
        _avg_cost: f64,
    ) {
    }
    fn position_multi_end(&self) {}
}

/// Details are collected by the gateway and delivered once, at the end of
/// the request (or when the broker reports "no security definition").
pub trait ContractDetailsHandler: Send + Sync {
    fn contract_details(&self, _details: &[ContractDetails]) {}
}

pub trait TradeReportHandler: Send + Sync {
    fn trade_report(&self, _trade_key: &str, _contract: &Contract, _execution: &Execution) {}
    fn trade_report_end(&self) {}
    fn commission_report(&self, _trade_key: &str, _report: &CommissionReport) {}
}

pub trait ScannerHandler: Send + Sync {
    fn scanner_parameters(&self, _xml: &str) {}
    fn scanner_data(&self, _rank: i32, _details: &ContractDetails, _legs: &str) {}
    fn scanner_data_end(&self) {}
}

pub trait FundamentalsHandler: Send + Sync {
    fn fundamentals(&self, _data: &str) {}
}

pub trait TimeHandler: Send + Sync {
    fn current_time(&self, _time: i64) {}
}

pub trait BulletinHandler: Send + Sync {
    fn bulletin(&self, _msg_id: i32, _msg_type: BulletinType, _message: &str, _origin: &str) {}
}

pub trait PnLHandler: Send + Sync {
    fn pnl(&self, _req_id: i32, _daily: f64, _unrealized: f64, _realized: f64) {}
}

pub trait PnLSingleHandler: Send + Sync {
    fn pnl_single(
        &self,
        _req_id: i32,
        _position: f64,
        _daily: f64,
        _unrealized: f64,
        _realized: f64,
        _value: f64,
    ) {
    }
}

pub trait TickByTickHandler: Send + Sync {
    fn tick_by_tick(&self, _req_id: i32, _tick: &TickByTick) {}
}

/// Connection observer that only logs. Used when the caller has nothing
/// better to plug in.
#[derive(Debug, Default)]
pub struct LoggingConnectionHandler;

impl ConnectionHandler for LoggingConnectionHandler {
    fn connected(&self) {
        tracing::info!("broker connection ready");
    }

    fn disconnected(&self) {
        tracing::info!("broker connection closed");
    }

    fn account_list(&self, accounts: &[String]) {
        tracing::info!(?accounts, "managed accounts");
    }

    fn error(&self, error: &str) {
        tracing::error!(error, "connection error");
    }

    fn message(&self, id: i32, code: i32, message: &str) {
        tracing::info!(id, code, message, "broker message");
    }

    fn show(&self, text: &str) {
        tracing::info!(text, "broker notice");
    }
}
