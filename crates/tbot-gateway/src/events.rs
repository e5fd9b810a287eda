//! Inbound events.
//!
//! A transport decodes whatever arrives on the connection into
//! [`InboundEvent`] values and hands them, one at a time and in arrival
//! order, to the gateway's dispatch. The enum is closed: adding an event kind
//! is a compile error in the dispatch `match` until it is routed.

use serde::{Deserialize, Serialize};

use crate::types::{
    Bar, CommissionReport, Contract, ContractDetails, DeepOperation, DeepSide, Execution,
    HistoricalTick, HistoricalTickBidAsk, HistoricalTickLast, MarketDataType, Order, OrderState,
    OrderStatusUpdate, PortfolioPosition, RawBar, TickByTick, TickType,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InboundEvent {
    // --- connection lifecycle ---
    NextValidId {
        order_id: i32,
    },
    ManagedAccounts {
        accounts: String,
    },
    ConnectionClosed,
    Error {
        id: i32,
        code: i32,
        message: String,
    },
    /// The transport itself failed (socket / decode), not a broker error.
    TransportFailure {
        message: String,
    },

    // --- account ---
    AccountValue {
        account: String,
        key: String,
        value: String,
        currency: String,
    },
    AccountTime {
        timestamp: String,
    },
    AccountDownloadEnd {
        account: String,
    },
    PortfolioUpdate(PortfolioPosition),
    AccountSummary {
        req_id: i32,
        account: String,
        tag: String,
        value: String,
        currency: String,
    },
    AccountSummaryEnd {
        req_id: i32,
    },

    // --- positions ---
    Position {
        account: String,
        contract: Contract,
        position: f64,
        avg_cost: f64,
    },
    PositionEnd,
    PositionMulti {
        req_id: i32,
        account: String,
        model_code: String,
        contract: Contract,
        position: f64,
        avg_cost: f64,
    },
    PositionMultiEnd {
        req_id: i32,
    },

    // --- contract metadata ---
    ContractDetails {
        req_id: i32,
        details: ContractDetails,
    },
    ContractDetailsEnd {
        req_id: i32,
    },

    // --- top of book ---
    TickPrice {
        req_id: i32,
        tick_type: TickType,
        price: f64,
    },
    TickSize {
        req_id: i32,
        tick_type: TickType,
        size: i64,
    },
    TickString {
        req_id: i32,
        tick_type: TickType,
        value: String,
    },
    TickGeneric {
        req_id: i32,
        tick_type: TickType,
        value: f64,
    },
    TickSnapshotEnd {
        req_id: i32,
    },
    MarketDataType {
        req_id: i32,
        data_type: MarketDataType,
    },

    // --- depth ---
    MarketDepth {
        req_id: i32,
        position: i32,
        market_maker: Option<String>,
        operation: DeepOperation,
        side: DeepSide,
        price: f64,
        size: i64,
    },

    // --- orders ---
    OrderStatus(OrderStatusUpdate),
    OpenOrder {
        order_id: i32,
        contract: Contract,
        order: Order,
        state: OrderState,
    },
    OpenOrderEnd,

    // --- executions ---
    ExecDetails {
        req_id: i32,
        contract: Contract,
        execution: Execution,
    },
    ExecDetailsEnd {
        req_id: i32,
    },
    CommissionReport(CommissionReport),

    // --- bars / ticks ---
    HistoricalData {
        req_id: i32,
        bar: RawBar,
    },
    HistoricalDataEnd {
        req_id: i32,
        start: String,
        end: String,
    },
    RealTimeBar {
        req_id: i32,
        bar: Bar,
    },
    /// Midpoint ticks.
    HistoricalTicks {
        req_id: i32,
        ticks: Vec<HistoricalTick>,
        done: bool,
    },
    HistoricalTicksBidAsk {
        req_id: i32,
        ticks: Vec<HistoricalTickBidAsk>,
        done: bool,
    },
    HistoricalTicksLast {
        req_id: i32,
        ticks: Vec<HistoricalTickLast>,
        done: bool,
    },
    TickByTick {
        req_id: i32,
        tick: TickByTick,
    },

    // --- scanner / fundamentals / news / misc ---
    ScannerParameters {
        xml: String,
    },
    ScannerData {
        req_id: i32,
        rank: i32,
        details: ContractDetails,
        legs: String,
    },
    ScannerDataEnd {
        req_id: i32,
    },
    FundamentalData {
        req_id: i32,
        data: String,
    },
    NewsBulletin {
        msg_id: i32,
        msg_type: i32,
        message: String,
        origin_exchange: String,
    },
    CurrentTime {
        time: i64,
    },
    Pnl {
        req_id: i32,
        daily: f64,
        unrealized: f64,
        realized: f64,
    },
    PnlSingle {
        req_id: i32,
        position: f64,
        daily: f64,
        unrealized: f64,
        realized: f64,
        value: f64,
    },
}

impl InboundEvent {
    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::NextValidId { .. } => "next_valid_id",
            InboundEvent::ManagedAccounts { .. } => "managed_accounts",
            InboundEvent::ConnectionClosed => "connection_closed",
            InboundEvent::Error { .. } => "error",
            InboundEvent::TransportFailure { .. } => "transport_failure",
            InboundEvent::AccountValue { .. } => "account_value",
            InboundEvent::AccountTime { .. } => "account_time",
            InboundEvent::AccountDownloadEnd { .. } => "account_download_end",
            InboundEvent::PortfolioUpdate(_) => "portfolio_update",
            InboundEvent::AccountSummary { .. } => "account_summary",
            InboundEvent::AccountSummaryEnd { .. } => "account_summary_end",
            InboundEvent::Position { .. } => "position",
            InboundEvent::PositionEnd => "position_end",
            InboundEvent::PositionMulti { .. } => "position_multi",
            InboundEvent::PositionMultiEnd { .. } => "position_multi_end",
            InboundEvent::ContractDetails { .. } => "contract_details",
            InboundEvent::ContractDetailsEnd { .. } => "contract_details_end",
            InboundEvent::TickPrice { .. } => "tick_price",
            InboundEvent::TickSize { .. } => "tick_size",
            InboundEvent::TickString { .. } => "tick_string",
            InboundEvent::TickGeneric { .. } => "tick_generic",
            InboundEvent::TickSnapshotEnd { .. } => "tick_snapshot_end",
            InboundEvent::MarketDataType { .. } => "market_data_type",
            InboundEvent::MarketDepth { .. } => "market_depth",
            InboundEvent::OrderStatus(_) => "order_status",
            InboundEvent::OpenOrder { .. } => "open_order",
            InboundEvent::OpenOrderEnd => "open_order_end",
            InboundEvent::ExecDetails { .. } => "exec_details",
            InboundEvent::ExecDetailsEnd { .. } => "exec_details_end",
            InboundEvent::CommissionReport(_) => "commission_report",
            InboundEvent::HistoricalData { .. } => "historical_data",
            InboundEvent::HistoricalDataEnd { .. } => "historical_data_end",
            InboundEvent::RealTimeBar { .. } => "real_time_bar",
            InboundEvent::HistoricalTicks { .. } => "historical_ticks",
            InboundEvent::HistoricalTicksBidAsk { .. } => "historical_ticks_bid_ask",
            InboundEvent::HistoricalTicksLast { .. } => "historical_ticks_last",
            InboundEvent::TickByTick { .. } => "tick_by_tick",
            InboundEvent::ScannerParameters { .. } => "scanner_parameters",
            InboundEvent::ScannerData { .. } => "scanner_data",
            InboundEvent::ScannerDataEnd { .. } => "scanner_data_end",
            InboundEvent::FundamentalData { .. } => "fundamental_data",
            InboundEvent::NewsBulletin { .. } => "news_bulletin",
            InboundEvent::CurrentTime { .. } => "current_time",
            InboundEvent::Pnl { .. } => "pnl",
            InboundEvent::PnlSingle { .. } => "pnl_single",
        }
    }
}
