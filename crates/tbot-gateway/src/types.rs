//! Broker domain types shared by requests, events and handlers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecType {
    Stock,
    Option,
    Future,
    Cash,
    Index,
}

impl SecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecType::Stock => "STK",
            SecType::Option => "OPT",
            SecType::Future => "FUT",
            SecType::Cash => "CASH",
            SecType::Index => "IND",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Broker contract id; 0 until resolved through contract details.
    pub con_id: i32,
    pub symbol: String,
    pub sec_type: SecType,
    pub exchange: String,
    pub primary_exchange: Option<String>,
    pub currency: String,
}

impl Contract {
    pub fn stock(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            con_id: 0,
            symbol: symbol.into(),
            sec_type: SecType::Stock,
            exchange: exchange.into(),
            primary_exchange: None,
            currency: currency.into(),
        }
    }

    /// SMART-routed USD stock.
    pub fn smart_stock(symbol: impl Into<String>) -> Self {
        Self::stock(symbol, "SMART", "USD")
    }

    pub fn with_primary_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.primary_exchange = Some(exchange.into());
        self
    }

    /// Same instrument routed directly to an exchange (depth-of-book
    /// subscriptions are not accepted on SMART).
    pub fn routed_to(&self, exchange: impl Into<String>) -> Self {
        let mut c = self.clone();
        c.exchange = exchange.into();
        c
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractDetails {
    pub contract: Contract,
    pub market_name: String,
    pub long_name: String,
    pub min_tick: f64,
    pub industry: Option<String>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
    MarketOnClose,
    LimitOnClose,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Market => "MKT",
            OrderType::Limit => "LMT",
            OrderType::Stop => "STP",
            OrderType::StopLimit => "STP LMT",
            OrderType::TrailingStop => "TRAIL",
            OrderType::MarketOnClose => "MOC",
            OrderType::LimitOnClose => "LOC",
        };
        f.write_str(s)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    #[default]
    Day,
    Gtc,
    Ioc,
    Opg,
}

/// An order as the bot owns it.
///
/// `order_id == 0` means "not yet assigned"; the gateway assigns one on the
/// first `place_or_modify_order`. Prices are `None` when not set and are
/// never sent as a literal sentinel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: i32,
    pub parent_id: i32,
    pub side: Side,
    pub total_quantity: i64,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    pub limit_price: Option<f64>,
    pub aux_price: Option<f64>,
    pub trail_stop_price: Option<f64>,
    /// `false` holds the order at the broker until a later child transmits.
    pub transmit: bool,
    pub outside_rth: bool,
    pub what_if: bool,
    pub account: Option<String>,
}

impl Order {
    pub fn new(side: Side, total_quantity: i64, order_type: OrderType) -> Self {
        Self {
            order_id: 0,
            parent_id: 0,
            side,
            total_quantity,
            order_type,
            tif: TimeInForce::Day,
            limit_price: None,
            aux_price: None,
            trail_stop_price: None,
            transmit: true,
            outside_rth: false,
            what_if: false,
            account: None,
        }
    }

    pub fn market(side: Side, qty: i64) -> Self {
        Self::new(side, qty, OrderType::Market)
    }

    pub fn limit(side: Side, qty: i64, price: f64) -> Self {
        let mut o = Self::new(side, qty, OrderType::Limit);
        o.limit_price = Some(price);
        o
    }

    pub fn stop(side: Side, qty: i64, stop_price: f64) -> Self {
        let mut o = Self::new(side, qty, OrderType::Stop);
        o.aux_price = Some(stop_price);
        o
    }

    pub fn market_on_close(side: Side, qty: i64) -> Self {
        Self::new(side, qty, OrderType::MarketOnClose)
    }

    pub fn with_parent(mut self, parent_id: i32) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    pub fn with_transmit(mut self, transmit: bool) -> Self {
        self.transmit = transmit;
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.order_id != 0
    }
}

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit,
    PendingCancel,
    PreSubmitted,
    Submitted,
    ApiPending,
    ApiCancelled,
    Cancelled,
    Filled,
    Inactive,
    Unknown,
}

impl OrderStatus {
    /// `ApiCancelled` is the broker's spelling of a cancel it initiated on
    /// behalf of the API; downstream it is indistinguishable from `Cancelled`.
    pub fn normalized(self) -> OrderStatus {
        match self {
            OrderStatus::ApiCancelled => OrderStatus::Cancelled,
            other => other,
        }
    }

    /// Statuses that may be stored as a role's last-seen status.
    pub fn is_persistable(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::PreSubmitted
                | OrderStatus::Submitted
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::PendingSubmit
                | OrderStatus::ApiPending
                | OrderStatus::PreSubmitted
                | OrderStatus::Submitted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingSubmit => "PendingSubmit",
            OrderStatus::PendingCancel => "PendingCancel",
            OrderStatus::PreSubmitted => "PreSubmitted",
            OrderStatus::Submitted => "Submitted",
            OrderStatus::ApiPending => "ApiPending",
            OrderStatus::ApiCancelled => "ApiCancelled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Inactive => "Inactive",
            OrderStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = std::convert::Infallible;

    /// Unrecognized broker strings map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PendingSubmit" => OrderStatus::PendingSubmit,
            "PendingCancel" => OrderStatus::PendingCancel,
            "PreSubmitted" => OrderStatus::PreSubmitted,
            "Submitted" => OrderStatus::Submitted,
            "ApiPending" => OrderStatus::ApiPending,
            "ApiCancelled" => OrderStatus::ApiCancelled,
            "Cancelled" => OrderStatus::Cancelled,
            "Filled" => OrderStatus::Filled,
            "Inactive" => OrderStatus::Inactive,
            _ => OrderStatus::Unknown,
        })
    }
}

/// One order-status callback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    pub order_id: i32,
    pub status: OrderStatus,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
    pub perm_id: i64,
    pub parent_id: i32,
    pub last_fill_price: f64,
    pub client_id: i32,
    pub why_held: String,
    pub mkt_cap_price: f64,
}

impl OrderStatusUpdate {
    /// Minimal update; the remaining fields default to zero / empty.
    pub fn new(order_id: i32, status: OrderStatus, filled: f64, remaining: f64, avg: f64) -> Self {
        Self {
            order_id,
            status,
            filled,
            remaining,
            avg_fill_price: avg,
            perm_id: 0,
            parent_id: 0,
            last_fill_price: avg,
            client_id: 0,
            why_held: String::new(),
            mkt_cap_price: 0.0,
        }
    }
}

/// Open-order state attached to an open-order callback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub status: OrderStatus,
    pub commission: Option<f64>,
    pub warning_text: Option<String>,
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub exec_id: String,
    pub order_id: i32,
    pub time: String,
    pub account: String,
    pub exchange: String,
    pub side: Side,
    pub shares: f64,
    pub price: f64,
    pub avg_price: f64,
    pub cum_qty: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub client_id: Option<i32>,
    pub account: Option<String>,
    pub symbol: Option<String>,
    pub side: Option<Side>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommissionReport {
    pub exec_id: String,
    pub commission: f64,
    pub currency: String,
    pub realized_pnl: Option<f64>,
}

/// Executions and their commission reports share a trade key: the exec id
/// up to its last `'.'` (partial executions of one trade differ only after
/// it).
pub fn trade_key(exec_id: &str) -> &str {
    match exec_id.rfind('.') {
        Some(i) => &exec_id[..i],
        None => exec_id,
    }
}

// ---------------------------------------------------------------------------
// Account / portfolio
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub contract: Contract,
    pub account: String,
    pub position: f64,
    pub market_price: f64,
    pub market_value: f64,
    pub average_cost: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountSummaryTag {
    AccountType,
    NetLiquidation,
    TotalCashValue,
    SettledCash,
    AccruedCash,
    BuyingPower,
    EquityWithLoanValue,
    GrossPositionValue,
    AvailableFunds,
    ExcessLiquidity,
    Cushion,
    DayTradesRemaining,
    Leverage,
}

impl AccountSummaryTag {
    pub const ALL: [AccountSummaryTag; 13] = [
        AccountSummaryTag::AccountType,
        AccountSummaryTag::NetLiquidation,
        AccountSummaryTag::TotalCashValue,
        AccountSummaryTag::SettledCash,
        AccountSummaryTag::AccruedCash,
        AccountSummaryTag::BuyingPower,
        AccountSummaryTag::EquityWithLoanValue,
        AccountSummaryTag::GrossPositionValue,
        AccountSummaryTag::AvailableFunds,
        AccountSummaryTag::ExcessLiquidity,
        AccountSummaryTag::Cushion,
        AccountSummaryTag::DayTradesRemaining,
        AccountSummaryTag::Leverage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountSummaryTag::AccountType => "AccountType",
            AccountSummaryTag::NetLiquidation => "NetLiquidation",
            AccountSummaryTag::TotalCashValue => "TotalCashValue",
            AccountSummaryTag::SettledCash => "SettledCash",
            AccountSummaryTag::AccruedCash => "AccruedCash",
            AccountSummaryTag::BuyingPower => "BuyingPower",
            AccountSummaryTag::EquityWithLoanValue => "EquityWithLoanValue",
            AccountSummaryTag::GrossPositionValue => "GrossPositionValue",
            AccountSummaryTag::AvailableFunds => "AvailableFunds",
            AccountSummaryTag::ExcessLiquidity => "ExcessLiquidity",
            AccountSummaryTag::Cushion => "Cushion",
            AccountSummaryTag::DayTradesRemaining => "DayTradesRemaining",
            AccountSummaryTag::Leverage => "Leverage-S",
        }
    }

    /// Comma-joined wire form of a tag list.
    pub fn join(tags: &[AccountSummaryTag]) -> String {
        tags.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(",")
    }
}

impl FromStr for AccountSummaryTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountSummaryTag::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown account summary tag: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickType {
    BidSize,
    Bid,
    Ask,
    AskSize,
    Last,
    LastSize,
    High,
    Low,
    Volume,
    Close,
    Open,
    LastTimestamp,
    Halted,
    Other(i32),
}

impl TickType {
    pub fn from_code(code: i32) -> TickType {
        match code {
            0 => TickType::BidSize,
            1 => TickType::Bid,
            2 => TickType::Ask,
            3 => TickType::AskSize,
            4 => TickType::Last,
            5 => TickType::LastSize,
            6 => TickType::High,
            7 => TickType::Low,
            8 => TickType::Volume,
            9 => TickType::Close,
            14 => TickType::Open,
            45 => TickType::LastTimestamp,
            49 => TickType::Halted,
            other => TickType::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            TickType::BidSize => 0,
            TickType::Bid => 1,
            TickType::Ask => 2,
            TickType::AskSize => 3,
            TickType::Last => 4,
            TickType::LastSize => 5,
            TickType::High => 6,
            TickType::Low => 7,
            TickType::Volume => 8,
            TickType::Close => 9,
            TickType::Open => 14,
            TickType::LastTimestamp => 45,
            TickType::Halted => 49,
            TickType::Other(code) => *code,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketDataType {
    RealTime,
    Frozen,
    Delayed,
    DelayedFrozen,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeepSide {
    Ask,
    Bid,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeepOperation {
    Insert,
    Update,
    Delete,
}

/// A parsed OHLCV bar. `time` is epoch seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub wap: f64,
    pub count: i32,
}

/// A historical bar as delivered on the wire: the date is still text
/// (`YYYYMMDD` for daily bars, epoch seconds otherwise, or a
/// `finished-...` end marker).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub wap: f64,
    pub count: i32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarSize {
    Sec5,
    Sec30,
    Min1,
    Min5,
    Min15,
    Hour1,
    Day1,
}

impl BarSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarSize::Sec5 => "5 secs",
            BarSize::Sec30 => "30 secs",
            BarSize::Min1 => "1 min",
            BarSize::Min5 => "5 mins",
            BarSize::Min15 => "15 mins",
            BarSize::Hour1 => "1 hour",
            BarSize::Day1 => "1 day",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhatToShow {
    Trades,
    Midpoint,
    Bid,
    Ask,
    BidAsk,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTick {
    pub time: i64,
    pub price: f64,
    pub size: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTickBidAsk {
    pub time: i64,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: i64,
    pub ask_size: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTickLast {
    pub time: i64,
    pub price: f64,
    pub size: i64,
    pub exchange: String,
    pub special_conditions: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickByTickType {
    Last,
    AllLast,
    BidAsk,
    MidPoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TickByTick {
    Last {
        time: i64,
        price: f64,
        size: i64,
        exchange: String,
    },
    BidAsk {
        time: i64,
        bid: f64,
        ask: f64,
        bid_size: i64,
        ask_size: i64,
    },
    MidPoint {
        time: i64,
        mid: f64,
    },
}

// ---------------------------------------------------------------------------
// Scanner / news
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScannerSubscription {
    pub instrument: String,
    pub location_code: String,
    pub scan_code: String,
    pub number_of_rows: i32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulletinType {
    Regular,
    ExchangeUnavailable,
    ExchangeAvailable,
    Unknown,
}

impl BulletinType {
    pub fn from_code(code: i32) -> BulletinType {
        match code {
            1 => BulletinType::Regular,
            2 => BulletinType::ExchangeUnavailable,
            3 => BulletinType::ExchangeAvailable,
            _ => BulletinType::Unknown,
        }
    }
}
