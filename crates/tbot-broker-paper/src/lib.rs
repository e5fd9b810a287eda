//! Deterministic in-process "paper" broker.
//!
//! [`PaperBroker`] is the book: it answers each outbound request with the
//! inbound events a broker would send back. [`PaperTransport`] puts the book
//! behind the gateway's transport boundary so a real [`BrokerGateway`] runs
//! against it unchanged.
//!
//! Fill model (kept deliberately simple):
//! - Place: `OpenOrder`, `PreSubmitted`, `Submitted`, then a full fill when
//!   the order is marketable against the symbol's quote. Limits fill at their
//!   limit price (at once when the symbol has no quote); market orders fill
//!   at the quote; stops fill at the quote once it reaches the stop price.
//!   Anything else rests at `Submitted` until [`PaperBroker::set_quote`]
//!   makes it marketable.
//! - Cancel: `Cancelled` for a working order, error 10148 otherwise.
//! - Market data: one `Last`/`Bid`/`Ask` snapshot from the quote; later
//!   quotes stream to every live subscription for that symbol.
//! - Exec ids are `paper.<order id>.01`; no randomness.
//!
//! Timestamps on executions and `CurrentTime` are wall-clock; nothing else is.
//!
//! [`BrokerGateway`]: tbot_gateway::BrokerGateway

use std::collections::BTreeMap;

use chrono::Utc;
use tbot_gateway::{
    CommissionReport, Contract, Execution, InboundEvent, Order, OrderState, OrderStatus,
    OrderStatusUpdate, OrderType, OutboundRequest, Side, TickType,
};
use tracing::{debug, info};

pub mod transport;

pub use transport::PaperTransport;

pub const DEFAULT_ACCOUNT: &str = "DU0000000";

/// Broker code for a cancel of an order that is not working.
pub const CANNOT_CANCEL_CODE: i32 = 10148;
/// Broker code for a modify of an order that is already done.
pub const CANNOT_MODIFY_CODE: i32 = 104;
/// Broker code for market data with no quote behind it.
pub const NO_MARKET_DATA_CODE: i32 = 354;

#[derive(Clone, Debug, PartialEq)]
pub struct PaperSettings {
    pub account: String,
    /// Quote used for symbols without one of their own.
    pub default_price: Option<f64>,
    pub commission_per_share: f64,
    pub first_order_id: i32,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            account: DEFAULT_ACCOUNT.to_string(),
            default_price: None,
            commission_per_share: 0.0,
            first_order_id: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaperOrder {
    pub contract: Contract,
    pub order: Order,
    pub status: OrderStatus,
    pub filled: f64,
    pub avg_fill_price: f64,
}

impl PaperOrder {
    fn remaining(&self) -> f64 {
        self.order.total_quantity as f64 - self.filled
    }

    fn is_working(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::PreSubmitted | OrderStatus::Submitted
        )
    }
}

#[derive(Clone, Debug)]
pub struct PaperBroker {
    settings: PaperSettings,
    next_order_id: i32,
    orders: BTreeMap<i32, PaperOrder>,
    positions: BTreeMap<String, i64>,
    quotes: BTreeMap<String, f64>,
    /// req id -> symbol
    subscriptions: BTreeMap<i32, String>,
    executions: Vec<(Contract, Execution)>,
}

impl PaperBroker {
    pub fn new(settings: PaperSettings) -> Self {
        Self {
            next_order_id: settings.first_order_id.max(1),
            settings,
            orders: BTreeMap::new(),
            positions: BTreeMap::new(),
            quotes: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            executions: Vec::new(),
        }
    }

    pub fn settings(&self) -> &PaperSettings {
        &self.settings
    }

    /// What the broker says right after a connect.
    pub fn handshake(&self) -> Vec<InboundEvent> {
        vec![
            InboundEvent::NextValidId {
                order_id: self.next_order_id,
            },
            InboundEvent::ManagedAccounts {
                accounts: self.settings.account.clone(),
            },
        ]
    }

    pub fn order(&self, order_id: i32) -> Option<&PaperOrder> {
        self.orders.get(&order_id)
    }

    /// Deterministic listing: BTreeMap iteration order is stable.
    pub fn orders(&self) -> Vec<PaperOrder> {
        self.orders.values().cloned().collect()
    }

    pub fn positions(&self) -> BTreeMap<String, i64> {
        self.positions.clone()
    }

    pub fn quote(&self, symbol: &str) -> Option<f64> {
        self.quotes.get(symbol).copied().or(self.settings.default_price)
    }

    /// Moves `symbol`'s quote: streams it to live subscriptions and fills
    /// resting orders the new price makes marketable.
    pub fn set_quote(&mut self, symbol: &str, price: f64) -> Vec<InboundEvent> {
        self.quotes.insert(symbol.to_string(), price);
        let mut out = Vec::new();
        for (req_id, _) in self.subscriptions.iter().filter(|(_, s)| s.as_str() == symbol) {
            push_quote(*req_id, price, &mut out);
        }

        let marketable: Vec<(i32, f64)> = self
            .orders
            .iter()
            .filter(|(_, o)| o.is_working() && o.contract.symbol == symbol)
            .filter_map(|(id, o)| fill_price(&o.order, Some(price)).map(|p| (*id, p)))
            .collect();
        for (order_id, fill) in marketable {
            self.fill(order_id, fill, &mut out);
        }
        out
    }

    /// Answers one request. Requests the book does not simulate get no reply.
    pub fn handle(&mut self, request: OutboundRequest) -> Vec<InboundEvent> {
        let mut out = Vec::new();
        match request {
            OutboundRequest::ReqIds => out.push(InboundEvent::NextValidId {
                order_id: self.next_order_id,
            }),
            OutboundRequest::ReqCurrentTime => out.push(InboundEvent::CurrentTime {
                time: Utc::now().timestamp(),
            }),
            OutboundRequest::ReqMktData {
                req_id,
                contract,
                snapshot,
                ..
            } => self.market_data(req_id, &contract.symbol, snapshot, &mut out),
            OutboundRequest::CancelMktData { req_id } => {
                self.subscriptions.remove(&req_id);
            }
            OutboundRequest::PlaceOrder {
                order_id,
                contract,
                order,
            } => self.place(order_id, contract, order, &mut out),
            OutboundRequest::CancelOrder { order_id } => self.cancel(order_id, &mut out),
            OutboundRequest::GlobalCancel => {
                let working: Vec<i32> = self
                    .orders
                    .iter()
                    .filter(|(_, o)| o.is_working())
                    .map(|(id, _)| *id)
                    .collect();
                for order_id in working {
                    self.cancel(order_id, &mut out);
                }
            }
            OutboundRequest::ReqOpenOrders
            | OutboundRequest::ReqAllOpenOrders
            | OutboundRequest::ReqAutoOpenOrders { .. } => {
                for (order_id, o) in self.orders.iter().filter(|(_, o)| o.is_working()) {
                    out.push(open_order_event(*order_id, o));
                }
                out.push(InboundEvent::OpenOrderEnd);
            }
            OutboundRequest::ReqPositions => {
                for (symbol, position) in &self.positions {
                    out.push(InboundEvent::Position {
                        account: self.settings.account.clone(),
                        contract: Contract::smart_stock(symbol.as_str()),
                        position: *position as f64,
                        avg_cost: 0.0,
                    });
                }
                out.push(InboundEvent::PositionEnd);
            }
            OutboundRequest::ReqExecutions { req_id, .. } => {
                for (contract, execution) in &self.executions {
                    out.push(InboundEvent::ExecDetails {
                        req_id,
                        contract: contract.clone(),
                        execution: execution.clone(),
                    });
                }
                out.push(InboundEvent::ExecDetailsEnd { req_id });
            }
            other => debug!(request = ?other, "not simulated by the paper broker"),
        }
        out
    }

    fn market_data(&mut self, req_id: i32, symbol: &str, snapshot: bool, out: &mut Vec<InboundEvent>) {
        let Some(price) = self.quote(symbol) else {
            out.push(InboundEvent::Error {
                id: req_id,
                code: NO_MARKET_DATA_CODE,
                message: format!("Requested market data is not subscribed: {symbol}"),
            });
            return;
        };
        push_quote(req_id, price, out);
        if snapshot {
            out.push(InboundEvent::TickSnapshotEnd { req_id });
        } else {
            self.subscriptions.insert(req_id, symbol.to_string());
        }
    }

    fn place(&mut self, order_id: i32, contract: Contract, order: Order, out: &mut Vec<InboundEvent>) {
        self.next_order_id = self.next_order_id.max(order_id.saturating_add(1));

        if let Some(existing) = self.orders.get_mut(&order_id) {
            if !existing.is_working() {
                out.push(InboundEvent::Error {
                    id: order_id,
                    code: CANNOT_MODIFY_CODE,
                    message: format!("Can't modify a {} order", existing.status),
                });
                return;
            }
            existing.order = order;
            existing.contract = contract;
            info!(order_id, "paper order modified");
            let snapshot = existing.clone();
            out.push(open_order_event(order_id, &snapshot));
            self.try_fill(order_id, out);
            return;
        }

        info!(
            order_id,
            symbol = %contract.symbol,
            side = %order.side,
            qty = order.total_quantity,
            order_type = %order.order_type,
            "paper order accepted"
        );
        let mut entry = PaperOrder {
            contract,
            order,
            status: OrderStatus::PreSubmitted,
            filled: 0.0,
            avg_fill_price: 0.0,
        };
        out.push(open_order_event(order_id, &entry));
        out.push(status_event(order_id, &entry));
        entry.status = OrderStatus::Submitted;
        out.push(status_event(order_id, &entry));
        self.orders.insert(order_id, entry);

        self.try_fill(order_id, out);
    }

    fn try_fill(&mut self, order_id: i32, out: &mut Vec<InboundEvent>) {
        let Some(o) = self.orders.get(&order_id) else {
            return;
        };
        if let Some(price) = fill_price(&o.order, self.quote(&o.contract.symbol)) {
            self.fill(order_id, price, out);
        }
    }

    fn fill(&mut self, order_id: i32, price: f64, out: &mut Vec<InboundEvent>) {
        let account = self.settings.account.clone();
        let commission_per_share = self.settings.commission_per_share;
        let Some(o) = self.orders.get_mut(&order_id) else {
            return;
        };
        let shares = o.remaining();
        o.filled += shares;
        o.avg_fill_price = price;
        o.status = OrderStatus::Filled;

        let lots = shares.round() as i64;
        let signed = match o.order.side {
            Side::Buy => lots,
            Side::Sell => -lots,
        };
        *self.positions.entry(o.contract.symbol.clone()).or_insert(0) += signed;

        let exec_id = format!("paper.{order_id:08}.01");
        let execution = Execution {
            exec_id: exec_id.clone(),
            order_id,
            time: Utc::now().format("%Y%m%d %H:%M:%S").to_string(),
            account,
            exchange: o.contract.exchange.clone(),
            side: o.order.side,
            shares,
            price,
            avg_price: price,
            cum_qty: o.filled,
        };
        info!(order_id, symbol = %o.contract.symbol, shares, price, "paper fill");

        out.push(InboundEvent::ExecDetails {
            req_id: -1,
            contract: o.contract.clone(),
            execution: execution.clone(),
        });
        out.push(InboundEvent::CommissionReport(CommissionReport {
            exec_id,
            commission: commission_per_share * shares,
            currency: o.contract.currency.clone(),
            realized_pnl: None,
        }));
        out.push(status_event(order_id, o));
        self.executions.push((o.contract.clone(), execution));
    }

    fn cancel(&mut self, order_id: i32, out: &mut Vec<InboundEvent>) {
        match self.orders.get_mut(&order_id) {
            Some(o) if o.is_working() => {
                o.status = OrderStatus::Cancelled;
                info!(order_id, "paper order cancelled");
                out.push(status_event(order_id, o));
            }
            _ => out.push(InboundEvent::Error {
                id: order_id,
                code: CANNOT_CANCEL_CODE,
                message: format!("OrderId {order_id} that needs to be cancelled cannot be cancelled"),
            }),
        }
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new(PaperSettings::default())
    }
}

/// Where `order` fills against `quote`, if it is marketable.
fn fill_price(order: &Order, quote: Option<f64>) -> Option<f64> {
    match order.order_type {
        OrderType::Limit | OrderType::LimitOnClose => {
            let limit = order.limit_price?;
            let crosses = match (quote, order.side) {
                (None, _) => true,
                (Some(q), Side::Buy) => q <= limit,
                (Some(q), Side::Sell) => q >= limit,
            };
            crosses.then_some(limit)
        }
        OrderType::Market | OrderType::MarketOnClose => quote,
        OrderType::Stop | OrderType::StopLimit | OrderType::TrailingStop => {
            quote.filter(|q| stop_triggered(order, *q))
        }
    }
}

fn push_quote(req_id: i32, price: f64, out: &mut Vec<InboundEvent>) {
    for tick_type in [TickType::Last, TickType::Bid, TickType::Ask] {
        out.push(InboundEvent::TickPrice {
            req_id,
            tick_type,
            price,
        });
    }
}

/// A sell stop triggers at or below its stop price, a buy stop at or above.
fn stop_triggered(order: &Order, price: f64) -> bool {
    let stop = match order.order_type {
        OrderType::Stop | OrderType::StopLimit => order.aux_price,
        OrderType::TrailingStop => order.trail_stop_price.or(order.aux_price),
        _ => None,
    };
    match (stop, order.side) {
        (Some(stop), Side::Sell) => price <= stop,
        (Some(stop), Side::Buy) => price >= stop,
        (None, _) => false,
    }
}

fn status_event(order_id: i32, o: &PaperOrder) -> InboundEvent {
    let mut update = OrderStatusUpdate::new(
        order_id,
        o.status,
        o.filled,
        o.remaining(),
        o.avg_fill_price,
    );
    update.parent_id = o.order.parent_id;
    InboundEvent::OrderStatus(update)
}

fn open_order_event(order_id: i32, o: &PaperOrder) -> InboundEvent {
    let mut order = o.order.clone();
    order.order_id = order_id;
    InboundEvent::OpenOrder {
        order_id,
        contract: o.contract.clone(),
        order,
        state: OrderState {
            status: o.status,
            commission: None,
            warning_text: None,
        },
    }
}
