//! Broker Gateway: the single choke-point between callers and the broker.
//!
//! # Outbound shape
//!
//! Every `request_*` call follows the same steps:
//!
//! 1. Not connected → `ConnectionHandler::message(-1, 504, "Not connected")`,
//!    nothing registered, nothing sent. The caller never sees an error.
//! 2. Allocate a request id (order id for orders).
//! 3. Register the handler under that id. Registration precedes the send, so
//!    a response can never arrive before its handler.
//! 4. Send.
//!
//! Every `cancel_*` call removes the registration **by handler identity** and
//! sends the cancel only if a registration was found.
//!
//! # Inbound shape
//!
//! [`EventSink::dispatch`] runs on the reader thread only. One exhaustive
//! `match` routes each [`InboundEvent`] by id (registry lookup) or broadcast
//! (handler set). Unroutable events are logged and dropped. Every handler
//! call is isolated with `catch_unwind`: a panic is logged at `error!` and
//! delivery continues.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{Local, NaiveDate, TimeZone};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, NOT_CONNECTED_CODE};
use crate::events::InboundEvent;
use crate::handlers::{
    AccountHandler, AccountSummaryHandler, BulletinHandler, ConnectionHandler,
    ContractDetailsHandler, DeepMktDataHandler, FundamentalsHandler, HistoricalDataHandler,
    HistoricalTickHandler, LiveOrderHandler, OrderHandler, PnLHandler, PnLSingleHandler,
    PositionHandler, PositionMultiHandler, RealTimeBarHandler, ScannerHandler, TickByTickHandler,
    TimeHandler, TopMktDataHandler, TradeReportHandler,
};
use crate::ids::{OrderIdAllocator, RequestIdAllocator};
use crate::prices::{fix_price_variance, DEFAULT_MIN_TICK};
use crate::registry::{CallbackRegistry, HandlerSet};
use crate::requests::{HistoricalDataQuery, HistoricalTicksQuery, OutboundRequest};
use crate::session::{ConnectionSession, EventSink, SessionState};
use crate::transport::Transport;
use crate::types::{
    trade_key, AccountSummaryTag, Bar, BulletinType, Contract, ContractDetails, ExecutionFilter,
    MarketDataType, Order, RawBar, ScannerSubscription, TickByTickType, WhatToShow,
};

// ---------------------------------------------------------------------------
// Handler isolation
// ---------------------------------------------------------------------------

fn isolate(event: &'static str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            event,
            panic = %panic_message(payload.as_ref()),
            "handler panicked; dispatch continues"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn deliver<H: ?Sized>(
    event: &'static str,
    registry: &CallbackRegistry<H>,
    id: i32,
    f: impl FnOnce(&H),
) {
    let delivered = registry.with_handler(id, |h| isolate(event, || f(h)));
    if delivered.is_none() {
        debug!(event, id, registry = registry.name(), "unroutable event dropped");
    }
}

fn broadcast<H: ?Sized>(event: &'static str, set: &HandlerSet<H>, mut f: impl FnMut(&H)) {
    if set.is_empty() {
        debug!(event, "no subscribers; event dropped");
        return;
    }
    set.for_each(|h| isolate(event, || f(h)));
}

// ---------------------------------------------------------------------------
// Historical bar dates
// ---------------------------------------------------------------------------

/// Historical streams end with a bar whose date starts with this marker.
pub const HISTORICAL_END_MARKER: &str = "finished";

/// `YYYYMMDD` → local midnight as epoch seconds; anything else is parsed as
/// epoch seconds.
pub fn parse_bar_time(date: &str) -> Option<i64> {
    let date = date.trim();
    if date.len() == 8 {
        if let Ok(day) = NaiveDate::parse_from_str(date, "%Y%m%d") {
            let midnight = day.and_hms_opt(0, 0, 0)?;
            return Local
                .from_local_datetime(&midnight)
                .earliest()
                .map(|t| t.timestamp());
        }
    }
    date.parse::<i64>().ok()
}

fn parse_bar(raw: &RawBar) -> Option<Bar> {
    Some(Bar {
        time: parse_bar_time(&raw.date)?,
        open: raw.open,
        high: raw.high,
        low: raw.low,
        close: raw.close,
        volume: raw.volume,
        wap: raw.wap,
        count: raw.count,
    })
}

// ---------------------------------------------------------------------------
// Contract details collection
// ---------------------------------------------------------------------------

/// Details arrive one per event; the caller gets them all at the end.
struct ContractDetailsRequest {
    handler: Arc<dyn ContractDetailsHandler>,
    collected: Mutex<Vec<ContractDetails>>,
}

impl ContractDetailsRequest {
    fn finish(&self) {
        let details = std::mem::take(&mut *self.collected.lock());
        let handler = Arc::clone(&self.handler);
        isolate("contract_details_end", move || {
            handler.contract_details(&details)
        });
    }
}

// ---------------------------------------------------------------------------
// BrokerGateway
// ---------------------------------------------------------------------------

pub struct BrokerGateway {
    session: ConnectionSession,
    connection: Arc<dyn ConnectionHandler>,
    ready: AtomicBool,
    request_ids: RequestIdAllocator,
    order_ids: OrderIdAllocator,
    min_ticks: Mutex<HashMap<String, f64>>,
    accounts: Mutex<Vec<String>>,

    orders: CallbackRegistry<dyn OrderHandler>,
    live_orders: HandlerSet<dyn LiveOrderHandler>,
    top_mkt_data: CallbackRegistry<dyn TopMktDataHandler>,
    deep_mkt_data: CallbackRegistry<dyn DeepMktDataHandler>,
    historical_data: CallbackRegistry<dyn HistoricalDataHandler>,
    historical_ticks: CallbackRegistry<dyn HistoricalTickHandler>,
    real_time_bars: CallbackRegistry<dyn RealTimeBarHandler>,
    tick_by_tick: CallbackRegistry<dyn TickByTickHandler>,
    contract_details: CallbackRegistry<ContractDetailsRequest>,
    account_updates: HandlerSet<dyn AccountHandler>,
    account_summary: CallbackRegistry<dyn AccountSummaryHandler>,
    positions: HandlerSet<dyn PositionHandler>,
    positions_multi: CallbackRegistry<dyn PositionMultiHandler>,
    trade_reports: HandlerSet<dyn TradeReportHandler>,
    scanner: CallbackRegistry<dyn ScannerHandler>,
    scanner_parameters: HandlerSet<dyn ScannerHandler>,
    fundamentals: CallbackRegistry<dyn FundamentalsHandler>,
    time: HandlerSet<dyn TimeHandler>,
    bulletins: HandlerSet<dyn BulletinHandler>,
    pnl: CallbackRegistry<dyn PnLHandler>,
    pnl_single: CallbackRegistry<dyn PnLSingleHandler>,
}

impl BrokerGateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        connection: Arc<dyn ConnectionHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session: ConnectionSession::new(transport),
            connection,
            ready: AtomicBool::new(false),
            request_ids: RequestIdAllocator::new(),
            order_ids: OrderIdAllocator::new(),
            min_ticks: Mutex::new(HashMap::new()),
            accounts: Mutex::new(Vec::new()),
            orders: CallbackRegistry::new("orders"),
            live_orders: HandlerSet::new("live_orders"),
            top_mkt_data: CallbackRegistry::new("top_mkt_data"),
            deep_mkt_data: CallbackRegistry::new("deep_mkt_data"),
            historical_data: CallbackRegistry::new("historical_data"),
            historical_ticks: CallbackRegistry::new("historical_ticks"),
            real_time_bars: CallbackRegistry::new("real_time_bars"),
            tick_by_tick: CallbackRegistry::new("tick_by_tick"),
            contract_details: CallbackRegistry::new("contract_details"),
            account_updates: HandlerSet::new("account_updates"),
            account_summary: CallbackRegistry::new("account_summary"),
            positions: HandlerSet::new("positions"),
            positions_multi: CallbackRegistry::new("positions_multi"),
            trade_reports: HandlerSet::new("trade_reports"),
            scanner: CallbackRegistry::new("scanner"),
            scanner_parameters: HandlerSet::new("scanner_parameters"),
            fundamentals: CallbackRegistry::new("fundamentals"),
            time: HandlerSet::new("time"),
            bulletins: HandlerSet::new("bulletins"),
            pnl: CallbackRegistry::new("pnl"),
            pnl_single: CallbackRegistry::new("pnl_single"),
        })
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Opens the session and starts the reader. The gateway becomes ready
    /// (and `connected()` fires) when the broker delivers its next valid id.
    pub fn connect(self: &Arc<Self>, host: &str, port: u16, client_id: i32) -> Result<(), GatewayError> {
        let sink: Weak<dyn EventSink> = Arc::downgrade(self) as Weak<dyn EventSink>;
        self.session.connect(host, port, client_id, sink)
    }

    /// Closes the transport. Does not cancel orders or clear registrations.
    pub fn disconnect(&self) {
        if self.session.disconnect() {
            self.notify_disconnected();
        }
    }

    /// Ready: session connected **and** next valid id received.
    pub fn is_connected(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && self.session.is_connected()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn accounts(&self) -> Vec<String> {
        self.accounts.lock().clone()
    }

    /// Overrides the tick used for variance correction of `symbol`'s prices.
    /// Contract-details responses populate this automatically.
    pub fn set_min_tick(&self, symbol: &str, min_tick: f64) {
        if min_tick > 0.0 && min_tick.is_finite() {
            self.min_ticks.lock().insert(symbol.to_string(), min_tick);
        } else {
            warn!(symbol, min_tick, "ignoring invalid minimum tick");
        }
    }

    pub fn min_tick(&self, contract: &Contract) -> f64 {
        self.min_ticks
            .lock()
            .get(&contract.symbol)
            .copied()
            .unwrap_or(DEFAULT_MIN_TICK)
    }

    fn notify_disconnected(&self) {
        self.ready.store(false, Ordering::SeqCst);
        info!("gateway disconnected");
        let connection = Arc::clone(&self.connection);
        isolate("disconnected", move || connection.disconnected());
    }

    fn check_connected(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        warn!("request skipped: not connected");
        let connection = Arc::clone(&self.connection);
        isolate("message", move || {
            connection.message(-1, NOT_CONNECTED_CODE, &GatewayError::NotConnected.to_string())
        });
        false
    }

    fn send(&self, request: OutboundRequest) {
        debug!(?request, "send");
        if let Err(e) = self.session.transport().send(request) {
            error!(error = %e, "send failed");
            let connection = Arc::clone(&self.connection);
            let text = e.to_string();
            isolate("error", move || connection.error(&text));
        }
    }

    fn request_keyed<H: ?Sized>(
        &self,
        registry: &CallbackRegistry<H>,
        handler: Arc<H>,
        request: impl FnOnce(i32) -> OutboundRequest,
    ) {
        if !self.check_connected() {
            return;
        }
        let req_id = self.request_ids.next();
        registry.register(req_id, handler);
        self.send(request(req_id));
    }

    /// The registration is dropped even when not connected; only the
    /// broker-side cancel needs a session.
    fn cancel_keyed<H: ?Sized>(
        &self,
        registry: &CallbackRegistry<H>,
        handler: &Arc<H>,
        cancel: impl FnOnce(i32) -> OutboundRequest,
    ) {
        match registry.remove_by_handler(handler) {
            Some(req_id) => {
                if self.check_connected() {
                    self.send(cancel(req_id));
                }
            }
            None => debug!(
                registry = registry.name(),
                "cancel ignored: handler not registered"
            ),
        }
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    pub fn subscribe_account_updates(&self, account: &str, handler: Arc<dyn AccountHandler>) {
        if !self.check_connected() {
            return;
        }
        self.account_updates.add(handler);
        self.send(OutboundRequest::ReqAccountUpdates {
            subscribe: true,
            account: account.to_string(),
        });
    }

    /// Unsubscribes from the broker once the last handler is gone.
    pub fn cancel_account_updates(&self, account: &str, handler: &Arc<dyn AccountHandler>) {
        if self.account_updates.remove(handler)
            && self.account_updates.is_empty()
            && self.check_connected()
        {
            self.send(OutboundRequest::ReqAccountUpdates {
                subscribe: false,
                account: account.to_string(),
            });
        }
    }

    pub fn request_account_summary(
        &self,
        group: &str,
        tags: &[AccountSummaryTag],
        handler: Arc<dyn AccountSummaryHandler>,
    ) {
        let tags = AccountSummaryTag::join(tags);
        self.request_keyed(&self.account_summary, handler, |req_id| {
            OutboundRequest::ReqAccountSummary {
                req_id,
                group: group.to_string(),
                tags,
            }
        });
    }

    pub fn cancel_account_summary(&self, handler: &Arc<dyn AccountSummaryHandler>) {
        self.cancel_keyed(&self.account_summary, handler, |req_id| {
            OutboundRequest::CancelAccountSummary { req_id }
        });
    }

    pub fn request_positions(&self, handler: Arc<dyn PositionHandler>) {
        if !self.check_connected() {
            return;
        }
        self.positions.add(handler);
        self.send(OutboundRequest::ReqPositions);
    }

    pub fn cancel_positions(&self, handler: &Arc<dyn PositionHandler>) {
        if self.positions.remove(handler) && self.positions.is_empty() && self.check_connected() {
            self.send(OutboundRequest::CancelPositions);
        }
    }

    pub fn request_positions_multi(
        &self,
        account: &str,
        model_code: &str,
        handler: Arc<dyn PositionMultiHandler>,
    ) {
        self.request_keyed(&self.positions_multi, handler, |req_id| {
            OutboundRequest::ReqPositionsMulti {
                req_id,
                account: account.to_string(),
                model_code: model_code.to_string(),
            }
        });
    }

    pub fn cancel_positions_multi(&self, handler: &Arc<dyn PositionMultiHandler>) {
        self.cancel_keyed(&self.positions_multi, handler, |req_id| {
            OutboundRequest::CancelPositionsMulti { req_id }
        });
    }

    pub fn request_pnl(&self, account: &str, model_code: &str, handler: Arc<dyn PnLHandler>) {
        self.request_keyed(&self.pnl, handler, |req_id| OutboundRequest::ReqPnl {
            req_id,
            account: account.to_string(),
            model_code: model_code.to_string(),
        });
    }

    pub fn cancel_pnl(&self, handler: &Arc<dyn PnLHandler>) {
        self.cancel_keyed(&self.pnl, handler, |req_id| OutboundRequest::CancelPnl {
            req_id,
        });
    }

    pub fn request_pnl_single(
        &self,
        account: &str,
        model_code: &str,
        con_id: i32,
        handler: Arc<dyn PnLSingleHandler>,
    ) {
        self.request_keyed(&self.pnl_single, handler, |req_id| {
            OutboundRequest::ReqPnlSingle {
                req_id,
                account: account.to_string(),
                model_code: model_code.to_string(),
                con_id,
            }
        });
    }

    pub fn cancel_pnl_single(&self, handler: &Arc<dyn PnLSingleHandler>) {
        self.cancel_keyed(&self.pnl_single, handler, |req_id| {
            OutboundRequest::CancelPnlSingle { req_id }
        });
    }

    // -----------------------------------------------------------------------
    // Contracts
    // -----------------------------------------------------------------------

    pub fn request_contract_details(
        &self,
        contract: &Contract,
        handler: Arc<dyn ContractDetailsHandler>,
    ) {
        let request = Arc::new(ContractDetailsRequest {
            handler,
            collected: Mutex::new(Vec::new()),
        });
        self.request_keyed(&self.contract_details, request, |req_id| {
            OutboundRequest::ReqContractDetails {
                req_id,
                contract: contract.clone(),
            }
        });
    }

    // -----------------------------------------------------------------------
    // Market data
    // -----------------------------------------------------------------------

    pub fn request_market_data_type(&self, data_type: MarketDataType) {
        if self.check_connected() {
            self.send(OutboundRequest::ReqMarketDataType { data_type });
        }
    }

    pub fn request_top_mkt_data(
        &self,
        contract: &Contract,
        generic_ticks: &str,
        snapshot: bool,
        handler: Arc<dyn TopMktDataHandler>,
    ) {
        self.request_keyed(&self.top_mkt_data, handler, |req_id| {
            OutboundRequest::ReqMktData {
                req_id,
                contract: contract.clone(),
                generic_ticks: generic_ticks.to_string(),
                snapshot,
            }
        });
    }

    pub fn cancel_top_mkt_data(&self, handler: &Arc<dyn TopMktDataHandler>) {
        self.cancel_keyed(&self.top_mkt_data, handler, |req_id| {
            OutboundRequest::CancelMktData { req_id }
        });
    }

    pub fn request_deep_mkt_data(
        &self,
        contract: &Contract,
        num_rows: i32,
        handler: Arc<dyn DeepMktDataHandler>,
    ) {
        self.request_keyed(&self.deep_mkt_data, handler, |req_id| {
            OutboundRequest::ReqMktDepth {
                req_id,
                contract: contract.clone(),
                num_rows,
            }
        });
    }

    pub fn cancel_deep_mkt_data(&self, handler: &Arc<dyn DeepMktDataHandler>) {
        self.cancel_keyed(&self.deep_mkt_data, handler, |req_id| {
            OutboundRequest::CancelMktDepth { req_id }
        });
    }

    pub fn request_historical_data(
        &self,
        contract: &Contract,
        query: HistoricalDataQuery,
        handler: Arc<dyn HistoricalDataHandler>,
    ) {
        self.request_keyed(&self.historical_data, handler, |req_id| {
            OutboundRequest::ReqHistoricalData {
                req_id,
                contract: contract.clone(),
                query,
            }
        });
    }

    pub fn cancel_historical_data(&self, handler: &Arc<dyn HistoricalDataHandler>) {
        self.cancel_keyed(&self.historical_data, handler, |req_id| {
            OutboundRequest::CancelHistoricalData { req_id }
        });
    }

    pub fn request_real_time_bars(
        &self,
        contract: &Contract,
        what_to_show: WhatToShow,
        rth_only: bool,
        handler: Arc<dyn RealTimeBarHandler>,
    ) {
        self.request_keyed(&self.real_time_bars, handler, |req_id| {
            OutboundRequest::ReqRealTimeBars {
                req_id,
                contract: contract.clone(),
                what_to_show,
                rth_only,
            }
        });
    }

    pub fn cancel_real_time_bars(&self, handler: &Arc<dyn RealTimeBarHandler>) {
        self.cancel_keyed(&self.real_time_bars, handler, |req_id| {
            OutboundRequest::CancelRealTimeBars { req_id }
        });
    }

    pub fn request_historical_ticks(
        &self,
        contract: &Contract,
        query: HistoricalTicksQuery,
        handler: Arc<dyn HistoricalTickHandler>,
    ) {
        self.request_keyed(&self.historical_ticks, handler, |req_id| {
            OutboundRequest::ReqHistoricalTicks {
                req_id,
                contract: contract.clone(),
                query,
            }
        });
    }

    pub fn request_tick_by_tick(
        &self,
        contract: &Contract,
        tick_type: TickByTickType,
        number_of_ticks: i32,
        ignore_size: bool,
        handler: Arc<dyn TickByTickHandler>,
    ) {
        self.request_keyed(&self.tick_by_tick, handler, |req_id| {
            OutboundRequest::ReqTickByTick {
                req_id,
                contract: contract.clone(),
                tick_type,
                number_of_ticks,
                ignore_size,
            }
        });
    }

    pub fn cancel_tick_by_tick(&self, handler: &Arc<dyn TickByTickHandler>) {
        self.cancel_keyed(&self.tick_by_tick, handler, |req_id| {
            OutboundRequest::CancelTickByTick { req_id }
        });
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Assigns an order id when `order.order_id == 0`, aligns every set
    /// price to the instrument's tick, registers `handler` under the order id
    /// (replacing any previous handler: an amendment may swap handlers) and
    /// sends. Returns the order id, or `None` when not connected.
    pub fn place_or_modify_order(
        &self,
        contract: &Contract,
        order: &mut Order,
        handler: Arc<dyn OrderHandler>,
    ) -> Option<i32> {
        if !self.check_connected() {
            return None;
        }

        if order.order_id == 0 {
            order.order_id = self.order_ids.next();
        }
        normalize_prices(order, self.min_tick(contract));

        self.orders.register(order.order_id, handler);
        info!(
            order_id = order.order_id,
            symbol = %contract.symbol,
            side = %order.side,
            qty = order.total_quantity,
            order_type = %order.order_type,
            limit = ?order.limit_price,
            aux = ?order.aux_price,
            "place order"
        );
        self.send(OutboundRequest::PlaceOrder {
            order_id: order.order_id,
            contract: contract.clone(),
            order: order.clone(),
        });
        Some(order.order_id)
    }

    /// The handler stays registered to receive the resulting `Cancelled`.
    pub fn cancel_order(&self, order_id: i32) {
        if self.check_connected() {
            info!(order_id, "cancel order");
            self.send(OutboundRequest::CancelOrder { order_id });
        }
    }

    pub fn cancel_all_orders(&self) {
        if self.check_connected() {
            info!("cancel all orders");
            self.send(OutboundRequest::GlobalCancel);
        }
    }

    /// Stops routing status events to `handler`. Nothing is sent.
    pub fn remove_order_handler(&self, handler: &Arc<dyn OrderHandler>) -> Option<i32> {
        self.orders.remove_by_handler(handler)
    }

    /// Stops routing events for `order_id`, whichever handler holds it.
    /// Nothing is sent. Returns whether a registration existed.
    pub fn release_order(&self, order_id: i32) -> bool {
        let released = self.orders.remove(order_id).is_some();
        if released {
            debug!(order_id, "order released");
        }
        released
    }

    pub fn request_live_orders(&self, handler: Arc<dyn LiveOrderHandler>) {
        if !self.check_connected() {
            return;
        }
        self.live_orders.add(handler);
        self.send(OutboundRequest::ReqAllOpenOrders);
    }

    pub fn remove_live_order_handler(&self, handler: &Arc<dyn LiveOrderHandler>) -> bool {
        self.live_orders.remove(handler)
    }

    pub fn request_executions(&self, filter: ExecutionFilter, handler: Arc<dyn TradeReportHandler>) {
        if !self.check_connected() {
            return;
        }
        self.trade_reports.replace(handler);
        let req_id = self.request_ids.next();
        self.send(OutboundRequest::ReqExecutions { req_id, filter });
    }

    // -----------------------------------------------------------------------
    // Scanner / fundamentals / news / time
    // -----------------------------------------------------------------------

    pub fn request_scanner_parameters(&self, handler: Arc<dyn ScannerHandler>) {
        if !self.check_connected() {
            return;
        }
        self.scanner_parameters.replace(handler);
        self.send(OutboundRequest::ReqScannerParameters);
    }

    pub fn request_scanner_subscription(
        &self,
        subscription: ScannerSubscription,
        handler: Arc<dyn ScannerHandler>,
    ) {
        self.request_keyed(&self.scanner, handler, |req_id| {
            OutboundRequest::ReqScannerSubscription {
                req_id,
                subscription,
            }
        });
    }

    pub fn cancel_scanner_subscription(&self, handler: &Arc<dyn ScannerHandler>) {
        self.cancel_keyed(&self.scanner, handler, |req_id| {
            OutboundRequest::CancelScannerSubscription { req_id }
        });
    }

    pub fn request_fundamentals(
        &self,
        contract: &Contract,
        report_type: &str,
        handler: Arc<dyn FundamentalsHandler>,
    ) {
        self.request_keyed(&self.fundamentals, handler, |req_id| {
            OutboundRequest::ReqFundamentalData {
                req_id,
                contract: contract.clone(),
                report_type: report_type.to_string(),
            }
        });
    }

    pub fn request_current_time(&self, handler: Arc<dyn TimeHandler>) {
        if !self.check_connected() {
            return;
        }
        self.time.replace(handler);
        self.send(OutboundRequest::ReqCurrentTime);
    }

    pub fn request_bulletins(&self, all_messages: bool, handler: Arc<dyn BulletinHandler>) {
        if !self.check_connected() {
            return;
        }
        self.bulletins.replace(handler);
        self.send(OutboundRequest::ReqNewsBulletins { all_messages });
    }

    pub fn cancel_bulletins(&self, handler: &Arc<dyn BulletinHandler>) {
        if self.bulletins.remove(handler) && self.check_connected() {
            self.send(OutboundRequest::CancelNewsBulletins);
        }
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    fn on_next_valid_id(&self, order_id: i32) {
        self.order_ids.ratchet(order_id);
        if !self.ready.swap(true, Ordering::SeqCst) {
            info!(next_order_id = order_id, "gateway ready");
            let connection = Arc::clone(&self.connection);
            isolate("connected", move || connection.connected());
        } else {
            debug!(next_order_id = order_id, "order id ratcheted");
        }
    }

    fn on_error(&self, id: i32, code: i32, message: &str) {
        if id < 0 {
            warn!(id, code, message, "broker error");
        } else {
            info!(id, code, message, "broker message");
        }

        self.orders
            .with_handler(id, |h| isolate("order_error", || h.handle(code, message)));
        self.live_orders
            .for_each(|h| isolate("live_order_error", || h.handle(id, code, message)));
        // Any error carrying a details request id is that request's last word.
        if self
            .contract_details
            .remove_with(id, |request| request.finish())
            .is_some()
        {
            debug!(req_id = id, code, "contract details ended by error");
        }
        let connection = Arc::clone(&self.connection);
        isolate("message", move || connection.message(id, code, message));
    }

    fn on_event(&self, event: InboundEvent) {
        let kind = event.kind();
        match event {
            // --- connection lifecycle ---
            InboundEvent::NextValidId { order_id } => self.on_next_valid_id(order_id),
            InboundEvent::ManagedAccounts { accounts } => {
                let list: Vec<String> = accounts
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect();
                *self.accounts.lock() = list.clone();
                let connection = Arc::clone(&self.connection);
                isolate(kind, move || connection.account_list(&list));
            }
            InboundEvent::ConnectionClosed => {
                if self.session.on_remote_close() {
                    self.notify_disconnected();
                }
            }
            InboundEvent::Error { id, code, message } => self.on_error(id, code, &message),
            InboundEvent::TransportFailure { message } => {
                error!(error = %message, "transport failure");
                let connection = Arc::clone(&self.connection);
                isolate(kind, move || connection.error(&message));
            }

            // --- account ---
            InboundEvent::AccountValue {
                account,
                key,
                value,
                currency,
            } => broadcast(kind, &self.account_updates, |h| {
                h.account_value(&account, &key, &value, &currency)
            }),
            InboundEvent::AccountTime { timestamp } => {
                broadcast(kind, &self.account_updates, |h| h.account_time(&timestamp))
            }
            InboundEvent::AccountDownloadEnd { account } => {
                broadcast(kind, &self.account_updates, |h| {
                    h.account_download_end(&account)
                })
            }
            InboundEvent::PortfolioUpdate(position) => {
                broadcast(kind, &self.account_updates, |h| h.update_portfolio(&position))
            }
            InboundEvent::AccountSummary {
                req_id,
                account,
                tag,
                value,
                currency,
            } => {
                // The broker appends a "Currency" row to every summary.
                if tag == "Currency" {
                    return;
                }
                match tag.parse::<AccountSummaryTag>() {
                    Ok(tag) => deliver(kind, &self.account_summary, req_id, |h| {
                        h.account_summary(&account, tag, &value, &currency)
                    }),
                    Err(e) => debug!(req_id, error = %e, "account summary row dropped"),
                }
            }
            InboundEvent::AccountSummaryEnd { req_id } => {
                deliver(kind, &self.account_summary, req_id, |h| h.account_summary_end())
            }

            // --- positions ---
            InboundEvent::Position {
                account,
                contract,
                position,
                avg_cost,
            } => broadcast(kind, &self.positions, |h| {
                h.position(&account, &contract, position, avg_cost)
            }),
            InboundEvent::PositionEnd => broadcast(kind, &self.positions, |h| h.position_end()),
            InboundEvent::PositionMulti {
                req_id,
                account,
                model_code,
                contract,
                position,
                avg_cost,
            } => deliver(kind, &self.positions_multi, req_id, |h| {
                h.position_multi(&account, &model_code, &contract, position, avg_cost)
            }),
            InboundEvent::PositionMultiEnd { req_id } => {
                deliver(kind, &self.positions_multi, req_id, |h| h.position_multi_end())
            }

            // --- contract metadata ---
            InboundEvent::ContractDetails { req_id, details } => {
                if details.min_tick > 0.0 {
                    self.min_ticks
                        .lock()
                        .insert(details.contract.symbol.clone(), details.min_tick);
                }
                let collected = self
                    .contract_details
                    .with_handler(req_id, |request| request.collected.lock().push(details));
                if collected.is_none() {
                    debug!(event = kind, req_id, "unroutable event dropped");
                }
            }
            InboundEvent::ContractDetailsEnd { req_id } => {
                if self
                    .contract_details
                    .remove_with(req_id, |request| request.finish())
                    .is_none()
                {
                    debug!(event = kind, req_id, "unroutable event dropped");
                }
            }

            // --- top of book ---
            InboundEvent::TickPrice {
                req_id,
                tick_type,
                price,
            } => deliver(kind, &self.top_mkt_data, req_id, |h| {
                h.tick_price(tick_type, price)
            }),
            InboundEvent::TickSize {
                req_id,
                tick_type,
                size,
            } => deliver(kind, &self.top_mkt_data, req_id, |h| h.tick_size(tick_type, size)),
            InboundEvent::TickString {
                req_id,
                tick_type,
                value,
            } => deliver(kind, &self.top_mkt_data, req_id, |h| {
                h.tick_string(tick_type, &value)
            }),
            InboundEvent::TickGeneric {
                req_id,
                tick_type,
                value,
            } => deliver(kind, &self.top_mkt_data, req_id, |h| {
                h.tick_generic(tick_type, value)
            }),
            InboundEvent::TickSnapshotEnd { req_id } => {
                deliver(kind, &self.top_mkt_data, req_id, |h| h.tick_snapshot_end())
            }
            InboundEvent::MarketDataType { req_id, data_type } => {
                deliver(kind, &self.top_mkt_data, req_id, |h| h.market_data_type(data_type))
            }

            // --- depth ---
            InboundEvent::MarketDepth {
                req_id,
                position,
                market_maker,
                operation,
                side,
                price,
                size,
            } => deliver(kind, &self.deep_mkt_data, req_id, |h| {
                h.update_mkt_depth(position, market_maker.as_deref(), operation, side, price, size)
            }),

            // --- orders ---
            InboundEvent::OrderStatus(update) => {
                debug!(
                    order_id = update.order_id,
                    status = %update.status,
                    filled = update.filled,
                    remaining = update.remaining,
                    avg_fill_price = update.avg_fill_price,
                    "order status"
                );
                deliver(kind, &self.orders, update.order_id, |h| h.order_status(&update));
                self.live_orders
                    .for_each(|h| isolate(kind, || h.order_status(&update)));
            }
            InboundEvent::OpenOrder {
                order_id,
                contract,
                order,
                state,
            } => {
                self.orders
                    .with_handler(order_id, |h| isolate(kind, || h.order_state(&state)));
                if !order.what_if {
                    self.live_orders
                        .for_each(|h| isolate(kind, || h.open_order(&contract, &order, &state)));
                }
            }
            InboundEvent::OpenOrderEnd => {
                broadcast(kind, &self.live_orders, |h| h.open_order_end())
            }

            // --- executions ---
            InboundEvent::ExecDetails {
                req_id: _,
                contract,
                execution,
            } => {
                let key = trade_key(&execution.exec_id);
                broadcast(kind, &self.trade_reports, |h| {
                    h.trade_report(key, &contract, &execution)
                })
            }
            InboundEvent::ExecDetailsEnd { req_id: _ } => {
                broadcast(kind, &self.trade_reports, |h| h.trade_report_end())
            }
            InboundEvent::CommissionReport(report) => {
                let key = trade_key(&report.exec_id);
                broadcast(kind, &self.trade_reports, |h| h.commission_report(key, &report))
            }

            // --- bars / ticks ---
            InboundEvent::HistoricalData { req_id, bar } => {
                if bar.date.starts_with(HISTORICAL_END_MARKER) {
                    deliver(kind, &self.historical_data, req_id, |h| h.historical_data_end());
                    return;
                }
                match parse_bar(&bar) {
                    Some(parsed) => deliver(kind, &self.historical_data, req_id, |h| {
                        h.historical_data(&parsed)
                    }),
                    None => warn!(req_id, date = %bar.date, "unparseable bar date; bar dropped"),
                }
            }
            InboundEvent::HistoricalDataEnd { req_id, .. } => {
                deliver(kind, &self.historical_data, req_id, |h| h.historical_data_end())
            }
            InboundEvent::RealTimeBar { req_id, bar } => {
                deliver(kind, &self.real_time_bars, req_id, |h| h.real_time_bar(&bar))
            }
            InboundEvent::HistoricalTicks {
                req_id,
                ticks,
                done,
            } => deliver(kind, &self.historical_ticks, req_id, |h| {
                h.historical_ticks(req_id, &ticks, done)
            }),
            InboundEvent::HistoricalTicksBidAsk {
                req_id,
                ticks,
                done,
            } => deliver(kind, &self.historical_ticks, req_id, |h| {
                h.historical_ticks_bid_ask(req_id, &ticks, done)
            }),
            InboundEvent::HistoricalTicksLast {
                req_id,
                ticks,
                done,
            } => deliver(kind, &self.historical_ticks, req_id, |h| {
                h.historical_ticks_last(req_id, &ticks, done)
            }),
            InboundEvent::TickByTick { req_id, tick } => {
                deliver(kind, &self.tick_by_tick, req_id, |h| h.tick_by_tick(req_id, &tick))
            }

            // --- scanner / fundamentals / news / misc ---
            InboundEvent::ScannerParameters { xml } => {
                broadcast(kind, &self.scanner_parameters, |h| h.scanner_parameters(&xml))
            }
            InboundEvent::ScannerData {
                req_id,
                rank,
                details,
                legs,
            } => deliver(kind, &self.scanner, req_id, |h| {
                h.scanner_data(rank, &details, &legs)
            }),
            InboundEvent::ScannerDataEnd { req_id } => {
                deliver(kind, &self.scanner, req_id, |h| h.scanner_data_end())
            }
            InboundEvent::FundamentalData { req_id, data } => {
                deliver(kind, &self.fundamentals, req_id, |h| h.fundamentals(&data))
            }
            InboundEvent::NewsBulletin {
                msg_id,
                msg_type,
                message,
                origin_exchange,
            } => {
                let msg_type = BulletinType::from_code(msg_type);
                broadcast(kind, &self.bulletins, |h| {
                    h.bulletin(msg_id, msg_type, &message, &origin_exchange)
                })
            }
            InboundEvent::CurrentTime { time } => {
                broadcast(kind, &self.time, |h| h.current_time(time))
            }
            InboundEvent::Pnl {
                req_id,
                daily,
                unrealized,
                realized,
            } => deliver(kind, &self.pnl, req_id, |h| {
                h.pnl(req_id, daily, unrealized, realized)
            }),
            InboundEvent::PnlSingle {
                req_id,
                position,
                daily,
                unrealized,
                realized,
                value,
            } => deliver(kind, &self.pnl_single, req_id, |h| {
                h.pnl_single(req_id, position, daily, unrealized, realized, value)
            }),
        }
    }
}

impl EventSink for BrokerGateway {
    fn dispatch(&self, event: InboundEvent) {
        self.on_event(event);
    }

    fn reader_exited(&self) {
        if self.session.on_remote_close() {
            self.notify_disconnected();
        }
    }
}

/// Aligns each set price to `min_tick`. A price the correction rejects
/// (NaN / infinite / out of range) is left unset and logged.
fn normalize_prices(order: &mut Order, min_tick: f64) {
    let order_id = order.order_id;
    let fields = [
        ("limit_price", &mut order.limit_price),
        ("aux_price", &mut order.aux_price),
        ("trail_stop_price", &mut order.trail_stop_price),
    ];
    for (field, slot) in fields {
        if let Some(price) = *slot {
            match fix_price_variance(price, min_tick) {
                Ok(fixed) => *slot = Some(fixed),
                Err(e) => {
                    error!(order_id, field, price, error = %e, "price rejected; field left unset");
                    *slot = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderType, Side};

    #[test]
    fn daily_bar_dates_are_local_midnight() {
        let expected = Local
            .with_ymd_and_hms(2024, 1, 2, 0, 0, 0)
            .earliest()
            .unwrap()
            .timestamp();
        assert_eq!(parse_bar_time("20240102"), Some(expected));
    }

    #[test]
    fn intraday_bar_dates_are_epoch_seconds() {
        assert_eq!(parse_bar_time("1704200400"), Some(1_704_200_400));
        assert_eq!(parse_bar_time(" 1704200400 "), Some(1_704_200_400));
        assert_eq!(parse_bar_time("not a date"), None);
    }

    #[test]
    fn normalize_aligns_prices_and_drops_non_finite() {
        let mut order = Order::new(Side::Buy, 10, OrderType::StopLimit);
        order.order_id = 7;
        order.limit_price = Some(100.004);
        order.aux_price = Some(f64::NAN);

        normalize_prices(&mut order, 0.01);

        assert_eq!(order.limit_price, Some(100.0));
        assert_eq!(order.aux_price, None);
        assert_eq!(order.trail_stop_price, None);
    }

    #[test]
    fn panic_payloads_render_as_text() {
        let p = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(p.as_ref()), "boom");

        let p = panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(p.as_ref()), "formatted 1");
    }
}
