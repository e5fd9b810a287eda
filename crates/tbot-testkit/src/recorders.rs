//! Recording handlers: capture every callback for later assertions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tbot_gateway::{
    Bar, ConnectionHandler, ContractDetails, ContractDetailsHandler, HistoricalDataHandler,
    LiveOrderHandler, OrderHandler, OrderState, OrderStatusUpdate, TickType, TopMktDataHandler,
};

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[derive(Default)]
pub struct RecordingConnection {
    pub connected: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub accounts: Mutex<Vec<String>>,
    pub messages: Mutex<Vec<(i32, i32, String)>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingConnection {
    pub fn connected_count(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnected_count(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn message_codes(&self) -> Vec<i32> {
        self.messages.lock().iter().map(|(_, code, _)| *code).collect()
    }
}

impl ConnectionHandler for RecordingConnection {
    fn connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }

    fn account_list(&self, accounts: &[String]) {
        *self.accounts.lock() = accounts.to_vec();
    }

    fn error(&self, error: &str) {
        self.errors.lock().push(error.to_string());
    }

    fn message(&self, id: i32, code: i32, message: &str) {
        self.messages.lock().push((id, code, message.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingOrder {
    pub states: Mutex<Vec<OrderState>>,
    pub statuses: Mutex<Vec<OrderStatusUpdate>>,
    pub errors: Mutex<Vec<(i32, String)>>,
}

impl RecordingOrder {
    pub fn status_count(&self) -> usize {
        self.statuses.lock().len()
    }
}

impl OrderHandler for RecordingOrder {
    fn order_state(&self, state: &OrderState) {
        self.states.lock().push(state.clone());
    }

    fn order_status(&self, update: &OrderStatusUpdate) {
        self.statuses.lock().push(update.clone());
    }

    fn handle(&self, code: i32, message: &str) {
        self.errors.lock().push((code, message.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingLiveOrders {
    pub open_orders: Mutex<Vec<i32>>,
    pub statuses: Mutex<Vec<OrderStatusUpdate>>,
    pub errors: Mutex<Vec<(i32, i32)>>,
    pub ends: AtomicUsize,
}

impl LiveOrderHandler for RecordingLiveOrders {
    fn open_order(&self, _contract: &tbot_gateway::Contract, order: &tbot_gateway::Order, _state: &OrderState) {
        self.open_orders.lock().push(order.order_id);
    }

    fn open_order_end(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }

    fn order_status(&self, update: &OrderStatusUpdate) {
        self.statuses.lock().push(update.clone());
    }

    fn handle(&self, order_id: i32, code: i32, _message: &str) {
        self.errors.lock().push((order_id, code));
    }
}

#[derive(Default)]
pub struct RecordingTicks {
    pub prices: Mutex<Vec<(TickType, f64)>>,
    pub sizes: Mutex<Vec<(TickType, i64)>>,
}

impl TopMktDataHandler for RecordingTicks {
    fn tick_price(&self, tick_type: TickType, price: f64) {
        self.prices.lock().push((tick_type, price));
    }

    fn tick_size(&self, tick_type: TickType, size: i64) {
        self.sizes.lock().push((tick_type, size));
    }
}

#[derive(Default)]
pub struct RecordingBars {
    pub bars: Mutex<Vec<Bar>>,
    pub ends: AtomicUsize,
}

impl HistoricalDataHandler for RecordingBars {
    fn historical_data(&self, bar: &Bar) {
        self.bars.lock().push(bar.clone());
    }

    fn historical_data_end(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingDetails {
    pub deliveries: Mutex<Vec<Vec<ContractDetails>>>,
}

impl ContractDetailsHandler for RecordingDetails {
    fn contract_details(&self, details: &[ContractDetails]) {
        self.deliveries.lock().push(details.to_vec());
    }
}
