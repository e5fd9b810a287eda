//! Scenario: the real gateway and a round-trip bot against the paper broker.
//!
//! # Invariants under test
//!
//! 1. The handshake makes the gateway ready; accounts come from the broker.
//! 2. Repeated round trips complete: each one fills an open and an exit and
//!    cancels the other exit, leaving the broker flat.
//! 3. A stop resting at the broker fills when the quote crosses it, and the
//!    stop-loss role realizes the loss.
//! 4. Cancelling an order the broker no longer works reaches the order's
//!    handler as an error, not a status.

use std::sync::Arc;
use std::time::Duration;

use tbot_bot::{BaseBot, BotSettings, OrderRole, Quantity, RoundTripBot};
use tbot_broker_paper::{PaperSettings, PaperTransport, CANNOT_CANCEL_CODE};
use tbot_gateway::{BrokerGateway, Contract, Order, OrderHandler, OrderStatus, Side};
use tbot_testkit::{init_test_logging, wait_until, RecordingConnection, RecordingOrder, SETTLE};

fn connect(settings: PaperSettings) -> (Arc<BrokerGateway>, Arc<PaperTransport>, Arc<RecordingConnection>) {
    init_test_logging();
    let transport = Arc::new(PaperTransport::new(settings));
    let connection = Arc::new(RecordingConnection::default());
    let gateway = BrokerGateway::new(transport.clone(), connection.clone());
    gateway.connect("paper", 0, 0).expect("paper connect");
    assert!(wait_until(SETTLE, || gateway.is_connected()));
    (gateway, transport, connection)
}

fn settings(price: f64) -> PaperSettings {
    PaperSettings {
        default_price: Some(price),
        ..PaperSettings::default()
    }
}

fn bot_settings() -> BotSettings {
    let mut s = BotSettings::new("paper-rt", Contract::smart_stock("AAPL"));
    s.tick_interval = Duration::from_secs(3600);
    s
}

#[test]
fn repeated_round_trips_leave_the_book_flat() {
    let (gateway, transport, connection) = connect(settings(100.0));
    assert_eq!(connection.accounts.lock().clone(), vec!["DU0000000".to_string()]);

    let rt = RoundTripBot::new(Quantity::Fixed(10), 0.5, 0.25).with_max_cycles(3);
    let stats = rt.stats();
    let bot = BaseBot::new(bot_settings(), rt);
    bot.init(&gateway);
    assert!(wait_until(SETTLE, || bot.market().has_last()));

    for cycle in 1..=3 {
        bot.tick();
        assert!(wait_until(SETTLE, || bot.lifecycle().position() == 10));
        // The take-profit rests until the market reaches it.
        transport.set_quote("AAPL", 100.5);
        assert!(
            wait_until(SETTLE, || stats.cycles() == cycle),
            "cycle {cycle} did not complete"
        );
        transport.set_quote("AAPL", 100.0);
        assert!(wait_until(SETTLE, || bot.market().ask == 100.0));
    }
    bot.tick();

    assert!((stats.realized_pnl() - 15.0).abs() < 1e-9);
    assert_eq!(transport.with_broker(|b| b.positions().get("AAPL").copied()), Some(0));
    // Per cycle: open and take-profit filled, stop cancelled.
    assert_eq!(transport.filled_orders(), 6);
    assert!(wait_until(SETTLE, || {
        bot.lifecycle().status(OrderRole::StopLoss) == Some(OrderStatus::Cancelled)
    }));

    gateway.disconnect();
    assert_eq!(connection.disconnected_count(), 1);
}

#[test]
fn crossed_stop_realizes_the_loss() {
    let (gateway, transport, _connection) = connect(settings(50.0));

    let rt = RoundTripBot::new(Quantity::Fixed(4), 1.0, 0.5);
    let stats = rt.stats();
    let bot = BaseBot::new(bot_settings(), rt);
    bot.init(&gateway);
    assert!(wait_until(SETTLE, || bot.market().has_last()));

    bot.tick();
    assert!(wait_until(SETTLE, || bot.lifecycle().position() == 4));

    transport.set_quote("AAPL", 49.4);
    assert!(wait_until(SETTLE, || stats.cycles() == 1));
    assert_eq!(bot.lifecycle().position(), 0);
    assert_eq!(bot.lifecycle().close_avg_fill_price(), 49.4);
    assert!((stats.realized_pnl() + 2.4).abs() < 1e-9, "(49.40 - 50.00) x 4");
    assert!(wait_until(SETTLE, || {
        bot.lifecycle().status(OrderRole::ClosePosition) == Some(OrderStatus::Cancelled)
    }));

    gateway.disconnect();
}

#[test]
fn resting_stop_fills_on_a_crossing_quote() {
    let (gateway, transport, _connection) = connect(settings(20.0));
    let handler = Arc::new(RecordingOrder::default());
    let mut order = Order::stop(Side::Sell, 3, 19.5);
    let order_id = gateway
        .place_or_modify_order(
            &Contract::smart_stock("AAPL"),
            &mut order,
            handler.clone() as Arc<dyn OrderHandler>,
        )
        .expect("order placed");

    assert!(wait_until(SETTLE, || handler.status_count() == 2));
    transport.set_quote("AAPL", 19.4);
    assert!(wait_until(SETTLE, || handler.status_count() == 3));
    let last = handler.statuses.lock().last().cloned().expect("a status");
    assert_eq!(last.order_id, order_id);
    assert_eq!(last.status, OrderStatus::Filled);
    assert_eq!(last.avg_fill_price, 19.4);

    gateway.cancel_order(order_id);
    assert!(wait_until(SETTLE, || !handler.errors.lock().is_empty()));
    assert_eq!(handler.errors.lock()[0].0, CANNOT_CANCEL_CODE);
    assert_eq!(handler.status_count(), 3);

    gateway.disconnect();
}
