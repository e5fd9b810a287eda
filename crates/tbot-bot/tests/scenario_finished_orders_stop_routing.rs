//! Scenario: statuses for orders from an earlier cycle.
//!
//! # Invariants under test
//!
//! 1. Once an order is filled with nothing remaining, a replay of its fill
//!    during a later cycle changes neither the position nor the bot state.
//! 2. An order whose role has been handed to a new order stops routing even
//!    if it never reported a final status (the cancelled stop leg).
//! 3. The current cycle's orders keep routing normally.

use std::time::Duration;

use tbot_bot::{BaseBot, BotSettings, BotState, OrderRole, Quantity, RoundTripBot};
use tbot_gateway::{
    Contract, InboundEvent, OrderStatus, OrderStatusUpdate, OutboundRequest, TickType,
};
use tbot_testkit::Harness;

fn settings() -> BotSettings {
    let mut s = BotSettings::new("aapl-rt", Contract::smart_stock("AAPL"));
    s.tick_interval = Duration::from_secs(3600);
    s
}

fn placed_ids(h: &Harness) -> Vec<i32> {
    h.transport
        .sent()
        .into_iter()
        .filter_map(|r| match r {
            OutboundRequest::PlaceOrder { order_id, .. } => Some(order_id),
            _ => None,
        })
        .collect()
}

fn status(id: i32, status: OrderStatus, filled: f64, remaining: f64, avg: f64) -> InboundEvent {
    InboundEvent::OrderStatus(OrderStatusUpdate::new(id, status, filled, remaining, avg))
}

/// Opens a position of 10 at `price` and returns the (open, close, stop) ids.
fn open_cycle(h: &Harness, bot: &BaseBot<RoundTripBot>, price: f64) -> (i32, i32, i32) {
    let before = placed_ids(h).len();
    bot.tick();
    let open_id = placed_ids(h)[before];

    h.deliver([
        status(open_id, OrderStatus::Submitted, 0.0, 10.0, 0.0),
        status(open_id, OrderStatus::Filled, 10.0, 0.0, price),
    ]);
    let ids = placed_ids(h);
    assert_eq!(ids.len(), before + 3, "open plus two exit legs");
    (open_id, ids[before + 1], ids[before + 2])
}

#[test]
fn replayed_fill_from_a_finished_cycle_is_not_applied() {
    let h = Harness::connected();
    let rt = RoundTripBot::new(Quantity::Fixed(10), 1.0, 0.5);
    let stats = rt.stats();
    let bot = BaseBot::new(settings(), rt);
    bot.init(&h.gateway);

    let req_id = h
        .transport
        .sent()
        .iter()
        .find_map(|r| match r {
            OutboundRequest::ReqMktData { req_id, .. } => Some(*req_id),
            _ => None,
        })
        .expect("market data requested");
    h.deliver([InboundEvent::TickPrice {
        req_id,
        tick_type: TickType::Last,
        price: 100.0,
    }]);

    // Cycle 1: exit fills; the stop's cancel is sent but never acknowledged.
    let (open1, close1, stop1) = open_cycle(&h, &bot, 100.0);
    h.deliver([
        status(close1, OrderStatus::Submitted, 0.0, 10.0, 0.0),
        status(close1, OrderStatus::Filled, 10.0, 0.0, 101.0),
    ]);
    assert_eq!(stats.cycles(), 1);
    assert_eq!(bot.bot_state(), Ok(BotState::ReadyToOpen));

    // Cycle 2: both exit legs are working.
    let (open2, close2, stop2) = open_cycle(&h, &bot, 100.0);
    assert!(open2 > stop1);
    h.deliver([
        status(close2, OrderStatus::Submitted, 0.0, 10.0, 0.0),
        status(stop2, OrderStatus::PreSubmitted, 0.0, 10.0, 0.0),
    ]);
    assert_eq!(bot.lifecycle().position(), 10);
    assert_eq!(bot.bot_state(), Ok(BotState::ProfitWaiting));

    // Replays of cycle 1's final and superseded orders.
    h.deliver([
        status(close1, OrderStatus::Filled, 10.0, 0.0, 101.0),
        status(stop1, OrderStatus::Filled, 10.0, 0.0, 99.5),
        status(open1, OrderStatus::Filled, 10.0, 0.0, 100.0),
    ]);
    assert_eq!(bot.lifecycle().position(), 10);
    assert_eq!(bot.bot_state(), Ok(BotState::ProfitWaiting));
    assert_eq!(stats.cycles(), 1);
    assert_eq!(
        bot.lifecycle().status(OrderRole::ClosePosition),
        Some(OrderStatus::Submitted)
    );

    // The live cycle still completes.
    h.deliver([status(close2, OrderStatus::Filled, 10.0, 0.0, 101.0)]);
    assert_eq!(bot.lifecycle().position(), 0);
    assert_eq!(stats.cycles(), 2);
    assert_eq!(bot.bot_state(), Ok(BotState::ReadyToOpen));
}
