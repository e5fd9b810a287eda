//! Scenario: broker error routing and contract-details collection.
//!
//! # Invariants under test
//!
//! 1. An error whose id is an order id reaches that order's handler, then
//!    every live-order observer, then the connection observer.
//! 2. An error with an unknown id still reaches the live-order observers and
//!    the connection observer.
//! 3. Contract details are collected per request and delivered exactly once,
//!    at the end event.
//! 4. Any error carrying a details request id (200 "no security definition",
//!    321 validation, ...) ends that request with whatever was collected
//!    (possibly nothing). Errors for other ids leave it outstanding.
//! 5. Details carrying a minimum tick update the gateway's tick table.

use std::sync::Arc;

use tbot_gateway::{
    Contract, ContractDetails, ContractDetailsHandler, InboundEvent, LiveOrderHandler, Order,
    OrderHandler, Side, NO_SECURITY_DEFINITION_CODE,
};
use tbot_testkit::{Harness, RecordingDetails, RecordingLiveOrders, RecordingOrder};

fn details(symbol: &str, min_tick: f64) -> ContractDetails {
    ContractDetails {
        contract: Contract::smart_stock(symbol),
        market_name: "NMS".to_string(),
        long_name: format!("{symbol} INC"),
        min_tick,
        industry: None,
    }
}

#[test]
fn order_error_reaches_order_live_and_connection_handlers() {
    let h = Harness::connected();
    let order = Arc::new(RecordingOrder::default());
    let live = Arc::new(RecordingLiveOrders::default());
    h.gateway.request_live_orders(live.clone() as Arc<dyn LiveOrderHandler>);

    let id = h
        .gateway
        .place_or_modify_order(
            &Contract::smart_stock("AAPL"),
            &mut Order::limit(Side::Buy, 1, 1.0),
            order.clone() as Arc<dyn OrderHandler>,
        )
        .unwrap();

    h.deliver([InboundEvent::Error {
        id,
        code: 201,
        message: "Order rejected".to_string(),
    }]);

    assert_eq!(
        order.errors.lock().clone(),
        vec![(201, "Order rejected".to_string())]
    );
    assert_eq!(live.errors.lock().clone(), vec![(id, 201)]);
    assert_eq!(
        h.connection.messages.lock().last().cloned(),
        Some((id, 201, "Order rejected".to_string()))
    );
}

#[test]
fn unknown_id_error_still_reaches_observers() {
    let h = Harness::connected();
    let live = Arc::new(RecordingLiveOrders::default());
    h.gateway.request_live_orders(live.clone() as Arc<dyn LiveOrderHandler>);

    h.deliver([InboundEvent::Error {
        id: 9999,
        code: 2104,
        message: "Market data farm connection is OK".to_string(),
    }]);

    assert_eq!(live.errors.lock().clone(), vec![(9999, 2104)]);
    assert_eq!(h.connection.message_codes(), vec![2104]);
}

#[test]
fn details_are_delivered_once_at_end() {
    let h = Harness::connected();
    let rec = Arc::new(RecordingDetails::default());
    h.gateway.request_contract_details(
        &Contract::smart_stock("AAPL"),
        rec.clone() as Arc<dyn ContractDetailsHandler>,
    );
    let req_id = h.transport.sent()[0].req_id().unwrap();

    h.deliver([
        InboundEvent::ContractDetails {
            req_id,
            details: details("AAPL", 0.01),
        },
        InboundEvent::ContractDetails {
            req_id,
            details: details("AAPL", 0.01),
        },
    ]);
    assert!(rec.deliveries.lock().is_empty(), "nothing before the end event");

    h.deliver([
        InboundEvent::ContractDetailsEnd { req_id },
        InboundEvent::ContractDetailsEnd { req_id },
    ]);
    let deliveries = rec.deliveries.lock().clone();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].len(), 2);
}

#[test]
fn no_security_definition_ends_the_request() {
    let h = Harness::connected();
    let rec = Arc::new(RecordingDetails::default());
    h.gateway.request_contract_details(
        &Contract::smart_stock("NOPE"),
        rec.clone() as Arc<dyn ContractDetailsHandler>,
    );
    let req_id = h.transport.sent()[0].req_id().unwrap();

    h.deliver([InboundEvent::Error {
        id: req_id,
        code: NO_SECURITY_DEFINITION_CODE,
        message: "No security definition has been found".to_string(),
    }]);

    assert_eq!(rec.deliveries.lock().clone(), vec![Vec::new()]);
    assert_eq!(h.connection.message_codes(), vec![NO_SECURITY_DEFINITION_CODE]);
}

#[test]
fn any_error_for_the_request_id_ends_the_request() {
    let h = Harness::connected();
    let rec = Arc::new(RecordingDetails::default());
    h.gateway.request_contract_details(
        &Contract::smart_stock("AAPL"),
        rec.clone() as Arc<dyn ContractDetailsHandler>,
    );
    let req_id = h.transport.sent()[0].req_id().unwrap();

    h.deliver([
        InboundEvent::ContractDetails {
            req_id,
            details: details("AAPL", 0.01),
        },
        InboundEvent::Error {
            id: req_id + 1000,
            code: 162,
            message: "Historical market data service error".to_string(),
        },
    ]);
    assert!(rec.deliveries.lock().is_empty(), "other ids leave it outstanding");

    h.deliver([
        InboundEvent::Error {
            id: req_id,
            code: 321,
            message: "Error validating request".to_string(),
        },
        InboundEvent::ContractDetailsEnd { req_id },
    ]);

    let deliveries = rec.deliveries.lock().clone();
    assert_eq!(deliveries.len(), 1, "ended once, late end event ignored");
    assert_eq!(deliveries[0].len(), 1, "collected rows are delivered");
    assert_eq!(h.connection.message_codes(), vec![162, 321]);
}

#[test]
fn details_update_the_tick_table() {
    let h = Harness::connected();
    let rec = Arc::new(RecordingDetails::default());
    let contract = Contract::smart_stock("BRK B");
    h.gateway
        .request_contract_details(&contract, rec as Arc<dyn ContractDetailsHandler>);
    let req_id = h.transport.sent()[0].req_id().unwrap();

    h.deliver([
        InboundEvent::ContractDetails {
            req_id,
            details: details("BRK B", 0.05),
        },
        InboundEvent::ContractDetailsEnd { req_id },
    ]);

    assert_eq!(h.gateway.min_tick(&contract), 0.05);
    assert_eq!(
        h.gateway.min_tick(&Contract::smart_stock("OTHER")),
        tbot_gateway::DEFAULT_MIN_TICK
    );
}
