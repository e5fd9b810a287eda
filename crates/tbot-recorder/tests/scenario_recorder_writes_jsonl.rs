//! Scenario: a recorder subscribes, writes every event as one JSON line, and
//! unsubscribes on stop.
//!
//! # Invariants under test
//!
//! 1. Start subscribes real-time bars (TRADES, RTH), top of book with the
//!    recorder's generic ticks, and depth on the routed contract.
//! 2. Every delivered event becomes exactly one line, in arrival order,
//!    under `<dir>/<day>/Market-<SYMBOL>-*.log`.
//! 3. Errors handed to the recorder are lines too.
//! 4. Stop cancels each subscription and reports the lines written; a
//!    second stop is a no-op.
//! 5. Without deep book no depth request is made.
//! 6. Stop after the connection is gone still unregisters every stream: after
//!    a reconnect and restart only the new subscriptions are recorded.

use std::fs;

use tbot_gateway::{
    Bar, Contract, DeepOperation, DeepSide, InboundEvent, OutboundRequest, TickType, WhatToShow,
    NOT_CONNECTED_CODE,
};
use tbot_recorder::{MarketRecorder, RecorderSettings, DEPTH_ROWS, TOP_OF_BOOK_TICKS};
use tbot_testkit::Harness;

fn bar(time: i64) -> Bar {
    Bar {
        time,
        open: 10.0,
        high: 10.5,
        low: 9.9,
        close: 10.2,
        volume: 1200,
        wap: 10.1,
        count: 14,
    }
}

#[test]
fn records_every_stream_as_json_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = Harness::connected();
    let recorder = MarketRecorder::new(Contract::smart_stock("AAPL"), RecorderSettings::new(dir.path()));

    let path = recorder.start(&h.gateway).expect("recorder starts");
    assert!(path.starts_with(dir.path()));
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
    assert!(name.starts_with("Market-AAPL-") && name.ends_with(".log"), "{name}");

    let sent = h.transport.sent();
    let (bars_id, top_id, depth_id) = match sent.as_slice() {
        [OutboundRequest::ReqRealTimeBars {
            req_id: b,
            what_to_show: WhatToShow::Trades,
            rth_only: true,
            ..
        }, OutboundRequest::ReqMktData {
            req_id: t,
            generic_ticks,
            snapshot: false,
            ..
        }, OutboundRequest::ReqMktDepth {
            req_id: d,
            contract,
            num_rows,
        }] => {
            assert_eq!(generic_ticks, TOP_OF_BOOK_TICKS);
            assert_eq!(contract.exchange, "ISLAND");
            assert_eq!(*num_rows, DEPTH_ROWS);
            (*b, *t, *d)
        }
        other => panic!("unexpected subscriptions: {other:?}"),
    };

    h.deliver([
        InboundEvent::RealTimeBar {
            req_id: bars_id,
            bar: bar(1_700_000_000),
        },
        InboundEvent::TickPrice {
            req_id: top_id,
            tick_type: TickType::Last,
            price: 10.25,
        },
        InboundEvent::TickSize {
            req_id: top_id,
            tick_type: TickType::LastSize,
            size: 300,
        },
        InboundEvent::MarketDepth {
            req_id: depth_id,
            position: 0,
            market_maker: Some("NSDQ".into()),
            operation: DeepOperation::Insert,
            side: DeepSide::Bid,
            price: 10.24,
            size: 500,
        },
    ]);
    recorder.error(top_id, 10197, "No market data during competing live session");

    h.transport.clear_sent();
    assert_eq!(recorder.stop(&h.gateway), Some(5));
    assert_eq!(recorder.stop(&h.gateway), None);

    let cancels: Vec<OutboundRequest> = h.transport.sent();
    assert_eq!(
        cancels,
        vec![
            OutboundRequest::CancelRealTimeBars { req_id: bars_id },
            OutboundRequest::CancelMktData { req_id: top_id },
            OutboundRequest::CancelMktDepth { req_id: depth_id },
        ]
    );

    let text = fs::read_to_string(&path).expect("log readable");
    let types: Vec<String> = text
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).expect("each line is json");
            v["type"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(
        types,
        vec!["RealTimeBar", "TickPrice", "TickSize", "MarketDepth", "Error"]
    );
    assert_eq!(recorder.dropped(), 0);
}

#[test]
fn no_depth_without_deep_book() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = Harness::connected();
    let recorder = MarketRecorder::new(
        Contract::smart_stock("MSFT"),
        RecorderSettings::new(dir.path()).with_deep_book(false),
    );
    recorder.start(&h.gateway).expect("recorder starts");

    assert!(!h
        .transport
        .sent()
        .iter()
        .any(|r| matches!(r, OutboundRequest::ReqMktDepth { .. })));
    assert!(recorder.start(&h.gateway).is_err(), "already started");
    assert_eq!(recorder.stop(&h.gateway), Some(0));
}

fn top_req_id(sent: &[OutboundRequest]) -> i32 {
    sent.iter()
        .find_map(|r| match r {
            OutboundRequest::ReqMktData { req_id, .. } => Some(*req_id),
            _ => None,
        })
        .expect("top of book requested")
}

#[test]
fn stop_after_disconnect_still_unregisters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = Harness::connected();
    let recorder = MarketRecorder::new(
        Contract::smart_stock("AAPL"),
        RecorderSettings::new(dir.path()).with_deep_book(false),
    );
    recorder.start(&h.gateway).expect("recorder starts");
    let old_top = top_req_id(&h.transport.sent());

    h.gateway.disconnect();
    h.transport.clear_sent();
    assert_eq!(recorder.stop(&h.gateway), Some(0));
    assert_eq!(h.transport.sent_count(), 0, "nothing can be sent");
    assert_eq!(h.connection.message_codes(), vec![NOT_CONNECTED_CODE; 2]);

    h.connect();
    recorder.start(&h.gateway).expect("recorder restarts");
    let new_top = top_req_id(&h.transport.sent());
    assert_ne!(new_top, old_top);

    let tick = |req_id| InboundEvent::TickPrice {
        req_id,
        tick_type: TickType::Last,
        price: 10.25,
    };
    h.deliver([tick(old_top), tick(new_top)]);

    h.transport.clear_sent();
    assert_eq!(recorder.stop(&h.gateway), Some(1), "only the new stream is recorded");
    assert_eq!(h.transport.sent_count(), 2, "bars and top of book cancelled once each");
}
