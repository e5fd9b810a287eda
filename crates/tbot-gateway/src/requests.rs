//! Outbound requests handed to the transport.
//!
//! Prices inside `PlaceOrder` are already tick-aligned by the gateway; unset
//! prices stay `None` and the wire layer renders them as its own "unset"
//! marker.

use serde::{Deserialize, Serialize};

use crate::types::{
    BarSize, Contract, ExecutionFilter, MarketDataType, Order, ScannerSubscription,
    TickByTickType, WhatToShow,
};

/// Parameters of a historical-bars request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalDataQuery {
    /// `yyyyMMdd HH:mm:ss`; empty means "now".
    pub end_date_time: String,
    /// Broker duration string, e.g. `"1 D"`, `"2 W"`.
    pub duration: String,
    pub bar_size: BarSize,
    pub what_to_show: WhatToShow,
    pub rth_only: bool,
}

impl HistoricalDataQuery {
    /// Regular-hours trade bars ending now.
    pub fn new(duration: impl Into<String>, bar_size: BarSize) -> Self {
        Self {
            end_date_time: String::new(),
            duration: duration.into(),
            bar_size,
            what_to_show: WhatToShow::Trades,
            rth_only: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTicksQuery {
    pub start: String,
    pub end: String,
    pub number_of_ticks: i32,
    pub what_to_show: WhatToShow,
    pub rth_only: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OutboundRequest {
    ReqIds,
    ReqCurrentTime,

    // --- account ---
    ReqAccountUpdates {
        subscribe: bool,
        account: String,
    },
    ReqAccountSummary {
        req_id: i32,
        group: String,
        tags: String,
    },
    CancelAccountSummary {
        req_id: i32,
    },
    ReqPositions,
    CancelPositions,
    ReqPositionsMulti {
        req_id: i32,
        account: String,
        model_code: String,
    },
    CancelPositionsMulti {
        req_id: i32,
    },
    ReqPnl {
        req_id: i32,
        account: String,
        model_code: String,
    },
    CancelPnl {
        req_id: i32,
    },
    ReqPnlSingle {
        req_id: i32,
        account: String,
        model_code: String,
        con_id: i32,
    },
    CancelPnlSingle {
        req_id: i32,
    },

    // --- contracts ---
    ReqContractDetails {
        req_id: i32,
        contract: Contract,
    },

    // --- market data ---
    ReqMarketDataType {
        data_type: MarketDataType,
    },
    ReqMktData {
        req_id: i32,
        contract: Contract,
        generic_ticks: String,
        snapshot: bool,
    },
    CancelMktData {
        req_id: i32,
    },
    ReqMktDepth {
        req_id: i32,
        contract: Contract,
        num_rows: i32,
    },
    CancelMktDepth {
        req_id: i32,
    },
    ReqHistoricalData {
        req_id: i32,
        contract: Contract,
        query: HistoricalDataQuery,
    },
    CancelHistoricalData {
        req_id: i32,
    },
    ReqRealTimeBars {
        req_id: i32,
        contract: Contract,
        what_to_show: WhatToShow,
        rth_only: bool,
    },
    CancelRealTimeBars {
        req_id: i32,
    },
    ReqHistoricalTicks {
        req_id: i32,
        contract: Contract,
        query: HistoricalTicksQuery,
    },
    ReqTickByTick {
        req_id: i32,
        contract: Contract,
        tick_type: TickByTickType,
        number_of_ticks: i32,
        ignore_size: bool,
    },
    CancelTickByTick {
        req_id: i32,
    },

    // --- orders ---
    PlaceOrder {
        order_id: i32,
        contract: Contract,
        order: Order,
    },
    CancelOrder {
        order_id: i32,
    },
    GlobalCancel,
    ReqOpenOrders,
    ReqAllOpenOrders,
    ReqAutoOpenOrders {
        auto_bind: bool,
    },
    ReqExecutions {
        req_id: i32,
        filter: ExecutionFilter,
    },

    // --- scanner / fundamentals / news ---
    ReqScannerParameters,
    ReqScannerSubscription {
        req_id: i32,
        subscription: ScannerSubscription,
    },
    CancelScannerSubscription {
        req_id: i32,
    },
    ReqFundamentalData {
        req_id: i32,
        contract: Contract,
        report_type: String,
    },
    ReqNewsBulletins {
        all_messages: bool,
    },
    CancelNewsBulletins,
}

impl OutboundRequest {
    /// Request id carried by this request, if any. Order requests carry an
    /// order id instead and return `None`.
    pub fn req_id(&self) -> Option<i32> {
        match self {
            OutboundRequest::ReqAccountSummary { req_id, .. }
            | OutboundRequest::CancelAccountSummary { req_id }
            | OutboundRequest::ReqPositionsMulti { req_id, .. }
            | OutboundRequest::CancelPositionsMulti { req_id }
            | OutboundRequest::ReqPnl { req_id, .. }
            | OutboundRequest::CancelPnl { req_id }
            | OutboundRequest::ReqPnlSingle { req_id, .. }
            | OutboundRequest::CancelPnlSingle { req_id }
            | OutboundRequest::ReqContractDetails { req_id, .. }
            | OutboundRequest::ReqMktData { req_id, .. }
            | OutboundRequest::CancelMktData { req_id }
            | OutboundRequest::ReqMktDepth { req_id, .. }
            | OutboundRequest::CancelMktDepth { req_id }
            | OutboundRequest::ReqHistoricalData { req_id, .. }
            | OutboundRequest::CancelHistoricalData { req_id }
            | OutboundRequest::ReqRealTimeBars { req_id, .. }
            | OutboundRequest::CancelRealTimeBars { req_id }
            | OutboundRequest::ReqHistoricalTicks { req_id, .. }
            | OutboundRequest::ReqTickByTick { req_id, .. }
            | OutboundRequest::CancelTickByTick { req_id }
            | OutboundRequest::ReqExecutions { req_id, .. }
            | OutboundRequest::ReqScannerSubscription { req_id, .. }
            | OutboundRequest::CancelScannerSubscription { req_id }
            | OutboundRequest::ReqFundamentalData { req_id, .. } => Some(*req_id),
            _ => None,
        }
    }

    /// `true` for requests that withdraw an earlier subscription or order.
    pub fn is_cancel(&self) -> bool {
        matches!(
            self,
            OutboundRequest::CancelAccountSummary { .. }
                | OutboundRequest::CancelPositions
                | OutboundRequest::CancelPositionsMulti { .. }
                | OutboundRequest::CancelPnl { .. }
                | OutboundRequest::CancelPnlSingle { .. }
                | OutboundRequest::CancelMktData { .. }
                | OutboundRequest::CancelMktDepth { .. }
                | OutboundRequest::CancelHistoricalData { .. }
                | OutboundRequest::CancelRealTimeBars { .. }
                | OutboundRequest::CancelTickByTick { .. }
                | OutboundRequest::CancelOrder { .. }
                | OutboundRequest::GlobalCancel
                | OutboundRequest::CancelScannerSubscription { .. }
                | OutboundRequest::CancelNewsBulletins
        ) || matches!(
            self,
            OutboundRequest::ReqAccountUpdates {
                subscribe: false,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_id_is_exposed_for_keyed_requests_only() {
        let r = OutboundRequest::CancelMktData { req_id: -4 };
        assert_eq!(r.req_id(), Some(-4));
        assert!(r.is_cancel());

        assert_eq!(OutboundRequest::CancelOrder { order_id: 9 }.req_id(), None);
        assert_eq!(OutboundRequest::ReqPositions.req_id(), None);
    }

    #[test]
    fn account_unsubscribe_counts_as_cancel() {
        let unsub = OutboundRequest::ReqAccountUpdates {
            subscribe: false,
            account: "DU1".into(),
        };
        let sub = OutboundRequest::ReqAccountUpdates {
            subscribe: true,
            account: "DU1".into(),
        };
        assert!(unsub.is_cancel());
        assert!(!sub.is_cancel());
    }
}
