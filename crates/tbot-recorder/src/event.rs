//! One recorded line.
//!
//! Each line of a market log is a [`RecordedLine`] serialized as JSON: a
//! wall-clock stamp plus the event, tagged by `type`:
//!
//! ```json
//! {"time":"2024-01-10T14:30:00.125Z","type":"TickPrice","tick_type":"Last","price":185.2}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tbot_gateway::{Bar, DeepOperation, DeepSide, TickType};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecordedEvent {
    RealTimeBar {
        bar: Bar,
    },
    TickPrice {
        tick_type: TickType,
        price: f64,
    },
    TickSize {
        tick_type: TickType,
        size: i64,
    },
    TickString {
        tick_type: TickType,
        value: String,
    },
    MarketDepth {
        position: i32,
        market_maker: Option<String>,
        operation: DeepOperation,
        side: DeepSide,
        price: f64,
        size: i64,
    },
    Error {
        id: i32,
        code: i32,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedLine {
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RecordedEvent,
}

impl RecordedLine {
    pub fn now(event: RecordedEvent) -> Self {
        Self {
            time: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_flat_and_tagged() {
        let line = RecordedLine::now(RecordedEvent::Error {
            id: 3,
            code: 354,
            message: "not subscribed".into(),
        });
        let json: serde_json::Value = serde_json::to_value(&line).unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["code"], 354);
        assert!(json["time"].is_string());

        let back: RecordedLine = serde_json::from_value(json).unwrap();
        assert_eq!(back, line);
    }
}
