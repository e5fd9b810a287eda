//! Top-of-book snapshot kept current by a market-data subscription.

use std::sync::Arc;

use parking_lot::Mutex;
use tbot_gateway::{TickType, TopMktDataHandler};

/// Latest values seen for one instrument. Zero means "not seen yet".
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MarketData {
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub open: f64,
    pub today_high: f64,
    pub today_low: f64,
    pub prev_close: f64,
    pub volume: i64,
}

impl MarketData {
    pub fn has_last(&self) -> bool {
        self.last > 0.0
    }

    /// Ask when quoted, otherwise last.
    pub fn entry_price(&self) -> f64 {
        if self.ask > 0.0 {
            self.ask
        } else {
            self.last
        }
    }
}

/// Handler side of the snapshot: registered with the gateway, read by the bot.
#[derive(Clone, Default)]
pub struct MarketFeed {
    snapshot: Arc<Mutex<MarketData>>,
}

impl MarketFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MarketData {
        *self.snapshot.lock()
    }
}

impl TopMktDataHandler for MarketFeed {
    fn tick_price(&self, tick_type: TickType, price: f64) {
        let mut md = self.snapshot.lock();
        match tick_type {
            TickType::Last => md.last = price,
            TickType::Bid => md.bid = price,
            TickType::Ask => md.ask = price,
            TickType::Open => md.open = price,
            TickType::High => md.today_high = price,
            TickType::Low => md.today_low = price,
            TickType::Close => md.prev_close = price,
            _ => {}
        }
    }

    fn tick_size(&self, tick_type: TickType, size: i64) {
        if tick_type == TickType::Volume {
            self.snapshot.lock().volume = size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_update_the_snapshot() {
        let feed = MarketFeed::new();
        feed.tick_price(TickType::Last, 10.5);
        feed.tick_price(TickType::High, 11.0);
        feed.tick_size(TickType::Volume, 1200);
        feed.tick_size(TickType::BidSize, 7);

        let md = feed.snapshot();
        assert_eq!(md.last, 10.5);
        assert_eq!(md.today_high, 11.0);
        assert_eq!(md.volume, 1200);
        assert_eq!(md.entry_price(), 10.5);
    }
}
