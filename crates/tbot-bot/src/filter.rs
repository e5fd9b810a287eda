//! Entry filters: conditions that must all hold before a bot opens.
//!
//! Filters take the instant explicitly so callers decide the clock; bots pass
//! `Utc::now()`, tests pass fixed instants.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::America::New_York;

use crate::market::MarketData;

pub trait TradingFilter: Send + Sync {
    fn name(&self) -> &str;
    fn is_active(&self, now: DateTime<Utc>, market: &MarketData) -> bool;
}

/// `true` when every filter is active (vacuously for none).
pub fn all_active(filters: &[Box<dyn TradingFilter>], now: DateTime<Utc>, market: &MarketData) -> bool {
    filters.iter().all(|f| {
        let active = f.is_active(now, market);
        if !active {
            tracing::debug!(filter = f.name(), "filter inactive");
        }
        active
    })
}

// ---------------------------------------------------------------------------
// NasdaqRegularHours
// ---------------------------------------------------------------------------

const SESSION_OPEN_MINUTE: u32 = 9 * 60 + 30;
const SESSION_CLOSE_MINUTE: u32 = 16 * 60;

/// NASDAQ regular session, Monday–Friday 09:30 to 16:00 New York time, with
/// the last `end_offset_minutes` cut off. Both bounds are inclusive.
/// Exchange holidays are not modelled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NasdaqRegularHours {
    pub end_offset_minutes: u32,
}

impl NasdaqRegularHours {
    pub fn new(end_offset_minutes: u32) -> Self {
        Self { end_offset_minutes }
    }
}

impl TradingFilter for NasdaqRegularHours {
    fn name(&self) -> &str {
        "NasdaqRegularHours"
    }

    fn is_active(&self, now: DateTime<Utc>, _market: &MarketData) -> bool {
        let ny = now.with_timezone(&New_York);
        let weekday = ny.weekday().number_from_monday();
        let minute = ny.hour() * 60 + ny.minute();
        let last_minute = SESSION_CLOSE_MINUTE.saturating_sub(self.end_offset_minutes);

        (1..=5).contains(&weekday) && minute >= SESSION_OPEN_MINUTE && minute <= last_minute
    }
}

// ---------------------------------------------------------------------------
// NotCloseToDailyHigh
// ---------------------------------------------------------------------------

/// Active while the last trade sits more than `delta` below today's high.
#[derive(Clone, Debug, PartialEq)]
pub struct NotCloseToDailyHigh {
    pub delta: f64,
}

impl NotCloseToDailyHigh {
    pub fn new(delta: f64) -> Self {
        Self { delta }
    }
}

impl TradingFilter for NotCloseToDailyHigh {
    fn name(&self) -> &str {
        "Not close to daily high"
    }

    fn is_active(&self, _now: DateTime<Utc>, market: &MarketData) -> bool {
        market.today_high - market.last > self.delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ny(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn regular_hours_bounds_are_inclusive() {
        let f = NasdaqRegularHours::new(0);
        let md = MarketData::default();
        // 2024-03-13 is a Wednesday (after the DST switch).
        assert!(!f.is_active(ny(2024, 3, 13, 9, 29), &md));
        assert!(f.is_active(ny(2024, 3, 13, 9, 30), &md));
        assert!(f.is_active(ny(2024, 3, 13, 16, 0), &md));
        assert!(!f.is_active(ny(2024, 3, 13, 16, 1), &md));
    }

    #[test]
    fn end_offset_counts_real_minutes() {
        let f = NasdaqRegularHours::new(45);
        let md = MarketData::default();
        assert!(f.is_active(ny(2024, 1, 10, 15, 15), &md));
        assert!(!f.is_active(ny(2024, 1, 10, 15, 16), &md));
    }

    #[test]
    fn weekends_are_closed() {
        let f = NasdaqRegularHours::new(0);
        let md = MarketData::default();
        // Saturday and Sunday, mid-session.
        assert!(!f.is_active(ny(2024, 1, 13, 12, 0), &md));
        assert!(!f.is_active(ny(2024, 1, 14, 12, 0), &md));
    }

    #[test]
    fn daily_high_restriction() {
        let f = NotCloseToDailyHigh::new(0.5);
        let now = Utc::now();
        let mut md = MarketData {
            last: 99.0,
            today_high: 100.0,
            ..MarketData::default()
        };
        assert!(f.is_active(now, &md));
        md.last = 99.5;
        assert!(!f.is_active(now, &md), "exactly delta below the high is too close");
    }

    #[test]
    fn all_active_requires_every_filter() {
        let md = MarketData {
            last: 99.0,
            today_high: 100.0,
            ..MarketData::default()
        };
        let filters: Vec<Box<dyn TradingFilter>> = vec![
            Box::new(NotCloseToDailyHigh::new(0.5)),
            Box::new(NasdaqRegularHours::new(0)),
        ];
        assert!(all_active(&filters, ny(2024, 1, 10, 10, 0), &md));
        assert!(!all_active(&filters, ny(2024, 1, 13, 10, 0), &md));
        assert!(all_active(&[], ny(2024, 1, 13, 10, 0), &md));
    }
}
