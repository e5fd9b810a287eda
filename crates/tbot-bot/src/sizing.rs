//! Position sizing.

use tracing::info;

pub trait PositionSizeStrategy: Send + Sync {
    /// Lots to buy at `open_price` when the stop sits `risk_per_share` away.
    fn position_size(&self, open_price: f64, risk_per_share: f64) -> i64;
}

/// Caps the position both by dollar value and by dollars at risk; never
/// sizes below one lot.
#[derive(Clone, Debug, PartialEq)]
pub struct DollarValueWithRisk {
    pub max_dollar_amount: f64,
    pub max_risk_dollar_amount: f64,
}

impl DollarValueWithRisk {
    pub fn new(max_dollar_amount: f64, max_risk_dollar_amount: f64) -> Self {
        Self {
            max_dollar_amount,
            max_risk_dollar_amount,
        }
    }
}

impl PositionSizeStrategy for DollarValueWithRisk {
    fn position_size(&self, open_price: f64, risk_per_share: f64) -> i64 {
        // `as` saturates: a zero divisor yields i64::MAX and leaves the other
        // cap in charge; NaN yields 0 and falls through to the one-lot floor.
        let max_position_size = (self.max_dollar_amount / open_price) as i64;
        let max_risk_shares = (self.max_risk_dollar_amount / risk_per_share) as i64;
        let position_size = max_position_size.min(max_risk_shares).max(1);

        info!(
            max_position_size,
            max_risk_shares,
            position_size,
            open_price,
            max_risk_dollar_amount = self.max_risk_dollar_amount,
            "position size"
        );
        position_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smaller_cap_wins() {
        let s = DollarValueWithRisk::new(10_000.0, 100.0);
        // Dollar cap: 100 lots. Risk cap: 100 / 0.5 = 200 lots.
        assert_eq!(s.position_size(100.0, 0.5), 100);
        // Risk cap: 100 / 2.0 = 50 lots.
        assert_eq!(s.position_size(100.0, 2.0), 50);
    }

    #[test]
    fn fractional_caps_truncate() {
        let s = DollarValueWithRisk::new(1_000.0, 1_000.0);
        assert_eq!(s.position_size(300.0, 1.0), 3);
    }

    #[test]
    fn never_below_one_lot() {
        let s = DollarValueWithRisk::new(50.0, 10.0);
        assert_eq!(s.position_size(400.0, 1.0), 1);
        assert_eq!(s.position_size(f64::NAN, 1.0), 1);
    }

    #[test]
    fn zero_risk_leaves_dollar_cap_in_charge() {
        let s = DollarValueWithRisk::new(1_000.0, 100.0);
        assert_eq!(s.position_size(10.0, 0.0), 100);
    }
}
