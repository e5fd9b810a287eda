//! Price variance correction.
//!
//! Every price that leaves the gateway is rounded to the instrument's minimum
//! tick. Rounding is done in integer micros (1 unit = 1_000_000 micros) so a
//! price like `10.015000000001` cannot survive as a sub-tick value through
//! f64 drift.
//!
//! | Direction           | Function             |
//! |---------------------|----------------------|
//! | f64 → micros        | [`price_to_micros`]  |
//! | micros → f64        | [`micros_to_price`]  |
//! | f64 → tick-aligned  | [`fix_price_variance`] |

/// Scale factor: 1 price unit = 1_000_000 micros (6 decimal places).
pub const MICROS_PER_UNIT: i64 = 1_000_000;

/// Tick used when the instrument's minimum tick is unknown.
pub const DEFAULT_MIN_TICK: f64 = 0.01;

// ---------------------------------------------------------------------------
// PricingError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// Input was `NaN` or infinite.
    NotFinite,
    /// Input would overflow `i64` after scaling by [`MICROS_PER_UNIT`].
    OutOfRange,
    /// The minimum tick is zero, negative, or finer than one micro.
    InvalidTick,
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::NotFinite => write!(f, "price: non-finite input (NaN or Inf)"),
            PricingError::OutOfRange => {
                write!(f, "price: out of i64 range after scaling to micros")
            }
            PricingError::InvalidTick => write!(f, "price: minimum tick must be >= 1 micro"),
        }
    }
}

impl std::error::Error for PricingError {}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

pub fn micros_to_price(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_UNIT as f64
}

/// Rounds to the nearest micro.
pub fn price_to_micros(price: f64) -> Result<i64, PricingError> {
    if !price.is_finite() {
        return Err(PricingError::NotFinite);
    }
    let scaled = (price * MICROS_PER_UNIT as f64).round();
    if scaled >= i64::MAX as f64 || scaled < i64::MIN as f64 {
        return Err(PricingError::OutOfRange);
    }
    Ok(scaled as i64)
}

/// Round `price` to the nearest multiple of `min_tick`, halves away from
/// zero.
pub fn fix_price_variance(price: f64, min_tick: f64) -> Result<f64, PricingError> {
    let tick = price_to_micros(min_tick)?;
    if tick <= 0 {
        return Err(PricingError::InvalidTick);
    }
    let micros = price_to_micros(price)?;

    let magnitude = micros.unsigned_abs() as i128;
    let tick = tick as i128;
    let rem = magnitude % tick;
    let mut aligned = magnitude - rem;
    if rem * 2 >= tick {
        aligned += tick;
    }
    let aligned = if micros < 0 { -aligned } else { aligned };

    let aligned = i64::try_from(aligned).map_err(|_| PricingError::OutOfRange)?;
    Ok(micros_to_price(aligned))
}
