//! Position sizing
//!
//! All percentages are fractions (0.02 = 2%). The CLI converts from
//! human percentages at its boundary; config files take fractions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// How to turn a signal into a quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizingMethod {
    /// Constant configured quantity
    Fixed { quantity: Decimal },
    /// quantity = equity * pct / price
    Percent { pct: Decimal },
    /// quantity = equity * risk_pct / stop_distance
    RiskBased { risk_pct: Decimal },
}

impl Default for SizingMethod {
    fn default() -> Self {
        SizingMethod::RiskBased {
            risk_pct: Decimal::new(1, 2),
        }
    }
}

impl SizingMethod {
    pub fn name(&self) -> &'static str {
        match self {
            SizingMethod::Fixed { .. } => "fixed",
            SizingMethod::Percent { .. } => "percent",
            SizingMethod::RiskBased { .. } => "risk_based",
        }
    }

    /// Fractions must be in (0, 1]
    pub fn validate(&self) -> Result<(), SizingError> {
        match self {
            SizingMethod::Fixed { quantity } if *quantity <= Decimal::ZERO => {
                Err(SizingError::InvalidParameter(format!(
                    "fixed quantity must be positive, got {}",
                    quantity
                )))
            }
            SizingMethod::Percent { pct: f } | SizingMethod::RiskBased { risk_pct: f }
                if *f <= Decimal::ZERO || *f > Decimal::ONE =>
            {
                Err(SizingError::InvalidParameter(format!(
                    "{} fraction must be in (0, 1], got {}",
                    self.name(),
                    f
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Venue tradable increment for one instrument
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Quantities are rounded down to a multiple of this
    pub lot_step: Decimal,
    /// Smallest tradable quantity after rounding
    pub min_quantity: Decimal,
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        Self {
            lot_step: Decimal::ONE,
            min_quantity: Decimal::ONE,
        }
    }
}

/// Sizing section of the configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizingConfig {
    #[serde(default)]
    pub method: SizingMethod,
    #[serde(default)]
    pub default_instrument: InstrumentSpec,
    #[serde(default)]
    pub instruments: HashMap<String, InstrumentSpec>,
}

impl SizingConfig {
    pub fn instrument(&self, symbol: &str) -> InstrumentSpec {
        self.instruments
            .get(symbol)
            .copied()
            .unwrap_or(self.default_instrument)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("risk-based sizing requires a positive stop distance")]
    MissingStopDistance,

    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("equity must be positive, got {0}")]
    NonPositiveEquity(Decimal),

    #[error("size {quantity} is below the minimum tradable size {min}")]
    BelowMinimum { quantity: Decimal, min: Decimal },

    #[error("invalid sizing parameter: {0}")]
    InvalidParameter(String),
}

/// Quantity before lot rounding
pub fn raw_size(
    method: &SizingMethod,
    equity: Decimal,
    price: Decimal,
    stop_distance: Option<Decimal>,
) -> Result<Decimal, SizingError> {
    method.validate()?;
    match method {
        SizingMethod::Fixed { quantity } => Ok(*quantity),
        SizingMethod::Percent { pct } => {
            if equity <= Decimal::ZERO {
                return Err(SizingError::NonPositiveEquity(equity));
            }
            if price <= Decimal::ZERO {
                return Err(SizingError::NonPositivePrice(price));
            }
            Ok(equity * pct / price)
        }
        SizingMethod::RiskBased { risk_pct } => {
            if equity <= Decimal::ZERO {
                return Err(SizingError::NonPositiveEquity(equity));
            }
            let distance = match stop_distance {
                Some(d) if d > Decimal::ZERO => d,
                _ => return Err(SizingError::MissingStopDistance),
            };
            Ok(equity * risk_pct / distance)
        }
    }
}

/// Round down to a multiple of `step`
pub fn round_down(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    (quantity / step).floor() * step
}

/// Full sizing: raw size, capped at `max_quantity`, rounded to the lot step,
/// rejected if below the instrument minimum.
pub fn calculate_size(
    method: &SizingMethod,
    equity: Decimal,
    price: Decimal,
    stop_distance: Option<Decimal>,
    instrument: &InstrumentSpec,
    max_quantity: Option<Decimal>,
) -> Result<Decimal, SizingError> {
    let raw = raw_size(method, equity, price, stop_distance)?;
    let capped = match max_quantity {
        Some(max) => raw.min(max),
        None => raw,
    };
    fit_to_instrument(capped, instrument)
}

/// Round and check the minimum
pub fn fit_to_instrument(quantity: Decimal, instrument: &InstrumentSpec) -> Result<Decimal, SizingError> {
    let rounded = round_down(quantity, instrument.lot_step);
    if rounded <= Decimal::ZERO || rounded < instrument.min_quantity {
        return Err(SizingError::BelowMinimum {
            quantity: rounded,
            min: instrument.min_quantity,
        });
    }
    Ok(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fx_lot() -> InstrumentSpec {
        InstrumentSpec {
            lot_step: dec!(1000),
            min_quantity: dec!(1000),
        }
    }

    #[test]
    fn test_risk_based_before_rounding() {
        // 100,000 * 0.02 / 0.0050 = 400,000
        let qty = raw_size(
            &SizingMethod::RiskBased { risk_pct: dec!(0.02) },
            dec!(100000),
            dec!(1.1000),
            Some(dec!(0.0050)),
        )
        .unwrap();
        assert_eq!(qty, dec!(400000));
    }

    #[test]
    fn test_risk_based_requires_stop_distance() {
        let method = SizingMethod::RiskBased { risk_pct: dec!(0.02) };
        assert_eq!(
            raw_size(&method, dec!(100000), dec!(1.1), None),
            Err(SizingError::MissingStopDistance)
        );
        assert_eq!(
            raw_size(&method, dec!(100000), dec!(1.1), Some(Decimal::ZERO)),
            Err(SizingError::MissingStopDistance)
        );
    }

    #[test]
    fn test_percent_sizing_rounds_down() {
        // 10,000 * 0.10 / 1.1 = 909.09.. -> 900 with a step of 100
        let spec = InstrumentSpec {
            lot_step: dec!(100),
            min_quantity: dec!(100),
        };
        let qty = calculate_size(
            &SizingMethod::Percent { pct: dec!(0.10) },
            dec!(10000),
            dec!(1.1),
            None,
            &spec,
            None,
        )
        .unwrap();
        assert_eq!(qty, dec!(900));
    }

    #[test]
    fn test_below_minimum_rejected() {
        let result = calculate_size(
            &SizingMethod::Fixed { quantity: dec!(999) },
            dec!(100000),
            dec!(1.1),
            None,
            &fx_lot(),
            None,
        );
        assert!(matches!(result, Err(SizingError::BelowMinimum { .. })));
    }

    #[test]
    fn test_cap_applies_before_rounding() {
        let qty = calculate_size(
            &SizingMethod::RiskBased { risk_pct: dec!(0.02) },
            dec!(100000),
            dec!(1.1),
            Some(dec!(0.005)),
            &fx_lot(),
            Some(dec!(250500)),
        )
        .unwrap();
        assert_eq!(qty, dec!(250000));
    }

    #[test]
    fn test_fraction_validation() {
        assert!(SizingMethod::Percent { pct: dec!(2) }.validate().is_err());
        assert!(SizingMethod::RiskBased { risk_pct: dec!(0) }.validate().is_err());
        assert!(SizingMethod::Fixed { quantity: dec!(-1) }.validate().is_err());
        assert!(SizingMethod::Percent { pct: dec!(0.5) }.validate().is_ok());
    }
}
