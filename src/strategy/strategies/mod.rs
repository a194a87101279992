//! Built-in strategy runners
//!
//! - SmaCross: moving-average crossover
//! - Breakout: Donchian channel breakout
//! - RsiReversion: RSI mean reversion

pub mod breakout;
pub mod rsi_reversion;
pub mod sma_cross;

pub use breakout::Breakout;
pub use rsi_reversion::RsiReversion;
pub use sma_cross::SmaCross;

use rust_decimal::Decimal;

use crate::domain::{Direction, Signal};
use crate::error::{Result, TradeflowError};
use crate::strategy::traits::StrategyConfig;

/// What the runner believes it holds, updated only from accepted signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stance {
    #[default]
    Flat,
    Long,
    Short,
}

impl Stance {
    pub fn after(self, signal: &Signal) -> Self {
        match signal.direction {
            Direction::Buy => Stance::Long,
            Direction::Sell => Stance::Short,
            Direction::Close => Stance::Flat,
        }
    }
}

/// A fraction parameter in (0, 1)
pub(crate) fn fraction_param(config: &StrategyConfig, key: &str, default: Decimal) -> Result<Decimal> {
    let value = config.param_or(key, default)?;
    if value <= Decimal::ZERO || value >= Decimal::ONE {
        return Err(TradeflowError::Validation(format!(
            "strategy {}: {} must be a fraction in (0, 1), got {}",
            config.name, key, value
        )));
    }
    Ok(value)
}

/// A positive integer parameter
pub(crate) fn period_param(config: &StrategyConfig, key: &str, default: usize) -> Result<usize> {
    let value = config.param_or(key, default)?;
    if value == 0 {
        return Err(TradeflowError::Validation(format!(
            "strategy {}: {} must be at least 1",
            config.name, key
        )));
    }
    Ok(value)
}
