//! RSI mean reversion
//!
//! Params: `period` (14), `oversold` (30), `overbought` (70), `exit_level` (50),
//! `stop_pct` (0.002)

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{fraction_param, period_param, Stance};
use crate::domain::{Direction, MarketData, Signal};
use crate::error::{Result, TradeflowError};
use crate::strategy::indicators::Rsi;
use crate::strategy::traits::{StrategyConfig, StrategyRunner};

pub const KIND: &str = "rsi_reversion";

pub struct RsiReversion {
    name: String,
    symbol: String,
    rsi: Rsi,
    oversold: Decimal,
    overbought: Decimal,
    exit_level: Decimal,
    stop_pct: Decimal,
    stance: Stance,
}

impl RsiReversion {
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        let oversold: Decimal = config.param_or("oversold", Decimal::from(30))?;
        let overbought: Decimal = config.param_or("overbought", Decimal::from(70))?;
        let exit_level: Decimal = config.param_or("exit_level", Decimal::from(50))?;
        let ordered = Decimal::ZERO < oversold
            && oversold < exit_level
            && exit_level < overbought
            && overbought < Decimal::ONE_HUNDRED;
        if !ordered {
            return Err(TradeflowError::Validation(format!(
                "strategy {}: need 0 < oversold < exit_level < overbought < 100",
                config.name
            )));
        }
        Ok(Self {
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            rsi: Rsi::new(period_param(config, "period", 14)?),
            oversold,
            overbought,
            exit_level,
            stop_pct: fraction_param(config, "stop_pct", Decimal::new(2, 3))?,
            stance: Stance::Flat,
        })
    }
}

#[async_trait]
impl StrategyRunner for RsiReversion {
    fn kind(&self) -> &str {
        KIND
    }

    async fn analyze(&mut self, data: &MarketData) -> Result<Option<Signal>> {
        if data.symbol != self.symbol {
            return Ok(None);
        }
        data.bar.validate()?;

        let price = data.price();
        let Some(rsi) = self.rsi.update(price) else {
            return Ok(None);
        };

        let direction = match self.stance {
            Stance::Flat if rsi <= self.oversold => Some(Direction::Buy),
            Stance::Flat if rsi >= self.overbought => Some(Direction::Sell),
            Stance::Long if rsi >= self.exit_level => Some(Direction::Close),
            Stance::Short if rsi <= self.exit_level => Some(Direction::Close),
            _ => None,
        };

        Ok(direction.map(|direction| {
            // deeper extremes mean higher conviction
            let confidence = match direction {
                Direction::Buy => (self.oversold - rsi) / self.oversold + Decimal::new(5, 1),
                Direction::Sell => {
                    (rsi - self.overbought) / (Decimal::ONE_HUNDRED - self.overbought)
                        + Decimal::new(5, 1)
                }
                Direction::Close => Decimal::ONE,
            };
            Signal::new(&self.name, &self.symbol, direction, price)
                .with_confidence(confidence)
                .with_stop_distance(price * self.stop_pct)
        }))
    }

    fn on_signal_result(&mut self, signal: &Signal, accepted: bool) {
        if accepted {
            self.stance = self.stance.after(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, Timeframe};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn tick(close: Decimal) -> MarketData {
        MarketData::from_bar(Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M1,
            open_time: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
        })
    }

    #[tokio::test]
    async fn test_oversold_entry_and_exit() {
        let config = StrategyConfig::new("rsi", KIND, "EURUSD", Timeframe::M1).with_param("period", 3);
        let mut runner = RsiReversion::from_config(&config).unwrap();

        let mut signals = Vec::new();
        for close in [dec!(1.10), dec!(1.09), dec!(1.08), dec!(1.07), dec!(1.08), dec!(1.10)] {
            if let Some(signal) = runner.analyze(&tick(close)).await.unwrap() {
                runner.on_signal_result(&signal, true);
                signals.push(signal);
            }
        }
        let directions: Vec<Direction> = signals.iter().map(|s| s.direction).collect();
        assert_eq!(directions, vec![Direction::Buy, Direction::Close]);
        assert_eq!(signals[0].stop_distance, Some(dec!(1.07) * dec!(0.002)));
    }

    #[test]
    fn test_level_ordering_enforced() {
        let config = StrategyConfig::new("rsi", KIND, "EURUSD", Timeframe::M1)
            .with_param("oversold", 60)
            .with_param("overbought", 40);
        assert!(RsiReversion::from_config(&config).is_err());
    }
}
