//! Moving-average crossover
//!
//! Buys when the fast SMA crosses above the slow SMA and closes the long on
//! the opposite cross. With `allow_short = true` the mirror trade is taken.
//!
//! Params: `fast` (10), `slow` (30), `stop_pct` (0.002), `allow_short` (false)

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use super::{fraction_param, period_param, Stance};
use crate::domain::{Direction, MarketData, Signal};
use crate::error::{Result, TradeflowError};
use crate::strategy::indicators::Window;
use crate::strategy::traits::{StrategyConfig, StrategyRunner};

pub const KIND: &str = "sma_cross";

pub struct SmaCross {
    name: String,
    symbol: String,
    fast: Window,
    slow: Window,
    stop_pct: Decimal,
    allow_short: bool,
    prev_diff: Option<Decimal>,
    stance: Stance,
}

impl SmaCross {
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        let fast = period_param(config, "fast", 10)?;
        let slow = period_param(config, "slow", 30)?;
        if fast >= slow {
            return Err(TradeflowError::Validation(format!(
                "strategy {}: fast ({}) must be shorter than slow ({})",
                config.name, fast, slow
            )));
        }
        Ok(Self {
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            fast: Window::new(fast),
            slow: Window::new(slow),
            stop_pct: fraction_param(config, "stop_pct", Decimal::new(2, 3))?,
            allow_short: config.param_or("allow_short", false)?,
            prev_diff: None,
            stance: Stance::Flat,
        })
    }

    fn signal(&self, direction: Direction, price: Decimal, diff: Decimal) -> Signal {
        let stop_distance = price * self.stop_pct;
        let confidence = if stop_distance.is_zero() {
            Decimal::ONE
        } else {
            diff.abs() / stop_distance
        };
        Signal::new(&self.name, &self.symbol, direction, price)
            .with_confidence(confidence)
            .with_stop_distance(stop_distance)
    }
}

#[async_trait]
impl StrategyRunner for SmaCross {
    fn kind(&self) -> &str {
        KIND
    }

    async fn analyze(&mut self, data: &MarketData) -> Result<Option<Signal>> {
        if data.symbol != self.symbol {
            return Ok(None);
        }
        data.bar.validate()?;

        let price = data.price();
        self.fast.push(price);
        self.slow.push(price);
        let (Some(fast), Some(slow)) = (self.fast.mean(), self.slow.mean()) else {
            return Ok(None);
        };

        let diff = fast - slow;
        let Some(prev) = self.prev_diff.replace(diff) else {
            return Ok(None);
        };
        let crossed_up = prev <= Decimal::ZERO && diff > Decimal::ZERO;
        let crossed_down = prev >= Decimal::ZERO && diff < Decimal::ZERO;

        let direction = match (crossed_up, crossed_down, self.stance) {
            (true, _, Stance::Flat) => Some(Direction::Buy),
            (true, _, Stance::Short) => Some(Direction::Close),
            (_, true, Stance::Long) => Some(Direction::Close),
            (_, true, Stance::Flat) if self.allow_short => Some(Direction::Sell),
            _ => None,
        };

        if let Some(direction) = direction {
            debug!(strategy = %self.name, %fast, %slow, %direction, "SMA cross");
        }
        Ok(direction.map(|d| self.signal(d, price, diff)))
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

    fn runner() -> SmaCross {
        let config = StrategyConfig::new("sma", KIND, "EURUSD", Timeframe::M1)
            .with_param("fast", 2)
            .with_param("slow", 4);
        SmaCross::from_config(&config).unwrap()
    }

    async fn feed(runner: &mut SmaCross, closes: &[Decimal]) -> Vec<Signal> {
        let mut signals = Vec::new();
        for close in closes {
            if let Some(signal) = runner.analyze(&tick(*close)).await.unwrap() {
                runner.on_signal_result(&signal, true);
                signals.push(signal);
            }
        }
        signals
    }

    #[tokio::test]
    async fn test_golden_cross_then_exit() {
        let mut sma = runner();
        let closes = [
            dec!(1.10), dec!(1.09), dec!(1.08), dec!(1.07), dec!(1.06),
            dec!(1.09), dec!(1.12), dec!(1.13),
            dec!(1.08), dec!(1.04), dec!(1.02),
        ];
        let signals = feed(&mut sma, &closes).await;
        let directions: Vec<Direction> = signals.iter().map(|s| s.direction).collect();
        assert_eq!(directions, vec![Direction::Buy, Direction::Close]);
        assert!(signals[0].stop_distance.is_some());
        assert_eq!(signals[0].strategy, "sma");
    }

    #[tokio::test]
    async fn test_rejected_signal_keeps_stance() {
        let mut sma = runner();
        for close in [dec!(1.10), dec!(1.09), dec!(1.08), dec!(1.07), dec!(1.06), dec!(1.12)] {
            if let Some(signal) = sma.analyze(&tick(close)).await.unwrap() {
                sma.on_signal_result(&signal, false);
            }
        }
        assert_eq!(sma.stance, Stance::Flat);
    }

    #[tokio::test]
    async fn test_other_symbol_and_bad_bar() {
        let mut sma = runner();
        let mut other = tick(dec!(1.1));
        other.symbol = "GBPUSD".into();
        assert!(sma.analyze(&other).await.unwrap().is_none());

        let mut bad = tick(dec!(1.1));
        bad.bar.low = dec!(-1);
        assert!(matches!(
            sma.analyze(&bad).await,
            Err(TradeflowError::Data(_))
        ));
    }

    #[test]
    fn test_invalid_periods() {
        let config = StrategyConfig::new("sma", KIND, "EURUSD", Timeframe::M1)
            .with_param("fast", 30)
            .with_param("slow", 10);
        assert!(SmaCross::from_config(&config).is_err());
    }
}
