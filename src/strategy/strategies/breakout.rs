//! Donchian channel breakout
//!
//! Enters in the direction of a close outside the channel of the previous
//! `lookback` bars and exits when price returns through the channel middle.
//!
//! Params: `lookback` (20), `stop_mult` (0.5 of channel width), `allow_short` (true)

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use super::{period_param, Stance};
use crate::domain::{Direction, MarketData, Signal};
use crate::error::{Result, TradeflowError};
use crate::strategy::indicators::Window;
use crate::strategy::traits::{StrategyConfig, StrategyRunner};

pub const KIND: &str = "breakout";

pub struct Breakout {
    name: String,
    symbol: String,
    highs: Window,
    lows: Window,
    stop_mult: Decimal,
    allow_short: bool,
    stance: Stance,
}

impl Breakout {
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        let lookback = period_param(config, "lookback", 20)?;
        let stop_mult: Decimal = config.param_or("stop_mult", Decimal::new(5, 1))?;
        if stop_mult <= Decimal::ZERO {
            return Err(TradeflowError::Validation(format!(
                "strategy {}: stop_mult must be positive",
                config.name
            )));
        }
        Ok(Self {
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            highs: Window::new(lookback),
            lows: Window::new(lookback),
            stop_mult,
            allow_short: config.param_or("allow_short", true)?,
            stance: Stance::Flat,
        })
    }
}

#[async_trait]
impl StrategyRunner for Breakout {
    fn kind(&self) -> &str {
        KIND
    }

    async fn analyze(&mut self, data: &MarketData) -> Result<Option<Signal>> {
        if data.symbol != self.symbol {
            return Ok(None);
        }
        data.bar.validate()?;

        let channel = match (self.highs.is_full(), self.highs.max(), self.lows.min()) {
            (true, Some(upper), Some(lower)) => Some((upper, lower)),
            _ => None,
        };
        self.highs.push(data.bar.high);
        self.lows.push(data.bar.low);
        let Some((upper, lower)) = channel else {
            return Ok(None);
        };

        let close = data.price();
        let mid = (upper + lower) / Decimal::TWO;
        let direction = match self.stance {
            Stance::Flat if close > upper => Some(Direction::Buy),
            Stance::Flat if close < lower && self.allow_short => Some(Direction::Sell),
            Stance::Long if close < mid => Some(Direction::Close),
            Stance::Short if close > mid => Some(Direction::Close),
            _ => None,
        };

        Ok(direction.map(|direction| {
            debug!(strategy = %self.name, %upper, %lower, %close, %direction, "Channel signal");
            let width = upper - lower;
            let mut signal = Signal::new(&self.name, &self.symbol, direction, close);
            if width > Decimal::ZERO {
                signal = signal.with_stop_distance(width * self.stop_mult);
            }
            signal
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

    fn tick(high: Decimal, low: Decimal, close: Decimal) -> MarketData {
        MarketData::from_bar(Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M1,
            open_time: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume: Decimal::ZERO,
        })
    }

    #[tokio::test]
    async fn test_breakout_and_exit() {
        let config = StrategyConfig::new("bo", KIND, "EURUSD", Timeframe::M1).with_param("lookback", 3);
        let mut bo = Breakout::from_config(&config).unwrap();

        for _ in 0..3 {
            assert!(bo.analyze(&tick(dec!(1.10), dec!(1.00), dec!(1.05))).await.unwrap().is_none());
        }
        let entry = bo
            .analyze(&tick(dec!(1.12), dec!(1.09), dec!(1.11)))
            .await
            .unwrap()
            .expect("breakout above the channel");
        assert_eq!(entry.direction, Direction::Buy);
        // channel 1.00..1.10, width 0.10, stop 0.05
        assert_eq!(entry.stop_distance, Some(dec!(0.050)));
        bo.on_signal_result(&entry, true);

        // channel now 1.00..1.12, mid 1.06
        let exit = bo
            .analyze(&tick(dec!(1.07), dec!(1.04), dec!(1.05)))
            .await
            .unwrap()
            .expect("back through the middle");
        assert_eq!(exit.direction, Direction::Close);
    }

    #[tokio::test]
    async fn test_short_disabled() {
        let config = StrategyConfig::new("bo", KIND, "EURUSD", Timeframe::M1)
            .with_param("lookback", 2)
            .with_param("allow_short", false);
        let mut bo = Breakout::from_config(&config).unwrap();
        for _ in 0..2 {
            bo.analyze(&tick(dec!(1.10), dec!(1.00), dec!(1.05))).await.unwrap();
        }
        let signal = bo.analyze(&tick(dec!(0.99), dec!(0.95), dec!(0.96))).await.unwrap();
        assert!(signal.is_none());
    }
}
