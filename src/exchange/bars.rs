//! Historical bar sources for the paper venue and the run-loop feed

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::domain::{Bar, TimeRange, Timeframe};
use crate::error::{Result, TradeflowError};

/// Upper bound on bars returned by one query
pub const MAX_BARS_PER_QUERY: usize = 100_000;

pub trait BarSource: Send + Sync {
    /// Bars whose open time falls inside `range`, ascending
    fn bars(&self, symbol: &str, timeframe: Timeframe, range: &TimeRange) -> Result<Vec<Bar>>;

    fn symbols(&self) -> Vec<String>;

    /// Reference price before any bar has been seen
    fn initial_price(&self, symbol: &str) -> Option<Decimal>;
}

/// Seeded random walk. The same request always yields the same bars.
pub struct SyntheticBars {
    seed: u64,
    start_prices: HashMap<String, Decimal>,
    /// Standard move per bar as a fraction of price
    volatility: f64,
    decimals: u32,
}

impl SyntheticBars {
    pub fn new(seed: u64, start_prices: HashMap<String, Decimal>) -> Self {
        Self {
            seed,
            start_prices,
            volatility: 0.0005,
            decimals: 5,
        }
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility.abs();
        self
    }

    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    fn rng_for(&self, symbol: &str, timeframe: Timeframe, start: i64) -> StdRng {
        // FNV-1a over the request key
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in symbol
            .bytes()
            .chain(timeframe.as_str().bytes())
            .chain(start.to_le_bytes())
        {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        StdRng::seed_from_u64(self.seed ^ hash)
    }

    fn scale(&self, value: f64) -> Result<Decimal> {
        Decimal::from_f64(value)
            .map(|d| d.round_dp(self.decimals))
            .ok_or_else(|| TradeflowError::Data(format!("synthetic price {} out of range", value)))
    }
}

impl BarSource for SyntheticBars {
    fn bars(&self, symbol: &str, timeframe: Timeframe, range: &TimeRange) -> Result<Vec<Bar>> {
        let start_price = self
            .start_prices
            .get(symbol)
            .ok_or_else(|| TradeflowError::Data(format!("no synthetic data for {}", symbol)))?;
        let mut price = start_price
            .to_f64()
            .ok_or_else(|| TradeflowError::Data(format!("bad start price for {}", symbol)))?;

        let step = timeframe.duration().num_seconds();
        let first = range.start.timestamp().div_euclid(step) * step
            + if range.start.timestamp().rem_euclid(step) == 0 { 0 } else { step };
        let last = range.end.timestamp();
        if last < first {
            return Ok(Vec::new());
        }
        let count = ((last - first) / step + 1) as usize;
        if count > MAX_BARS_PER_QUERY {
            return Err(TradeflowError::Data(format!(
                "range covers {} bars (max {})",
                count, MAX_BARS_PER_QUERY
            )));
        }

        let mut rng = self.rng_for(symbol, timeframe, first);
        let mut bars = Vec::with_capacity(count);
        for i in 0..count as i64 {
            let open_time = DateTime::<Utc>::from_timestamp(first + i * step, 0)
                .ok_or_else(|| TradeflowError::Data("timestamp out of range".to_string()))?;
            let open = price;
            let close = (open * (1.0 + self.volatility * rng.gen_range(-1.0..1.0))).max(f64::EPSILON);
            let wick = self.volatility * rng.gen_range(0.0..0.5);
            let high = open.max(close) * (1.0 + wick);
            let low = (open.min(close) * (1.0 - wick)).max(f64::EPSILON);
            price = close;

            let mut bar = Bar {
                symbol: symbol.to_string(),
                timeframe,
                open_time,
                open: self.scale(open)?,
                high: self.scale(high)?,
                low: self.scale(low)?,
                close: self.scale(close)?,
                volume: Decimal::from(rng.gen_range(100u32..10_000u32)),
            };
            // rounding may push open/close outside the wicks
            bar.high = bar.high.max(bar.open).max(bar.close);
            bar.low = bar.low.min(bar.open).min(bar.close);
            bars.push(bar);
        }

        debug!(symbol, timeframe = %timeframe, count = bars.len(), "Synthetic bars generated");
        Ok(bars)
    }

    fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.start_prices.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn initial_price(&self, symbol: &str) -> Option<Decimal> {
        self.start_prices.get(symbol).copied()
    }
}

/// Bars loaded from a JSON array file
pub struct FileBars {
    series: HashMap<(String, Timeframe), Vec<Bar>>,
}

impl FileBars {
    pub fn from_bars(bars: Vec<Bar>) -> Result<Self> {
        let mut series: HashMap<(String, Timeframe), Vec<Bar>> = HashMap::new();
        for bar in bars {
            bar.validate()?;
            series
                .entry((bar.symbol.clone(), bar.timeframe))
                .or_default()
                .push(bar);
        }
        for bars in series.values_mut() {
            bars.sort_by_key(|b| b.open_time);
            bars.dedup_by_key(|b| b.open_time);
        }
        Ok(Self { series })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let bars: Vec<Bar> = serde_json::from_str(&raw)?;
        let source = Self::from_bars(bars)?;
        info!(
            path = %path.display(),
            series = source.series.len(),
            "Loaded bar file"
        );
        Ok(source)
    }
}

impl BarSource for FileBars {
    fn bars(&self, symbol: &str, timeframe: Timeframe, range: &TimeRange) -> Result<Vec<Bar>> {
        let series = self
            .series
            .get(&(symbol.to_string(), timeframe))
            .ok_or_else(|| {
                TradeflowError::Data(format!("no {} bars for {} in file", timeframe, symbol))
            })?;
        Ok(series
            .iter()
            .filter(|b| range.contains(b.open_time))
            .take(MAX_BARS_PER_QUERY)
            .cloned()
            .collect())
    }

    fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.keys().map(|(s, _)| s.clone()).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    fn initial_price(&self, symbol: &str) -> Option<Decimal> {
        self.series
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .filter_map(|(_, bars)| bars.first())
            .min_by_key(|b| b.open_time)
            .map(|b| b.open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn synthetic() -> SyntheticBars {
        let mut prices = HashMap::new();
        prices.insert("EURUSD".to_string(), dec!(1.1000));
        SyntheticBars::new(42, prices)
    }

    fn range(minutes: i64) -> TimeRange {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        TimeRange::new(start, start + chrono::Duration::minutes(minutes))
    }

    #[test]
    fn test_synthetic_is_deterministic_and_valid() {
        let source = synthetic();
        let a = source.bars("EURUSD", Timeframe::M1, &range(59)).unwrap();
        let b = source.bars("EURUSD", Timeframe::M1, &range(59)).unwrap();
        assert_eq!(a.len(), 60);
        assert_eq!(a, b);
        for window in a.windows(2) {
            assert!(window[0].open_time < window[1].open_time);
            assert_eq!(window[0].close, window[1].open);
        }
        for bar in &a {
            assert!(bar.validate().is_ok());
        }
    }

    #[test]
    fn test_synthetic_unknown_symbol() {
        let err = synthetic()
            .bars("USDJPY", Timeframe::M1, &range(5))
            .unwrap_err();
        assert!(matches!(err, TradeflowError::Data(_)));
    }

    #[test]
    fn test_file_bars_filter_and_sort() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        let make = |minute: i64, close: Decimal| Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M1,
            open_time: t0 + chrono::Duration::minutes(minute),
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
        };
        let source = FileBars::from_bars(vec![
            make(2, dec!(1.3)),
            make(0, dec!(1.1)),
            make(1, dec!(1.2)),
            make(10, dec!(1.4)),
        ])
        .unwrap();

        let bars = source.bars("EURUSD", Timeframe::M1, &range(5)).unwrap();
        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![dec!(1.1), dec!(1.2), dec!(1.3)]);
        assert_eq!(source.initial_price("EURUSD"), Some(dec!(1.1)));
        assert_eq!(source.symbols(), vec!["EURUSD".to_string()]);
    }

    #[test]
    fn test_file_bars_reject_bad_bar() {
        let bar = Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M1,
            open_time: Utc::now(),
            open: dec!(2),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: Decimal::ZERO,
        };
        assert!(FileBars::from_bars(vec![bar]).is_err());
    }
}
