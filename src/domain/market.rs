use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Result, TradeflowError};

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::M1
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = TradeflowError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1m" | "m1" => Ok(Timeframe::M1),
            "5m" | "m5" => Ok(Timeframe::M5),
            "15m" | "m15" => Ok(Timeframe::M15),
            "30m" | "m30" => Ok(Timeframe::M30),
            "1h" | "h1" => Ok(Timeframe::H1),
            "4h" | "h4" => Ok(Timeframe::H4),
            "1d" | "d1" => Ok(Timeframe::D1),
            other => Err(TradeflowError::Validation(format!(
                "invalid timeframe '{}'; expected 1m|5m|15m|30m|1h|4h|1d",
                other
            ))),
        }
    }
}

/// OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

impl Bar {
    pub fn close_time(&self) -> DateTime<Utc> {
        self.open_time + self.timeframe.duration()
    }

    /// Reject malformed bars before they reach a strategy
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(TradeflowError::Data("bar without symbol".to_string()));
        }
        if self.low <= Decimal::ZERO {
            return Err(TradeflowError::Data(format!(
                "{} bar at {} has non-positive price",
                self.symbol, self.open_time
            )));
        }
        if self.high < self.low
            || self.open > self.high
            || self.open < self.low
            || self.close > self.high
            || self.close < self.low
        {
            return Err(TradeflowError::Data(format!(
                "{} bar at {} is inconsistent (o={} h={} l={} c={})",
                self.symbol, self.open_time, self.open, self.high, self.low, self.close
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(TradeflowError::Data(format!(
                "{} bar at {} has negative volume",
                self.symbol, self.open_time
            )));
        }
        Ok(())
    }
}

/// Inclusive time range for historical queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The last `count` bars of `timeframe` ending at `end`
    pub fn last_bars(end: DateTime<Utc>, timeframe: Timeframe, count: i32) -> Self {
        Self {
            start: end - timeframe.duration() * count,
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Market data update handed to strategies once per tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar: Bar,
    pub received_at: DateTime<Utc>,
}

impl MarketData {
    pub fn from_bar(bar: Bar) -> Self {
        Self {
            symbol: bar.symbol.clone(),
            timeframe: bar.timeframe,
            bar,
            received_at: Utc::now(),
        }
    }

    pub fn price(&self) -> Decimal {
        self.bar.close
    }
}
