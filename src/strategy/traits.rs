//! Core strategy traits and types
//!
//! Defines the contract every strategy runner implements, the immutable
//! per-strategy configuration, and the seam through which the manager hands
//! signals to order routing.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::domain::{MarketData, Order, Signal, Timeframe};
use crate::error::{Result, TradeflowError};
use crate::risk::{RejectReason, SizingMethod};

// ============================================================================
// Strategy Runner
// ============================================================================

/// Per-strategy execution context, driven once per market-data update
#[async_trait]
pub trait StrategyRunner: Send {
    /// Registry type name of this runner
    fn kind(&self) -> &str;

    /// At most one signal per update.
    ///
    /// A `TradeflowError::Data` skips the tick without counting as a failure.
    async fn analyze(&mut self, data: &MarketData) -> Result<Option<Signal>>;

    /// Told whether the last emitted signal became an order
    fn on_signal_result(&mut self, _signal: &Signal, _accepted: bool) {}

    /// Realized P&L of a trade this strategy closed
    fn on_trade_closed(&mut self, _pnl: Decimal) {}
}

// ============================================================================
// Signal routing seam
// ============================================================================

/// What happened to a routed signal
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    /// Admitted by risk and accepted by the venue
    Submitted { order: Order },
    /// Turned away by the risk manager; no order exists
    RiskRejected(RejectReason),
    /// Admitted but refused by the venue (never retried)
    VenueRejected { order_id: String, reason: String },
    /// Admitted but the venue could not be reached; the order stays PENDING
    Failed { order_id: String, error: String },
}

impl SignalOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, SignalOutcome::Submitted { .. })
    }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            SignalOutcome::Submitted { order } => Some(&order.id),
            SignalOutcome::VenueRejected { order_id, .. } | SignalOutcome::Failed { order_id, .. } => {
                Some(order_id)
            }
            SignalOutcome::RiskRejected(_) => None,
        }
    }
}

/// Where the strategy manager sends signals
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn route(&self, signal: Signal, sizing: Option<SizingMethod>) -> SignalOutcome;

    /// Best-effort cancel of a strategy's open orders; returns how many
    /// cancel requests the venue accepted
    async fn cancel_strategy_orders(&self, strategy: &str) -> usize;
}

// ============================================================================
// Strategy Configuration
// ============================================================================

fn default_true() -> bool {
    true
}

/// Strategy configuration. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Unique strategy name
    pub name: String,
    /// Registry type (e.g. "sma_cross")
    #[serde(rename = "type")]
    pub kind: String,
    pub symbol: String,
    #[serde(default)]
    pub timeframe: Timeframe,
    /// Strategy-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Overrides the account sizing method for this strategy
    #[serde(default)]
    pub sizing: Option<SizingMethod>,
    /// Start right after registration
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

/// TOML shape accepted by `from_toml`; parameter values may be any scalar
#[derive(Deserialize)]
struct StrategyFile {
    strategy: RawStrategy,
}

#[derive(Deserialize)]
struct RawStrategy {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    symbol: String,
    #[serde(default)]
    timeframe: Timeframe,
    #[serde(default)]
    params: HashMap<String, toml::Value>,
    #[serde(default)]
    sizing: Option<SizingMethod>,
    #[serde(default = "default_true")]
    auto_start: bool,
}

impl StrategyConfig {
    pub fn new(name: &str, kind: &str, symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            symbol: symbol.to_string(),
            timeframe,
            params: HashMap::new(),
            sizing: None,
            auto_start: true,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_sizing(mut self, sizing: SizingMethod) -> Self {
        self.sizing = Some(sizing);
        self
    }

    /// Parse a `[strategy]` TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: StrategyFile = toml::from_str(content)?;
        let raw = file.strategy;
        let params = raw
            .params
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect();
        let config = Self {
            name: raw.name,
            kind: raw.kind,
            symbol: raw.symbol,
            timeframe: raw.timeframe,
            params,
            sizing: raw.sizing,
            auto_start: raw.auto_start,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TradeflowError::Validation("strategy name is empty".to_string()));
        }
        if self.kind.trim().is_empty() {
            return Err(TradeflowError::Validation(format!(
                "strategy {} has no type",
                self.name
            )));
        }
        if self.symbol.trim().is_empty() {
            return Err(TradeflowError::Validation(format!(
                "strategy {} has no symbol",
                self.name
            )));
        }
        if let Some(sizing) = &self.sizing {
            sizing.validate().map_err(|e| {
                TradeflowError::Validation(format!("strategy {}: {}", self.name, e))
            })?;
        }
        Ok(())
    }

    /// Typed parameter lookup; `Ok(None)` when absent
    pub fn param<T: FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match self.params.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                TradeflowError::Validation(format!(
                    "strategy {}: invalid param {}='{}': {}",
                    self.name, key, raw, e
                ))
            }),
        }
    }

    pub fn param_or<T: FromStr>(&self, key: &str, default: T) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        Ok(self.param(key)?.unwrap_or(default))
    }
}
