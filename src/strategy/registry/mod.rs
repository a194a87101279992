//! Strategy registry: runner factories keyed by strategy type name

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::strategies::{breakout, rsi_reversion, sma_cross, Breakout, RsiReversion, SmaCross};
use super::traits::{StrategyConfig, StrategyRunner};
use crate::error::{Result, TradeflowError};

/// Builds a runner from its configuration
pub type RunnerFactory =
    Arc<dyn Fn(&StrategyConfig) -> Result<Box<dyn StrategyRunner>> + Send + Sync>;

/// Information about an available strategy type
#[derive(Debug, Clone, Serialize, tabled::Tabled)]
pub struct StrategyInfo {
    /// Strategy type name
    pub name: String,
    pub description: String,
    /// Recognised `params` keys with their defaults
    pub params: String,
}

struct RegistryEntry {
    info: StrategyInfo,
    factory: RunnerFactory,
}

#[derive(Default)]
pub struct StrategyRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl StrategyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in runners
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_kind(
            sma_cross::KIND,
            "Moving-average crossover",
            "fast=10 slow=30 stop_pct=0.002 allow_short=false",
            Arc::new(|config: &StrategyConfig| {
                Ok(Box::new(SmaCross::from_config(config)?) as Box<dyn StrategyRunner>)
            }),
        );
        registry.register_kind(
            breakout::KIND,
            "Donchian channel breakout",
            "lookback=20 stop_mult=0.5 allow_short=true",
            Arc::new(|config: &StrategyConfig| {
                Ok(Box::new(Breakout::from_config(config)?) as Box<dyn StrategyRunner>)
            }),
        );
        registry.register_kind(
            rsi_reversion::KIND,
            "RSI mean reversion",
            "period=14 oversold=30 overbought=70 exit_level=50 stop_pct=0.002",
            Arc::new(|config: &StrategyConfig| {
                Ok(Box::new(RsiReversion::from_config(config)?) as Box<dyn StrategyRunner>)
            }),
        );
        registry
    }

    /// Add or replace a strategy type
    pub fn register_kind(
        &mut self,
        name: &str,
        description: &str,
        params: &str,
        factory: RunnerFactory,
    ) {
        self.entries.insert(
            name.to_string(),
            RegistryEntry {
                info: StrategyInfo {
                    name: name.to_string(),
                    description: description.to_string(),
                    params: params.to_string(),
                },
                factory,
            },
        );
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn factory(&self, kind: &str) -> Result<RunnerFactory> {
        self.entries
            .get(kind)
            .map(|e| e.factory.clone())
            .ok_or_else(|| {
                TradeflowError::Strategy(format!(
                    "unknown strategy type '{}'; available: {}",
                    kind,
                    self.entries.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    /// Get list of available strategy types
    pub fn available(&self) -> Vec<StrategyInfo> {
        self.entries.values().map(|e| e.info.clone()).collect()
    }
}
