use chrono::{DateTime, Utc};
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::domain::Timeframe;
use crate::exchange::{ExchangeKind, PaperConfig, RetryPolicy};
use crate::risk::{DailyResetSchedule, RiskLimits, SizingConfig};
use crate::strategy::StrategyConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on one strategy `analyze` call
    pub analyze_timeout_ms: u64,
    /// Consecutive runner failures before auto-pause
    pub max_consecutive_failures: u32,
    /// Trading-day boundary, UTC "HH:MM"
    pub daily_reset_time: String,
    /// Account snapshot refresh (and reconnect attempt) interval
    pub account_refresh_secs: u64,
    /// How often the loop checks the trading-day boundary
    pub day_check_secs: u64,
    /// Observability channel capacity
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analyze_timeout_ms: 500,
            max_consecutive_failures: 3,
            daily_reset_time: "00:00".to_string(),
            account_refresh_secs: 30,
            day_check_secs: 60,
            event_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub kind: ExchangeKind,
    pub retry: RetryPolicy,
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    #[default]
    Synthetic,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub source: FeedSource,
    /// Random-walk seed (synthetic)
    pub seed: u64,
    /// Per-bar move as a fraction of price (synthetic)
    pub volatility: f64,
    /// Starting price per symbol (synthetic)
    pub start_prices: HashMap<String, Decimal>,
    /// JSON bar file (file source)
    pub path: Option<String>,
    /// Bars per subscription replayed by `run`
    pub bars: i32,
    /// Last bar of the replay; defaults to now
    pub end: Option<DateTime<Utc>>,
    pub replay_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: FeedSource::Synthetic,
            seed: 42,
            volatility: 0.0005,
            start_prices: HashMap::new(),
            path: None,
            bars: 500,
            end: None,
            replay_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Daily rolling log files go here when set and writable
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRADEFLOW_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRADEFLOW__RISK__MAX_DAILY_LOSS, etc.)
            .add_source(
                Environment::with_prefix("TRADEFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        config.normalize_symbols();
        Ok(config)
    }

    /// Symbols are upper case everywhere; map keys may arrive lowercased
    /// from the config layer.
    pub fn normalize_symbols(&mut self) {
        fn upper_keys<V>(map: &mut HashMap<String, V>) {
            *map = std::mem::take(map)
                .into_iter()
                .map(|(k, v)| (k.to_uppercase(), v))
                .collect();
        }
        upper_keys(&mut self.feed.start_prices);
        upper_keys(&mut self.risk.symbol_max_position);
        upper_keys(&mut self.sizing.instruments);
        for symbol in &mut self.gateway.paper.symbols {
            *symbol = symbol.to_uppercase();
        }
        for strategy in &mut self.strategies {
            strategy.symbol = strategy.symbol.to_uppercase();
        }
    }

    /// Built-in configuration: two FX symbols on the synthetic feed and one
    /// crossover strategy
    pub fn default_config() -> Self {
        use rust_decimal_macros::dec;

        let mut start_prices = HashMap::new();
        start_prices.insert("EURUSD".to_string(), dec!(1.1000));
        start_prices.insert("GBPUSD".to_string(), dec!(1.2700));

        Self {
            engine: EngineConfig::default(),
            risk: RiskLimits::default(),
            sizing: SizingConfig::default(),
            gateway: GatewayConfig::default(),
            feed: FeedConfig {
                start_prices,
                ..FeedConfig::default()
            },
            strategies: vec![StrategyConfig::new("eurusd_sma", "sma_cross", "EURUSD", Timeframe::M1)],
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values. Every problem is reported, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = self.risk.validate();

        // Engine
        if self.engine.analyze_timeout_ms == 0 {
            errors.push("engine.analyze_timeout_ms must be positive".to_string());
        }
        if self.engine.max_consecutive_failures == 0 {
            errors.push("engine.max_consecutive_failures must be at least 1".to_string());
        }
        if let Err(e) = DailyResetSchedule::parse(&self.engine.daily_reset_time) {
            errors.push(format!("engine.daily_reset_time: {}", e));
        }
        if self.engine.account_refresh_secs == 0 || self.engine.day_check_secs == 0 {
            errors.push("engine intervals must be positive".to_string());
        }

        // Sizing
        if let Err(e) = self.sizing.method.validate() {
            errors.push(format!("sizing.method: {}", e));
        }
        let instruments = std::iter::once(("default".to_string(), &self.sizing.default_instrument))
            .chain(self.sizing.instruments.iter().map(|(k, v)| (k.clone(), v)));
        for (name, instrument) in instruments {
            if instrument.lot_step <= Decimal::ZERO {
                errors.push(format!("sizing instrument {}: lot_step must be positive", name));
            }
            if instrument.min_quantity < Decimal::ZERO {
                errors.push(format!("sizing instrument {}: min_quantity must not be negative", name));
            }
        }

        // Gateway
        let retry = &self.gateway.retry;
        if retry.max_attempts == 0 {
            errors.push("gateway.retry.max_attempts must be at least 1".to_string());
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            errors.push("gateway.retry.base_delay_ms must not exceed max_delay_ms".to_string());
        }
        if retry.call_timeout_ms == 0 {
            errors.push("gateway.retry.call_timeout_ms must be positive".to_string());
        }
        let paper = &self.gateway.paper;
        if paper.initial_balance <= Decimal::ZERO {
            errors.push("gateway.paper.initial_balance must be positive".to_string());
        }
        if paper.margin_rate <= Decimal::ZERO || paper.margin_rate > Decimal::ONE {
            errors.push("gateway.paper.margin_rate must be a fraction in (0, 1]".to_string());
        }
        if paper.slippage < Decimal::ZERO {
            errors.push("gateway.paper.slippage must not be negative".to_string());
        }

        // Feed
        match self.feed.source {
            FeedSource::Synthetic => {
                if !(0.0..1.0).contains(&self.feed.volatility) {
                    errors.push("feed.volatility must be a fraction in [0, 1)".to_string());
                }
                for (symbol, price) in &self.feed.start_prices {
                    if *price <= Decimal::ZERO {
                        errors.push(format!("feed.start_prices.{} must be positive", symbol));
                    }
                }
                for strategy in &self.strategies {
                    if !self.feed.start_prices.contains_key(&strategy.symbol) {
                        errors.push(format!(
                            "strategy {} trades {} but feed.start_prices has no price for it",
                            strategy.name, strategy.symbol
                        ));
                    }
                }
            }
            FeedSource::File => {
                if self.feed.path.as_deref().map_or(true, |p| p.trim().is_empty()) {
                    errors.push("feed.path is required for the file source".to_string());
                }
            }
        }
        if self.feed.bars <= 0 {
            errors.push("feed.bars must be positive".to_string());
        }

        // Strategies
        let mut names = HashSet::new();
        for strategy in &self.strategies {
            if let Err(e) = strategy.validate() {
                errors.push(e.to_string());
            }
            if !names.insert(strategy.name.as_str()) {
                errors.push(format!("strategy name {} is used twice", strategy.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::SizingMethod;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default_config().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = AppConfig::default_config();
        config.risk.max_drawdown_pct = dec!(15); // percent, not a fraction
        config.sizing.method = SizingMethod::RiskBased { risk_pct: dec!(2) };
        config.engine.daily_reset_time = "25:00".to_string();
        config.strategies.push(config.strategies[0].clone());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4, "{:?}", errors);
        assert!(errors.iter().any(|e| e.contains("max_drawdown_pct")));
        assert!(errors.iter().any(|e| e.contains("used twice")));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = std::env::temp_dir().join(format!("tradeflow-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut file = std::fs::File::create(dir.join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
[risk]
max_daily_loss = 2500
max_drawdown_pct = 0.2

[sizing.method]
kind = "percent"
pct = 0.05

[feed.start_prices]
usdjpy = 150.25

[[strategies]]
name = "jpy_breakout"
type = "breakout"
symbol = "USDJPY"
timeframe = "15m"

[strategies.params]
lookback = "40"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(&dir).unwrap();
        assert_eq!(config.risk.max_daily_loss, dec!(2500));
        assert_eq!(config.risk.max_open_positions, 5);
        assert_eq!(config.sizing.method, SizingMethod::Percent { pct: dec!(0.05) });
        assert_eq!(config.strategies.len(), 1);
        assert_eq!(config.strategies[0].timeframe, Timeframe::M15);
        assert_eq!(config.strategies[0].param::<usize>("lookback").unwrap(), Some(40));
        assert!(config.strategies[0].auto_start);
        assert_eq!(config.gateway.retry.max_attempts, 3);
        assert_eq!(config.feed.start_prices.get("USDJPY"), Some(&dec!(150.25)));
        assert!(config.validate().is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }
}
