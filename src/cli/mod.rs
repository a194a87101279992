//! tradeflow CLI
//!
//! Commands:
//! - `tradeflow run` - paper trading over the configured feed
//! - `tradeflow strategies` - list registered strategy types
//! - `tradeflow size` - position sizing calculator
//! - `tradeflow check-config` - validate configuration

pub mod output;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::Tabled;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::engine::EngineContext;
use crate::risk::{calculate_size, raw_size, InstrumentSpec, SizingMethod};
use crate::strategy::StrategyRegistry;
use output::{print_item, print_items, print_kv, print_section, print_success, print_warn, OutputMode};

/// Trading execution and risk management engine
#[derive(Parser, Debug)]
#[command(name = "tradeflow")]
#[command(author, version, about = "Trading execution and risk management engine")]
pub struct Cli {
    /// Configuration directory (default.toml, then $TRADEFLOW_ENV)
    #[arg(long, global = true, default_value = "config", env = "TRADEFLOW_CONFIG_DIR")]
    pub config: PathBuf,

    /// Output JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Paper trade the configured strategies over the configured feed
    Run {
        /// Bars replayed per subscription (overrides feed.bars)
        #[arg(long)]
        ticks: Option<i32>,
    },

    /// List available strategy types
    Strategies,

    /// Position sizing calculator (percentages are 0-100)
    Size {
        #[arg(long, value_enum, default_value = "risk")]
        method: SizeMethodArg,
        #[arg(long)]
        equity: Decimal,
        /// Entry price
        #[arg(long)]
        price: Decimal,
        /// Stop-loss price (risk method)
        #[arg(long)]
        stop: Option<Decimal>,
        /// Percent of equity, e.g. 2 for 2%
        #[arg(long)]
        percent: Option<Decimal>,
        /// Quantity (fixed method)
        #[arg(long)]
        quantity: Option<Decimal>,
        #[arg(long, default_value = "1")]
        lot_step: Decimal,
        #[arg(long, default_value = "1")]
        min_quantity: Decimal,
    },

    /// Validate configuration and report every problem
    CheckConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SizeMethodArg {
    Fixed,
    Percent,
    Risk,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from_json_flag(self.json)
    }

    pub async fn run(self) -> Result<()> {
        let mode = self.output_mode();
        match self.command {
            Commands::Run { ticks } => {
                let mut config = load_config(&self.config)?;
                if let Some(ticks) = ticks {
                    config.feed.bars = ticks;
                }
                run_paper(config, mode).await
            }
            Commands::Strategies => print_items(&StrategyRegistry::with_builtins().available(), mode),
            Commands::Size {
                method,
                equity,
                price,
                stop,
                percent,
                quantity,
                lot_step,
                min_quantity,
            } => {
                let method = match method {
                    SizeMethodArg::Fixed => SizingMethod::Fixed {
                        quantity: quantity.ok_or_else(|| anyhow!("--quantity is required for the fixed method"))?,
                    },
                    SizeMethodArg::Percent => SizingMethod::Percent {
                        pct: percent_to_fraction(percent)?,
                    },
                    SizeMethodArg::Risk => SizingMethod::RiskBased {
                        risk_pct: percent_to_fraction(percent)?,
                    },
                };
                let instrument = InstrumentSpec {
                    lot_step,
                    min_quantity,
                };
                let result = size_position(&method, equity, price, stop, &instrument)?;
                print_items(&[result], mode)
            }
            Commands::CheckConfig => {
                let config = AppConfig::load_from(&self.config)
                    .with_context(|| format!("loading {}", self.config.display()))?;
                match config.validate() {
                    Ok(()) => {
                        print_success("Configuration is valid");
                        print_kv("strategies", &config.strategies.len().to_string());
                        Ok(())
                    }
                    Err(errors) => {
                        for error in &errors {
                            print_warn(&format!("  - {error}"));
                        }
                        bail!("{} configuration problem(s)", errors.len())
                    }
                }
            }
        }
    }
}

/// Config from `dir`, or the built-in configuration when `dir` has none
pub fn load_config(dir: &Path) -> Result<AppConfig> {
    if dir.join("default.toml").exists() {
        return AppConfig::load_from(dir).with_context(|| format!("loading {}", dir.display()));
    }
    warn!(dir = %dir.display(), "No default.toml found, using built-in configuration");
    Ok(AppConfig::default_config())
}

async fn run_paper(config: AppConfig, mode: OutputMode) -> Result<()> {
    let ctx = EngineContext::from_config(config)?;
    ctx.start().await?;
    let feed = ctx.replay_feed()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    let snapshot = ctx.run(feed, shutdown_rx).await?;
    match mode {
        OutputMode::Json => print_item(&snapshot)?,
        OutputMode::Table => {
            print_section("Strategies", &snapshot.strategy_rows(), mode)?;
            print_section("Positions", &snapshot.position_rows(), mode)?;
            print_section("Open orders", &snapshot.order_rows(), mode)?;
            println!();
            print_kv("realized", &snapshot.realized_pnl.round_dp(2).to_string());
            print_kv("unrealized", &snapshot.unrealized_pnl.round_dp(2).to_string());
            print_kv(
                "signals accepted/rejected",
                &format!("{}/{}", snapshot.accepted_signals, snapshot.rejected_signals),
            );
        }
    }
    Ok(())
}

/// Command-line percent (0-100) to the internal fraction
pub fn percent_to_fraction(percent: Option<Decimal>) -> Result<Decimal> {
    let percent = percent.ok_or_else(|| anyhow!("--percent is required for this method"))?;
    if percent <= Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
        bail!("--percent must be in (0, 100], got {percent}");
    }
    Ok(percent / Decimal::ONE_HUNDRED)
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct SizeResult {
    #[tabled(rename = "Method")]
    pub method: String,
    #[tabled(rename = "Raw")]
    pub raw_quantity: Decimal,
    #[tabled(rename = "Quantity")]
    pub quantity: Decimal,
    #[tabled(rename = "Notional")]
    pub notional: Decimal,
    #[tabled(rename = "Risk at stop")]
    pub risk_amount: String,
}

pub fn size_position(
    method: &SizingMethod,
    equity: Decimal,
    price: Decimal,
    stop: Option<Decimal>,
    instrument: &InstrumentSpec,
) -> Result<SizeResult> {
    let stop_distance = stop.map(|s| (price - s).abs());
    let raw = raw_size(method, equity, price, stop_distance)?;
    let quantity = calculate_size(method, equity, price, stop_distance, instrument, None)?;
    Ok(SizeResult {
        method: method.name().to_string(),
        raw_quantity: raw.round_dp(4),
        quantity,
        notional: (quantity * price).round_dp(2),
        risk_amount: stop_distance
            .map(|d| (d * quantity).round_dp(2).to_string())
            .unwrap_or_else(|| "-".to_string()),
    })
}
