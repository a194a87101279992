//! Strategy Manager
//!
//! Manages the lifecycle of trading strategies:
//! - Register/unregister runners built by registry factories
//! - Start/pause/stop strategies
//! - Drive running strategies on each market-data update
//! - Route signals through the sink and feed results back to the runner
//! - Auto-pause runners that keep failing

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::performance::PerformanceTracker;
use super::registry::RunnerFactory;
use super::traits::{SignalOutcome, SignalSink, StrategyConfig, StrategyRunner};
use crate::domain::{MarketData, Signal};
use crate::error::{Result, TradeflowError};
use crate::events::{EngineEvent, EventBus, EventKind, Severity};

// ============================================================================
// Strategy State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyState {
    Initialized,
    Running,
    Paused,
    Stopped,
}

impl StrategyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyState::Initialized => "INITIALIZED",
            StrategyState::Running => "RUNNING",
            StrategyState::Paused => "PAUSED",
            StrategyState::Stopped => "STOPPED",
        }
    }

    /// INITIALIZED -> RUNNING <-> PAUSED, anything but STOPPED -> STOPPED
    pub fn can_transition_to(&self, next: StrategyState) -> bool {
        use StrategyState::*;
        matches!(
            (self, next),
            (Initialized, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Initialized, Stopped)
                | (Running, Stopped)
                | (Paused, Stopped)
        )
    }
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Settings and reports
// ============================================================================

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Upper bound on one `analyze` call
    pub analyze_timeout: Duration,
    /// Consecutive failures before a runner is paused
    pub max_consecutive_failures: u32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            analyze_timeout: Duration::from_millis(500),
            max_consecutive_failures: 3,
        }
    }
}

/// Status information for a registered strategy
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    pub name: String,
    pub kind: String,
    pub symbol: String,
    pub timeframe: String,
    pub state: StrategyState,
    pub consecutive_failures: u32,
    pub registered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl StrategyStatus {
    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let Some(started_at) = self.started_at else {
            return "-".to_string();
        };
        let duration = Utc::now() - started_at;
        let hours = duration.num_hours();
        let minutes = duration.num_minutes() % 60;
        let seconds = duration.num_seconds() % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

/// What one market-data update did across all running strategies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub evaluated: usize,
    pub signals: usize,
    pub submitted: usize,
    pub rejected: usize,
    /// Errors and timeouts
    pub failures: usize,
    /// Ticks dropped on bad data
    pub skipped: usize,
    pub auto_paused: Vec<String>,
}

// ============================================================================
// Strategy Manager
// ============================================================================

type SharedRunner = Arc<Mutex<Box<dyn StrategyRunner>>>;

struct ManagedStrategy {
    config: StrategyConfig,
    runner: SharedRunner,
    state: StrategyState,
    consecutive_failures: u32,
    registered_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
}

impl ManagedStrategy {
    fn status(&self) -> StrategyStatus {
        StrategyStatus {
            name: self.config.name.clone(),
            kind: self.config.kind.clone(),
            symbol: self.config.symbol.clone(),
            timeframe: self.config.timeframe.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            registered_at: self.registered_at,
            started_at: self.started_at,
        }
    }
}

enum AnalyzeResult {
    Signal(Signal),
    Nothing,
    DataError(String),
    Failed(String),
}

/// Registry and lifecycle coordinator for strategy runners
pub struct StrategyManager {
    strategies: Arc<RwLock<HashMap<String, ManagedStrategy>>>,
    sink: Arc<dyn SignalSink>,
    performance: Arc<PerformanceTracker>,
    events: EventBus,
    settings: ManagerSettings,
}

impl StrategyManager {
    pub fn new(
        sink: Arc<dyn SignalSink>,
        performance: Arc<PerformanceTracker>,
        events: EventBus,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            strategies: Arc::new(RwLock::new(HashMap::new())),
            sink,
            performance,
            events,
            settings,
        }
    }

    pub fn performance(&self) -> &Arc<PerformanceTracker> {
        &self.performance
    }

    /// Build the runner and register it as INITIALIZED
    pub async fn register(&self, config: StrategyConfig, factory: &RunnerFactory) -> Result<()> {
        config.validate()?;

        let mut strategies = self.strategies.write().await;
        if strategies.contains_key(&config.name) {
            return Err(TradeflowError::Validation(format!(
                "strategy {} is already registered",
                config.name
            )));
        }

        let runner = factory(&config)?;
        info!(
            strategy = %config.name,
            kind = %config.kind,
            symbol = %config.symbol,
            timeframe = %config.timeframe,
            "Registered strategy"
        );
        strategies.insert(
            config.name.clone(),
            ManagedStrategy {
                config,
                runner: Arc::new(Mutex::new(runner)),
                state: StrategyState::Initialized,
                consecutive_failures: 0,
                registered_at: Utc::now(),
                started_at: None,
            },
        );
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.transition(name, StrategyState::Running).await
    }

    pub async fn pause(&self, name: &str) -> Result<()> {
        self.transition(name, StrategyState::Paused).await
    }

    /// Stop the strategy and cancel its open orders best-effort
    pub async fn stop(&self, name: &str) -> Result<usize> {
        self.transition(name, StrategyState::Stopped).await?;
        let cancelled = self.sink.cancel_strategy_orders(name).await;
        info!(strategy = %name, cancelled, "Strategy stopped");
        Ok(cancelled)
    }

    /// Remove a STOPPED strategy; whatever it still has open is cancelled
    /// best-effort. Performance history is kept.
    pub async fn unregister(&self, name: &str) -> Result<usize> {
        {
            let mut strategies = self.strategies.write().await;
            let managed = strategies
                .get(name)
                .ok_or_else(|| TradeflowError::Strategy(format!("strategy {} is not registered", name)))?;
            if managed.state != StrategyState::Stopped {
                return Err(TradeflowError::InvalidStateTransition {
                    from: managed.state.to_string(),
                    to: "UNREGISTERED".to_string(),
                });
            }
            strategies.remove(name);
        }

        let cancelled = self.sink.cancel_strategy_orders(name).await;
        info!(strategy = %name, cancelled, "Strategy unregistered");
        Ok(cancelled)
    }

    /// Stop every strategy that is not already stopped
    pub async fn stop_all(&self) -> usize {
        let names: Vec<String> = {
            let strategies = self.strategies.read().await;
            strategies
                .values()
                .filter(|s| s.state != StrategyState::Stopped)
                .map(|s| s.config.name.clone())
                .collect()
        };

        let mut cancelled = 0;
        for name in names {
            match self.stop(&name).await {
                Ok(n) => cancelled += n,
                Err(e) => error!(strategy = %name, error = %e, "Error stopping strategy"),
            }
        }
        cancelled
    }

    async fn transition(&self, name: &str, next: StrategyState) -> Result<()> {
        let mut strategies = self.strategies.write().await;
        let managed = strategies
            .get_mut(name)
            .ok_or_else(|| TradeflowError::Strategy(format!("strategy {} is not registered", name)))?;

        if !managed.state.can_transition_to(next) {
            return Err(TradeflowError::InvalidStateTransition {
                from: managed.state.to_string(),
                to: next.to_string(),
            });
        }

        let previous = managed.state;
        managed.state = next;
        if next == StrategyState::Running {
            managed.consecutive_failures = 0;
            if managed.started_at.is_none() {
                managed.started_at = Some(Utc::now());
            }
        }
        info!(strategy = %name, from = %previous, to = %next, "Strategy state changed");
        self.events.emit(
            EngineEvent::new(
                Severity::Info,
                EventKind::StrategyState {
                    state: next.to_string(),
                },
                format!("{} -> {}", previous, next),
            )
            .with_strategy(name)
            .with_symbol(&managed.config.symbol),
        );
        Ok(())
    }

    pub async fn status(&self, name: &str) -> Option<StrategyStatus> {
        let strategies = self.strategies.read().await;
        strategies.get(name).map(ManagedStrategy::status)
    }

    /// All registered strategies sorted by name
    pub async fn statuses(&self) -> Vec<StrategyStatus> {
        let strategies = self.strategies.read().await;
        let mut statuses: Vec<StrategyStatus> =
            strategies.values().map(ManagedStrategy::status).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn is_running(&self, name: &str) -> bool {
        let strategies = self.strategies.read().await;
        strategies
            .get(name)
            .map(|s| s.state == StrategyState::Running)
            .unwrap_or(false)
    }

    /// Record a closed trade once and hand the P&L to the runner
    pub async fn notify_trade_closed(&self, strategy: &str, pnl: Decimal) {
        self.performance.record_closed_trade(strategy, pnl);

        let runner = {
            let strategies = self.strategies.read().await;
            strategies.get(strategy).map(|s| s.runner.clone())
        };
        if let Some(runner) = runner {
            runner.lock().await.on_trade_closed(pnl);
        }
    }

    /// Run every RUNNING strategy subscribed to this symbol and timeframe,
    /// then route the signals they produced one at a time.
    pub async fn on_market_data(&self, data: &MarketData) -> TickReport {
        let targets: Vec<(String, Option<crate::risk::SizingMethod>, SharedRunner)> = {
            let strategies = self.strategies.read().await;
            strategies
                .values()
                .filter(|s| {
                    s.state == StrategyState::Running
                        && s.config.symbol == data.symbol
                        && s.config.timeframe == data.bar.timeframe
                })
                .map(|s| (s.config.name.clone(), s.config.sizing.clone(), s.runner.clone()))
                .collect()
        };

        let mut report = TickReport {
            evaluated: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            return report;
        }

        let timeout = self.settings.analyze_timeout;
        let results = join_all(targets.iter().map(|(_, _, runner)| {
            let runner = runner.clone();
            async move {
                let analyzed = tokio::time::timeout(timeout, async {
                    let mut runner = runner.lock().await;
                    runner.analyze(data).await
                })
                .await;
                match analyzed {
                    Ok(Ok(Some(signal))) => AnalyzeResult::Signal(signal),
                    Ok(Ok(None)) => AnalyzeResult::Nothing,
                    Ok(Err(TradeflowError::Data(msg))) => AnalyzeResult::DataError(msg),
                    Ok(Err(e)) => AnalyzeResult::Failed(e.to_string()),
                    Err(_) => AnalyzeResult::Failed(format!(
                        "analyze timed out after {}ms",
                        timeout.as_millis()
                    )),
                }
            }
        }))
        .await;

        for ((name, sizing, runner), result) in targets.into_iter().zip(results) {
            match result {
                AnalyzeResult::Signal(mut signal) => {
                    self.record_success(&name).await;
                    signal.strategy = name.clone();
                    report.signals += 1;
                    self.performance.record_signal(&name);

                    let outcome = self.sink.route(signal.clone(), sizing).await;
                    let accepted = outcome.is_submitted();
                    match &outcome {
                        SignalOutcome::Submitted { order } => {
                            report.submitted += 1;
                            debug!(strategy = %name, order_id = %order.id, "Signal submitted");
                        }
                        SignalOutcome::RiskRejected(reason) => {
                            report.rejected += 1;
                            self.performance.record_risk_rejection(&name);
                            debug!(strategy = %name, %reason, "Signal rejected by risk");
                        }
                        SignalOutcome::VenueRejected { order_id, reason } => {
                            report.rejected += 1;
                            self.performance.record_venue_rejection(&name);
                            warn!(strategy = %name, %order_id, %reason, "Order rejected by venue");
                        }
                        SignalOutcome::Failed { order_id, error } => {
                            warn!(strategy = %name, %order_id, %error, "Order submission failed");
                        }
                    }
                    runner.lock().await.on_signal_result(&signal, accepted);
                }
                AnalyzeResult::Nothing => self.record_success(&name).await,
                AnalyzeResult::DataError(msg) => {
                    report.skipped += 1;
                    warn!(strategy = %name, symbol = %data.symbol, error = %msg, "Skipping tick on bad data");
                }
                AnalyzeResult::Failed(msg) => {
                    report.failures += 1;
                    if self.record_failure(&name, &msg).await {
                        report.auto_paused.push(name);
                    }
                }
            }
        }

        report
    }

    async fn record_success(&self, name: &str) {
        let mut strategies = self.strategies.write().await;
        if let Some(managed) = strategies.get_mut(name) {
            managed.consecutive_failures = 0;
        }
    }

    /// Returns true when this failure paused the strategy
    async fn record_failure(&self, name: &str, error: &str) -> bool {
        let mut strategies = self.strategies.write().await;
        let Some(managed) = strategies.get_mut(name) else {
            return false;
        };
        managed.consecutive_failures += 1;
        let failures = managed.consecutive_failures;
        error!(strategy = %name, failures, error = %error, "Strategy analyze failed");

        if failures < self.settings.max_consecutive_failures
            || managed.state != StrategyState::Running
        {
            return false;
        }

        managed.state = StrategyState::Paused;
        warn!(strategy = %name, failures, "Strategy auto-paused");
        self.events.emit(
            EngineEvent::new(
                Severity::Warning,
                EventKind::StrategyAutoPaused {
                    consecutive_failures: failures,
                },
                format!("paused after {} consecutive failures: {}", failures, error),
            )
            .with_strategy(name)
            .with_symbol(&managed.config.symbol),
        );
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
