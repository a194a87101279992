//! Engine wiring and the main event loop
//!
//! One `EngineContext` owns every shared component. Market data, broker
//! events and timers are multiplexed in `run`. Broker events are drained
//! before strategies see a bar.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::feed::{dedup_subscriptions, load_updates, spawn_replay, Subscription};
use super::processor::EventProcessor;
use super::report::EngineSnapshot;
use super::router::OrderRouter;
use crate::config::AppConfig;
use crate::domain::{MarketData, TimeRange};
use crate::error::{Result, TradeflowError};
use crate::events::{EngineEvent, EventBus, EventKind, Severity};
use crate::exchange::{
    build_bar_source, build_gateway, BarSource, BrokerEvent, BrokerGateway, PaperBroker,
    ResilientGateway,
};
use crate::ledger::Ledger;
use crate::risk::{DailyResetSchedule, RiskManager};
use crate::strategy::{ManagerSettings, PerformanceTracker, StrategyManager, StrategyRegistry, TickReport};

pub struct EngineContext {
    config: AppConfig,
    events: EventBus,
    source: Arc<dyn BarSource>,
    paper: Arc<PaperBroker>,
    gateway: Arc<ResilientGateway>,
    ledger: Arc<Ledger>,
    risk: Arc<RiskManager>,
    router: Arc<OrderRouter>,
    strategies: Arc<StrategyManager>,
    processor: EventProcessor,
    registry: StrategyRegistry,
    broker_rx: Mutex<Option<mpsc::UnboundedReceiver<BrokerEvent>>>,
}

impl EngineContext {
    /// Build every component from configuration. Nothing is connected yet.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        if let Err(errors) = config.validate() {
            return Err(TradeflowError::Validation(errors.join("; ")));
        }

        let events = EventBus::new(config.engine.event_capacity);
        let source = build_bar_source(&config.feed)?;
        let handles = build_gateway(&config.gateway, source.clone(), events.clone())?;

        let ledger = Arc::new(Ledger::new());
        let schedule = DailyResetSchedule::parse(&config.engine.daily_reset_time)?;
        let risk = Arc::new(RiskManager::new(
            config.risk.clone(),
            config.sizing.clone(),
            schedule,
        ));

        let gateway: Arc<dyn BrokerGateway> = handles.gateway.clone();
        let router = Arc::new(OrderRouter::new(
            risk.clone(),
            ledger.clone(),
            gateway,
            events.clone(),
        ));

        let settings = ManagerSettings {
            analyze_timeout: Duration::from_millis(config.engine.analyze_timeout_ms),
            max_consecutive_failures: config.engine.max_consecutive_failures,
        };
        let strategies = Arc::new(StrategyManager::new(
            router.clone(),
            Arc::new(PerformanceTracker::new()),
            events.clone(),
            settings,
        ));
        let processor = EventProcessor::new(
            ledger.clone(),
            risk.clone(),
            strategies.clone(),
            events.clone(),
        );

        Ok(Self {
            config,
            events,
            source,
            paper: handles.paper,
            gateway: handles.gateway,
            ledger,
            risk,
            router,
            strategies,
            processor,
            registry: StrategyRegistry::with_builtins(),
            broker_rx: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn router(&self) -> &Arc<OrderRouter> {
        &self.router
    }

    pub fn strategies(&self) -> &Arc<StrategyManager> {
        &self.strategies
    }

    pub fn gateway(&self) -> &Arc<ResilientGateway> {
        &self.gateway
    }

    pub fn paper(&self) -> &Arc<PaperBroker> {
        &self.paper
    }

    /// Connect, seed equity, then register configured strategies and start
    /// the auto-start ones.
    pub async fn start(&self) -> Result<()> {
        self.gateway.connect().await?;
        self.refresh_account().await?;
        self.risk.roll_day(Utc::now()).await;

        {
            let mut rx = self.broker_rx.lock().await;
            if rx.is_none() {
                *rx = self.gateway.take_event_receiver().await;
            }
        }

        for config in &self.config.strategies {
            let factory = self.registry.factory(&config.kind)?;
            self.strategies.register(config.clone(), &factory).await?;
            if config.auto_start {
                self.strategies.start(&config.name).await?;
            }
        }

        info!(
            venue = %self.gateway.kind(),
            strategies = self.config.strategies.len(),
            "Engine started"
        );
        Ok(())
    }

    /// Pull the venue's account snapshot into the risk counters
    pub async fn refresh_account(&self) -> Result<()> {
        let account = self.gateway.get_account_info().await?;
        self.risk.update_equity(account.equity).await;
        debug!(equity = %account.equity, balance = %account.balance, "Account refreshed");
        Ok(())
    }

    /// Bars for every configured strategy, merged and replayed on a channel
    pub fn replay_feed(&self) -> Result<mpsc::Receiver<MarketData>> {
        let subscriptions = dedup_subscriptions(self.config.strategies.iter().map(|s| Subscription {
            symbol: s.symbol.clone(),
            timeframe: s.timeframe,
        }));
        let end = self.config.feed.end.unwrap_or_else(Utc::now);
        let mut updates = Vec::new();
        for sub in &subscriptions {
            let range = TimeRange::last_bars(end, sub.timeframe, self.config.feed.bars);
            updates.extend(load_updates(self.source.as_ref(), std::slice::from_ref(sub), &range)?);
        }
        updates.sort_by(|a, b| {
            a.bar
                .close_time()
                .cmp(&b.bar.close_time())
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        info!(
            subscriptions = subscriptions.len(),
            updates = updates.len(),
            "Replay feed prepared"
        );
        Ok(spawn_replay(updates, self.config.feed.replay_capacity))
    }

    /// Process one bar end to end: mark, simulate, apply fills, run strategies
    pub async fn handle_market_data(&self, data: &MarketData) -> TickReport {
        self.ledger.mark_price(&data.symbol, data.price()).await;
        let executed = self.paper.on_bar(&data.bar).await;
        if executed > 0 {
            debug!(symbol = %data.symbol, executed, "Resting orders executed on bar");
        }
        self.drain_broker_events().await;

        let report = self.strategies.on_market_data(data).await;
        self.drain_broker_events().await;
        report
    }

    /// Apply every broker event already delivered. Equity is refreshed
    /// when any of them realized P&L.
    pub async fn drain_broker_events(&self) -> usize {
        let (applied, realized) = {
            let mut guard = self.broker_rx.lock().await;
            let Some(rx) = guard.as_mut() else {
                return 0;
            };
            let mut applied = 0;
            let mut realized = false;
            while let Ok(event) = rx.try_recv() {
                realized |= !self.processor.apply_logged(event).await.is_zero();
                applied += 1;
            }
            (applied, realized)
        };
        if realized {
            self.refresh_after_realized().await;
        }
        applied
    }

    async fn refresh_after_realized(&self) {
        if let Err(e) = self.refresh_account().await {
            warn!(error = %e, "Account refresh after realized P&L failed");
        }
    }

    async fn next_broker_event(&self) -> Option<BrokerEvent> {
        let mut guard = self.broker_rx.lock().await;
        match guard.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Roll the trading day if the boundary has passed
    pub async fn check_day(&self, now: DateTime<Utc>) -> bool {
        let rolled = self.risk.roll_day(now).await;
        if rolled {
            let day = self.risk.counters().await.trading_day;
            self.events.emit(EngineEvent::new(
                Severity::Info,
                EventKind::DailyReset,
                format!("trading day {:?} started", day),
            ));
        }
        rolled
    }

    /// Periodic venue upkeep: reconnect and reconcile when down, otherwise
    /// refresh the account snapshot
    pub async fn maintain_connection(&self) {
        if self.gateway.is_connected() {
            if let Err(e) = self.refresh_account().await {
                warn!(error = %e, "Account refresh failed");
            }
            return;
        }

        match self.gateway.reconnect().await {
            Ok(()) => match self.router.reconcile_pending().await {
                Ok(n) => info!(reconciled = n, "Gateway restored"),
                Err(e) => warn!(error = %e, "Reconciliation after reconnect failed"),
            },
            Err(e) => warn!(error = %e, "Reconnect failed"),
        }
    }

    /// Drive the engine until the feed ends or shutdown is signalled.
    pub async fn run(
        &self,
        mut feed: mpsc::Receiver<MarketData>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<EngineSnapshot> {
        info!(strategies = self.config.strategies.len(), "Engine starting main loop");

        let mut day_tick = interval(Duration::from_secs(self.config.engine.day_check_secs));
        let mut refresh_tick = interval(Duration::from_secs(self.config.engine.account_refresh_secs));
        // Don't burst-fire missed ticks
        day_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        refresh_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut bars = 0u64;
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }

                // --- Venue events first so the next bar sees current fills ---
                Some(event) = self.next_broker_event() => {
                    if !self.processor.apply_logged(event).await.is_zero() {
                        self.refresh_after_realized().await;
                    }
                }

                _ = day_tick.tick() => {
                    self.check_day(Utc::now()).await;
                }

                _ = refresh_tick.tick() => {
                    self.maintain_connection().await;
                }

                update = feed.recv() => {
                    let Some(data) = update else {
                        info!(bars, "Market data feed closed");
                        break;
                    };
                    bars += 1;
                    let report = self.handle_market_data(&data).await;
                    if report.signals > 0 || !report.auto_paused.is_empty() {
                        debug!(
                            symbol = %data.symbol,
                            signals = report.signals,
                            submitted = report.submitted,
                            rejected = report.rejected,
                            "Tick processed"
                        );
                    }
                }
            }
        }

        self.shutdown().await;
        let snapshot = self.snapshot().await;
        info!("{}", snapshot.summary());
        Ok(snapshot)
    }

    /// Stop every strategy and disconnect
    pub async fn shutdown(&self) {
        let cancelled = self.strategies.stop_all().await;
        self.drain_broker_events().await;
        if let Err(e) = self.gateway.disconnect().await {
            error!(error = %e, "Gateway disconnect failed");
        }
        info!(cancelled, "Engine stopped");
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let (accepted_signals, rejected_signals) = self.risk.decision_counts();
        EngineSnapshot {
            taken_at: Utc::now(),
            connection: self.gateway.state(),
            positions: self.ledger.open_positions().await,
            open_orders: self.ledger.get_open_orders().await,
            strategies: self.strategies.statuses().await,
            performance: self.strategies.performance().all(),
            risk: self.risk.counters().await,
            accepted_signals,
            rejected_signals,
            realized_pnl: self.ledger.total_realized_pnl().await,
            unrealized_pnl: self.ledger.total_unrealized_pnl().await,
        }
    }
}
