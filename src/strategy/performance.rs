//! Per-strategy performance and signal statistics, keyed by strategy name

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StrategyPerformance {
    pub strategy: String,
    /// Closed trades
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub realized_pnl: Decimal,
    pub best_trade: Option<Decimal>,
    pub worst_trade: Option<Decimal>,
    pub signals: u64,
    pub risk_rejections: u64,
    pub venue_rejections: u64,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl StrategyPerformance {
    fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            ..Default::default()
        }
    }

    /// Wins over closed trades, as a fraction. Zero before the first trade.
    pub fn win_rate(&self) -> Decimal {
        if self.trades == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.wins) / Decimal::from(self.trades)
    }
}

#[derive(Debug, Default)]
pub struct PerformanceTracker {
    stats: DashMap<String, StrategyPerformance>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call exactly once per closed trade. Break-even trades count as neither
    /// win nor loss.
    pub fn record_closed_trade(&self, strategy: &str, pnl: Decimal) {
        let mut entry = self
            .stats
            .entry(strategy.to_string())
            .or_insert_with(|| StrategyPerformance::new(strategy));
        entry.trades += 1;
        if pnl > Decimal::ZERO {
            entry.wins += 1;
        } else if pnl < Decimal::ZERO {
            entry.losses += 1;
        }
        entry.realized_pnl += pnl;
        entry.best_trade = Some(entry.best_trade.map_or(pnl, |b| b.max(pnl)));
        entry.worst_trade = Some(entry.worst_trade.map_or(pnl, |w| w.min(pnl)));
        entry.last_trade_at = Some(Utc::now());
    }

    pub fn record_signal(&self, strategy: &str) {
        self.entry(strategy, |p| p.signals += 1);
    }

    pub fn record_risk_rejection(&self, strategy: &str) {
        self.entry(strategy, |p| p.risk_rejections += 1);
    }

    pub fn record_venue_rejection(&self, strategy: &str) {
        self.entry(strategy, |p| p.venue_rejections += 1);
    }

    fn entry(&self, strategy: &str, f: impl FnOnce(&mut StrategyPerformance)) {
        let mut entry = self
            .stats
            .entry(strategy.to_string())
            .or_insert_with(|| StrategyPerformance::new(strategy));
        f(&mut entry);
    }

    pub fn get(&self, strategy: &str) -> Option<StrategyPerformance> {
        self.stats.get(strategy).map(|p| p.clone())
    }

    /// Snapshot sorted by strategy name
    pub fn all(&self) -> Vec<StrategyPerformance> {
        let mut all: Vec<StrategyPerformance> =
            self.stats.iter().map(|p| p.value().clone()).collect();
        all.sort_by(|a, b| a.strategy.cmp(&b.strategy));
        all
    }
}
