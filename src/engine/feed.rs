//! Market data feed shared by all strategies
//!
//! Bars for every subscription are merged into one stream ordered by bar
//! close time, so replay and live runs look the same to the engine.

use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::{MarketData, TimeRange, Timeframe};
use crate::error::Result;
use crate::exchange::BarSource;

/// One (symbol, timeframe) stream a strategy needs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Subscription {
    pub symbol: String,
    pub timeframe: Timeframe,
}

/// Unique subscriptions, in a stable order
pub fn dedup_subscriptions(subscriptions: impl IntoIterator<Item = Subscription>) -> Vec<Subscription> {
    subscriptions
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Load and merge bars for `subscriptions` over `range`
pub fn load_updates(
    source: &dyn BarSource,
    subscriptions: &[Subscription],
    range: &TimeRange,
) -> Result<Vec<MarketData>> {
    let mut updates = Vec::new();
    for sub in subscriptions {
        let bars = source.bars(&sub.symbol, sub.timeframe, range)?;
        debug!(symbol = %sub.symbol, timeframe = %sub.timeframe, bars = bars.len(), "Loaded bars");
        updates.extend(bars.into_iter().map(MarketData::from_bar));
    }
    updates.sort_by(|a, b| {
        a.bar
            .close_time()
            .cmp(&b.bar.close_time())
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    Ok(updates)
}

/// Push `updates` onto a bounded channel from a background task.
/// The receiver sees `None` once the replay is exhausted.
pub fn spawn_replay(updates: Vec<MarketData>, capacity: usize) -> mpsc::Receiver<MarketData> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        let total = updates.len();
        for update in updates {
            if tx.send(update).await.is_err() {
                debug!("Feed receiver dropped, stopping replay");
                return;
            }
        }
        info!(updates = total, "Replay feed exhausted");
    });
    rx
}
