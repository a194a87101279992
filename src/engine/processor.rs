//! Broker event processing
//!
//! Applies venue events to the ledger in arrival order and fans the results
//! out: observability events, realized P&L into the risk counters, and
//! closed trades into strategy performance.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::OrderStatus;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus, EventKind, Severity};
use crate::exchange::BrokerEvent;
use crate::ledger::{AppliedUpdate, Ledger, LedgerUpdate};
use crate::risk::RiskManager;
use crate::strategy::StrategyManager;

/// Observability event for an applied order transition
pub fn status_event(update: &AppliedUpdate) -> EngineEvent {
    let order = &update.order;
    let reason = match (&order.reason, update.fill.as_ref()) {
        (_, Some(fill)) => format!(
            "{} -> {} ({} @ {}, filled {}/{})",
            update.previous, order.status, fill.quantity, fill.price, order.filled_quantity, order.quantity
        ),
        (Some(reason), None) => format!("{} -> {}: {}", update.previous, order.status, reason),
        (None, None) => format!("{} -> {}", update.previous, order.status),
    };

    let (severity, kind) = match order.status {
        OrderStatus::Rejected => (
            Severity::Warning,
            EventKind::OrderRejected {
                order_id: order.id.clone(),
            },
        ),
        status => (
            Severity::Info,
            EventKind::OrderStatus {
                order_id: order.id.clone(),
                status,
            },
        ),
    };

    EngineEvent::new(severity, kind, reason)
        .with_strategy(&order.strategy)
        .with_symbol(&order.symbol)
}

pub struct EventProcessor {
    ledger: Arc<Ledger>,
    risk: Arc<RiskManager>,
    strategies: Arc<StrategyManager>,
    events: EventBus,
}

impl EventProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        risk: Arc<RiskManager>,
        strategies: Arc<StrategyManager>,
        events: EventBus,
    ) -> Self {
        Self {
            ledger,
            risk,
            strategies,
            events,
        }
    }

    /// Apply one broker event
    pub async fn apply(&self, event: BrokerEvent) -> Result<LedgerUpdate> {
        let update = match event {
            BrokerEvent::Status {
                order_id,
                status,
                reason,
                venue_order_id,
                ..
            } => {
                self.ledger
                    .apply_status_event(&order_id, status, reason, venue_order_id)
                    .await?
            }
            BrokerEvent::Fill {
                order_id,
                quantity,
                price,
                ..
            } => self.ledger.apply_fill_event(&order_id, quantity, price).await?,
        };

        let applied = match &update {
            LedgerUpdate::Applied(applied) => applied,
            LedgerUpdate::Unchanged { order_id, status } => {
                debug!(%order_id, %status, "Repeated status ignored");
                return Ok(update);
            }
            LedgerUpdate::AlreadyTerminal { order_id, status } => {
                debug!(%order_id, %status, "Event for terminal order ignored");
                return Ok(update);
            }
        };

        if applied.status_changed() || applied.fill.is_some() {
            self.events.emit(status_event(applied));
        }

        let realized = applied.realized();
        if !realized.is_zero() {
            self.risk.record_realized_pnl(realized).await;
        }
        if let Some(trade) = &applied.closed_trade {
            self.strategies
                .notify_trade_closed(&trade.strategy, trade.pnl)
                .await;
        }
        Ok(update)
    }

    /// Apply and log failures; one bad event never stops the stream.
    /// Returns the P&L the event realized.
    pub async fn apply_logged(&self, event: BrokerEvent) -> Decimal {
        let order_id = event.order_id().to_string();
        match self.apply(event).await {
            Ok(update) => update.applied().map(|a| a.realized()).unwrap_or(Decimal::ZERO),
            Err(e) => {
                warn!(%order_id, error = %e, "Broker event could not be applied");
                Decimal::ZERO
            }
        }
    }
}
