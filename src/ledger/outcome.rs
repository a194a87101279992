use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{FillEffect, Order, OrderSide, OrderStatus};

/// One executed quantity as recorded by the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub order_id: String,
    pub strategy: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A trade that went back to flat (or flipped) on this fill
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    /// Strategy of the closing order
    pub strategy: String,
    pub symbol: String,
    pub pnl: Decimal,
}

/// A change the ledger actually made
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    /// Order state after the event
    pub order: Order,
    pub previous: OrderStatus,
    pub fill: Option<Fill>,
    pub effect: Option<FillEffect>,
    pub closed_trade: Option<ClosedTrade>,
}

impl AppliedUpdate {
    pub fn status_changed(&self) -> bool {
        self.previous != self.order.status
    }

    /// Realized P&L produced by this event
    pub fn realized(&self) -> Decimal {
        self.effect
            .as_ref()
            .map(|e| e.realized)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Result of applying a broker event
#[derive(Debug, Clone)]
pub enum LedgerUpdate {
    Applied(Box<AppliedUpdate>),
    /// The order is already in the reported non-terminal status
    Unchanged { order_id: String, status: OrderStatus },
    /// Event for a finished order; nothing changed
    AlreadyTerminal { order_id: String, status: OrderStatus },
}

impl LedgerUpdate {
    pub fn applied(&self) -> Option<&AppliedUpdate> {
        match self {
            LedgerUpdate::Applied(update) => Some(update),
            _ => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        !matches!(self, LedgerUpdate::Applied(_))
    }
}
