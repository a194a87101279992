use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderSide;

/// Net position in one symbol (positive = long, negative = short)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_price: Option<Decimal>,
    /// Realized P&L accumulated since the position last opened from flat
    pub open_trade_pnl: Decimal,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// What a single fill did to a position
#[derive(Debug, Clone, PartialEq)]
pub struct FillEffect {
    /// Realized P&L from the closing portion (zero when only adding)
    pub realized: Decimal,
    /// Set when the fill returned the position to flat or flipped it
    pub closed_trade_pnl: Option<Decimal>,
    pub quantity_after: Decimal,
}

impl Position {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_price: None,
            open_trade_pnl: Decimal::ZERO,
            opened_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn side(&self) -> Option<OrderSide> {
        if self.quantity > Decimal::ZERO {
            Some(OrderSide::Buy)
        } else if self.quantity < Decimal::ZERO {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    /// Absolute notional at the last known price (entry price if never marked)
    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.last_price.unwrap_or(self.avg_entry_price)
    }

    /// Unrealized P&L at `price` for the current quantity
    pub fn unrealized_at(&self, price: Decimal) -> Decimal {
        if self.is_flat() {
            return Decimal::ZERO;
        }
        (price - self.avg_entry_price) * self.quantity
    }

    /// Mark to market
    pub fn mark(&mut self, price: Decimal) {
        self.last_price = Some(price);
        self.unrealized_pnl = self.unrealized_at(price);
        self.updated_at = Utc::now();
    }

    /// Apply an executed quantity.
    ///
    /// Reducing fills realize P&L against the average entry; adding fills
    /// re-weight the average; a flip opens the remainder at the fill price.
    pub fn apply_fill(&mut self, side: OrderSide, qty: Decimal, price: Decimal) -> FillEffect {
        let signed_qty = qty * side.sign();
        let old = self.quantity;
        let new = old + signed_qty;
        let mut realized = Decimal::ZERO;
        let mut closed_trade_pnl = None;

        if old.is_zero() {
            self.avg_entry_price = price;
            self.open_trade_pnl = Decimal::ZERO;
            self.opened_at = Some(Utc::now());
        } else if old.is_sign_positive() != signed_qty.is_sign_positive() {
            let closing = old.abs().min(signed_qty.abs());
            let per_unit = if old > Decimal::ZERO {
                price - self.avg_entry_price
            } else {
                self.avg_entry_price - price
            };
            realized = per_unit * closing;
            self.realized_pnl += realized;
            self.open_trade_pnl += realized;

            let flipped = !new.is_zero() && new.is_sign_positive() != old.is_sign_positive();
            if new.is_zero() || flipped {
                closed_trade_pnl = Some(self.open_trade_pnl);
                self.open_trade_pnl = Decimal::ZERO;
            }
            if new.is_zero() {
                self.avg_entry_price = Decimal::ZERO;
                self.opened_at = None;
            } else if flipped {
                self.avg_entry_price = price;
                self.opened_at = Some(Utc::now());
            }
        } else {
            let cost = self.avg_entry_price * old.abs() + price * signed_qty.abs();
            self.avg_entry_price = cost / new.abs();
        }

        self.quantity = new;
        self.mark(price);

        FillEffect {
            realized,
            closed_trade_pnl,
            quantity_after: new,
        }
    }
}
