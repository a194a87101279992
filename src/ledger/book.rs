//! Position & order ledger
//!
//! The authoritative record of orders and positions. Orders enter through
//! [`Ledger::open_order`] as PENDING; after that only broker events change
//! them, through [`Ledger::apply_fill_event`] and [`Ledger::apply_status_event`].
//! Orders and positions live behind one lock so a fill updates both atomically.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::outcome::{AppliedUpdate, ClosedTrade, Fill, LedgerUpdate};
use crate::domain::{Order, OrderRequest, OrderSide, OrderStatus, Position};
use crate::error::{OrderError, Result, TradeflowError};
use crate::risk::Exposure;

#[derive(Default)]
struct LedgerState {
    orders: HashMap<String, Order>,
    positions: HashMap<String, Position>,
    last_prices: HashMap<String, Decimal>,
}

#[derive(Default)]
pub struct Ledger {
    state: RwLock<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Entry points ====================

    /// Record an admitted order as PENDING. Its remaining quantity counts
    /// toward exposure from this moment.
    pub async fn open_order(&self, request: &OrderRequest) -> Result<Order> {
        request.validate()?;
        let mut state = self.state.write().await;
        if state.orders.contains_key(&request.client_order_id) {
            return Err(TradeflowError::Validation(format!(
                "order {} already exists",
                request.client_order_id
            )));
        }
        let order = Order::from_request(request);
        debug!(
            order_id = %order.id,
            strategy = %order.strategy,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            "Order recorded as pending"
        );
        state.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    /// Apply an incremental fill of `quantity` at `price`
    pub async fn apply_fill_event(
        &self,
        order_id: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<LedgerUpdate> {
        if quantity <= Decimal::ZERO {
            return Err(OrderError::NonPositiveFill { qty: quantity }.into());
        }
        if price <= Decimal::ZERO {
            return Err(TradeflowError::Validation(format!(
                "fill price must be positive, got {}",
                price
            )));
        }

        let mut state = self.state.write().await;
        let LedgerState {
            orders,
            positions,
            last_prices,
        } = &mut *state;

        let order = orders.get_mut(order_id).ok_or_else(|| OrderError::NotFound {
            order_id: order_id.to_string(),
        })?;

        if order.is_terminal() {
            warn!(order_id, status = %order.status, "Fill for terminal order ignored");
            return Ok(LedgerUpdate::AlreadyTerminal {
                order_id: order_id.to_string(),
                status: order.status,
            });
        }

        let remaining = order.remaining();
        if quantity > remaining {
            return Err(OrderError::Overfill {
                order_id: order_id.to_string(),
                fill: quantity,
                remaining,
            }
            .into());
        }

        let next = if quantity == remaining {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        if !order.status.can_transition_to(next) {
            return Err(TradeflowError::InvalidStateTransition {
                from: order.status.to_string(),
                to: next.to_string(),
            });
        }

        let previous = order.status;
        let prior_cost = order.avg_fill_price.unwrap_or(Decimal::ZERO) * order.filled_quantity;
        order.filled_quantity += quantity;
        order.avg_fill_price = Some((prior_cost + price * quantity) / order.filled_quantity);
        order.status = next;
        order.updated_at = Utc::now();

        let fill = Fill {
            order_id: order.id.clone(),
            strategy: order.strategy.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity,
            price,
            timestamp: order.updated_at,
        };

        let position = positions
            .entry(order.symbol.clone())
            .or_insert_with(|| Position::new(&order.symbol));
        let effect = position.apply_fill(order.side, quantity, price);
        last_prices.insert(order.symbol.clone(), price);

        let closed_trade = effect.closed_trade_pnl.map(|pnl| ClosedTrade {
            strategy: order.strategy.clone(),
            symbol: order.symbol.clone(),
            pnl,
        });

        info!(
            order_id,
            symbol = %order.symbol,
            side = %order.side,
            qty = %quantity,
            price = %price,
            filled = %order.filled_quantity,
            status = %order.status,
            position = %effect.quantity_after,
            realized = %effect.realized,
            "Fill applied"
        );

        Ok(LedgerUpdate::Applied(Box::new(AppliedUpdate {
            order: order.clone(),
            previous,
            fill: Some(fill),
            effect: Some(effect),
            closed_trade,
        })))
    }

    /// Apply a status change reported by the venue.
    ///
    /// Fill statuses come from [`Ledger::apply_fill_event`]; reporting them
    /// here without a quantity is an error.
    pub async fn apply_status_event(
        &self,
        order_id: &str,
        status: OrderStatus,
        reason: Option<String>,
        venue_order_id: Option<String>,
    ) -> Result<LedgerUpdate> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderError::NotFound {
                order_id: order_id.to_string(),
            })?;

        if order.is_terminal() {
            debug!(order_id, current = %order.status, reported = %status, "Status for terminal order ignored");
            return Ok(LedgerUpdate::AlreadyTerminal {
                order_id: order_id.to_string(),
                status: order.status,
            });
        }
        if venue_order_id.is_some() && order.venue_order_id.is_none() {
            order.venue_order_id = venue_order_id;
        }
        if order.status == status {
            return Ok(LedgerUpdate::Unchanged {
                order_id: order_id.to_string(),
                status,
            });
        }
        if matches!(status, OrderStatus::PartiallyFilled | OrderStatus::Filled) {
            return Err(TradeflowError::Validation(format!(
                "status {} for order {} must be reported as a fill",
                status, order_id
            )));
        }
        if !order.status.can_transition_to(status) {
            return Err(TradeflowError::InvalidStateTransition {
                from: order.status.to_string(),
                to: status.to_string(),
            });
        }

        let previous = order.status;
        order.status = status;
        if reason.is_some() {
            order.reason = reason;
        }
        order.updated_at = Utc::now();

        info!(
            order_id,
            from = %previous,
            to = %status,
            reason = order.reason.as_deref().unwrap_or(""),
            "Order status updated"
        );

        Ok(LedgerUpdate::Applied(Box::new(AppliedUpdate {
            order: order.clone(),
            previous,
            fill: None,
            effect: None,
            closed_trade: None,
        })))
    }

    /// Update the mark price for a symbol (unrealized P&L only)
    pub async fn mark_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.write().await;
        state.last_prices.insert(symbol.to_string(), price);
        if let Some(position) = state.positions.get_mut(symbol) {
            position.mark(price);
        }
    }

    // ==================== Queries ====================

    pub async fn get_order(&self, order_id: &str) -> Option<Order> {
        self.state.read().await.orders.get(order_id).cloned()
    }

    pub async fn get_position(&self, symbol: &str) -> Option<Position> {
        self.state.read().await.positions.get(symbol).cloned()
    }

    /// All positions, flat ones included, sorted by symbol
    pub async fn positions(&self) -> Vec<Position> {
        let state = self.state.read().await;
        let mut positions: Vec<Position> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions()
            .await
            .into_iter()
            .filter(|p| !p.is_flat())
            .collect()
    }

    /// Non-terminal orders, oldest first
    pub async fn get_open_orders(&self) -> Vec<Order> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| !o.is_terminal())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    pub async fn pending_orders(&self) -> Vec<Order> {
        self.get_open_orders()
            .await
            .into_iter()
            .filter(|o| o.status == OrderStatus::Pending)
            .collect()
    }

    pub async fn open_orders_for_strategy(&self, strategy: &str) -> Vec<Order> {
        self.get_open_orders()
            .await
            .into_iter()
            .filter(|o| o.strategy == strategy)
            .collect()
    }

    /// Signed filled quantity over every order in `symbol`
    pub async fn signed_fill_total(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.symbol == symbol)
            .map(|o| o.filled_quantity * o.side.sign())
            .sum()
    }

    /// Exposure per symbol: filled position plus working buys and sells
    pub async fn exposures(&self) -> Vec<Exposure> {
        let state = self.state.read().await;
        let mut by_symbol: HashMap<&str, Exposure> = HashMap::new();

        for position in state.positions.values() {
            let entry = by_symbol
                .entry(position.symbol.as_str())
                .or_insert_with(|| Exposure::flat(&position.symbol));
            entry.position = position.quantity;
        }
        for order in state.orders.values().filter(|o| !o.is_terminal()) {
            let entry = by_symbol
                .entry(order.symbol.as_str())
                .or_insert_with(|| Exposure::flat(&order.symbol));
            match order.side {
                OrderSide::Buy => entry.working_buys += order.remaining(),
                OrderSide::Sell => entry.working_sells += order.remaining(),
            }
            if entry.price.is_zero() {
                entry.price = order.limit_price.or(order.stop_price).unwrap_or(Decimal::ZERO);
            }
        }
        for (symbol, exposure) in by_symbol.iter_mut() {
            if let Some(price) = state.last_prices.get(*symbol) {
                exposure.price = *price;
            } else if let Some(position) = state.positions.get(*symbol) {
                if !position.avg_entry_price.is_zero() {
                    exposure.price = position.avg_entry_price;
                }
            }
        }

        let mut exposures: Vec<Exposure> = by_symbol.into_values().collect();
        exposures.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        exposures
    }

    pub async fn total_realized_pnl(&self) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .values()
            .map(|p| p.realized_pnl)
            .sum()
    }

    pub async fn total_unrealized_pnl(&self) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .values()
            .map(|p| p.unrealized_pnl)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn open(ledger: &Ledger, side: OrderSide, qty: Decimal) -> Order {
        let request = OrderRequest::market("sma", "EURUSD", side, qty);
        let order = ledger.open_order(&request).await.unwrap();
        ledger
            .apply_status_event(&order.id, OrderStatus::Open, None, Some("V1".into()))
            .await
            .unwrap();
        order
    }

    #[tokio::test]
    async fn test_round_trip_returns_to_zero() {
        let ledger = Ledger::new();
        let buy = open(&ledger, OrderSide::Buy, dec!(1000)).await;
        ledger.apply_fill_event(&buy.id, dec!(1000), dec!(1.1000)).await.unwrap();

        let sell = open(&ledger, OrderSide::Sell, dec!(1000)).await;
        let update = ledger.apply_fill_event(&sell.id, dec!(1000), dec!(1.1050)).await.unwrap();
        let applied = update.applied().unwrap();
        assert_eq!(applied.realized(), dec!(5));
        assert_eq!(
            applied.closed_trade.as_ref().map(|t| t.pnl),
            Some(dec!(5))
        );

        let position = ledger.get_position("EURUSD").await.unwrap();
        assert_eq!(position.quantity, Decimal::ZERO);
        assert_eq!(position.realized_pnl, dec!(5.0000));
        assert_eq!(ledger.signed_fill_total("EURUSD").await, Decimal::ZERO);
        assert!(ledger.get_open_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_partial_fills_track_position() {
        let ledger = Ledger::new();
        let order = open(&ledger, OrderSide::Sell, dec!(300)).await;

        for (qty, price) in [(dec!(100), dec!(10)), (dec!(50), dec!(11)), (dec!(150), dec!(12))] {
            ledger.apply_fill_event(&order.id, qty, price).await.unwrap();
            let position = ledger.get_position("EURUSD").await.unwrap();
            assert_eq!(position.quantity, ledger.signed_fill_total("EURUSD").await);
        }

        let order = ledger.get_order(&order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(300));
        // (1000 + 550 + 1800) / 300
        assert_eq!(order.avg_fill_price.unwrap().round_dp(4), dec!(11.1667));
        assert_eq!(order.venue_order_id.as_deref(), Some("V1"));
    }

    #[tokio::test]
    async fn test_terminal_event_twice_is_noop() {
        let ledger = Ledger::new();
        let order = open(&ledger, OrderSide::Buy, dec!(100)).await;
        let first = ledger
            .apply_status_event(&order.id, OrderStatus::Cancelled, Some("user".into()), None)
            .await
            .unwrap();
        assert!(!first.is_noop());

        let second = ledger
            .apply_status_event(&order.id, OrderStatus::Cancelled, None, None)
            .await
            .unwrap();
        assert!(matches!(
            second,
            LedgerUpdate::AlreadyTerminal { status: OrderStatus::Cancelled, .. }
        ));

        let late_fill = ledger.apply_fill_event(&order.id, dec!(100), dec!(1)).await.unwrap();
        assert!(late_fill.is_noop());
        assert!(ledger.get_position("EURUSD").await.is_none());
        assert_eq!(
            ledger.get_order(&order.id).await.unwrap().reason.as_deref(),
            Some("user")
        );
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let ledger = Ledger::new();
        let request = OrderRequest::market("sma", "EURUSD", OrderSide::Buy, dec!(100));
        let order = ledger.open_order(&request).await.unwrap();

        // Fill before acknowledgement
        let err = ledger.apply_fill_event(&order.id, dec!(10), dec!(1)).await.unwrap_err();
        assert!(matches!(err, TradeflowError::InvalidStateTransition { .. }));

        // Same status again is a no-op
        let same = ledger
            .apply_status_event(&order.id, OrderStatus::Pending, None, None)
            .await
            .unwrap();
        assert!(matches!(same, LedgerUpdate::Unchanged { .. }));

        ledger
            .apply_status_event(&order.id, OrderStatus::Open, None, None)
            .await
            .unwrap();
        let err = ledger.apply_fill_event(&order.id, dec!(101), dec!(1)).await.unwrap_err();
        assert!(matches!(err, TradeflowError::Validation(_)));

        ledger.apply_fill_event(&order.id, dec!(40), dec!(1)).await.unwrap();
        let err = ledger
            .apply_status_event(&order.id, OrderStatus::Rejected, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TradeflowError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let ledger = Ledger::new();
        let err = ledger
            .apply_status_event("missing", OrderStatus::Open, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TradeflowError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_exposures_include_working_orders() {
        let ledger = Ledger::new();
        let filled = open(&ledger, OrderSide::Buy, dec!(1000)).await;
        ledger.apply_fill_event(&filled.id, dec!(400), dec!(1.2)).await.unwrap();

        let request = OrderRequest::market("sma", "GBPUSD", OrderSide::Sell, dec!(500));
        ledger.open_order(&request).await.unwrap();

        let exposures = ledger.exposures().await;
        assert_eq!(exposures.len(), 2);
        let eur = &exposures[0];
        assert_eq!(eur.symbol, "EURUSD");
        assert_eq!(eur.position, dec!(400));
        assert_eq!(eur.working_buys, dec!(600));
        assert_eq!(eur.working_sells, Decimal::ZERO);
        assert_eq!(eur.price, dec!(1.2));
        let gbp = &exposures[1];
        assert_eq!(gbp.projected(), dec!(-500));
    }

    #[tokio::test]
    async fn test_exposures_keep_working_sides_apart() {
        let ledger = Ledger::new();
        open(&ledger, OrderSide::Buy, dec!(1000)).await;
        open(&ledger, OrderSide::Sell, dec!(1000)).await;

        let exposures = ledger.exposures().await;
        let eur = &exposures[0];
        assert_eq!(eur.working_buys, dec!(1000));
        assert_eq!(eur.working_sells, dec!(1000));
        assert_eq!(eur.projected(), Decimal::ZERO);
        assert_eq!(eur.peak(), dec!(1000));
        assert!(eur.is_open());
    }

    #[tokio::test]
    async fn test_mark_price_updates_unrealized() {
        let ledger = Ledger::new();
        let order = open(&ledger, OrderSide::Buy, dec!(100)).await;
        ledger.apply_fill_event(&order.id, dec!(100), dec!(10)).await.unwrap();
        ledger.mark_price("EURUSD", dec!(10.5)).await;
        assert_eq!(ledger.total_unrealized_pnl().await, dec!(50.0));
        assert_eq!(ledger.total_realized_pnl().await, Decimal::ZERO);
        assert_eq!(ledger.open_positions().await.len(), 1);
    }
}
