//! Point-in-time engine snapshot for the CLI and logs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::Tabled;

use crate::domain::{Order, Position};
use crate::exchange::ConnectionState;
use crate::risk::RiskCounters;
use crate::strategy::{StrategyPerformance, StrategyStatus};

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub connection: ConnectionState,
    pub positions: Vec<Position>,
    pub open_orders: Vec<Order>,
    pub strategies: Vec<StrategyStatus>,
    pub performance: Vec<StrategyPerformance>,
    pub risk: RiskCounters,
    pub accepted_signals: u64,
    pub rejected_signals: u64,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

impl EngineSnapshot {
    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    pub fn position_rows(&self) -> Vec<PositionRow> {
        self.positions.iter().map(PositionRow::from).collect()
    }

    pub fn order_rows(&self) -> Vec<OrderRow> {
        self.open_orders.iter().map(OrderRow::from).collect()
    }

    pub fn strategy_rows(&self) -> Vec<StrategyRow> {
        self.strategies
            .iter()
            .map(|status| {
                let perf = self.performance.iter().find(|p| p.strategy == status.name);
                StrategyRow::new(status, perf)
            })
            .collect()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} | positions {} | open orders {} | realized {} | unrealized {} | signals {}/{} accepted",
            self.connection,
            self.positions.len(),
            self.open_orders.len(),
            self.realized_pnl.round_dp(2),
            self.unrealized_pnl.round_dp(2),
            self.accepted_signals,
            self.accepted_signals + self.rejected_signals,
        )
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct PositionRow {
    #[tabled(rename = "Symbol")]
    pub symbol: String,
    #[tabled(rename = "Qty")]
    pub quantity: Decimal,
    #[tabled(rename = "Avg Entry")]
    pub avg_entry_price: Decimal,
    #[tabled(rename = "Realized")]
    pub realized_pnl: Decimal,
    #[tabled(rename = "Unrealized")]
    pub unrealized_pnl: Decimal,
}

impl From<&Position> for PositionRow {
    fn from(p: &Position) -> Self {
        Self {
            symbol: p.symbol.clone(),
            quantity: p.quantity,
            avg_entry_price: p.avg_entry_price.round_dp(5),
            realized_pnl: p.realized_pnl.round_dp(2),
            unrealized_pnl: p.unrealized_pnl.round_dp(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct OrderRow {
    #[tabled(rename = "Order")]
    pub id: String,
    #[tabled(rename = "Strategy")]
    pub strategy: String,
    #[tabled(rename = "Symbol")]
    pub symbol: String,
    #[tabled(rename = "Side")]
    pub side: String,
    #[tabled(rename = "Type")]
    pub order_type: String,
    #[tabled(rename = "Filled")]
    pub filled: String,
    #[tabled(rename = "Status")]
    pub status: String,
}

impl From<&Order> for OrderRow {
    fn from(o: &Order) -> Self {
        Self {
            id: o.id.clone(),
            strategy: o.strategy.clone(),
            symbol: o.symbol.clone(),
            side: o.side.to_string(),
            order_type: o.order_type.to_string(),
            filled: format!("{}/{}", o.filled_quantity, o.quantity),
            status: o.status.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct StrategyRow {
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Type")]
    pub kind: String,
    #[tabled(rename = "Symbol")]
    pub symbol: String,
    #[tabled(rename = "State")]
    pub state: String,
    #[tabled(rename = "Uptime")]
    pub uptime: String,
    #[tabled(rename = "Signals")]
    pub signals: u64,
    #[tabled(rename = "Trades")]
    pub trades: u64,
    #[tabled(rename = "Win %")]
    pub win_rate: String,
    #[tabled(rename = "P&L")]
    pub realized_pnl: Decimal,
}

impl StrategyRow {
    fn new(status: &StrategyStatus, perf: Option<&StrategyPerformance>) -> Self {
        let perf = perf.cloned().unwrap_or_default();
        Self {
            name: status.name.clone(),
            kind: status.kind.clone(),
            symbol: status.symbol.clone(),
            state: status.state.to_string(),
            uptime: status.uptime(),
            signals: perf.signals,
            trades: perf.trades,
            win_rate: format!("{:.1}", perf.win_rate() * Decimal::ONE_HUNDRED),
            realized_pnl: perf.realized_pnl.round_dp(2),
        }
    }
}
