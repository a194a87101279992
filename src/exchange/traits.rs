use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::mpsc;

use crate::domain::{AccountInfo, Bar, Order, OrderRequest, OrderStatus, Position, TimeRange, Timeframe};
use crate::error::{Result, TradeflowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// In-process simulated venue
    #[default]
    Paper,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paper" | "sim" => Ok(Self::Paper),
            _ => Err("invalid exchange; expected paper"),
        }
    }
}

pub fn parse_exchange_kind(raw: &str) -> Result<ExchangeKind> {
    ExchangeKind::from_str(raw).map_err(|e| TradeflowError::Validation(e.to_string()))
}

/// Order transition reported by a venue.
///
/// Events for one order are delivered in venue order on a single channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrokerEvent {
    Status {
        order_id: String,
        status: OrderStatus,
        reason: Option<String>,
        venue_order_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Incremental execution
    Fill {
        order_id: String,
        quantity: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
}

impl BrokerEvent {
    pub fn status(order_id: &str, status: OrderStatus, reason: Option<String>) -> Self {
        BrokerEvent::Status {
            order_id: order_id.to_string(),
            status,
            reason,
            venue_order_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn fill(order_id: &str, quantity: Decimal, price: Decimal) -> Self {
        BrokerEvent::Fill {
            order_id: order_id.to_string(),
            quantity,
            price,
            timestamp: Utc::now(),
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            BrokerEvent::Status { order_id, .. } | BrokerEvent::Fill { order_id, .. } => order_id,
        }
    }
}

/// Uniform interface over a trading venue.
///
/// `place_order` answers with the venue's view of the order; every later
/// change arrives as a [`BrokerEvent`] on the receiver from
/// `take_event_receiver`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    fn kind(&self) -> ExchangeKind;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Submit an order. The client order id is the idempotency key.
    async fn place_order(&self, request: &OrderRequest) -> Result<Order>;

    /// Fails with `OrderNotFound` or `AlreadyTerminal`
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn get_order(&self, order_id: &str) -> Result<Order>;

    async fn get_positions(&self) -> Result<Vec<Position>>;

    async fn get_account_info(&self) -> Result<AccountInfo>;

    /// Bars in ascending open time
    async fn get_market_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Result<Vec<Bar>>;

    /// Event stream for the ledger (can only be taken once)
    async fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<BrokerEvent>>;
}
