use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderSide, OrderType};

/// What a strategy wants to do with its symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
    /// Flatten whatever position is open in the symbol
    Close,
}

impl Direction {
    /// Order side for opening directions; `Close` depends on the position
    pub fn side(&self) -> Option<OrderSide> {
        match self {
            Direction::Buy => Some(OrderSide::Buy),
            Direction::Sell => Some(OrderSide::Sell),
            Direction::Close => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
            Direction::Close => write!(f, "CLOSE"),
        }
    }
}

/// A strategy's recommendation; consumed immediately by the risk manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy: String,
    pub symbol: String,
    pub direction: Direction,
    /// 0..=1
    pub confidence: Decimal,
    /// Price the strategy saw when deciding (used for sizing)
    pub reference_price: Decimal,
    pub suggested_size: Option<Decimal>,
    /// Distance from entry to the protective stop, in price units
    pub stop_distance: Option<Decimal>,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(strategy: &str, symbol: &str, direction: Direction, reference_price: Decimal) -> Self {
        Self {
            strategy: strategy.to_string(),
            symbol: symbol.to_string(),
            direction,
            confidence: Decimal::ONE,
            reference_price,
            suggested_size: None,
            stop_distance: None,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            take_profit: None,
            created_at: Utc::now(),
        }
    }

    pub fn buy(strategy: &str, symbol: &str, price: Decimal) -> Self {
        Self::new(strategy, symbol, Direction::Buy, price)
    }

    pub fn sell(strategy: &str, symbol: &str, price: Decimal) -> Self {
        Self::new(strategy, symbol, Direction::Sell, price)
    }

    pub fn close(strategy: &str, symbol: &str, price: Decimal) -> Self {
        Self::new(strategy, symbol, Direction::Close, price)
    }

    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = confidence.clamp(Decimal::ZERO, Decimal::ONE);
        self
    }

    pub fn with_size(mut self, size: Decimal) -> Self {
        self.suggested_size = Some(size);
        self
    }

    pub fn with_stop_distance(mut self, distance: Decimal) -> Self {
        self.stop_distance = Some(distance);
        self
    }

    pub fn with_take_profit(mut self, price: Decimal) -> Self {
        self.take_profit = Some(price);
        self
    }

    pub fn with_limit(mut self, price: Decimal) -> Self {
        self.order_type = OrderType::Limit;
        self.limit_price = Some(price);
        self
    }

    /// Absolute stop-loss price implied by the stop distance
    pub fn stop_loss_price(&self, side: OrderSide) -> Option<Decimal> {
        self.stop_distance.map(|d| match side {
            OrderSide::Buy => self.reference_price - d,
            OrderSide::Sell => self.reference_price + d,
        })
    }
}
