use thiserror::Error;

/// Main error type for the execution engine
#[derive(Error, Debug)]
pub enum TradeflowError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Broker connectivity
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Broker call timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    // Order execution errors
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} is already {status}")]
    AlreadyTerminal { order_id: String, status: String },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Risk management errors
    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    #[error("Sizing error: {0}")]
    Sizing(String),

    // Market data errors
    #[error("Data error: {0}")]
    Data(String),

    // Strategy errors
    #[error("Strategy error: {0}")]
    Strategy(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TradeflowError {
    /// Failures worth retrying with backoff (the venue may come back).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TradeflowError::Connection(_) | TradeflowError::Timeout { .. }
        )
    }

    /// Permanent venue-side refusals. Never retried.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TradeflowError::OrderRejected(_) | TradeflowError::InsufficientBalance { .. }
        )
    }
}

/// Result type alias for TradeflowError
pub type Result<T> = std::result::Result<T, TradeflowError>;

/// Specific error types for ledger bookkeeping
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Fill of {fill} exceeds remaining {remaining} on order {order_id}")]
    Overfill {
        order_id: String,
        fill: rust_decimal::Decimal,
        remaining: rust_decimal::Decimal,
    },

    #[error("Fill quantity must be positive, got {qty}")]
    NonPositiveFill { qty: rust_decimal::Decimal },

    #[error("Max retries exceeded: {attempts}")]
    MaxRetriesExceeded { attempts: u32 },
}

impl From<OrderError> for TradeflowError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound { order_id } => TradeflowError::OrderNotFound(order_id),
            OrderError::MaxRetriesExceeded { attempts } => TradeflowError::Connection(format!(
                "gave up after {} attempts",
                attempts
            )),
            other => TradeflowError::Validation(other.to_string()),
        }
    }
}
