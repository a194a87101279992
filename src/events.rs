//! Engine events for the notification / observability collaborator
//!
//! Every order-status transition and risk rejection is published on a
//! broadcast channel. Publishing never waits for a consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::domain::OrderStatus;

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    OrderStatus { order_id: String, status: OrderStatus },
    RiskRejected,
    OrderRejected { order_id: String },
    StrategyState { state: String },
    StrategyAutoPaused { consecutive_failures: u32 },
    GatewayDisconnected,
    GatewayReconnected,
    DailyReset,
}

/// Structured event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub severity: Severity,
    pub kind: EventKind,
    pub strategy: Option<String>,
    pub symbol: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(severity: Severity, kind: EventKind, reason: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            strategy: None,
            symbol: None,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Fire-and-forget event publisher
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Log and publish. A send error only means nobody is listening.
    pub fn emit(&self, event: EngineEvent) {
        let strategy = event.strategy.as_deref().unwrap_or("-");
        let symbol = event.symbol.as_deref().unwrap_or("-");
        match event.severity {
            Severity::Info => info!(
                strategy,
                symbol,
                kind = ?event.kind,
                "{}",
                event.reason
            ),
            Severity::Warning => warn!(
                strategy,
                symbol,
                kind = ?event.kind,
                "{}",
                event.reason
            ),
            Severity::Error | Severity::Critical => error!(
                strategy,
                symbol,
                kind = ?event.kind,
                severity = %event.severity,
                "{}",
                event.reason
            ),
        }
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
