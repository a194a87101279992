//! Connection-state wrapper around a venue adapter
//!
//! - `connect` and `place_order` are retried on transient failures with
//!   bounded exponential backoff
//! - every venue call carries a timeout
//! - once retries are exhausted the gateway is DISCONNECTED and new calls
//!   fail fast without touching the venue until `reconnect` succeeds
//! - venue rejections are returned as-is and never retried

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::traits::{BrokerEvent, BrokerGateway, ExchangeKind};
use crate::domain::{AccountInfo, Bar, Order, OrderRequest, Position, TimeRange, Timeframe};
use crate::error::{OrderError, Result, TradeflowError};
use crate::events::{EngineEvent, EventBus, EventKind, Severity};

/// Retry and timeout settings for venue calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            call_timeout_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based): base * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
        }
    }
}

pub struct ResilientGateway {
    inner: Arc<dyn BrokerGateway>,
    policy: RetryPolicy,
    state: AtomicU8,
    events: Option<EventBus>,
}

impl ResilientGateway {
    pub fn new(inner: Arc<dyn BrokerGateway>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(next.as_u8(), Ordering::SeqCst));
        if previous == next {
            return;
        }
        info!(from = %previous, to = %next, "Gateway connection state changed");
        if let Some(events) = &self.events {
            let (severity, kind) = match next {
                ConnectionState::Disconnected => (Severity::Error, EventKind::GatewayDisconnected),
                ConnectionState::Connected => (Severity::Info, EventKind::GatewayReconnected),
            };
            events.emit(EngineEvent::new(
                severity,
                kind,
                format!("gateway {}", next.to_string().to_lowercase()),
            ));
        }
    }

    fn ensure_connected(&self, operation: &str) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => {
                debug!(operation, "Gateway disconnected, failing fast");
                Err(TradeflowError::Connection(format!(
                    "gateway disconnected; {} not sent",
                    operation
                )))
            }
        }
    }

    /// One venue call bounded by the call timeout
    async fn timed<T, Fut>(&self, operation: &str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.policy.call_timeout();
        match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(TradeflowError::Timeout {
                operation: operation.to_string(),
                elapsed_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Retry transient failures; mark the gateway disconnected on exhaustion
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.timed(operation, call()).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempts >= self.policy.max_attempts {
                        error!(
                            operation,
                            attempts,
                            "Venue call failed after {} attempts: {}",
                            attempts,
                            e
                        );
                        self.set_state(ConnectionState::Disconnected);
                        return Err(OrderError::MaxRetriesExceeded { attempts }.into());
                    }

                    let delay = self.policy.backoff(attempts);
                    warn!(
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Venue call failed: {}. Retrying...",
                        e
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Explicit reconnection after a disconnect
    pub async fn reconnect(&self) -> Result<()> {
        info!(venue = %self.inner.kind(), "Reconnecting gateway");
        self.connect().await
    }
}

#[async_trait]
impl BrokerGateway for ResilientGateway {
    fn kind(&self) -> ExchangeKind {
        self.inner.kind()
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    async fn connect(&self) -> Result<()> {
        self.with_retry("connect", || self.inner.connect()).await?;
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_state(ConnectionState::Disconnected);
        self.timed("disconnect", self.inner.disconnect()).await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        self.ensure_connected("place_order")?;
        self.with_retry("place_order", || self.inner.place_order(request))
            .await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.ensure_connected("cancel_order")?;
        self.timed("cancel_order", self.inner.cancel_order(order_id))
            .await
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        self.ensure_connected("get_order")?;
        self.timed("get_order", self.inner.get_order(order_id)).await
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        self.ensure_connected("get_positions")?;
        self.timed("get_positions", self.inner.get_positions()).await
    }

    async fn get_account_info(&self) -> Result<AccountInfo> {
        self.ensure_connected("get_account_info")?;
        self.timed("get_account_info", self.inner.get_account_info())
            .await
    }

    async fn get_market_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Result<Vec<Bar>> {
        self.ensure_connected("get_market_data")?;
        self.timed(
            "get_market_data",
            self.inner.get_market_data(symbol, timeframe, range),
        )
        .await
    }

    async fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<BrokerEvent>> {
        self.inner.take_event_receiver().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;
    use crate::exchange::traits::MockBrokerGateway;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
            call_timeout_ms: 1_000,
        }
    }

    fn connected_mock() -> MockBrokerGateway {
        let mut mock = MockBrokerGateway::new();
        mock.expect_connect().returning(|| Ok(()));
        mock.expect_kind().returning(|| ExchangeKind::Paper);
        mock
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
            call_timeout_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_three_failures_disconnect_and_fail_fast() {
        let mut mock = connected_mock();
        mock.expect_place_order()
            .times(3)
            .returning(|_| Err(TradeflowError::Connection("connection reset".into())));

        let gateway = ResilientGateway::new(Arc::new(mock), fast_policy());
        assert_ok!(gateway.connect().await);
        assert_eq!(gateway.state(), ConnectionState::Connected);

        let request = OrderRequest::market("s", "EURUSD", OrderSide::Buy, dec!(1000));
        let err = gateway.place_order(&request).await.unwrap_err();
        assert!(matches!(err, TradeflowError::Connection(_)));
        assert_eq!(gateway.state(), ConnectionState::Disconnected);

        // The mock allows exactly three calls; a fourth would panic
        let err = gateway.place_order(&request).await.unwrap_err();
        assert!(matches!(err, TradeflowError::Connection(_)));
        assert_err!(gateway.get_account_info().await);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let mut mock = connected_mock();
        mock.expect_place_order()
            .times(1)
            .returning(|_| Err(TradeflowError::OrderRejected("unknown symbol".into())));

        let gateway = ResilientGateway::new(Arc::new(mock), fast_policy());
        gateway.connect().await.unwrap();
        let request = OrderRequest::market("s", "XXXYYY", OrderSide::Buy, dec!(1));
        let err = gateway.place_order(&request).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(gateway.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let mut mock = connected_mock();
        let mut calls = 0;
        mock.expect_place_order().times(2).returning(move |request| {
            calls += 1;
            if calls == 1 {
                Err(TradeflowError::Connection("timeout".into()))
            } else {
                let mut order = Order::from_request(request);
                order.status = crate::domain::OrderStatus::Open;
                Ok(order)
            }
        });

        let gateway = ResilientGateway::new(Arc::new(mock), fast_policy());
        gateway.connect().await.unwrap();
        let request = OrderRequest::market("s", "EURUSD", OrderSide::Sell, dec!(5));
        let order = gateway.place_order(&request).await.unwrap();
        assert_eq!(order.id, request.client_order_id);
        assert!(gateway.is_connected());
    }

    #[tokio::test]
    async fn test_connect_exhaustion_and_reconnect() {
        let mut mock = MockBrokerGateway::new();
        let mut calls = 0;
        mock.expect_connect().times(4).returning(move || {
            calls += 1;
            if calls <= 3 {
                Err(TradeflowError::Connection("refused".into()))
            } else {
                Ok(())
            }
        });
        mock.expect_kind().returning(|| ExchangeKind::Paper);

        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let gateway = ResilientGateway::new(Arc::new(mock), fast_policy()).with_events(events);

        assert_err!(gateway.connect().await);
        assert_eq!(gateway.state(), ConnectionState::Disconnected);

        assert_ok!(gateway.reconnect().await);
        assert_eq!(gateway.state(), ConnectionState::Connected);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::GatewayReconnected);
    }
}
