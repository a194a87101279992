//! Order router: signal -> risk admission -> ledger -> venue
//!
//! The only path from a signal to `BrokerGateway::place_order`. Sizing,
//! validation and the PENDING ledger entry happen under the risk manager's
//! admission lock, so the next signal already sees this order's exposure.
//! The venue call itself runs after the lock is released.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::processor::status_event;
use crate::domain::{Order, OrderRequest, OrderStatus, Signal};
use crate::error::{Result, TradeflowError};
use crate::events::{EngineEvent, EventBus, EventKind, Severity};
use crate::exchange::BrokerGateway;
use crate::ledger::{Ledger, LedgerUpdate};
use crate::risk::{ApprovedTrade, RejectReason, RiskManager, SizingMethod};
use crate::strategy::{SignalOutcome, SignalSink};

pub struct OrderRouter {
    risk: Arc<RiskManager>,
    ledger: Arc<Ledger>,
    gateway: Arc<dyn BrokerGateway>,
    events: EventBus,
}

impl OrderRouter {
    pub fn new(
        risk: Arc<RiskManager>,
        ledger: Arc<Ledger>,
        gateway: Arc<dyn BrokerGateway>,
        events: EventBus,
    ) -> Self {
        Self {
            risk,
            ledger,
            gateway,
            events,
        }
    }

    /// Admit, record and submit one signal
    pub async fn submit_signal(&self, signal: Signal, sizing: Option<SizingMethod>) -> SignalOutcome {
        let request = {
            let admission = self.risk.begin_admission().await;
            let exposures = self.ledger.exposures().await;
            let trade = match admission.evaluate(&signal, &exposures, sizing.as_ref()).await {
                Ok(trade) => trade,
                Err(reason) => {
                    self.emit_risk_rejection(&signal, &reason);
                    return SignalOutcome::RiskRejected(reason);
                }
            };

            let request = build_request(&signal, &trade);
            if let Err(e) = self.ledger.open_order(&request).await {
                error!(strategy = %signal.strategy, error = %e, "Could not record admitted order");
                return SignalOutcome::Failed {
                    order_id: request.client_order_id,
                    error: e.to_string(),
                };
            }
            request
        };

        let order_id = request.client_order_id.clone();
        match self.gateway.place_order(&request).await {
            Ok(venue_order) => {
                info!(
                    order_id = %order_id,
                    strategy = %request.strategy,
                    symbol = %request.symbol,
                    side = %request.side,
                    quantity = %request.quantity,
                    venue_status = %venue_order.status,
                    "Order submitted"
                );
                let order = self.ledger.get_order(&order_id).await.unwrap_or(venue_order);
                SignalOutcome::Submitted { order }
            }
            Err(e) if e.is_rejection() => {
                let reason = e.to_string();
                warn!(order_id = %order_id, strategy = %request.strategy, %reason, "Venue rejected order");
                self.apply_local_status(&order_id, OrderStatus::Rejected, &reason)
                    .await;
                SignalOutcome::VenueRejected { order_id, reason }
            }
            Err(e) => {
                error!(
                    order_id = %order_id,
                    strategy = %request.strategy,
                    error = %e,
                    "Order submission failed; order left pending"
                );
                SignalOutcome::Failed {
                    order_id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// `submit_signal` with every non-submission turned into an error
    pub async fn submit_signal_checked(
        &self,
        signal: Signal,
        sizing: Option<SizingMethod>,
    ) -> Result<Order> {
        match self.submit_signal(signal, sizing).await {
            SignalOutcome::Submitted { order } => Ok(order),
            SignalOutcome::RiskRejected(reason) => {
                Err(TradeflowError::RiskLimitExceeded(reason.to_string()))
            }
            SignalOutcome::VenueRejected { reason, .. } => Err(TradeflowError::OrderRejected(reason)),
            SignalOutcome::Failed { error, .. } => Err(TradeflowError::Connection(error)),
        }
    }

    /// Cancel one order at the venue. The terminal status arrives as a
    /// broker event; an order the venue never received is cancelled locally.
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let order = self
            .ledger
            .get_order(order_id)
            .await
            .ok_or_else(|| TradeflowError::OrderNotFound(order_id.to_string()))?;
        if order.is_terminal() {
            return Err(TradeflowError::AlreadyTerminal {
                order_id: order_id.to_string(),
                status: order.status.to_string(),
            });
        }

        match self.gateway.cancel_order(order_id).await {
            Ok(()) => Ok(()),
            Err(TradeflowError::OrderNotFound(_)) if order.status == OrderStatus::Pending => {
                self.apply_local_status(order_id, OrderStatus::Cancelled, "never reached the venue")
                    .await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort cancel of every open order of a strategy
    pub async fn cancel_all_for(&self, strategy: &str) -> usize {
        let orders = self.ledger.open_orders_for_strategy(strategy).await;
        let mut cancelled = 0;
        for order in orders {
            match self.cancel_order(&order.id).await {
                Ok(()) => cancelled += 1,
                Err(TradeflowError::AlreadyTerminal { .. }) => {
                    debug!(order_id = %order.id, "Order finished before cancel");
                }
                Err(e) => warn!(order_id = %order.id, strategy, error = %e, "Cancel failed"),
            }
        }
        cancelled
    }

    /// Ask the venue about every PENDING order and settle it as OPEN or
    /// REJECTED. Run after a reconnection. Returns how many were settled.
    pub async fn reconcile_pending(&self) -> Result<usize> {
        let pending = self.ledger.pending_orders().await;
        if pending.is_empty() {
            return Ok(0);
        }
        info!(count = pending.len(), "Reconciling pending orders");

        let mut settled = 0;
        for order in pending {
            let (status, reason, venue_order_id) = match self.gateway.get_order(&order.id).await {
                Ok(venue) => match venue.status {
                    OrderStatus::Pending => continue,
                    OrderStatus::Rejected => (
                        OrderStatus::Rejected,
                        venue.reason.unwrap_or_else(|| "rejected by venue".to_string()),
                        venue.venue_order_id,
                    ),
                    // fills and cancels follow on the event stream
                    _ => (OrderStatus::Open, "acknowledged on reconcile".to_string(), venue.venue_order_id),
                },
                Err(TradeflowError::OrderNotFound(_)) => {
                    (OrderStatus::Rejected, "not received by venue".to_string(), None)
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Reconcile lookup failed");
                    continue;
                }
            };

            match self
                .ledger
                .apply_status_event(&order.id, status, Some(reason), venue_order_id)
                .await
            {
                Ok(update) => {
                    if let LedgerUpdate::Applied(applied) = &update {
                        self.events.emit(status_event(applied));
                        settled += 1;
                    }
                }
                Err(e) => warn!(order_id = %order.id, error = %e, "Reconcile update failed"),
            }
        }
        Ok(settled)
    }

    async fn apply_local_status(&self, order_id: &str, status: OrderStatus, reason: &str) {
        match self
            .ledger
            .apply_status_event(order_id, status, Some(reason.to_string()), None)
            .await
        {
            Ok(LedgerUpdate::Applied(applied)) => self.events.emit(status_event(&applied)),
            Ok(_) => {}
            Err(e) => error!(order_id, %status, error = %e, "Could not apply local status"),
        }
    }

    fn emit_risk_rejection(&self, signal: &Signal, reason: &RejectReason) {
        self.events.emit(
            EngineEvent::new(Severity::Warning, EventKind::RiskRejected, reason.to_string())
                .with_strategy(&signal.strategy)
                .with_symbol(&signal.symbol),
        );
    }
}

/// The venue request for an approved trade
fn build_request(signal: &Signal, trade: &ApprovedTrade) -> OrderRequest {
    let request = OrderRequest {
        order_type: signal.order_type,
        limit_price: signal.limit_price,
        stop_price: signal.stop_price,
        ..OrderRequest::market(&signal.strategy, &signal.symbol, trade.side, trade.quantity)
    };
    if signal.direction.side().is_none() {
        // flattening orders carry no protection of their own
        return request;
    }
    request.with_protection(trade.stop_loss, signal.take_profit)
}

#[async_trait]
impl SignalSink for OrderRouter {
    async fn route(&self, signal: Signal, sizing: Option<SizingMethod>) -> SignalOutcome {
        self.submit_signal(signal, sizing).await
    }

    async fn cancel_strategy_orders(&self, strategy: &str) -> usize {
        self.cancel_all_for(strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, OrderSide, OrderType};
    use crate::exchange::MockBrokerGateway;
    use crate::risk::{DailyResetSchedule, InstrumentSpec, RiskLimits, SizingConfig};
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn risk() -> Arc<RiskManager> {
        let sizing = SizingConfig {
            method: SizingMethod::Fixed { quantity: dec!(1000) },
            default_instrument: InstrumentSpec {
                lot_step: dec!(1),
                min_quantity: dec!(1),
            },
            ..Default::default()
        };
        let limits = RiskLimits {
            max_position_size: dec!(1500),
            ..Default::default()
        };
        Arc::new(RiskManager::new(limits, sizing, DailyResetSchedule::default()))
    }

    fn router(gateway: MockBrokerGateway) -> (OrderRouter, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::new());
        let router = OrderRouter::new(risk(), ledger.clone(), Arc::new(gateway), EventBus::new(16));
        (router, ledger)
    }

    fn buy() -> Signal {
        Signal::buy("s1", "EURUSD", dec!(1.1000)).with_stop_distance(dec!(0.0050))
    }

    #[tokio::test]
    async fn test_submitted_order_is_pending_until_events() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_place_order()
            .times(1)
            .returning(|request| Ok(Order::from_request(request)));
        let (router, ledger) = router(gateway);

        let order = assert_ok!(router.submit_signal_checked(buy(), None).await);
        assert_eq!(order.quantity, dec!(1000));
        assert_eq!(order.stop_loss, Some(dec!(1.0950)));
        assert_eq!(ledger.get_order(&order.id).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_pending_exposure_blocks_second_signal() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_place_order()
            .times(1)
            .returning(|request| Ok(Order::from_request(request)));
        let (router, _ledger) = router(gateway);

        assert!(router.submit_signal(buy(), None).await.is_submitted());
        // 1000 pending + 1000 would exceed the 1500 limit
        let second = router.submit_signal(buy(), None).await;
        assert!(matches!(
            second,
            SignalOutcome::RiskRejected(RejectReason::PositionLimit { .. })
                | SignalOutcome::RiskRejected(RejectReason::SymbolPositionLimit { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_signals_admitted_one_at_a_time() {
        let mut gateway = MockBrokerGateway::new();
        gateway.expect_place_order().times(1).returning(|request| {
            // slow venue: the other signal is admitted while this call is in flight
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(Order::from_request(request))
        });
        let (router, ledger) = router(gateway);
        let router = Arc::new(router);

        let first = tokio::spawn({
            let router = router.clone();
            async move { router.submit_signal(buy(), None).await }
        });
        let second = tokio::spawn({
            let router = router.clone();
            async move { router.submit_signal(buy(), None).await }
        });
        let (first, second) = tokio::join!(first, second);
        let outcomes = [first.unwrap(), second.unwrap()];

        let submitted = outcomes.iter().filter(|o| o.is_submitted()).count();
        let limited = outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    SignalOutcome::RiskRejected(RejectReason::PositionLimit { .. })
                        | SignalOutcome::RiskRejected(RejectReason::SymbolPositionLimit { .. })
                )
            })
            .count();
        assert_eq!(submitted, 1);
        assert_eq!(limited, 1);
        assert_eq!(ledger.get_open_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_opposing_pending_orders_do_not_free_capacity() {
        let (router, ledger) = router(MockBrokerGateway::new());
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let request = OrderRequest::market("s1", "EURUSD", side, dec!(1000));
            ledger.open_order(&request).await.unwrap();
        }

        // if the pending sell is cancelled the account would be 2500 long
        let outcome = router
            .submit_signal(buy(), Some(SizingMethod::Fixed { quantity: dec!(1500) }))
            .await;
        assert!(matches!(
            outcome,
            SignalOutcome::RiskRejected(RejectReason::PositionLimit { projected, .. })
                if projected == dec!(2500)
        ));
        assert_eq!(ledger.get_open_orders().await.len(), 2);
    }

    #[tokio::test]
    async fn test_venue_rejection_marks_order_rejected() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_place_order()
            .times(1)
            .returning(|_| Err(TradeflowError::OrderRejected("market closed".into())));
        let (router, ledger) = router(gateway);

        let outcome = router.submit_signal(buy(), None).await;
        let SignalOutcome::VenueRejected { order_id, reason } = outcome else {
            panic!("expected venue rejection, got {:?}", outcome);
        };
        assert!(reason.contains("market closed"));
        let order = ledger.get_order(&order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        // rejected orders release their reservation
        assert!(ledger.exposures().await.iter().all(|e| !e.has_working()));
    }

    #[tokio::test]
    async fn test_connection_failure_leaves_pending() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_place_order()
            .returning(|_| Err(TradeflowError::Connection("down".into())));
        let (router, ledger) = router(gateway);

        let err = assert_err!(router.submit_signal_checked(buy(), None).await);
        assert!(matches!(err, TradeflowError::Connection(_)));
        assert_eq!(ledger.pending_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_risk_rejection_is_typed() {
        let (router, ledger) = router(MockBrokerGateway::new());
        let close = Signal::close("s1", "EURUSD", dec!(1.1));
        let outcome = router.submit_signal(close, None).await;
        assert!(matches!(
            outcome,
            SignalOutcome::RiskRejected(RejectReason::NothingToClose { .. })
        ));
        assert!(ledger.get_open_orders().await.is_empty());

        let err = assert_err!(
            router
                .submit_signal_checked(Signal::close("s1", "EURUSD", dec!(1.1)), None)
                .await
        );
        assert!(matches!(err, TradeflowError::RiskLimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_reconcile_pending() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_place_order()
            .returning(|_| Err(TradeflowError::Connection("down".into())));
        gateway.expect_get_order().returning(|id| {
            if id.starts_with('x') {
                Err(TradeflowError::OrderNotFound(id.to_string()))
            } else {
                let request = OrderRequest::market("s1", "EURUSD", OrderSide::Buy, dec!(1));
                let mut order = Order::from_request(&request);
                order.id = id.to_string();
                order.status = OrderStatus::Filled;
                order.venue_order_id = Some("V-1".into());
                Ok(order)
            }
        });
        let (router, ledger) = router(gateway);

        let SignalOutcome::Failed { order_id, .. } = router.submit_signal(buy(), None).await else {
            panic!("expected failure");
        };
        let mut lost = OrderRequest::market("s1", "GBPUSD", OrderSide::Sell, dec!(10));
        lost.client_order_id = "x-lost".into();
        ledger.open_order(&lost).await.unwrap();

        assert_eq!(router.reconcile_pending().await.unwrap(), 2);
        let known = ledger.get_order(&order_id).await.unwrap();
        assert_eq!(known.status, OrderStatus::Open);
        assert_eq!(known.venue_order_id.as_deref(), Some("V-1"));
        assert_eq!(ledger.get_order("x-lost").await.unwrap().status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn test_cancel_pending_order_unknown_to_venue() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_cancel_order()
            .returning(|id| Err(TradeflowError::OrderNotFound(id.to_string())));
        let (router, ledger) = router(gateway);
        let request = OrderRequest::market("s1", "EURUSD", OrderSide::Buy, dec!(10));
        ledger.open_order(&request).await.unwrap();

        assert_eq!(router.cancel_all_for("s1").await, 1);
        assert_eq!(
            ledger.get_order(&request.client_order_id).await.unwrap().status,
            OrderStatus::Cancelled
        );
        assert_eq!(router.cancel_all_for("s1").await, 0);
    }

    #[test]
    fn test_close_request_has_no_protection() {
        let signal = Signal::close("s1", "EURUSD", dec!(1.1)).with_stop_distance(dec!(0.01));
        let trade = ApprovedTrade {
            side: OrderSide::Sell,
            quantity: dec!(100),
            stop_loss: Some(dec!(1.11)),
        };
        let request = build_request(&signal, &trade);
        assert_eq!(signal.direction, Direction::Close);
        assert_eq!(request.stop_loss, None);
        assert_eq!(request.order_type, OrderType::Market);
    }
}
