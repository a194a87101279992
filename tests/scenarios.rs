//! End-to-end behaviour of the sizing, risk, ledger and gateway layers.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use tradeflow::domain::{
    AccountInfo, Bar, Order, OrderRequest, OrderSide, OrderStatus, Position, Signal, TimeRange,
    Timeframe,
};
use tradeflow::engine::OrderRouter;
use tradeflow::error::Result;
use tradeflow::events::EventBus;
use tradeflow::exchange::{
    BrokerEvent, BrokerGateway, ConnectionState, ExchangeKind, PaperBroker, PaperConfig,
    ResilientGateway, RetryPolicy, SyntheticBars,
};
use tradeflow::ledger::Ledger;
use tradeflow::risk::{
    raw_size, DailyResetSchedule, InstrumentSpec, RejectReason, RiskLimits, RiskManager,
    SizingConfig, SizingMethod,
};
use tradeflow::strategy::SignalOutcome;

fn unit_lots() -> SizingConfig {
    SizingConfig {
        method: SizingMethod::Fixed { quantity: dec!(1000) },
        default_instrument: InstrumentSpec {
            lot_step: dec!(1),
            min_quantity: dec!(1),
        },
        instruments: HashMap::new(),
    }
}

async fn risk_manager(limits: RiskLimits) -> Arc<RiskManager> {
    let risk = Arc::new(RiskManager::new(limits, unit_lots(), DailyResetSchedule::default()));
    risk.update_equity(dec!(100000)).await;
    risk
}

#[test]
fn scenario_a_risk_based_size_before_rounding() {
    let method = SizingMethod::RiskBased { risk_pct: dec!(0.02) };
    let size = raw_size(&method, dec!(100000), dec!(1.1000), Some(dec!(0.0050))).unwrap();
    assert_eq!(size, dec!(400000));
}

#[tokio::test]
async fn scenario_b_daily_loss_ceiling_blocks_until_reset() {
    let limits = RiskLimits {
        max_daily_loss: dec!(1000),
        ..RiskLimits::default()
    };
    let risk = risk_manager(limits).await;
    risk.record_realized_pnl(dec!(-600)).await;
    risk.record_realized_pnl(dec!(-400)).await;

    let signal = Signal::buy("s1", "EURUSD", dec!(1.1000));
    let reason = {
        let admission = risk.begin_admission().await;
        admission.evaluate(&signal, &[], None).await.unwrap_err()
    };
    assert!(matches!(reason, RejectReason::DailyLossLimit { .. }));
    assert!(reason.to_string().starts_with("daily loss limit exceeded"));

    // a sell is blocked too
    let sell = Signal::sell("s1", "EURUSD", dec!(1.1000));
    {
        let admission = risk.begin_admission().await;
        assert_err!(admission.evaluate(&sell, &[], None).await);
    }

    risk.reset_daily_stats().await;
    let admission = risk.begin_admission().await;
    let trade = assert_ok!(admission.evaluate(&signal, &[], None).await);
    assert_eq!(trade.quantity, dec!(1000));
}

#[tokio::test]
async fn scenario_c_round_trip_realizes_pnl() {
    let ledger = Ledger::new();

    let buy = OrderRequest::market("s1", "EURUSD", OrderSide::Buy, dec!(1000));
    ledger.open_order(&buy).await.unwrap();
    ledger
        .apply_status_event(&buy.client_order_id, OrderStatus::Open, None, None)
        .await
        .unwrap();
    ledger
        .apply_fill_event(&buy.client_order_id, dec!(1000), dec!(1.1000))
        .await
        .unwrap();

    let sell = OrderRequest::market("s1", "EURUSD", OrderSide::Sell, dec!(1000));
    ledger.open_order(&sell).await.unwrap();
    ledger
        .apply_status_event(&sell.client_order_id, OrderStatus::Open, None, None)
        .await
        .unwrap();
    let update = ledger
        .apply_fill_event(&sell.client_order_id, dec!(1000), dec!(1.1050))
        .await
        .unwrap();

    let applied = update.applied().unwrap();
    assert_eq!(applied.realized(), dec!(5.00));
    assert_eq!(applied.closed_trade.as_ref().unwrap().pnl, dec!(5.00));

    let position = ledger.get_position("EURUSD").await.unwrap();
    assert_eq!(position.quantity, Decimal::ZERO);
    assert_eq!(position.realized_pnl, dec!(5.00));
    assert_eq!(ledger.signed_fill_total("EURUSD").await, Decimal::ZERO);
    assert_eq!(
        ledger.get_order(&sell.client_order_id).await.unwrap().status,
        OrderStatus::Filled
    );
}

/// Paper venue that counts order submissions reaching it
struct CountingVenue {
    inner: Arc<PaperBroker>,
    place_calls: AtomicUsize,
}

#[async_trait]
impl BrokerGateway for CountingVenue {
    fn kind(&self) -> ExchangeKind {
        self.inner.kind()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.place_order(request).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.inner.cancel_order(order_id).await
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        self.inner.get_order(order_id).await
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        self.inner.get_positions().await
    }

    async fn get_account_info(&self) -> Result<AccountInfo> {
        self.inner.get_account_info().await
    }

    async fn get_market_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Result<Vec<Bar>> {
        self.inner.get_market_data(symbol, timeframe, range).await
    }

    async fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<BrokerEvent>> {
        self.inner.take_event_receiver().await
    }
}

#[tokio::test]
async fn scenario_d_connection_failures_disconnect_and_fail_fast() {
    let mut prices = HashMap::new();
    prices.insert("EURUSD".to_string(), dec!(1.1000));
    let paper = Arc::new(PaperBroker::new(
        PaperConfig::default(),
        Arc::new(SyntheticBars::new(1, prices)),
    ));
    let venue = Arc::new(CountingVenue {
        inner: paper.clone(),
        place_calls: AtomicUsize::new(0),
    });
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 4,
        call_timeout_ms: 1_000,
    };
    let gateway = Arc::new(ResilientGateway::new(venue.clone(), policy));
    gateway.connect().await.unwrap();
    paper.inject_connection_failures(3);

    let ledger = Arc::new(Ledger::new());
    let risk = risk_manager(RiskLimits::default()).await;
    let router = OrderRouter::new(risk, ledger.clone(), gateway.clone(), EventBus::new(16));

    let outcome = router
        .submit_signal(Signal::buy("s1", "EURUSD", dec!(1.1000)), None)
        .await;
    let first_id = match outcome {
        SignalOutcome::Failed { order_id, .. } => order_id,
        other => panic!("expected a failed submission, got {:?}", other),
    };
    assert_eq!(venue.place_calls.load(Ordering::SeqCst), 3);
    assert_eq!(gateway.state(), ConnectionState::Disconnected);
    assert_eq!(
        ledger.get_order(&first_id).await.unwrap().status,
        OrderStatus::Pending
    );

    // fails fast: the venue is not contacted again
    let second = router
        .submit_signal(Signal::buy("s1", "EURUSD", dec!(1.1000)), None)
        .await;
    assert!(matches!(second, SignalOutcome::Failed { .. }));
    assert_eq!(venue.place_calls.load(Ordering::SeqCst), 3);

    // after reconnecting, orders the venue never saw are rejected locally
    assert_ok!(gateway.reconnect().await);
    assert_eq!(router.reconcile_pending().await.unwrap(), 2);
    let order = ledger.get_order(&first_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Rejected);
    assert!(ledger.pending_orders().await.is_empty());
}
