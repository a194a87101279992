//! Paper trading venue
//!
//! In-memory simulated venue behind the `BrokerGateway` contract. Market
//! orders fill immediately at the last price plus slippage, optionally in
//! several partial fills. Limit, stop and stop-limit orders rest until a bar
//! crosses their trigger in `on_bar`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::bars::BarSource;
use super::traits::{BrokerEvent, BrokerGateway, ExchangeKind};
use crate::domain::{
    AccountInfo, Bar, Order, OrderRequest, OrderSide, OrderStatus, OrderType, Position, TimeRange,
    Timeframe,
};
use crate::error::{Result, TradeflowError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub initial_balance: Decimal,
    /// Margin required per unit of notional (0.02 = 50:1)
    pub margin_rate: Decimal,
    /// Absolute price slippage applied against the taker
    pub slippage: Decimal,
    /// Market orders are filled in this many pieces
    pub partial_fill_chunks: u32,
    /// Tradable symbols; empty means anything the bar source knows
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(100_000),
            margin_rate: Decimal::new(2, 2),
            slippage: Decimal::ZERO,
            partial_fill_chunks: 1,
            symbols: Vec::new(),
        }
    }
}

#[derive(Default)]
struct PaperState {
    orders: HashMap<String, Order>,
    /// Stop-limit orders whose stop has fired
    triggered: HashSet<String>,
    positions: HashMap<String, Position>,
    last_prices: HashMap<String, Decimal>,
    realized: Decimal,
    next_venue_id: u64,
}

impl PaperState {
    fn unrealized(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    fn used_margin(&self, margin_rate: Decimal) -> Decimal {
        self.positions
            .values()
            .map(|p| p.notional() * margin_rate)
            .sum()
    }
}

pub struct PaperBroker {
    config: PaperConfig,
    source: Arc<dyn BarSource>,
    connected: AtomicBool,
    injected_failures: AtomicU32,
    state: Mutex<PaperState>,
    event_tx: mpsc::UnboundedSender<BrokerEvent>,
    event_rx: RwLock<Option<mpsc::UnboundedReceiver<BrokerEvent>>>,
}

impl PaperBroker {
    pub fn new(config: PaperConfig, source: Arc<dyn BarSource>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            source,
            connected: AtomicBool::new(false),
            injected_failures: AtomicU32::new(0),
            state: Mutex::new(PaperState::default()),
            event_tx,
            event_rx: RwLock::new(Some(event_rx)),
        }
    }

    pub fn config(&self) -> &PaperConfig {
        &self.config
    }

    /// Make the next `count` connect / place_order calls fail with a
    /// connection error
    pub fn inject_connection_failures(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self, operation: &str) -> Result<()> {
        let hit = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hit {
            warn!(operation, "Paper venue simulating connection failure");
            return Err(TradeflowError::Connection(format!(
                "paper venue unreachable during {}",
                operation
            )));
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TradeflowError::Connection("paper venue not connected".to_string()))
        }
    }

    fn is_tradable(&self, symbol: &str) -> bool {
        if self.config.symbols.is_empty() {
            self.source.initial_price(symbol).is_some()
        } else {
            self.config.symbols.iter().any(|s| s == symbol)
        }
    }

    fn send(&self, event: BrokerEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Broker event dropped, receiver closed");
        }
    }

    fn taker_price(&self, side: OrderSide, price: Decimal) -> Decimal {
        match side {
            OrderSide::Buy => price + self.config.slippage,
            OrderSide::Sell => (price - self.config.slippage).max(Decimal::ZERO),
        }
    }

    /// Split a market order into fill pieces
    fn chunks(&self, quantity: Decimal) -> Vec<Decimal> {
        let n = self.config.partial_fill_chunks.max(1);
        if n == 1 {
            return vec![quantity];
        }
        let piece = (quantity / Decimal::from(n)).floor();
        if piece.is_zero() {
            return vec![quantity];
        }
        let mut pieces = vec![piece; (n - 1) as usize];
        pieces.push(quantity - piece * Decimal::from(n - 1));
        pieces
    }

    /// Execute `quantity` of a venue order and emit the fill
    fn execute(&self, state: &mut PaperState, order_id: &str, quantity: Decimal, price: Decimal) {
        let Some(order) = state.orders.get_mut(order_id) else {
            return;
        };
        let prior_cost = order.avg_fill_price.unwrap_or(Decimal::ZERO) * order.filled_quantity;
        order.filled_quantity += quantity;
        order.avg_fill_price = Some((prior_cost + price * quantity) / order.filled_quantity);
        order.status = if order.remaining().is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        order.updated_at = Utc::now();
        let side = order.side;
        let symbol = order.symbol.clone();

        let position = state
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::new(&symbol));
        let effect = position.apply_fill(side, quantity, price);
        state.realized += effect.realized;
        state.last_prices.insert(symbol, price);

        self.send(BrokerEvent::fill(order_id, quantity, price));
    }

    /// Advance the venue by one bar: mark positions and trigger resting orders.
    /// Returns the number of orders that executed.
    pub async fn on_bar(&self, bar: &Bar) -> usize {
        let mut state = self.state.lock().await;
        state.last_prices.insert(bar.symbol.clone(), bar.close);
        if let Some(position) = state.positions.get_mut(&bar.symbol) {
            position.mark(bar.close);
        }

        let mut resting: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.symbol == bar.symbol && o.status == OrderStatus::Open && o.order_type != OrderType::Market)
            .cloned()
            .collect();
        resting.sort_by_key(|o| o.created_at);

        let mut executed = 0;
        for order in resting {
            if order.order_type == OrderType::StopLimit && !state.triggered.contains(&order.id) {
                if stop_crossed(&order, bar).is_some() {
                    debug!(order_id = %order.id, "Stop-limit order triggered");
                    state.triggered.insert(order.id.clone());
                } else {
                    continue;
                }
            }

            let fill_price = match order.order_type {
                OrderType::Limit | OrderType::StopLimit => limit_crossed(&order, bar),
                OrderType::Stop => stop_crossed(&order, bar).map(|p| self.taker_price(order.side, p)),
                OrderType::Market => None,
            };
            if let Some(price) = fill_price {
                let quantity = order.remaining();
                self.execute(&mut state, &order.id, quantity, price);
                state.triggered.remove(&order.id);
                executed += 1;
            }
        }
        executed
    }
}

/// Price at which a resting limit order executes on this bar
fn limit_crossed(order: &Order, bar: &Bar) -> Option<Decimal> {
    let limit = order.limit_price?;
    match order.side {
        OrderSide::Buy if bar.low <= limit => Some(limit.min(bar.open)),
        OrderSide::Sell if bar.high >= limit => Some(limit.max(bar.open)),
        _ => None,
    }
}

/// Price at which a stop fires on this bar (gaps fill at the open)
fn stop_crossed(order: &Order, bar: &Bar) -> Option<Decimal> {
    let stop = order.stop_price?;
    match order.side {
        OrderSide::Buy if bar.high >= stop => Some(stop.max(bar.open)),
        OrderSide::Sell if bar.low <= stop => Some(stop.min(bar.open)),
        _ => None,
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Paper
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.take_injected_failure("connect")?;
        self.connected.store(true, Ordering::SeqCst);
        info!(balance = %self.config.initial_balance, "Paper venue connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!("Paper venue disconnected");
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        self.ensure_connected()?;
        self.take_injected_failure("place_order")?;

        let mut state = self.state.lock().await;
        if let Some(existing) = state.orders.get(&request.client_order_id) {
            debug!(order_id = %existing.id, "Duplicate submission, returning existing order");
            return Ok(existing.clone());
        }

        request
            .validate()
            .map_err(|e| TradeflowError::OrderRejected(e.to_string()))?;
        if !self.is_tradable(&request.symbol) {
            return Err(TradeflowError::OrderRejected(format!(
                "unknown symbol {}",
                request.symbol
            )));
        }

        let market_price = state
            .last_prices
            .get(&request.symbol)
            .copied()
            .or_else(|| self.source.initial_price(&request.symbol));
        let reference = match request.order_type {
            OrderType::Market => market_price,
            OrderType::Limit | OrderType::StopLimit => request.limit_price,
            OrderType::Stop => request.stop_price,
        }
        .ok_or_else(|| {
            TradeflowError::OrderRejected(format!("no price available for {}", request.symbol))
        })?;

        // Margin for the exposure this order adds
        let current = state
            .positions
            .get(&request.symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        let added = ((current + request.signed_quantity()).abs() - current.abs()).max(Decimal::ZERO);
        let required = added * reference * self.config.margin_rate;
        let equity = self.config.initial_balance + state.realized + state.unrealized();
        let available = equity - state.used_margin(self.config.margin_rate);
        if required > available {
            warn!(
                order_id = %request.client_order_id,
                required = %required,
                available = %available,
                "Paper venue rejected order for margin"
            );
            return Err(TradeflowError::InsufficientBalance { required, available });
        }

        state.next_venue_id += 1;
        let venue_id = format!("PAPER-{}", state.next_venue_id);
        let mut order = Order::from_request(request);
        order.venue_order_id = Some(venue_id.clone());
        order.status = OrderStatus::Open;
        state.orders.insert(order.id.clone(), order.clone());

        self.send(BrokerEvent::Status {
            order_id: order.id.clone(),
            status: OrderStatus::Open,
            reason: None,
            venue_order_id: Some(venue_id.clone()),
            timestamp: Utc::now(),
        });
        info!(
            order_id = %order.id,
            venue_order_id = %venue_id,
            symbol = %order.symbol,
            side = %order.side,
            order_type = %order.order_type,
            quantity = %order.quantity,
            "Paper order accepted"
        );

        if request.order_type == OrderType::Market {
            let price = self.taker_price(request.side, reference);
            for piece in self.chunks(request.quantity) {
                self.execute(&mut state, &order.id, piece, price);
            }
        }

        state
            .orders
            .get(&order.id)
            .cloned()
            .ok_or_else(|| TradeflowError::Internal(format!("order {} vanished", order.id)))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| TradeflowError::OrderNotFound(order_id.to_string()))?;
        if order.is_terminal() {
            return Err(TradeflowError::AlreadyTerminal {
                order_id: order_id.to_string(),
                status: order.status.to_string(),
            });
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        state.triggered.remove(order_id);
        self.send(BrokerEvent::status(
            order_id,
            OrderStatus::Cancelled,
            Some("cancelled by request".to_string()),
        ));
        info!(order_id, "Paper order cancelled");
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        self.ensure_connected()?;
        self.state
            .lock()
            .await
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| TradeflowError::OrderNotFound(order_id.to_string()))
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        self.ensure_connected()?;
        let state = self.state.lock().await;
        let mut positions: Vec<Position> = state
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_account_info(&self) -> Result<AccountInfo> {
        self.ensure_connected()?;
        let state = self.state.lock().await;
        let balance = self.config.initial_balance + state.realized;
        Ok(AccountInfo {
            balance,
            equity: balance + state.unrealized(),
            used_margin: state.used_margin(self.config.margin_rate),
            open_position_count: state.positions.values().filter(|p| !p.is_flat()).count(),
            updated_at: Utc::now(),
        })
    }

    async fn get_market_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Result<Vec<Bar>> {
        self.ensure_connected()?;
        self.source.bars(symbol, timeframe, &range)
    }

    async fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<BrokerEvent>> {
        self.event_rx.write().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::bars::SyntheticBars;
    use rust_decimal_macros::dec;

    fn broker(config: PaperConfig) -> PaperBroker {
        let mut prices = HashMap::new();
        prices.insert("EURUSD".to_string(), dec!(1.1000));
        PaperBroker::new(config, Arc::new(SyntheticBars::new(7, prices)))
    }

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M1,
            open_time: Utc::now(),
            open,
            high,
            low,
            close,
            volume: Decimal::ZERO,
        }
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<BrokerEvent>) -> Vec<BrokerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_market_order_acknowledged_then_filled() {
        let paper = broker(PaperConfig {
            partial_fill_chunks: 3,
            slippage: dec!(0.0001),
            ..PaperConfig::default()
        });
        let mut rx = paper.take_event_receiver().await.unwrap();
        assert!(paper.take_event_receiver().await.is_none());
        paper.connect().await.unwrap();

        let request = OrderRequest::market("s", "EURUSD", OrderSide::Buy, dec!(1000));
        let order = paper.place_order(&request).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_fill_price, Some(dec!(1.1001)));

        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            BrokerEvent::Status { status: OrderStatus::Open, venue_order_id: Some(_), .. }
        ));
        let filled: Decimal = events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::Fill { quantity, .. } => Some(*quantity),
                _ => None,
            })
            .sum();
        assert_eq!(filled, dec!(1000));
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_idempotent() {
        let paper = broker(PaperConfig::default());
        paper.connect().await.unwrap();
        let request = OrderRequest::market("s", "EURUSD", OrderSide::Sell, dec!(10));
        let first = paper.place_order(&request).await.unwrap();
        let second = paper.place_order(&request).await.unwrap();
        assert_eq!(first.venue_order_id, second.venue_order_id);
        let positions = paper.get_positions().await.unwrap();
        assert_eq!(positions[0].quantity, dec!(-10));
    }

    #[tokio::test]
    async fn test_rejections() {
        let paper = broker(PaperConfig::default());
        assert!(matches!(
            paper
                .place_order(&OrderRequest::market("s", "EURUSD", OrderSide::Buy, dec!(1)))
                .await,
            Err(TradeflowError::Connection(_))
        ));
        paper.connect().await.unwrap();

        let unknown = OrderRequest::market("s", "XAUUSD", OrderSide::Buy, dec!(1));
        let err = paper.place_order(&unknown).await.unwrap_err();
        assert!(err.is_rejection());

        // 100,000 equity at 2% margin supports ~4.5M notional at 1.1
        let huge = OrderRequest::market("s", "EURUSD", OrderSide::Buy, dec!(5000000));
        let err = paper.place_order(&huge).await.unwrap_err();
        assert!(matches!(err, TradeflowError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn test_limit_and_stop_orders_trigger_on_bars() {
        let paper = broker(PaperConfig::default());
        let mut rx = paper.take_event_receiver().await.unwrap();
        paper.connect().await.unwrap();

        let limit = OrderRequest::limit("s", "EURUSD", OrderSide::Buy, dec!(100), dec!(1.0950));
        let limit = paper.place_order(&limit).await.unwrap();
        assert_eq!(limit.status, OrderStatus::Open);

        let mut stop = OrderRequest::market("s", "EURUSD", OrderSide::Sell, dec!(50));
        stop.order_type = OrderType::Stop;
        stop.stop_price = Some(dec!(1.0900));
        let stop = paper.place_order(&stop).await.unwrap();
        drain(&mut rx).await;

        assert_eq!(paper.on_bar(&bar(dec!(1.10), dec!(1.101), dec!(1.097), dec!(1.098))).await, 0);
        assert_eq!(paper.on_bar(&bar(dec!(1.098), dec!(1.099), dec!(1.094), dec!(1.095))).await, 1);
        assert_eq!(
            paper.get_order(&limit.id).await.unwrap().avg_fill_price,
            Some(dec!(1.0950))
        );

        // Gap through the stop fills at the open
        assert_eq!(paper.on_bar(&bar(dec!(1.085), dec!(1.086), dec!(1.080), dec!(1.082))).await, 1);
        assert_eq!(
            paper.get_order(&stop.id).await.unwrap().avg_fill_price,
            Some(dec!(1.085))
        );
        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_semantics() {
        let paper = broker(PaperConfig::default());
        paper.connect().await.unwrap();
        let request = OrderRequest::limit("s", "EURUSD", OrderSide::Sell, dec!(100), dec!(1.2));
        let order = paper.place_order(&request).await.unwrap();

        paper.cancel_order(&order.id).await.unwrap();
        assert!(matches!(
            paper.cancel_order(&order.id).await,
            Err(TradeflowError::AlreadyTerminal { .. })
        ));
        assert!(matches!(
            paper.cancel_order("nope").await,
            Err(TradeflowError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_account_tracks_realized_pnl() {
        let paper = broker(PaperConfig::default());
        paper.connect().await.unwrap();
        paper
            .place_order(&OrderRequest::market("s", "EURUSD", OrderSide::Buy, dec!(1000)))
            .await
            .unwrap();
        paper.on_bar(&bar(dec!(1.1), dec!(1.106), dec!(1.1), dec!(1.105))).await;
        paper
            .place_order(&OrderRequest::market("s", "EURUSD", OrderSide::Sell, dec!(1000)))
            .await
            .unwrap();

        let account = paper.get_account_info().await.unwrap();
        assert_eq!(account.balance, dec!(100005));
        assert_eq!(account.open_position_count, 0);
        assert_eq!(account.used_margin, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let paper = broker(PaperConfig::default());
        paper.inject_connection_failures(1);
        assert!(paper.connect().await.is_err());
        assert!(paper.connect().await.is_ok());
    }
}
