//! Centralized risk manager
//!
//! Owns the daily-loss and drawdown counters and the admission lock. Every
//! signal is sized and validated while holding [`Admission`], so two
//! concurrent signals are evaluated one after the other against the same
//! exposure picture.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::limits::{validate_trade, AccountState, Exposure, RejectReason, RiskDecision, RiskLimits, TradeProposal};
use super::schedule::DailyResetSchedule;
use super::sizing::{calculate_size, fit_to_instrument, SizingConfig, SizingMethod};
use crate::domain::{Direction, OrderSide, Signal};

/// Mutable risk counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskCounters {
    pub trading_day: Option<NaiveDate>,
    /// Sum of realized losses today (positive, never decreases within the day)
    pub daily_loss: Decimal,
    /// Net realized P&L today
    pub daily_realized_pnl: Decimal,
    pub equity: Decimal,
    /// High-water mark of the current drawdown window
    pub peak_equity: Decimal,
    /// Worst drawdown seen in the current window
    pub max_drawdown_pct: Decimal,
}

impl RiskCounters {
    fn account_state(&self) -> AccountState {
        AccountState {
            equity: self.equity,
            peak_equity: self.peak_equity,
            daily_loss: self.daily_loss,
        }
    }
}

/// A signal that passed every check
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedTrade {
    pub side: OrderSide,
    pub quantity: Decimal,
    pub stop_loss: Option<Decimal>,
}

pub struct RiskManager {
    limits: RiskLimits,
    sizing: SizingConfig,
    schedule: DailyResetSchedule,
    counters: RwLock<RiskCounters>,
    admission: Mutex<()>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

/// Held for the whole admission of one signal
pub struct Admission<'a> {
    manager: &'a RiskManager,
    _guard: MutexGuard<'a, ()>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, sizing: SizingConfig, schedule: DailyResetSchedule) -> Self {
        Self {
            limits,
            sizing,
            schedule,
            counters: RwLock::new(RiskCounters::default()),
            admission: Mutex::new(()),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    // ==================== State Queries ====================

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub async fn counters(&self) -> RiskCounters {
        self.counters.read().await.clone()
    }

    pub fn sizing(&self) -> &SizingConfig {
        &self.sizing
    }

    pub fn decision_counts(&self) -> (u64, u64) {
        (
            self.accepted.load(Ordering::SeqCst),
            self.rejected.load(Ordering::SeqCst),
        )
    }

    // ==================== Counters ====================

    /// Feed a realized P&L amount (negative for a loss)
    pub async fn record_realized_pnl(&self, amount: Decimal) {
        let mut counters = self.counters.write().await;
        counters.daily_realized_pnl += amount;
        if amount < Decimal::ZERO {
            counters.daily_loss += -amount;
        }
        debug!(
            amount = %amount,
            daily_loss = %counters.daily_loss,
            daily_pnl = %counters.daily_realized_pnl,
            "Realized P&L recorded"
        );
    }

    /// Latest equity from the account snapshot
    pub async fn update_equity(&self, equity: Decimal) {
        let mut counters = self.counters.write().await;
        counters.equity = equity;
        if equity > counters.peak_equity {
            counters.peak_equity = equity;
        }
        let drawdown = counters.account_state().drawdown_pct();
        if drawdown > counters.max_drawdown_pct {
            counters.max_drawdown_pct = drawdown;
            if drawdown > Decimal::ZERO {
                debug!(drawdown = %drawdown, "New drawdown low");
            }
        }
    }

    /// Zero the daily counters. Drawdown history is left alone.
    pub async fn reset_daily_stats(&self) {
        let mut counters = self.counters.write().await;
        self.reset_daily_locked(&mut counters, self.schedule.trading_day(Utc::now()));
    }

    fn reset_daily_locked(&self, counters: &mut RiskCounters, day: NaiveDate) {
        info!(
            day = %day,
            previous_loss = %counters.daily_loss,
            previous_pnl = %counters.daily_realized_pnl,
            "Daily risk counters reset"
        );
        counters.trading_day = Some(day);
        counters.daily_loss = Decimal::ZERO;
        counters.daily_realized_pnl = Decimal::ZERO;
    }

    /// Start a new drawdown window at the current equity
    pub async fn reset_drawdown_window(&self) {
        let mut counters = self.counters.write().await;
        counters.peak_equity = counters.equity;
        counters.max_drawdown_pct = Decimal::ZERO;
        info!(peak = %counters.peak_equity, "Drawdown window reset");
    }

    /// Reset the daily counters if `now` is past the trading-day boundary.
    /// Returns true when a reset happened.
    pub async fn roll_day(&self, now: DateTime<Utc>) -> bool {
        let day = self.schedule.trading_day(now);
        let mut counters = self.counters.write().await;
        match counters.trading_day {
            Some(current) if current >= day => false,
            Some(_) => {
                self.reset_daily_locked(&mut counters, day);
                true
            }
            None => {
                counters.trading_day = Some(day);
                false
            }
        }
    }

    // ==================== Admission ====================

    /// Take the admission lock. Only one signal is evaluated at a time.
    pub async fn begin_admission(&self) -> Admission<'_> {
        Admission {
            manager: self,
            _guard: self.admission.lock().await,
        }
    }

    fn resolve_quantity(
        &self,
        signal: &Signal,
        exposures: &[Exposure],
        method: &SizingMethod,
        equity: Decimal,
        limits: &RiskLimits,
    ) -> Result<(OrderSide, Decimal), RejectReason> {
        let instrument = self.sizing.instrument(&signal.symbol);

        if signal.direction == Direction::Close {
            let projected = exposures
                .iter()
                .find(|e| e.symbol == signal.symbol)
                .map(|e| e.projected())
                .unwrap_or(Decimal::ZERO);
            if projected.is_zero() {
                return Err(RejectReason::NothingToClose {
                    symbol: signal.symbol.clone(),
                });
            }
            let side = if projected > Decimal::ZERO {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            return Ok((side, projected.abs()));
        }

        let side = signal
            .direction
            .side()
            .ok_or_else(|| RejectReason::InvalidSignal {
                detail: "direction has no side".to_string(),
            })?;

        let sized = match signal.suggested_size {
            Some(size) => fit_to_instrument(size, &instrument),
            None => calculate_size(
                method,
                equity,
                signal.reference_price,
                signal.stop_distance,
                &instrument,
                Some(limits.max_position_for(&signal.symbol)),
            ),
        };
        sized
            .map(|qty| (side, qty))
            .map_err(|e| RejectReason::Sizing {
                detail: e.to_string(),
            })
    }
}

impl Admission<'_> {
    /// Size and validate one signal.
    ///
    /// `method` overrides the configured sizing method (per-strategy sizing).
    pub async fn evaluate(
        &self,
        signal: &Signal,
        exposures: &[Exposure],
        method: Option<&SizingMethod>,
    ) -> Result<ApprovedTrade, RejectReason> {
        let manager = self.manager;
        manager.roll_day(Utc::now()).await;

        let outcome = self.evaluate_inner(signal, exposures, method).await;
        match &outcome {
            Ok(trade) => {
                manager.accepted.fetch_add(1, Ordering::SeqCst);
                debug!(
                    strategy = %signal.strategy,
                    symbol = %signal.symbol,
                    side = %trade.side,
                    quantity = %trade.quantity,
                    "Signal accepted"
                );
            }
            Err(reason) => {
                manager.rejected.fetch_add(1, Ordering::SeqCst);
                warn!(
                    strategy = %signal.strategy,
                    symbol = %signal.symbol,
                    direction = %signal.direction,
                    "Signal rejected: {}",
                    reason
                );
            }
        }
        outcome
    }

    async fn evaluate_inner(
        &self,
        signal: &Signal,
        exposures: &[Exposure],
        method: Option<&SizingMethod>,
    ) -> Result<ApprovedTrade, RejectReason> {
        let manager = self.manager;

        if signal.symbol.trim().is_empty() {
            return Err(RejectReason::InvalidSignal {
                detail: "empty symbol".to_string(),
            });
        }
        if signal.reference_price <= Decimal::ZERO {
            return Err(RejectReason::InvalidSignal {
                detail: format!("reference price {} is not positive", signal.reference_price),
            });
        }

        let limits = &manager.limits;
        let account = manager.counters.read().await.account_state();
        let method = method.unwrap_or(&manager.sizing.method);

        let (side, quantity) =
            manager.resolve_quantity(signal, exposures, method, account.equity, limits)?;

        let proposal = TradeProposal {
            signal,
            side,
            quantity,
        };
        match validate_trade(&proposal, exposures, limits, &account) {
            RiskDecision::Accept => Ok(ApprovedTrade {
                side,
                quantity,
                stop_loss: signal.stop_loss_price(side),
            }),
            RiskDecision::Reject(reason) => Err(reason),
        }
    }
}
