//! Account risk limits and the pure trade validation function

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{OrderSide, Signal};

/// Process-wide account limits. Changed only through explicit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Largest absolute position per symbol (units)
    pub max_position_size: Decimal,
    /// Tighter per-symbol overrides (units)
    #[serde(default)]
    pub symbol_max_position: HashMap<String, Decimal>,
    /// Optional cap on summed absolute notional across all symbols
    #[serde(default)]
    pub max_gross_exposure: Option<Decimal>,
    /// Concurrent symbols with exposure
    pub max_open_positions: usize,
    /// Realized loss ceiling per trading day (account currency, positive)
    pub max_daily_loss: Decimal,
    /// Peak-to-trough equity decline, as a fraction (0.10 = 10%)
    pub max_drawdown_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(1_000_000),
            symbol_max_position: HashMap::new(),
            max_gross_exposure: None,
            max_open_positions: 5,
            max_daily_loss: Decimal::from(1000),
            max_drawdown_pct: Decimal::new(10, 2),
        }
    }
}

impl RiskLimits {
    /// Effective per-symbol maximum: the tighter of symbol and account limits
    pub fn max_position_for(&self, symbol: &str) -> Decimal {
        match self.symbol_max_position.get(symbol) {
            Some(limit) => (*limit).min(self.max_position_size),
            None => self.max_position_size,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_position_size <= Decimal::ZERO {
            errors.push("risk.max_position_size must be positive".to_string());
        }
        for (symbol, limit) in &self.symbol_max_position {
            if *limit <= Decimal::ZERO {
                errors.push(format!("risk.symbol_max_position.{} must be positive", symbol));
            }
        }
        if let Some(gross) = self.max_gross_exposure {
            if gross <= Decimal::ZERO {
                errors.push("risk.max_gross_exposure must be positive".to_string());
            }
        }
        if self.max_open_positions == 0 {
            errors.push("risk.max_open_positions must be at least 1".to_string());
        }
        if self.max_daily_loss <= Decimal::ZERO {
            errors.push("risk.max_daily_loss must be positive".to_string());
        }
        if self.max_drawdown_pct <= Decimal::ZERO || self.max_drawdown_pct > Decimal::ONE {
            errors.push("risk.max_drawdown_pct must be a fraction in (0, 1]".to_string());
        }
        errors
    }
}

/// Exposure in one symbol as seen at admission time.
///
/// Working buys and sells are kept apart: either side may be cancelled or
/// rejected, so limits are checked against the worst case in each direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Exposure {
    pub symbol: String,
    /// Filled net quantity
    pub position: Decimal,
    /// Remaining quantity of non-terminal buy orders
    pub working_buys: Decimal,
    /// Remaining quantity of non-terminal sell orders (positive)
    pub working_sells: Decimal,
    /// Mark price used for notional
    pub price: Decimal,
}

impl Exposure {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            position: Decimal::ZERO,
            working_buys: Decimal::ZERO,
            working_sells: Decimal::ZERO,
            price: Decimal::ZERO,
        }
    }

    /// Net position if every working order fills
    pub fn projected(&self) -> Decimal {
        self.position + self.working_buys - self.working_sells
    }

    pub fn has_working(&self) -> bool {
        !self.working_buys.is_zero() || !self.working_sells.is_zero()
    }

    /// Largest absolute position reachable after adding `signed_qty`,
    /// assuming any subset of the working orders fills
    pub fn peak_with(&self, signed_qty: Decimal) -> Decimal {
        let long = self.position + self.working_buys + signed_qty.max(Decimal::ZERO);
        let short = self.position - self.working_sells + signed_qty.min(Decimal::ZERO);
        long.abs().max(short.abs())
    }

    pub fn peak(&self) -> Decimal {
        self.peak_with(Decimal::ZERO)
    }

    pub fn is_open(&self) -> bool {
        !self.peak().is_zero()
    }
}

/// Risk counters relevant to a single decision
#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    pub equity: Decimal,
    pub peak_equity: Decimal,
    /// Realized losses today (positive number)
    pub daily_loss: Decimal,
}

impl AccountState {
    pub fn drawdown_pct(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO || self.equity >= self.peak_equity {
            return Decimal::ZERO;
        }
        (self.peak_equity - self.equity) / self.peak_equity
    }
}

/// A sized trade awaiting a decision
#[derive(Debug, Clone)]
pub struct TradeProposal<'a> {
    pub signal: &'a Signal,
    pub side: OrderSide,
    pub quantity: Decimal,
}

/// Why a signal was turned away
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    SymbolPositionLimit {
        symbol: String,
        limit: Decimal,
        projected: Decimal,
    },
    PositionLimit {
        limit: Decimal,
        projected: Decimal,
    },
    GrossExposureLimit {
        limit: Decimal,
        projected: Decimal,
    },
    MaxOpenPositions {
        limit: usize,
        current: usize,
    },
    DailyLossLimit {
        limit: Decimal,
        current: Decimal,
        projected: Decimal,
    },
    DrawdownLimit {
        limit_pct: Decimal,
        current_pct: Decimal,
    },
    Sizing {
        detail: String,
    },
    NothingToClose {
        symbol: String,
    },
    InvalidSignal {
        detail: String,
    },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::SymbolPositionLimit {
                symbol,
                limit,
                projected,
            } => write!(
                f,
                "symbol position limit exceeded: {} would be {} (limit {})",
                symbol, projected, limit
            ),
            RejectReason::PositionLimit { limit, projected } => write!(
                f,
                "max position size exceeded: would be {} (limit {})",
                projected, limit
            ),
            RejectReason::GrossExposureLimit { limit, projected } => write!(
                f,
                "gross exposure limit exceeded: would be {} (limit {})",
                projected, limit
            ),
            RejectReason::MaxOpenPositions { limit, current } => write!(
                f,
                "max open positions reached: {} open (limit {})",
                current, limit
            ),
            RejectReason::DailyLossLimit {
                limit,
                current,
                projected,
            } => write!(
                f,
                "daily loss limit exceeded: loss {} projected {} (limit {})",
                current, projected, limit
            ),
            RejectReason::DrawdownLimit {
                limit_pct,
                current_pct,
            } => write!(
                f,
                "drawdown limit exceeded: {} (limit {})",
                current_pct, limit_pct
            ),
            RejectReason::Sizing { detail } => write!(f, "sizing rejected: {}", detail),
            RejectReason::NothingToClose { symbol } => {
                write!(f, "nothing to close in {}", symbol)
            }
            RejectReason::InvalidSignal { detail } => write!(f, "invalid signal: {}", detail),
        }
    }
}

/// Outcome of a risk check
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Accept,
    Reject(RejectReason),
}

impl RiskDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RiskDecision::Accept)
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            RiskDecision::Reject(reason) => Some(reason),
            RiskDecision::Accept => None,
        }
    }
}

/// Validate a sized trade against the limits.
///
/// Checks run in a fixed order and the first failure decides the reason:
/// position size (symbol, account, gross), open positions, projected daily
/// loss, current drawdown.
pub fn validate_trade(
    proposal: &TradeProposal<'_>,
    exposures: &[Exposure],
    limits: &RiskLimits,
    account: &AccountState,
) -> RiskDecision {
    let symbol = proposal.signal.symbol.as_str();
    let signed_qty = proposal.quantity * proposal.side.sign();

    let current = exposures.iter().find(|e| e.symbol == symbol);
    let (current_peak, projected) = match current {
        Some(e) => (e.peak(), e.peak_with(signed_qty)),
        None => (Decimal::ZERO, Exposure::flat(symbol).peak_with(signed_qty)),
    };
    let increases_exposure = projected > current_peak;

    // 1. Position size, worst case per direction
    if increases_exposure {
        if let Some(symbol_limit) = limits.symbol_max_position.get(symbol) {
            if projected > *symbol_limit {
                return RiskDecision::Reject(RejectReason::SymbolPositionLimit {
                    symbol: symbol.to_string(),
                    limit: *symbol_limit,
                    projected,
                });
            }
        }
        if projected > limits.max_position_size {
            return RiskDecision::Reject(RejectReason::PositionLimit {
                limit: limits.max_position_size,
                projected,
            });
        }
        if let Some(gross_limit) = limits.max_gross_exposure {
            let price = if proposal.signal.reference_price > Decimal::ZERO {
                proposal.signal.reference_price
            } else {
                current.map(|e| e.price).unwrap_or(Decimal::ZERO)
            };
            let others: Decimal = exposures
                .iter()
                .filter(|e| e.symbol != symbol)
                .map(|e| e.peak() * e.price)
                .sum();
            let gross = others + projected * price;
            if gross > gross_limit {
                return RiskDecision::Reject(RejectReason::GrossExposureLimit {
                    limit: gross_limit,
                    projected: gross,
                });
            }
        }
    }

    // 2. Open positions (only matters when this trade opens a new symbol)
    let opens_new = current_peak.is_zero() && !projected.is_zero();
    if opens_new {
        let open_count = exposures.iter().filter(|e| e.is_open()).count();
        if open_count >= limits.max_open_positions {
            return RiskDecision::Reject(RejectReason::MaxOpenPositions {
                limit: limits.max_open_positions,
                current: open_count,
            });
        }
    }

    // 3. Daily loss, including the loss this trade could add at its stop
    let potential_loss = match proposal.signal.stop_distance {
        Some(distance) if increases_exposure && distance > Decimal::ZERO => {
            distance * proposal.quantity
        }
        _ => Decimal::ZERO,
    };
    let projected_loss = account.daily_loss + potential_loss;
    if account.daily_loss >= limits.max_daily_loss || projected_loss > limits.max_daily_loss {
        return RiskDecision::Reject(RejectReason::DailyLossLimit {
            limit: limits.max_daily_loss,
            current: account.daily_loss,
            projected: projected_loss,
        });
    }

    // 4. Drawdown
    let drawdown = account.drawdown_pct();
    if drawdown >= limits.max_drawdown_pct {
        return RiskDecision::Reject(RejectReason::DrawdownLimit {
            limit_pct: limits.max_drawdown_pct,
            current_pct: drawdown,
        });
    }

    RiskDecision::Accept
}
