//! Risk management
//!
//! Position sizing, account limits and the single serialized admission
//! path every signal passes through before it may become an order.

pub mod limits;
pub mod manager;
pub mod schedule;
pub mod sizing;

pub use limits::{validate_trade, AccountState, Exposure, RejectReason, RiskDecision, RiskLimits, TradeProposal};
pub use manager::{Admission, ApprovedTrade, RiskCounters, RiskManager};
pub use schedule::DailyResetSchedule;
pub use sizing::{calculate_size, raw_size, round_down, InstrumentSpec, SizingConfig, SizingError, SizingMethod};
