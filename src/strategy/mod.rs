//! Strategy module
//!
//! ## Architecture
//!
//! - `traits` - the runner contract, per-strategy config and the signal sink seam
//! - `registry` - runner factories keyed by strategy type name
//! - `manager` - lifecycle, per-tick driving, auto-pause
//! - `performance` - per-strategy trade and signal statistics
//! - `strategies/` - built-in runners

pub mod indicators;
pub mod manager;
pub mod performance;
pub mod registry;
pub mod strategies;
pub mod traits;

pub use manager::{ManagerSettings, StrategyManager, StrategyState, StrategyStatus, TickReport};
pub use performance::{PerformanceTracker, StrategyPerformance};
pub use registry::{RunnerFactory, StrategyInfo, StrategyRegistry};
pub use traits::{SignalOutcome, SignalSink, StrategyConfig, StrategyRunner};
