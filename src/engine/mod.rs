//! Execution engine
//!
//! - `router` - signal admission and order submission
//! - `processor` - broker events into the ledger, risk and performance
//! - `feed` - merged market data replay
//! - `context` - component wiring and the main loop
//! - `report` - snapshots for display

pub mod context;
pub mod feed;
pub mod processor;
pub mod report;
pub mod router;

pub use context::EngineContext;
pub use feed::{dedup_subscriptions, load_updates, spawn_replay, Subscription};
pub use processor::{status_event, EventProcessor};
pub use report::{EngineSnapshot, OrderRow, PositionRow, StrategyRow};
pub use router::OrderRouter;
