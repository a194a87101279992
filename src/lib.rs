pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod exchange;
pub mod ledger;
pub mod risk;
pub mod strategy;

pub use config::AppConfig;
pub use engine::{EngineContext, EngineSnapshot, EventProcessor, OrderRouter};
pub use error::{OrderError, Result, TradeflowError};
pub use events::{EngineEvent, EventBus, EventKind, Severity};
pub use exchange::{BrokerEvent, BrokerGateway, PaperBroker, ResilientGateway};
pub use ledger::Ledger;
pub use risk::{RejectReason, RiskManager};
pub use strategy::{StrategyManager, StrategyRegistry, StrategyRunner};
