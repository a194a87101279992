//! Venue access
//!
//! - `traits` - the `BrokerGateway` contract and its event type
//! - `paper` - simulated venue
//! - `resilient` - retry, timeout and connection state around any gateway
//! - `bars` - historical bar sources
//! - `factory` - builds the configured stack

mod bars;
pub mod factory;
mod paper;
mod resilient;
mod traits;

pub use bars::{BarSource, FileBars, SyntheticBars, MAX_BARS_PER_QUERY};
pub use factory::{build_bar_source, build_gateway, GatewayHandles};
pub use paper::{PaperBroker, PaperConfig};
pub use resilient::{ConnectionState, ResilientGateway, RetryPolicy};
#[cfg(test)]
pub use traits::MockBrokerGateway;
pub use traits::{parse_exchange_kind, BrokerEvent, BrokerGateway, ExchangeKind};
