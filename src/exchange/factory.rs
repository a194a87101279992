use std::sync::Arc;

use crate::config::{FeedConfig, FeedSource, GatewayConfig};
use crate::error::{Result, TradeflowError};
use crate::events::EventBus;

use super::bars::{BarSource, FileBars, SyntheticBars};
use super::paper::PaperBroker;
use super::resilient::ResilientGateway;
use super::traits::ExchangeKind;

/// Venue adapter plus the resilient wrapper the engine talks to
pub struct GatewayHandles {
    /// Direct handle for bar-driven simulation (`on_bar`)
    pub paper: Arc<PaperBroker>,
    pub gateway: Arc<ResilientGateway>,
}

/// Create the bar source described by `FeedConfig`.
pub fn build_bar_source(feed: &FeedConfig) -> Result<Arc<dyn BarSource>> {
    match feed.source {
        FeedSource::Synthetic => {
            if feed.start_prices.is_empty() {
                return Err(TradeflowError::Validation(
                    "synthetic feed needs at least one start price".to_string(),
                ));
            }
            let source = SyntheticBars::new(feed.seed, feed.start_prices.clone())
                .with_volatility(feed.volatility);
            Ok(Arc::new(source))
        }
        FeedSource::File => {
            let path = feed.path.as_deref().ok_or_else(|| {
                TradeflowError::Validation("feed.path is required for the file source".to_string())
            })?;
            Ok(Arc::new(FileBars::load(path)?))
        }
    }
}

/// Create the runtime gateway from `GatewayConfig`.
pub fn build_gateway(
    config: &GatewayConfig,
    source: Arc<dyn BarSource>,
    events: EventBus,
) -> Result<GatewayHandles> {
    match config.kind {
        ExchangeKind::Paper => {
            let paper = Arc::new(PaperBroker::new(config.paper.clone(), source));
            let gateway = ResilientGateway::new(paper.clone(), config.retry.clone()).with_events(events);
            Ok(GatewayHandles {
                paper,
                gateway: Arc::new(gateway),
            })
        }
    }
}
