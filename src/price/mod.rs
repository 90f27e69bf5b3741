//! SOL/USD price sources.
//!
//! Prices are fixed-point micro-USD. A stale price is still returned, flagged,
//! because keepers routinely miss their update window.

pub mod hermes;
pub mod oracle;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::error::ExternalCallError;
use crate::types::Network;

pub use hermes::HermesPriceFeed;
pub use oracle::OraclePriceFeed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceSnapshot {
    pub sol_price_micro_usd: u64,
    /// Unix seconds the price was published
    pub published_at: i64,
    pub stale: bool,
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn sol_price(&self, network: Network) -> Result<PriceSnapshot, ExternalCallError>;
}

/// One price read bounded by `timeout`.
pub async fn fetch_snapshot(
    feed: &dyn PriceFeed,
    network: Network,
    timeout: Duration,
) -> Result<PriceSnapshot, ExternalCallError> {
    match tokio::time::timeout(timeout, feed.sol_price(network)).await {
        Ok(result) => result,
        Err(_) => Err(ExternalCallError::Timeout {
            what: "price feed",
            after_ms: timeout.as_millis() as u64,
        }),
    }
}
