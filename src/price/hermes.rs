//! 🔮 Pyth SOL/USD price via the Hermes HTTP API
//!
//! Used when a network has no on-chain price oracle. Requests retry with
//! jittered exponential backoff; low-confidence or old prices are flagged
//! stale rather than dropped.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{PriceFeed, PriceSnapshot};
use crate::error::ExternalCallError;
use crate::types::Network;

/// Exponential backoff parameters
const INITIAL_RETRY_DELAY_MS: u64 = 100;
const MAX_RETRY_DELAY_MS: u64 = 5000;
const MAX_RETRIES: u32 = 5;

/// Confidence wider than 3% of price marks the snapshot stale
const MAX_CONFIDENCE_RATIO: f64 = 0.03;

/// Publish times older than this mark the snapshot stale
const MAX_PRICE_AGE_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct HermesResponse {
    parsed: Vec<HermesParsed>,
}

#[derive(Debug, Deserialize)]
struct HermesParsed {
    price: HermesPrice,
}

#[derive(Debug, Deserialize)]
struct HermesPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

pub struct HermesPriceFeed {
    client: reqwest::Client,
    endpoint: String,
    feed_id: String,
}

impl HermesPriceFeed {
    pub fn new(endpoint: &str, feed_id: &str, timeout: Duration) -> Result<Self, ExternalCallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalCallError::PriceFeed(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            feed_id: feed_id.to_string(),
        })
    }

    /// Fetch price with exponential backoff retry
    async fn fetch_with_retry(&self) -> Result<PriceSnapshot, ExternalCallError> {
        let mut retry_count = 0;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        loop {
            match self.fetch_once().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => {
                    retry_count += 1;
                    if retry_count >= MAX_RETRIES {
                        return Err(ExternalCallError::PriceFeed(format!(
                            "failed after {} retries: {}",
                            MAX_RETRIES, e
                        )));
                    }

                    let jitter = rand::thread_rng().gen_range(0..=delay_ms / 4);
                    warn!(
                        "Hermes retry {}/{}: {} (waiting {}ms)",
                        retry_count, MAX_RETRIES, e, delay_ms + jitter
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;

                    // Exponential backoff with cap
                    delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                }
            }
        }
    }

    async fn fetch_once(&self) -> Result<PriceSnapshot, ExternalCallError> {
        let url = format!("{}?ids[]={}", self.endpoint, self.feed_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExternalCallError::PriceFeed(format!("request failed: {}", e)))?;

        let body: HermesResponse = response
            .json()
            .await
            .map_err(|e| ExternalCallError::PriceFeed(format!("bad response: {}", e)))?;

        let parsed = body
            .parsed
            .first()
            .ok_or_else(|| ExternalCallError::PriceFeed("no price data in response".to_string()))?;

        snapshot_from_price(&parsed.price, chrono::Utc::now().timestamp())
    }
}

#[async_trait]
impl PriceFeed for HermesPriceFeed {
    /// Hermes is a global feed, the network is ignored.
    async fn sol_price(&self, _network: Network) -> Result<PriceSnapshot, ExternalCallError> {
        self.fetch_with_retry().await
    }
}

fn snapshot_from_price(price: &HermesPrice, now: i64) -> Result<PriceSnapshot, ExternalCallError> {
    let raw: i64 = price
        .price
        .parse()
        .map_err(|_| ExternalCallError::PriceFeed(format!("bad price {:?}", price.price)))?;
    let conf: i64 = price
        .conf
        .parse()
        .map_err(|_| ExternalCallError::PriceFeed(format!("bad conf {:?}", price.conf)))?;

    let micro = to_micro_usd(raw, price.expo)
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            ExternalCallError::PriceFeed(format!("price {}e{} out of range", raw, price.expo))
        })?;

    let confidence_ratio = conf as f64 / raw as f64;
    let too_old = now - price.publish_time > MAX_PRICE_AGE_SECS;
    let stale = too_old || confidence_ratio > MAX_CONFIDENCE_RATIO;
    debug!(
        "🔮 Hermes SOL/USD {} micro (conf {:.3}%, stale={})",
        micro,
        confidence_ratio * 100.0,
        stale
    );

    Ok(PriceSnapshot {
        sol_price_micro_usd: micro,
        published_at: price.publish_time,
        stale,
    })
}

/// `raw * 10^expo` in micro-USD, integer only.
fn to_micro_usd(raw: i64, expo: i32) -> Option<u64> {
    if raw <= 0 {
        return None;
    }
    let raw = raw as u64;
    let shift = expo.checked_add(6)?;
    if shift >= 0 {
        10u64.checked_pow(shift as u32).and_then(|m| raw.checked_mul(m))
    } else {
        let div = 10u64.checked_pow(shift.unsigned_abs())?;
        Some(raw / div)
    }
}
