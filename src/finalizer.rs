//! Outbound victory finalization.
//!
//! Given a winning mint, an external service submits the victory transaction
//! and creates the pool. The engine only sees success or a retryable failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;
use tracing::info;

use crate::error::ExternalCallError;
use crate::types::Network;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FinalizeReceipt {
    pub signature: Option<String>,
    /// Set when the service already created the pool in the same call
    #[serde(default)]
    pub pool: Option<String>,
}

#[async_trait]
pub trait VictoryFinalizer: Send + Sync {
    async fn finalize(
        &self,
        network: Network,
        winner: &Pubkey,
    ) -> Result<FinalizeReceipt, ExternalCallError>;
}

#[derive(Serialize)]
struct FinalizeRequest<'a> {
    network: Network,
    mint: &'a str,
}

#[derive(Deserialize)]
struct FinalizeResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    receipt: FinalizeReceipt,
}

pub struct HttpFinalizer {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpFinalizer {
    pub fn new(
        endpoint: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExternalCallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalCallError::Finalization(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            auth_token,
        })
    }
}

#[async_trait]
impl VictoryFinalizer for HttpFinalizer {
    async fn finalize(
        &self,
        network: Network,
        winner: &Pubkey,
    ) -> Result<FinalizeReceipt, ExternalCallError> {
        let mint = winner.to_string();
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&FinalizeRequest { network, mint: &mint });
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExternalCallError::Finalization(format!("request failed: {}", e)))?;
        let status = response.status();
        let body: FinalizeResponse = response
            .json()
            .await
            .map_err(|e| ExternalCallError::Finalization(format!("bad response ({}): {}", status, e)))?;

        if !status.is_success() || !body.success {
            return Err(ExternalCallError::Finalization(
                body.error.unwrap_or_else(|| format!("service returned {}", status)),
            ));
        }

        info!("🏁 Finalized {} on {} ({:?})", mint, network, body.receipt.signature);
        Ok(body.receipt)
    }
}

/// Used when no finalization service is configured. Victories stay
/// `InBattle` and are retried once one is.
pub struct DisabledFinalizer;

#[async_trait]
impl VictoryFinalizer for DisabledFinalizer {
    async fn finalize(
        &self,
        _network: Network,
        _winner: &Pubkey,
    ) -> Result<FinalizeReceipt, ExternalCallError> {
        Err(ExternalCallError::NotConfigured("victory finalizer".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let ok: FinalizeResponse =
            serde_json::from_str(r#"{"success":true,"signature":"5abc","pool":"Pool1"}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.receipt.signature.as_deref(), Some("5abc"));
        assert_eq!(ok.receipt.pool.as_deref(), Some("Pool1"));

        let failed: FinalizeResponse =
            serde_json::from_str(r#"{"success":false,"error":"blockhash expired"}"#).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("blockhash expired"));
        assert_eq!(failed.receipt, FinalizeReceipt::default());
    }

    #[tokio::test]
    async fn test_disabled_finalizer_is_retryable_failure() {
        let err = DisabledFinalizer
            .finalize(Network::Devnet, &Pubkey::new_unique())
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalCallError::NotConfigured(_)));
    }
}
