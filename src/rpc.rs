//! Account access over Solana JSON-RPC.
//!
//! `AccountSource` is the seam the sync engine reads chain state through.
//! Every RPC call runs under a timeout and a timed-out call is a failure.

use async_trait::async_trait;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::ExternalCallError;
use crate::types::Network;

/// Raw account bytes plus the slot they were observed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAccount {
    pub address: Pubkey,
    pub data: Vec<u8>,
    pub slot: u64,
}

#[async_trait]
pub trait AccountSource: Send + Sync {
    /// `Ok(None)` when the account does not exist.
    async fn fetch_account(
        &self,
        network: Network,
        address: &Pubkey,
    ) -> Result<Option<FetchedAccount>, ExternalCallError>;

    /// All accounts owned by `program` whose data starts with `discriminator`.
    async fn program_accounts(
        &self,
        network: Network,
        program: &Pubkey,
        discriminator: [u8; 8],
    ) -> Result<Vec<FetchedAccount>, ExternalCallError>;
}

pub struct RpcAccountSource {
    clients: HashMap<Network, Arc<RpcClient>>,
    timeout: Duration,
}

impl RpcAccountSource {
    pub fn new(endpoints: &[(Network, String)], timeout: Duration) -> Self {
        let clients = endpoints
            .iter()
            .map(|(network, url)| {
                let client = RpcClient::new_with_timeout_and_commitment(
                    url.clone(),
                    timeout,
                    CommitmentConfig::confirmed(),
                );
                (*network, Arc::new(client))
            })
            .collect();
        Self { clients, timeout }
    }

    fn client(&self, network: Network) -> Result<&Arc<RpcClient>, ExternalCallError> {
        self.clients
            .get(&network)
            .ok_or_else(|| ExternalCallError::NotConfigured(format!("{} rpc endpoint", network)))
    }

    async fn timed<T, E: std::fmt::Display>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, ExternalCallError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ExternalCallError::Rpc(format!("{}: {}", what, e))),
            Err(_) => Err(ExternalCallError::Timeout {
                what,
                after_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl AccountSource for RpcAccountSource {
    async fn fetch_account(
        &self,
        network: Network,
        address: &Pubkey,
    ) -> Result<Option<FetchedAccount>, ExternalCallError> {
        let client = self.client(network)?;
        let response = self
            .timed(
                "getAccountInfo",
                client.get_account_with_commitment(address, CommitmentConfig::confirmed()),
            )
            .await?;

        let slot = response.context.slot;
        Ok(response.value.map(|account| FetchedAccount {
            address: *address,
            data: account.data,
            slot,
        }))
    }

    async fn program_accounts(
        &self,
        network: Network,
        program: &Pubkey,
        discriminator: [u8; 8],
    ) -> Result<Vec<FetchedAccount>, ExternalCallError> {
        let client = self.client(network)?;

        // getProgramAccounts carries no context slot, so the slot read first
        // is a lower bound for every account returned
        let slot = self.timed("getSlot", client.get_slot()).await?;

        let config = RpcProgramAccountsConfig {
            filters: Some(vec![RpcFilterType::Memcmp(Memcmp::new_raw_bytes(
                0,
                discriminator.to_vec(),
            ))]),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(CommitmentConfig::confirmed()),
                ..Default::default()
            },
            ..Default::default()
        };

        let accounts = self
            .timed(
                "getProgramAccounts",
                client.get_program_accounts_with_config(program, config),
            )
            .await?;

        debug!("📥 {} accounts from {} on {}", accounts.len(), program, network);
        Ok(accounts
            .into_iter()
            .map(|(address, account)| FetchedAccount {
                address,
                data: account.data,
                slot,
            })
            .collect())
    }
}
