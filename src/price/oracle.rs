use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::{PriceFeed, PriceSnapshot};
use crate::decoder;
use crate::error::ExternalCallError;
use crate::pda::ProgramIds;
use crate::rpc::AccountSource;
use crate::types::{DecodedRecord, Network};

/// Reads the keeper-maintained price oracle account.
pub struct OraclePriceFeed {
    accounts: Arc<dyn AccountSource>,
    programs: HashMap<Network, ProgramIds>,
}

impl OraclePriceFeed {
    pub fn new(accounts: Arc<dyn AccountSource>, programs: HashMap<Network, ProgramIds>) -> Self {
        Self { accounts, programs }
    }
}

#[async_trait]
impl PriceFeed for OraclePriceFeed {
    async fn sol_price(&self, network: Network) -> Result<PriceSnapshot, ExternalCallError> {
        let programs = self
            .programs
            .get(&network)
            .ok_or_else(|| ExternalCallError::NotConfigured(format!("{} programs", network)))?;
        let address = programs.price_oracle();

        let account = self
            .accounts
            .fetch_account(network, &address)
            .await?
            .ok_or_else(|| {
                ExternalCallError::PriceFeed(format!("price oracle {} not found", address))
            })?;

        let oracle = match decoder::decode(&account.data) {
            Ok(DecodedRecord::PriceOracle(oracle)) => oracle,
            Ok(other) => {
                return Err(ExternalCallError::PriceFeed(format!(
                    "{} holds a {} record",
                    address,
                    other.kind().as_str()
                )))
            }
            Err(e) => {
                return Err(ExternalCallError::PriceFeed(format!(
                    "malformed price oracle {}: {}",
                    address, e
                )))
            }
        };

        if oracle.sol_price_micro_usd == 0 {
            return Err(ExternalCallError::PriceFeed("oracle price is zero".to_string()));
        }

        let now = chrono::Utc::now().timestamp();
        let stale = oracle.is_stale_at(now) || oracle.check_invariants().is_err();
        if stale {
            warn!(
                "⚠️  {} price oracle is stale (next update was due {})",
                network, oracle.next_update_timestamp
            );
        }

        Ok(PriceSnapshot {
            sol_price_micro_usd: oracle.sol_price_micro_usd,
            published_at: oracle.last_update_timestamp,
            stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::encode::encode_price_oracle;
    use crate::testing::MemoryAccounts;
    use crate::types::PriceOracleRecord;
    use solana_sdk::pubkey::Pubkey;

    fn setup(next_update: i64) -> (OraclePriceFeed, Arc<MemoryAccounts>) {
        let ids = ProgramIds {
            battle: Pubkey::new_unique(),
            launch: Pubkey::new_unique(),
        };
        let accounts = Arc::new(MemoryAccounts::default());
        let now = chrono::Utc::now().timestamp();
        accounts.put(
            Network::Devnet,
            ids.price_oracle(),
            encode_price_oracle(&PriceOracleRecord {
                sol_price_micro_usd: 142_500_000,
                last_update_timestamp: now - 100,
                next_update_timestamp: now + next_update,
                keeper_authority: Pubkey::new_unique(),
                update_count: 9,
            }),
            10,
        );
        let programs = HashMap::from([(Network::Devnet, ids)]);
        (OraclePriceFeed::new(accounts.clone(), programs), accounts)
    }

    #[tokio::test]
    async fn test_fresh_oracle_price() {
        let (feed, _) = setup(3_600);
        let snap = feed.sol_price(Network::Devnet).await.unwrap();
        assert_eq!(snap.sol_price_micro_usd, 142_500_000);
        assert!(!snap.stale);
    }

    #[tokio::test]
    async fn test_stale_oracle_is_flagged_not_fatal() {
        let (feed, _) = setup(-50);
        let snap = feed.sol_price(Network::Devnet).await.unwrap();
        assert!(snap.stale);
    }

    #[tokio::test]
    async fn test_unconfigured_network() {
        let (feed, _) = setup(3_600);
        assert!(matches!(
            feed.sol_price(Network::Mainnet).await,
            Err(ExternalCallError::NotConfigured(_))
        ));
    }
}
