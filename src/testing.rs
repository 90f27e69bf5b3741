//! In-memory doubles and record fixtures shared by unit tests.

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::battle::scoring::TierParams;
use crate::config::TierConfig;
use crate::error::ExternalCallError;
use crate::finalizer::{FinalizeReceipt, VictoryFinalizer};
use crate::notify::{LifecycleEvent, Notifier};
use crate::price::{PriceFeed, PriceSnapshot};
use crate::reconciler::Observation;
use crate::rpc::{AccountSource, FetchedAccount};
use crate::types::{BattleRecord, BattleStatus, BuyerRecord, LaunchRecord, LaunchStatus, Network};

pub const NOW: i64 = 1_760_000_000;

/// Chain state held in memory. Program filtering only checks the
/// discriminator.
#[derive(Default)]
pub struct MemoryAccounts {
    accounts: Mutex<HashMap<(Network, Pubkey), FetchedAccount>>,
    failing: Mutex<HashSet<Pubkey>>,
}

impl MemoryAccounts {
    pub fn put(&self, network: Network, address: Pubkey, data: Vec<u8>, slot: u64) {
        self.accounts.lock().unwrap().insert(
            (network, address),
            FetchedAccount {
                address,
                data,
                slot,
            },
        );
    }

    pub fn remove(&self, network: Network, address: &Pubkey) {
        self.accounts.lock().unwrap().remove(&(network, *address));
    }

    /// Make every fetch of `address` fail with an RPC error.
    pub fn fail(&self, address: Pubkey) {
        self.failing.lock().unwrap().insert(address);
    }
}

#[async_trait]
impl AccountSource for MemoryAccounts {
    async fn fetch_account(
        &self,
        network: Network,
        address: &Pubkey,
    ) -> Result<Option<FetchedAccount>, ExternalCallError> {
        if self.failing.lock().unwrap().contains(address) {
            return Err(ExternalCallError::Rpc(format!("{} unavailable", address)));
        }
        Ok(self.accounts.lock().unwrap().get(&(network, *address)).cloned())
    }

    async fn program_accounts(
        &self,
        network: Network,
        _program: &Pubkey,
        discriminator: [u8; 8],
    ) -> Result<Vec<FetchedAccount>, ExternalCallError> {
        let mut found: Vec<FetchedAccount> = self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|((n, _), acc)| *n == network && acc.data.starts_with(&discriminator))
            .map(|(_, acc)| acc.clone())
            .collect();
        found.sort_by_key(|acc| acc.address.to_string());
        Ok(found)
    }
}

pub struct FixedPrice(pub Option<u64>);

#[async_trait]
impl PriceFeed for FixedPrice {
    async fn sol_price(&self, _network: Network) -> Result<PriceSnapshot, ExternalCallError> {
        match self.0 {
            Some(price) => Ok(PriceSnapshot {
                sol_price_micro_usd: price,
                published_at: NOW,
                stale: false,
            }),
            None => Err(ExternalCallError::PriceFeed("no price".to_string())),
        }
    }
}

/// Finalizer that fails its first `failures` calls, then succeeds.
#[derive(Default)]
pub struct RecordingFinalizer {
    pub failures: AtomicUsize,
    pub pool: Option<String>,
    calls: Mutex<Vec<Pubkey>>,
}

impl RecordingFinalizer {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    /// Succeeds and reports the pool as already created.
    pub fn with_pool(pool: &str) -> Self {
        Self {
            pool: Some(pool.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Pubkey> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VictoryFinalizer for RecordingFinalizer {
    async fn finalize(
        &self,
        _network: Network,
        winner: &Pubkey,
    ) -> Result<FinalizeReceipt, ExternalCallError> {
        self.calls.lock().unwrap().push(*winner);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ExternalCallError::Finalization("simulated failure".to_string()));
        }
        Ok(FinalizeReceipt {
            signature: Some(format!("sig-{}", winner)),
            pool: self.pool.clone(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: LifecycleEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Tier with $1,200 market cap and $200 volume to win.
pub fn test_tier() -> TierParams {
    TierParams::from(&TierConfig {
        qualification_lamports: 1,
        victory_market_cap_usd: 1200,
        victory_volume_usd: 200,
        matchmaking_tolerance_lamports: 5_000_000_000,
    })
}

pub fn observation(slot: u64, sol_price_micro_usd: Option<u64>) -> Observation {
    Observation {
        address: Pubkey::new_from_array([9; 32]),
        slot,
        observed_at: NOW,
        sol_price_micro_usd,
    }
}

/// Battle record with an opponent set exactly when the status needs one.
pub fn battle_record(
    mint: Pubkey,
    status: BattleStatus,
    sol_collected: u64,
    total_trade_volume: u64,
) -> BattleRecord {
    BattleRecord {
        mint,
        sol_collected,
        tokens_sold: sol_collected / 2,
        total_trade_volume,
        is_active: true,
        battle_status: status,
        opponent_mint: status.requires_opponent().then(Pubkey::new_unique),
        creation_timestamp: NOW - 3_600,
        last_trade_timestamp: NOW - 60,
        battle_start_timestamp: 0,
        victory_timestamp: 0,
        listing_timestamp: 0,
        qualification_timestamp: 0,
        bump: 254,
        name: "Battle".to_string(),
        symbol: "BTL".to_string(),
        uri: "https://example.invalid/battle.json".to_string(),
    }
}

pub fn launch_record(mint: Pubkey, sol_raised: u64, status: LaunchStatus) -> LaunchRecord {
    LaunchRecord {
        creator: Pubkey::new_from_array([3; 32]),
        mint,
        tier: 1,
        virtual_sol_init: 353_000_000,
        constant_k: 378_769_000_000_000_000_000_000,
        target_sol: 85_000_000_000,
        deadline: NOW + 86_400,
        sol_raised,
        status,
        created_at: NOW - 600,
        graduated_at: None,
        pool: None,
        total_buyers: 0,
        total_tokens_sold: 0,
        name: "Launch".to_string(),
        symbol: "LNCH".to_string(),
        uri: String::new(),
        bump: 253,
    }
}

pub fn buyer_record(launch: Pubkey, buyer: Pubkey, tokens_received: u64) -> BuyerRecord {
    BuyerRecord {
        launch,
        buyer,
        sol_spent: tokens_received / 10 + 1,
        tokens_received,
        refund_claimed: false,
        thawed: false,
        first_buy_timestamp: NOW - 100,
        last_buy_timestamp: NOW - 50,
        bump: 252,
    }
}
