//! 🔄 Sync orchestrator
//!
//! Three ways into the reconciler: webhook event batches, the scheduled full
//! scan and operator resyncs. All of them re-read canonical account bytes
//! and never trust event payloads as state.

pub mod events;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::decoder;
use crate::error::{ExternalCallError, InvariantViolation, ReconcileError, SyncError};
use crate::pda::ProgramIds;
use crate::price::{fetch_snapshot, PriceFeed};
use crate::reconciler::{Observation, Outcome, ReconcileResult, Reconciler};
use crate::rpc::{AccountSource, FetchedAccount};
use crate::types::{Network, RecordKind};
use events::{parse_batch, RejectedEvent};

/// Knobs for fan-out and retry.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub concurrency: usize,
    pub price_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub scan_program_accounts: bool,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            concurrency: cfg.concurrency.max(1),
            price_timeout: cfg.price_timeout(),
            retry_attempts: cfg.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            scan_program_accounts: cfg.scan_program_accounts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub identity: String,
    pub kind: &'static str,
    pub error: String,
}

impl From<&SyncError> for SyncFailure {
    fn from(err: &SyncError) -> Self {
        Self {
            identity: err.mint().to_string(),
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

/// Per-outcome counters shared by batch and scan reports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Tally {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub failures: Vec<SyncFailure>,
}

impl Tally {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Inserted => self.inserted += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Stale => self.stale += 1,
        }
    }

    fn fail(&mut self, err: &SyncError) {
        self.failures.push(SyncFailure::from(err));
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub network: Network,
    pub received: usize,
    pub accepted: usize,
    pub rejected: Vec<RejectedEvent>,
    pub mints: usize,
    /// Mints with no account on either program
    pub not_found: Vec<String>,
    #[serde(flatten)]
    pub tally: Tally,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkScan {
    pub network: Network,
    pub accounts: usize,
    pub deactivated: usize,
    #[serde(flatten)]
    pub tally: Tally,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub networks: Vec<NetworkScan>,
    pub cancelled: bool,
}

/// What re-reading one mint produced. Each account kind succeeds or fails
/// on its own.
#[derive(Debug, Default)]
struct MintSync {
    results: Vec<ReconcileResult>,
    errors: Vec<SyncError>,
}

impl MintSync {
    fn push(&mut self, synced: Result<Option<ReconcileResult>, SyncError>) {
        match synced {
            Ok(Some(result)) => self.results.push(result),
            Ok(None) => {}
            Err(e) => self.errors.push(e),
        }
    }

    fn has_launch(&self) -> bool {
        self.results.iter().any(|r| r.kind == RecordKind::Launch)
    }

    /// Partial success wins; NotFound only when nothing exists.
    fn into_result(self, mint: &Pubkey) -> Result<Vec<ReconcileResult>, SyncError> {
        if !self.results.is_empty() {
            return Ok(self.results);
        }
        match self.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Err(SyncError::NotFound {
                mint: mint.to_string(),
            }),
        }
    }
}

pub struct SyncOrchestrator {
    accounts: Arc<dyn AccountSource>,
    reconciler: Arc<Reconciler>,
    price: Arc<dyn PriceFeed>,
    programs: HashMap<Network, ProgramIds>,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        accounts: Arc<dyn AccountSource>,
        reconciler: Arc<Reconciler>,
        price: Arc<dyn PriceFeed>,
        programs: HashMap<Network, ProgramIds>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            accounts,
            reconciler,
            price,
            programs,
            settings,
        }
    }

    /// Configured networks in a stable order.
    pub fn networks(&self) -> Vec<Network> {
        Network::ALL
            .iter()
            .copied()
            .filter(|n| self.programs.contains_key(n))
            .collect()
    }

    fn programs_for(&self, network: Network) -> Result<&ProgramIds, ExternalCallError> {
        self.programs
            .get(&network)
            .ok_or_else(|| ExternalCallError::NotConfigured(format!("{} programs", network)))
    }

    /// One price for a whole batch or scan. Missing prices keep cached
    /// market caps rather than failing the sync.
    async fn price_snapshot(&self, network: Network) -> Option<u64> {
        match fetch_snapshot(self.price.as_ref(), network, self.settings.price_timeout).await {
            Ok(snapshot) => {
                if snapshot.stale {
                    warn!("⚠️  Using stale {} SOL price {}", network, snapshot.sol_price_micro_usd);
                }
                Some(snapshot.sol_price_micro_usd)
            }
            Err(e) => {
                warn!("⚠️  No {} SOL price, market caps keep cached values: {}", network, e);
                None
            }
        }
    }

    async fn retrying<T, E, F, Fut>(
        &self,
        what: &str,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        let mut delay = self.settings.retry_backoff;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.settings.retry_attempts && retryable(&e) => {
                    warn!(
                        "⚠️  {} failed (attempt {}/{}): {}",
                        what, attempt, self.settings.retry_attempts, e
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch(
        &self,
        network: Network,
        address: &Pubkey,
    ) -> Result<Option<FetchedAccount>, ExternalCallError> {
        self.retrying(
            "account fetch",
            |e: &ExternalCallError| !matches!(e, ExternalCallError::NotConfigured(_)),
            || self.accounts.fetch_account(network, address),
        )
        .await
    }

    /// Decode and reconcile one fetched account. `expected_mint` guards
    /// against a PDA holding a record for some other mint.
    async fn apply(
        &self,
        network: Network,
        label: &str,
        account: FetchedAccount,
        expected_mint: Option<&Pubkey>,
        price: Option<u64>,
    ) -> Result<ReconcileResult, SyncError> {
        let record = decoder::decode(&account.data).map_err(|source| {
            warn!("⚠️  Malformed account {} for {}: {}", account.address, label, source);
            SyncError::Malformed {
                mint: label.to_string(),
                source,
            }
        })?;

        if let (Some(expected), Some(found)) = (expected_mint, record.mint()) {
            if expected != found {
                let source = InvariantViolation::IdentityMismatch {
                    expected: expected.to_string(),
                    found: found.to_string(),
                };
                error!("🚫 {} at {}: {}", label, account.address, source);
                return Err(SyncError::Rejected {
                    mint: label.to_string(),
                    source,
                });
            }
        }

        let obs = Observation {
            address: account.address,
            slot: account.slot,
            observed_at: chrono::Utc::now().timestamp(),
            sol_price_micro_usd: price,
        };
        let reconciler = &self.reconciler;
        self.retrying(
            "reconcile",
            ReconcileError::is_retryable,
            || reconciler.reconcile(network, record.clone(), obs),
        )
        .await
        .map_err(|err| match err {
            ReconcileError::Invariant { source, .. } => SyncError::Rejected {
                mint: label.to_string(),
                source,
            },
            other => SyncError::PersistFailed {
                mint: label.to_string(),
                source: other,
            },
        })
    }

    /// Sync the account of one kind for `mint`. `Ok(None)` when the account
    /// does not exist.
    async fn sync_kind(
        &self,
        network: Network,
        mint: &Pubkey,
        kind: RecordKind,
        price: Option<u64>,
    ) -> Result<Option<ReconcileResult>, SyncError> {
        let label = mint.to_string();
        let fetch_err = |source| SyncError::Fetch {
            mint: label.clone(),
            source,
        };
        let ids = self.programs_for(network).map_err(fetch_err)?;
        let address = match kind {
            RecordKind::Battle => ids.battle_state(mint),
            RecordKind::Launch => ids.launch(mint),
            other => {
                return Err(SyncError::InvalidIdentity(format!(
                    "{} records are not keyed by mint",
                    other.as_str()
                )))
            }
        };

        match self.fetch(network, &address).await.map_err(fetch_err)? {
            Some(account) => self
                .apply(network, &label, account, Some(mint), price)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Buyer position of `holder` in the launch for `mint`. `Ok(None)` when
    /// they never bought through the launch program.
    async fn sync_position(
        &self,
        network: Network,
        mint: &Pubkey,
        holder: &Pubkey,
        price: Option<u64>,
    ) -> Result<Option<ReconcileResult>, SyncError> {
        let label = mint.to_string();
        let fetch_err = |source| SyncError::Fetch {
            mint: label.clone(),
            source,
        };
        let ids = self.programs_for(network).map_err(fetch_err)?;
        let address = ids.buyer_record(&ids.launch(mint), holder);
        match self.fetch(network, &address).await.map_err(fetch_err)? {
            Some(account) => self.apply(network, &label, account, None, price).await.map(Some),
            None => Ok(None),
        }
    }

    /// Both program accounts for a mint, each tried regardless of the other.
    async fn sync_mint(&self, network: Network, mint: &Pubkey, price: Option<u64>) -> MintSync {
        let mut synced = MintSync::default();
        for kind in [RecordKind::Battle, RecordKind::Launch] {
            synced.push(self.sync_kind(network, mint, kind, price).await);
        }
        synced
    }

    /// Manual resync of one mint.
    pub async fn resync(
        &self,
        network: Network,
        mint: &str,
    ) -> Result<Vec<ReconcileResult>, SyncError> {
        let mint = Pubkey::from_str(mint.trim())
            .map_err(|_| SyncError::InvalidIdentity(mint.to_string()))?;
        let price = self.price_snapshot(network).await;
        let synced = self.sync_mint(network, &mint, price).await;
        if !synced.results.is_empty() {
            for e in &synced.errors {
                warn!("🔧 Resync of {} on {} partly failed ({}): {}", mint, network, e.kind(), e);
            }
        }
        let result = synced.into_result(&mint);
        match &result {
            Ok(results) => info!("🔧 Resynced {} on {}: {} record(s)", mint, network, results.len()),
            Err(e) => warn!("🔧 Resync of {} on {} failed ({}): {}", mint, network, e.kind(), e),
        }
        result
    }

    /// Event intake: every unique mint in the batch is re-read and
    /// reconciled, along with the buyer positions of holders named for
    /// launch tokens. One mint failing never stops the others.
    pub async fn ingest_events(
        &self,
        network: Network,
        items: Vec<Value>,
        cancel: &CancellationToken,
    ) -> IngestReport {
        let received = items.len();
        let batch = parse_batch(items);
        for rejected in &batch.rejected {
            warn!("⚠️  Rejected event #{}: {}", rejected.index, rejected.reason);
        }
        for event in &batch.accepted {
            debug!("📥 {} {:?}", event.signature, event.hint());
        }
        info!(
            "📥 {} event(s) on {}: {} accepted, {} mint(s) to sync",
            received,
            network,
            batch.accepted.len(),
            batch.mints.len()
        );

        let price = if batch.mints.is_empty() {
            None
        } else {
            self.price_snapshot(network).await
        };

        let mut holders: HashMap<Pubkey, Vec<Pubkey>> = HashMap::new();
        for (mint, holder) in &batch.holders {
            holders.entry(*mint).or_default().push(*holder);
        }
        let holders = &holders;

        let outcomes: Vec<(Pubkey, Option<MintSync>)> = stream::iter(batch.mints.iter().copied())
            .map(|mint| async move {
                if cancel.is_cancelled() {
                    return (mint, None);
                }
                let mut synced = self.sync_mint(network, &mint, price).await;
                if synced.has_launch() {
                    for holder in holders.get(&mint).into_iter().flatten() {
                        synced.push(self.sync_position(network, &mint, holder, price).await);
                    }
                }
                (mint, Some(synced))
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut report = IngestReport {
            network,
            received,
            accepted: batch.accepted.len(),
            rejected: batch.rejected,
            mints: batch.mints.len(),
            not_found: Vec::new(),
            tally: Tally::default(),
            cancelled: false,
        };
        for (mint, outcome) in outcomes {
            match outcome {
                None => report.cancelled = true,
                Some(synced) if synced.results.is_empty() && synced.errors.is_empty() => {
                    report.not_found.push(mint.to_string())
                }
                Some(synced) => {
                    synced.results.iter().for_each(|r| report.tally.add(r.outcome));
                    synced.errors.iter().for_each(|e| report.tally.fail(e));
                }
            }
        }

        info!(
            "✅ Batch done on {}: {} inserted, {} updated, {} unchanged, {} stale, {} not found, {} failed",
            network,
            report.tally.inserted,
            report.tally.updated,
            report.tally.unchanged,
            report.tally.stale,
            report.not_found.len(),
            report.tally.failures.len()
        );
        report
    }

    /// Full scan of every configured network. Cancellation is honoured
    /// between identities.
    pub async fn full_scan(&self, cancel: &CancellationToken) -> ScanReport {
        let mut report = ScanReport::default();
        for network in self.networks() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let (scan, cancelled) = self.scan_network(network, cancel).await;
            info!(
                "🔍 Scan of {}: {} accounts, {} inserted, {} updated, {} unchanged, {} stale, {} deactivated, {} failed",
                network,
                scan.accounts,
                scan.tally.inserted,
                scan.tally.updated,
                scan.tally.unchanged,
                scan.tally.stale,
                scan.deactivated,
                scan.tally.failures.len()
            );
            report.networks.push(scan);
            if cancelled {
                report.cancelled = true;
                break;
            }
        }
        report
    }

    async fn scan_network(&self, network: Network, cancel: &CancellationToken) -> (NetworkScan, bool) {
        let mut scan = NetworkScan {
            network,
            accounts: 0,
            deactivated: 0,
            tally: Tally::default(),
        };
        let mut cancelled = false;
        let price = self.price_snapshot(network).await;

        // Mints already refreshed from program enumeration, per kind
        let mut seen: HashSet<(RecordKind, Pubkey)> = HashSet::new();

        if self.settings.scan_program_accounts {
            let accounts = self.enumerate(network, &mut scan).await;
            scan.accounts += accounts.len();

            let outcomes: Vec<Option<(String, Result<ReconcileResult, SyncError>)>> =
                stream::iter(accounts)
                    .map(|account| async move {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        let label = account.address.to_string();
                        let result = self.apply(network, &label, account, None, price).await;
                        Some((label, result))
                    })
                    .buffer_unordered(self.settings.concurrency)
                    .collect()
                    .await;

            for outcome in outcomes {
                match outcome {
                    None => cancelled = true,
                    Some((_, Ok(result))) => {
                        scan.tally.add(result.outcome);
                        if let Some(mint) = mint_of(&result) {
                            seen.insert((result.kind, mint));
                        }
                    }
                    Some((_, Err(e))) => scan.tally.fail(&e),
                }
            }
        }

        if cancelled {
            return (scan, true);
        }

        // Cached mints the enumeration did not cover, including closed accounts
        let known = match self.reconciler.read(move |db| db.known_mints(network)).await {
            Ok(known) => known,
            Err(e) => {
                error!("❌ Could not list cached mints on {}: {}", network, e);
                scan.tally.failures.push(SyncFailure {
                    identity: network.to_string(),
                    kind: "persist_failed",
                    error: e.to_string(),
                });
                return (scan, false);
            }
        };
        let pending: Vec<(RecordKind, Pubkey)> = known
            .into_iter()
            .filter_map(|(kind, mint)| Pubkey::from_str(&mint).ok().map(|m| (kind, m)))
            .filter(|key| !seen.contains(key))
            .collect();

        let outcomes: Vec<Option<(RecordKind, Pubkey, Result<Option<ReconcileResult>, SyncError>)>> =
            stream::iter(pending)
                .map(|(kind, mint)| async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some((kind, mint, self.sync_kind(network, &mint, kind, price).await))
                })
                .buffer_unordered(self.settings.concurrency)
                .collect()
                .await;

        let now = chrono::Utc::now().timestamp();
        for outcome in outcomes {
            match outcome {
                None => cancelled = true,
                Some((_, _, Ok(Some(result)))) => {
                    scan.accounts += 1;
                    scan.tally.add(result.outcome);
                }
                Some((kind, mint, Ok(None))) => {
                    match self
                        .reconciler
                        .deactivate(network, kind, &mint, now, "account closed on-chain")
                        .await
                    {
                        Ok(true) => scan.deactivated += 1,
                        Ok(false) => {}
                        Err(e) => warn!("⚠️  Could not deactivate {}: {}", mint, e),
                    }
                }
                Some((_, _, Err(e))) => scan.tally.fail(&e),
            }
        }

        (scan, cancelled)
    }

    /// Program-owned accounts of every kind plus the oracle singleton.
    async fn enumerate(&self, network: Network, scan: &mut NetworkScan) -> Vec<FetchedAccount> {
        let ids = match self.programs_for(network) {
            Ok(ids) => *ids,
            Err(e) => {
                scan.tally.failures.push(SyncFailure {
                    identity: network.to_string(),
                    kind: "fetch_failed",
                    error: e.to_string(),
                });
                return Vec::new();
            }
        };

        let targets = [
            (ids.battle, RecordKind::Battle),
            (ids.launch, RecordKind::Launch),
            (ids.launch, RecordKind::Buyer),
        ];
        let mut accounts = Vec::new();
        for (program, kind) in targets {
            let discriminator = decoder::discriminator_for(kind);
            let listed = self
                .retrying(
                    "program account scan",
                    |e: &ExternalCallError| !matches!(e, ExternalCallError::NotConfigured(_)),
                    || self.accounts.program_accounts(network, &program, discriminator),
                )
                .await;
            match listed {
                Ok(found) => {
                    debug!("{} {} accounts on {}", found.len(), kind.as_str(), network);
                    accounts.extend(found);
                }
                Err(e) => {
                    warn!("⚠️  Listing {} accounts on {} failed: {}", kind.as_str(), network, e);
                    scan.tally.failures.push(SyncFailure {
                        identity: program.to_string(),
                        kind: "fetch_failed",
                        error: e.to_string(),
                    });
                }
            }
        }

        match self.fetch(network, &ids.price_oracle()).await {
            Ok(Some(oracle)) => accounts.push(oracle),
            Ok(None) => debug!("No price oracle on {}", network),
            Err(e) => warn!("⚠️  Price oracle fetch on {} failed: {}", network, e),
        }
        accounts
    }
}

fn mint_of(result: &ReconcileResult) -> Option<Pubkey> {
    match result.kind {
        RecordKind::Launch | RecordKind::Battle => result
            .identity
            .split_once(':')
            .and_then(|(_, mint)| Pubkey::from_str(mint).ok()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::decoder::encode::{encode_battle, encode_buyer, encode_launch};
    use crate::testing::{
        battle_record, buyer_record, launch_record, test_tier, FixedPrice, MemoryAccounts,
        RecordingNotifier,
    };
    use crate::types::{BattleStatus, LaunchStatus};
    use serde_json::json;

    const PRICE: u64 = 100_000_000;

    struct Harness {
        sync: SyncOrchestrator,
        accounts: Arc<MemoryAccounts>,
        db: Arc<Database>,
        ids: ProgramIds,
    }

    fn harness() -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let reconciler = Arc::new(Reconciler::new(
            db.clone(),
            Arc::new(RecordingNotifier::default()),
            HashMap::from([(Network::Devnet, test_tier())]),
            Duration::from_secs(5),
        ));
        let ids = ProgramIds {
            battle: Pubkey::new_unique(),
            launch: Pubkey::new_unique(),
        };
        let accounts = Arc::new(MemoryAccounts::default());
        let sync = SyncOrchestrator::new(
            accounts.clone(),
            reconciler,
            Arc::new(FixedPrice(Some(PRICE))),
            HashMap::from([(Network::Devnet, ids)]),
            SyncSettings {
                concurrency: 4,
                price_timeout: Duration::from_secs(1),
                retry_attempts: 2,
                retry_backoff: Duration::from_millis(1),
                scan_program_accounts: true,
            },
        );
        Harness {
            sync,
            accounts,
            db,
            ids,
        }
    }

    fn put_battle(h: &Harness, mint: Pubkey, sol: u64, slot: u64) {
        let record = battle_record(mint, BattleStatus::Created, sol, 0);
        h.accounts
            .put(Network::Devnet, h.ids.battle_state(&mint), encode_battle(&record), slot);
    }

    #[tokio::test]
    async fn test_resync_distinguishes_failure_classes() {
        let h = harness();
        let missing = Pubkey::new_unique();
        assert!(matches!(
            h.sync.resync(Network::Devnet, &missing.to_string()).await,
            Err(SyncError::NotFound { .. })
        ));

        let malformed = Pubkey::new_unique();
        h.accounts
            .put(Network::Devnet, h.ids.battle_state(&malformed), vec![0u8; 40], 1);
        let err = h
            .sync
            .resync(Network::Devnet, &malformed.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "malformed");

        let good = Pubkey::new_unique();
        put_battle(&h, good, 2_000_000_000, 7);
        let results = h.sync.resync(Network::Devnet, &good.to_string()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Outcome::Inserted);
        let row = h.db.get_battle(Network::Devnet, &good.to_string()).unwrap().unwrap();
        assert_eq!(row.market_cap_micro_usd, Some(200_000_000));
        assert_eq!(row.observed_slot, 7);

        assert!(matches!(
            h.sync.resync(Network::Devnet, "nope").await,
            Err(SyncError::InvalidIdentity(_))
        ));

        let broken = Pubkey::new_unique();
        h.accounts.fail(h.ids.battle_state(&broken));
        assert_eq!(
            h.sync.resync(Network::Devnet, &broken.to_string()).await.unwrap_err().kind(),
            "fetch_failed"
        );
    }

    #[tokio::test]
    async fn test_resync_rejects_foreign_record() {
        let h = harness();
        let mint = Pubkey::new_unique();
        let other = battle_record(Pubkey::new_unique(), BattleStatus::Created, 1, 0);
        h.accounts
            .put(Network::Devnet, h.ids.battle_state(&mint), encode_battle(&other), 1);
        let err = h.sync.resync(Network::Devnet, &mint.to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Rejected {
                source: InvariantViolation::IdentityMismatch { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_ingest_tolerates_partial_failure() {
        let h = harness();
        let good = Pubkey::new_unique();
        let bad = Pubkey::new_unique();
        let unknown = Pubkey::new_unique();
        put_battle(&h, good, 5, 3);
        h.accounts
            .put(Network::Devnet, h.ids.battle_state(&bad), vec![1u8; 200], 3);

        let items = vec![
            json!({"signature": "s1", "tokenTransfers": [{"mint": good.to_string()}, {"mint": bad.to_string()}]}),
            json!({"signature": "s2", "accountData": [{"account": "a", "tokenBalanceChanges": [{"mint": good.to_string()}, {"mint": unknown.to_string()}]}]}),
            json!({"signature": "s3", "tokenTransfers": [{"mint": "garbage"}]}),
        ];
        let report = h
            .sync
            .ingest_events(Network::Devnet, items, &CancellationToken::new())
            .await;

        assert_eq!(report.received, 3);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.mints, 3);
        assert_eq!(report.tally.inserted, 1);
        assert_eq!(report.not_found, vec![unknown.to_string()]);
        assert_eq!(report.tally.failures.len(), 1);
        assert_eq!(report.tally.failures[0].kind, "malformed");
        assert!(h.db.get_battle(Network::Devnet, &good.to_string()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_launch_syncs_when_battle_fetch_fails() {
        let h = harness();
        let mint = Pubkey::new_unique();
        h.accounts.fail(h.ids.battle_state(&mint));
        h.accounts.put(
            Network::Devnet,
            h.ids.launch(&mint),
            encode_launch(&launch_record(mint, 1_000_000_000, LaunchStatus::Active)),
            5,
        );

        let results = h.sync.resync(Network::Devnet, &mint.to_string()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, RecordKind::Launch);
        assert!(h.db.get_launch(Network::Devnet, &mint.to_string()).unwrap().is_some());

        let report = h
            .sync
            .ingest_events(
                Network::Devnet,
                vec![json!({"signature": "s", "tokenTransfers": [{"mint": mint.to_string()}]})],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(report.tally.inserted, 0);
        assert_eq!(report.tally.updated + report.tally.unchanged, 1);
        assert_eq!(report.tally.failures.len(), 1);
        assert_eq!(report.tally.failures[0].kind, "fetch_failed");
        assert!(report.not_found.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_refreshes_named_buyer_positions() {
        let h = harness();
        let mint = Pubkey::new_unique();
        let launch_address = h.ids.launch(&mint);
        h.accounts.put(
            Network::Devnet,
            launch_address,
            encode_launch(&launch_record(mint, 1_000_000_000, LaunchStatus::Active)),
            6,
        );
        let buyer = buyer_record(launch_address, Pubkey::new_unique(), 500);
        h.accounts.put(
            Network::Devnet,
            h.ids.buyer_record(&launch_address, &buyer.buyer),
            encode_buyer(&buyer),
            6,
        );
        // Named in the event but never bought through the launch
        let pool = Pubkey::new_unique();

        let items = vec![json!({
            "signature": "s",
            "description": "Wallet bought 500 TOKEN",
            "accountData": [{"account": "x", "tokenBalanceChanges": [
                {"mint": mint.to_string(), "userAccount": buyer.buyer.to_string()},
                {"mint": mint.to_string(), "userAccount": pool.to_string()}
            ]}]
        })];
        let report = h
            .sync
            .ingest_events(Network::Devnet, items, &CancellationToken::new())
            .await;
        assert_eq!(report.tally.inserted, 2);
        assert!(report.tally.failures.is_empty());

        let position = h
            .db
            .get_position(Network::Devnet, &launch_address.to_string(), &buyer.buyer.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(position.record.sol_spent, buyer.sol_spent);
        let launch = h.db.get_launch(Network::Devnet, &mint.to_string()).unwrap().unwrap();
        assert_eq!(launch.holder_count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_batch_touches_nothing() {
        let h = harness();
        let mint = Pubkey::new_unique();
        put_battle(&h, mint, 5, 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = h
            .sync
            .ingest_events(
                Network::Devnet,
                vec![json!({"signature": "s", "tokenTransfers": [{"mint": mint.to_string()}]})],
                &cancel,
            )
            .await;
        assert!(report.cancelled);
        assert!(h.db.get_battle(Network::Devnet, &mint.to_string()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_scan_covers_programs_and_deactivates_closed() {
        let h = harness();
        let battle_mint = Pubkey::new_unique();
        let launch_mint = Pubkey::new_unique();
        put_battle(&h, battle_mint, 10, 4);
        let launch_address = h.ids.launch(&launch_mint);
        h.accounts.put(
            Network::Devnet,
            launch_address,
            encode_launch(&launch_record(launch_mint, 1_000_000_000, LaunchStatus::Active)),
            4,
        );
        let buyer = buyer_record(launch_address, Pubkey::new_unique(), 500);
        h.accounts.put(
            Network::Devnet,
            h.ids.buyer_record(&launch_address, &buyer.buyer),
            encode_buyer(&buyer),
            4,
        );

        let first = h.sync.full_scan(&CancellationToken::new()).await;
        assert!(!first.cancelled);
        let scan = &first.networks[0];
        assert_eq!(scan.accounts, 3);
        assert_eq!(scan.tally.inserted, 3);
        assert!(scan.tally.failures.is_empty());

        let launch = h.db.get_launch(Network::Devnet, &launch_mint.to_string()).unwrap().unwrap();
        assert_eq!(launch.holder_count, 1);
        assert!(launch.market_cap_micro_usd.is_some());

        // Second pass is a no-op apart from the closed battle account
        h.accounts.remove(Network::Devnet, &h.ids.battle_state(&battle_mint));
        let second = h.sync.full_scan(&CancellationToken::new()).await;
        let scan = &second.networks[0];
        assert_eq!(scan.tally.unchanged, 2);
        assert_eq!(scan.deactivated, 1);
        let closed = h.db.get_battle(Network::Devnet, &battle_mint.to_string()).unwrap().unwrap();
        assert!(!closed.is_active());
    }
}
