//! State reconciler: the only writer of the cache.
//!
//! Every decoded record is applied as a last-write-wins replacement of the
//! cached row, with derived fields recomputed from the fresh record. Writes
//! for one identity are serialized through a per-identity async mutex; the
//! lock guard travels into the blocking store task so a timed-out caller
//! cannot let a second writer overlap a write still in flight.

use dashmap::DashMap;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

use crate::battle::scoring::{score, to_micro_usd, TierParams};
use crate::bonding_curve::{launch_market_cap_micro_usd, progress_percent, time_remaining_secs};
use crate::db::{BattleRow, Database, LaunchRow, OracleRow, PositionRow};
use crate::error::{CurveError, InvariantViolation, PersistenceError, ReconcileError};
use crate::notify::{LifecycleEvent, Notifier};
use crate::types::{
    BattleRecord, BattleStatus, BuyerRecord, DecodedRecord, LaunchRecord, LaunchStatus, Network,
    PriceOracleRecord, RecordKind,
};

/// Context of one account read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub address: Pubkey,
    /// RPC slot the bytes were read at
    pub slot: u64,
    pub observed_at: i64,
    /// Price snapshot for derived market cap; `None` keeps the cached value
    pub sol_price_micro_usd: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Inserted,
    Updated,
    /// Content identical to the cache
    Unchanged,
    /// Observed at an older slot than the cached row; skipped
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Launch {
        from: Option<LaunchStatus>,
        to: LaunchStatus,
    },
    Battle {
        from: Option<BattleStatus>,
        to: BattleStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    pub identity: String,
    pub kind: RecordKind,
    pub outcome: Outcome,
    pub status_change: Option<StatusChange>,
}

/// Proof that the holder owns the per-identity lock. Cloneable so the guard
/// can outlive the caller inside a blocking store task.
#[derive(Clone)]
pub struct IdentityGuard {
    network: Network,
    mint: Option<Pubkey>,
    identity: Arc<str>,
    _held: Arc<HeldLock>,
}

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Releases the mutex, then evicts the table slot once nobody holds or
/// waits on it.
struct HeldLock {
    key: Arc<str>,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the Arc under the shard lock, so a count of one here
        // means only the table still refers to it.
        self.table
            .remove_if(self.key.as_ref(), |_, m| Arc::strong_count(m) == 1);
    }
}

impl IdentityGuard {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn network(&self) -> Network {
        self.network
    }
}

pub fn identity_key(network: Network, mint: &Pubkey) -> String {
    format!("{}:{}", network, mint)
}

fn record_identity(network: Network, record: &DecodedRecord) -> String {
    match record {
        DecodedRecord::Launch(r) => identity_key(network, &r.mint),
        DecodedRecord::Battle(r) => identity_key(network, &r.mint),
        DecodedRecord::Buyer(r) => format!("{}:{}:{}", network, r.launch, r.buyer),
        DecodedRecord::PriceOracle(_) => format!("{}:price_oracle", network),
    }
}

fn persist_err(identity: &str) -> impl Fn(PersistenceError) -> ReconcileError + '_ {
    move |source| ReconcileError::Persistence {
        identity: identity.to_string(),
        source,
    }
}

fn invariant(identity: &str, source: InvariantViolation) -> ReconcileError {
    ReconcileError::Invariant {
        identity: identity.to_string(),
        source,
    }
}

pub struct Reconciler {
    db: Arc<Database>,
    locks: Arc<LockTable>,
    notifier: Arc<dyn Notifier>,
    tiers: HashMap<Network, TierParams>,
    store_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        db: Arc<Database>,
        notifier: Arc<dyn Notifier>,
        tiers: HashMap<Network, TierParams>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            db,
            locks: Arc::new(DashMap::new()),
            notifier,
            tiers,
            store_timeout,
        }
    }

    pub fn tier(&self, network: Network) -> Option<TierParams> {
        self.tiers.get(&network).copied()
    }

    async fn lock_key(&self, network: Network, mint: Option<Pubkey>, key: String) -> IdentityGuard {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let held = mutex.lock_owned().await;
        let identity: Arc<str> = Arc::from(key);
        IdentityGuard {
            network,
            mint,
            identity: identity.clone(),
            _held: Arc::new(HeldLock {
                key: identity,
                table: self.locks.clone(),
                guard: Some(held),
            }),
        }
    }

    pub async fn lock_mint(&self, network: Network, mint: &Pubkey) -> IdentityGuard {
        self.lock_key(network, Some(*mint), identity_key(network, mint)).await
    }

    /// Lock two mints in a fixed order so concurrent pairings cannot deadlock.
    pub async fn lock_pair(
        &self,
        network: Network,
        a: &Pubkey,
        b: &Pubkey,
    ) -> (IdentityGuard, IdentityGuard) {
        if a == b {
            let guard = self.lock_mint(network, a).await;
            return (guard.clone(), guard);
        }
        if a.to_string() < b.to_string() {
            let ga = self.lock_mint(network, a).await;
            let gb = self.lock_mint(network, b).await;
            (ga, gb)
        } else {
            let gb = self.lock_mint(network, b).await;
            let ga = self.lock_mint(network, a).await;
            (ga, gb)
        }
    }

    async fn run_blocking<T, F>(
        &self,
        identity: &str,
        guards: Vec<IdentityGuard>,
        f: F,
    ) -> Result<T, ReconcileError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, ReconcileError> + Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _held = guards;
            f(&db)
        });

        match tokio::time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ReconcileError::Persistence {
                identity: identity.to_string(),
                source: PersistenceError::Unavailable(format!("store task failed: {}", join_err)),
            }),
            Err(_) => Err(ReconcileError::Timeout {
                identity: identity.to_string(),
                after_ms: self.store_timeout.as_millis() as u64,
            }),
        }
    }

    /// Unlocked read for scans and listings.
    pub async fn read<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, PersistenceError> + Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));
        match tokio::time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(PersistenceError::Unavailable(format!(
                "store task failed: {}",
                join_err
            ))),
            Err(_) => Err(PersistenceError::Unavailable(format!(
                "store read timed out after {}ms",
                self.store_timeout.as_millis()
            ))),
        }
    }

    /// Apply one decoded record to the cache.
    pub async fn reconcile(
        &self,
        network: Network,
        record: DecodedRecord,
        obs: Observation,
    ) -> Result<ReconcileResult, ReconcileError> {
        let identity = record_identity(network, &record);
        let kind = record.kind();
        let mint = record.mint().map(|m| m.to_string());
        let tier = self.tier(network);

        let guard = self
            .lock_key(network, record.mint().copied(), identity.clone())
            .await;
        let id = identity.clone();
        let applied = self
            .run_blocking(&identity, vec![guard], move |db| {
                apply(db, &id, network, record, obs, tier)
            })
            .await;

        let (outcome, status_change) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                match &e {
                    ReconcileError::Invariant { .. } => error!("🚫 {}", e),
                    _ => warn!("⚠️  {}", e),
                }
                return Err(e);
            }
        };

        debug!("{} {:?} at slot {}", identity, outcome, obs.slot);
        if let (Some(change), Some(mint)) = (status_change, mint) {
            self.announce(network, &mint, change);
        }

        Ok(ReconcileResult {
            identity,
            kind,
            outcome,
            status_change,
        })
    }

    /// Cached battle row for a locked mint.
    pub async fn current_battle(
        &self,
        guard: &IdentityGuard,
    ) -> Result<Option<BattleRow>, ReconcileError> {
        let network = guard.network;
        let mint = guard
            .mint
            .map(|m| m.to_string())
            .ok_or_else(|| {
                invariant(
                    guard.identity(),
                    InvariantViolation::IdentityMismatch {
                        expected: "mint".to_string(),
                        found: guard.identity().to_string(),
                    },
                )
            })?;
        let id = guard.identity().to_string();
        self.run_blocking(guard.identity(), vec![guard.clone()], move |db| {
            db.get_battle(network, &mint).map_err(persist_err(&id))
        })
        .await
    }

    /// Write engine-driven battle transitions. Every row must be covered by a
    /// held guard; the rows land in one transaction or not at all.
    pub async fn commit_battles(
        &self,
        guards: &[&IdentityGuard],
        rows: Vec<BattleRow>,
    ) -> Result<Vec<StatusChange>, ReconcileError> {
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let label = identity_key(first.network, first.mint());

        for row in &rows {
            let key = identity_key(row.network, row.mint());
            if !guards.iter().any(|g| g.identity() == key) {
                return Err(invariant(
                    &key,
                    InvariantViolation::IdentityMismatch {
                        expected: guards
                            .iter()
                            .map(|g| g.identity())
                            .collect::<Vec<_>>()
                            .join(","),
                        found: key.clone(),
                    },
                ));
            }
        }

        let held: Vec<IdentityGuard> = guards.iter().map(|g| (*g).clone()).collect();
        let id = label.clone();
        let mut to_write = rows.clone();
        let changes = self
            .run_blocking(&label, held, move |db| {
                let mut changes = Vec::with_capacity(to_write.len());
                for row in to_write.iter_mut() {
                    let key = identity_key(row.network, row.mint());
                    row.record
                        .check_invariants()
                        .map_err(|e| invariant(&key, e))?;
                    let existing = db
                        .get_battle(row.network, &row.mint().to_string())
                        .map_err(persist_err(&id))?;
                    // Only chain reads move the chain-observed status.
                    if let Some(ex) = &existing {
                        row.chain_status = ex.chain_status;
                    }
                    let from = existing.map(|e| e.record.battle_status);
                    if let Some(from) = from {
                        if row.record.battle_status < from {
                            return Err(invariant(
                                &key,
                                InvariantViolation::StatusRegression {
                                    from: from.to_string(),
                                    to: row.record.battle_status.to_string(),
                                },
                            ));
                        }
                    }
                    changes.push((from != Some(row.record.battle_status)).then_some(
                        StatusChange::Battle {
                            from,
                            to: row.record.battle_status,
                        },
                    ));
                }
                db.upsert_battles(&to_write).map_err(persist_err(&id))?;
                Ok(changes)
            })
            .await?;

        let mut applied = Vec::new();
        for (row, change) in rows.iter().zip(changes) {
            if let Some(change) = change {
                self.announce(row.network, &row.mint().to_string(), change);
                applied.push(change);
            }
        }
        Ok(applied)
    }

    /// Soft-deactivate a cached token. Returns whether a row was touched.
    pub async fn deactivate(
        &self,
        network: Network,
        kind: RecordKind,
        mint: &Pubkey,
        at: i64,
        reason: &str,
    ) -> Result<bool, ReconcileError> {
        let guard = self.lock_mint(network, mint).await;
        let identity = guard.identity().to_string();
        let id = identity.clone();
        let mint_str = mint.to_string();
        let touched = self
            .run_blocking(&identity, vec![guard], move |db| {
                db.deactivate(network, kind, &mint_str, at)
                    .map_err(persist_err(&id))
            })
            .await?;

        if touched {
            self.notifier.notify(LifecycleEvent::TokenDeactivated {
                network,
                mint: mint.to_string(),
                reason: reason.to_string(),
            });
        }
        Ok(touched)
    }

    fn announce(&self, network: Network, mint: &str, change: StatusChange) {
        let event = match change {
            StatusChange::Launch { from, to } => LifecycleEvent::LaunchStatusChanged {
                network,
                mint: mint.to_string(),
                from,
                to,
            },
            StatusChange::Battle { from, to } => LifecycleEvent::BattleStatusChanged {
                network,
                mint: mint.to_string(),
                from,
                to,
            },
        };
        self.notifier.notify(event);
    }
}

type Applied = (Outcome, Option<StatusChange>);

fn apply(
    db: &Database,
    identity: &str,
    network: Network,
    record: DecodedRecord,
    obs: Observation,
    tier: Option<TierParams>,
) -> Result<Applied, ReconcileError> {
    match record {
        DecodedRecord::Launch(r) => apply_launch(db, identity, network, r, obs),
        DecodedRecord::Battle(r) => apply_battle(db, identity, network, r, obs, tier),
        DecodedRecord::Buyer(r) => apply_buyer(db, identity, network, r, obs),
        DecodedRecord::PriceOracle(r) => apply_oracle(db, identity, network, r, obs),
    }
}

/// Decide the outcome from the cached row and the candidate with its
/// bookkeeping fields aligned to the cache.
fn classify<R: PartialEq>(existing: Option<&R>, aligned: &R) -> Outcome {
    match existing {
        None => Outcome::Inserted,
        Some(ex) if ex == aligned => Outcome::Unchanged,
        Some(_) => Outcome::Updated,
    }
}

fn apply_battle(
    db: &Database,
    identity: &str,
    network: Network,
    mut r: BattleRecord,
    obs: Observation,
    tier: Option<TierParams>,
) -> Result<Applied, ReconcileError> {
    r.check_invariants().map_err(|e| invariant(identity, e))?;

    let existing = db
        .get_battle(network, &r.mint.to_string())
        .map_err(persist_err(identity))?;

    let chain_status = r.battle_status;
    if let Some(ex) = &existing {
        if obs.slot < ex.observed_slot {
            return Ok((Outcome::Stale, None));
        }
        let reset = is_duel_reset(ex.chain_status, chain_status);
        if chain_status < ex.chain_status && !reset {
            return Err(invariant(
                identity,
                InvariantViolation::StatusRegression {
                    from: ex.chain_status.to_string(),
                    to: chain_status.to_string(),
                },
            ));
        }
        if chain_status < ex.record.battle_status && !reset {
            r = keep_engine_progress(&ex.record, r);
        }
    }

    let (market_cap, volume) = match obs.sol_price_micro_usd {
        Some(price) => (
            Some(to_micro_usd(r.sol_collected, price)),
            Some(to_micro_usd(r.total_trade_volume, price)),
        ),
        None => (
            existing.as_ref().and_then(|e| e.market_cap_micro_usd),
            existing.as_ref().and_then(|e| e.volume_micro_usd),
        ),
    };
    let battle_score = match tier {
        Some(t) => score(market_cap.unwrap_or(0), volume.unwrap_or(0), &t),
        None => 0,
    };

    let from = existing.as_ref().map(|e| e.record.battle_status);
    let to = r.battle_status;
    let row = BattleRow {
        network,
        address: obs.address,
        record: r,
        market_cap_micro_usd: market_cap,
        volume_micro_usd: volume,
        battle_score,
        deactivated_at: existing.as_ref().and_then(|e| e.deactivated_at),
        chain_status,
        observed_slot: obs.slot,
        updated_at: obs.observed_at,
    };

    let mut aligned = row.clone();
    if let Some(ex) = &existing {
        aligned.observed_slot = ex.observed_slot;
        aligned.updated_at = ex.updated_at;
    }
    let outcome = classify(existing.as_ref(), &aligned);
    let slot_moved = existing.as_ref().map_or(true, |e| e.observed_slot != obs.slot);

    if outcome != Outcome::Unchanged || slot_moved {
        db.upsert_battles(std::slice::from_ref(&row))
            .map_err(persist_err(identity))?;
    }

    let change = (from != Some(to)).then_some(StatusChange::Battle { from, to });
    Ok((outcome, change))
}

/// Duel settlement returns the losing side from InBattle to Qualified.
fn is_duel_reset(chain_from: BattleStatus, chain_to: BattleStatus) -> bool {
    chain_from == BattleStatus::InBattle && chain_to == BattleStatus::Qualified
}

/// The engine pairs and promotes before the chain does. A chain read that
/// lags behind still carries fresh counters and metadata, so those are taken
/// while the engine-owned lifecycle fields stay as cached.
fn keep_engine_progress(cached: &BattleRecord, chain: BattleRecord) -> BattleRecord {
    BattleRecord {
        battle_status: cached.battle_status,
        opponent_mint: cached.opponent_mint,
        battle_start_timestamp: cached.battle_start_timestamp,
        victory_timestamp: cached.victory_timestamp,
        listing_timestamp: cached.listing_timestamp,
        qualification_timestamp: cached.qualification_timestamp,
        ..chain
    }
}

fn launch_market_cap(record: &LaunchRecord, price: u64) -> Result<u64, CurveError> {
    let reserve = record.virtual_sol_reserve().ok_or(CurveError::Overflow)?;
    let mc = launch_market_cap_micro_usd(reserve, record.constant_k, price)?;
    Ok(u64::try_from(mc).unwrap_or(u64::MAX))
}

fn apply_launch(
    db: &Database,
    identity: &str,
    network: Network,
    r: LaunchRecord,
    obs: Observation,
) -> Result<Applied, ReconcileError> {
    let existing = db
        .get_launch(network, &r.mint.to_string())
        .map_err(persist_err(identity))?;

    if let Some(ex) = &existing {
        if obs.slot < ex.observed_slot {
            return Ok((Outcome::Stale, None));
        }
        let cached = &ex.record;
        if !cached.status.can_transition_to(r.status) {
            return Err(invariant(
                identity,
                InvariantViolation::IllegalLaunchTransition {
                    from: cached.status.to_string(),
                    to: r.status.to_string(),
                },
            ));
        }
        if cached.status == LaunchStatus::Active
            && r.status == LaunchStatus::Active
            && r.sol_raised < cached.sol_raised
        {
            return Err(invariant(
                identity,
                InvariantViolation::SolRaisedDecreased {
                    cached: cached.sol_raised,
                    incoming: r.sol_raised,
                },
            ));
        }
    }

    let market_cap = match obs.sol_price_micro_usd {
        Some(price) => match launch_market_cap(&r, price) {
            Ok(mc) => Some(mc),
            Err(e) => {
                warn!("⚠️  {} market cap unavailable: {}", identity, e);
                None
            }
        },
        None => existing.as_ref().and_then(|e| e.market_cap_micro_usd),
    };
    let time_remaining = if matches!(r.status, LaunchStatus::Active | LaunchStatus::Paused) {
        time_remaining_secs(r.deadline, obs.observed_at)
    } else {
        0
    };

    let from = existing.as_ref().map(|e| e.record.status);
    let to = r.status;
    let row = LaunchRow {
        network,
        address: obs.address,
        progress_percent: progress_percent(r.sol_raised, r.target_sol),
        record: r,
        market_cap_micro_usd: market_cap,
        time_remaining_secs: time_remaining,
        holder_count: existing.as_ref().map_or(0, |e| e.holder_count),
        deactivated_at: existing.as_ref().and_then(|e| e.deactivated_at),
        observed_slot: obs.slot,
        updated_at: obs.observed_at,
    };

    let mut aligned = row.clone();
    if let Some(ex) = &existing {
        aligned.observed_slot = ex.observed_slot;
        aligned.updated_at = ex.updated_at;
    }
    let outcome = classify(existing.as_ref(), &aligned);
    let slot_moved = existing.as_ref().map_or(true, |e| e.observed_slot != obs.slot);

    if outcome != Outcome::Unchanged || slot_moved {
        db.upsert_launch(&row).map_err(persist_err(identity))?;
    }

    let change = (from != Some(to)).then_some(StatusChange::Launch { from, to });
    Ok((outcome, change))
}

fn apply_buyer(
    db: &Database,
    identity: &str,
    network: Network,
    r: BuyerRecord,
    obs: Observation,
) -> Result<Applied, ReconcileError> {
    let existing = db
        .get_position(network, &r.launch.to_string(), &r.buyer.to_string())
        .map_err(persist_err(identity))?;

    if let Some(ex) = &existing {
        if obs.slot < ex.observed_slot {
            return Ok((Outcome::Stale, None));
        }
        if ex.record.refund_claimed && !r.refund_claimed {
            return Err(invariant(identity, InvariantViolation::RefundReverted));
        }
    }

    let row = PositionRow {
        network,
        address: obs.address,
        record: r,
        observed_slot: obs.slot,
        updated_at: obs.observed_at,
    };
    let mut aligned = row.clone();
    if let Some(ex) = &existing {
        aligned.observed_slot = ex.observed_slot;
        aligned.updated_at = ex.updated_at;
    }
    let outcome = classify(existing.as_ref(), &aligned);
    let slot_moved = existing.as_ref().map_or(true, |e| e.observed_slot != obs.slot);

    if outcome != Outcome::Unchanged || slot_moved {
        db.upsert_position(&row).map_err(persist_err(identity))?;
    }
    Ok((outcome, None))
}

fn apply_oracle(
    db: &Database,
    identity: &str,
    network: Network,
    r: PriceOracleRecord,
    obs: Observation,
) -> Result<Applied, ReconcileError> {
    r.check_invariants().map_err(|e| invariant(identity, e))?;

    let existing = db.get_oracle(network).map_err(persist_err(identity))?;
    if let Some(ex) = &existing {
        if obs.slot < ex.observed_slot {
            return Ok((Outcome::Stale, None));
        }
    }

    let row = OracleRow {
        network,
        address: obs.address,
        record: r,
        observed_slot: obs.slot,
        updated_at: obs.observed_at,
    };
    let mut aligned = row.clone();
    if let Some(ex) = &existing {
        aligned.observed_slot = ex.observed_slot;
        aligned.updated_at = ex.updated_at;
    }
    let outcome = classify(existing.as_ref(), &aligned);
    let slot_moved = existing.as_ref().map_or(true, |e| e.observed_slot != obs.slot);

    if outcome != Outcome::Unchanged || slot_moved {
        db.upsert_oracle(&row).map_err(persist_err(identity))?;
    }
    Ok((outcome, None))
}
