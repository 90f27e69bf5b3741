//! ⚔️ Battle lifecycle engine
//!
//! Moves battle tokens along Created → Qualified → InBattle → VictoryPending
//! → Listed → PoolCreated. Every transition is written through the
//! reconciler under the identity lock of each token it touches, so a scan,
//! a pairing and a chain re-read of the same mint never interleave.

pub mod scoring;

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::BattleRow;
use crate::error::{BattleError, ExternalCallError, InvariantViolation, ReconcileError};
use crate::finalizer::{FinalizeReceipt, VictoryFinalizer};
use crate::notify::{LifecycleEvent, Notifier};
use crate::price::{fetch_snapshot, PriceFeed};
use crate::reconciler::{identity_key, IdentityGuard, Reconciler};
use crate::types::{BattleStatus, Network, RecordKind};
use scoring::{decide, qualifies, Standing, TierParams};

/// Result of one victory scan pass.
#[derive(Debug, Clone, Serialize)]
pub struct VictoryScan {
    pub network: Network,
    pub sol_price_micro_usd: u64,
    pub price_stale: bool,
    pub examined: usize,
    pub victories: Vec<String>,
    pub failures: Vec<ScanFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanFailure {
    pub mint: String,
    pub error: String,
}

pub struct BattleEngine {
    reconciler: Arc<Reconciler>,
    price: Arc<dyn PriceFeed>,
    finalizer: Arc<dyn VictoryFinalizer>,
    notifier: Arc<dyn Notifier>,
    price_timeout: Duration,
    finalizer_timeout: Duration,
}

impl BattleEngine {
    pub fn new(
        reconciler: Arc<Reconciler>,
        price: Arc<dyn PriceFeed>,
        finalizer: Arc<dyn VictoryFinalizer>,
        notifier: Arc<dyn Notifier>,
        price_timeout: Duration,
        finalizer_timeout: Duration,
    ) -> Self {
        Self {
            reconciler,
            price,
            finalizer,
            notifier,
            price_timeout,
            finalizer_timeout,
        }
    }

    fn tier(&self, network: Network) -> Result<TierParams, BattleError> {
        self.reconciler
            .tier(network)
            .ok_or_else(|| BattleError::NoTier(network.to_string()))
    }

    async fn locked_row(&self, guard: &IdentityGuard, mint: &Pubkey) -> Result<BattleRow, BattleError> {
        self.reconciler
            .current_battle(guard)
            .await?
            .ok_or_else(|| BattleError::UnknownToken {
                mint: mint.to_string(),
            })
    }

    pub async fn list(&self, network: Network, status: BattleStatus) -> Result<Vec<BattleRow>, BattleError> {
        Ok(self
            .reconciler
            .read(move |db| db.battles_by_status(network, status))
            .await?)
    }

    /// Promote every Created token that has collected the tier minimum.
    pub async fn promote_qualified(&self, network: Network) -> Result<Vec<String>, BattleError> {
        let tier = self.tier(network)?;
        let created = self
            .reconciler
            .read(move |db| db.battles_by_status(network, BattleStatus::Created))
            .await?;

        let mut promoted = Vec::new();
        for candidate in created.iter().filter(|r| r.is_active() && qualifies(r, &tier)) {
            let mint = *candidate.mint();
            let guard = self.reconciler.lock_mint(network, &mint).await;
            let mut row = match self.locked_row(&guard, &mint).await {
                Ok(row) => row,
                Err(e) => {
                    warn!("⚠️  Could not re-read {}: {}", mint, e);
                    continue;
                }
            };
            // Re-check under the lock, a chain read may have moved it on
            if !qualifies(&row, &tier) {
                continue;
            }

            row.record.battle_status = BattleStatus::Qualified;
            if row.record.qualification_timestamp == 0 {
                row.record.qualification_timestamp = chrono::Utc::now().timestamp();
            }
            match self.reconciler.commit_battles(&[&guard], vec![row]).await {
                Ok(_) => {
                    info!("✅ {} qualified on {}", mint, network);
                    promoted.push(mint.to_string());
                }
                Err(e) => warn!("⚠️  Failed to qualify {}: {}", mint, e),
            }
        }
        Ok(promoted)
    }

    /// Closest Qualified token by collected SOL, within the tier tolerance.
    pub async fn find_opponent(
        &self,
        network: Network,
        mint: &Pubkey,
    ) -> Result<Option<BattleRow>, BattleError> {
        let tier = self.tier(network)?;
        let key = mint.to_string();
        let (me, qualified) = self
            .reconciler
            .read(move |db| {
                let me = db.get_battle(network, &key)?;
                let qualified = db.battles_by_status(network, BattleStatus::Qualified)?;
                Ok((me, qualified))
            })
            .await?;

        let me = me.ok_or_else(|| BattleError::UnknownToken {
            mint: mint.to_string(),
        })?;
        expect_status(&me, BattleStatus::Qualified)?;

        let target = me.record.sol_collected;
        let best = qualified
            .into_iter()
            .filter(|r| r.mint() != mint && r.is_active())
            .map(|r| (r.record.sol_collected.abs_diff(target), r))
            .filter(|(gap, _)| *gap <= tier.matchmaking_tolerance_lamports)
            .min_by(|(ga, a), (gb, b)| {
                ga.cmp(gb)
                    .then_with(|| a.mint().to_string().cmp(&b.mint().to_string()))
            })
            .map(|(_, r)| r);

        debug!("🔍 Opponent for {}: {:?}", mint, best.as_ref().map(|r| r.mint()));
        Ok(best)
    }

    /// Pair two Qualified tokens. Both sides move to InBattle in one write.
    pub async fn start_battle(
        &self,
        network: Network,
        a: &Pubkey,
        b: &Pubkey,
    ) -> Result<(), BattleError> {
        if a == b {
            return Err(ReconcileError::Invariant {
                identity: identity_key(network, a),
                source: InvariantViolation::PairingRejected("a token cannot battle itself".to_string()),
            }
            .into());
        }

        let (guard_a, guard_b) = self.reconciler.lock_pair(network, a, b).await;
        let mut row_a = self.locked_row(&guard_a, a).await?;
        let mut row_b = self.locked_row(&guard_b, b).await?;
        for row in [&row_a, &row_b] {
            expect_status(row, BattleStatus::Qualified)?;
            if !row.is_active() {
                return Err(ReconcileError::Invariant {
                    identity: identity_key(network, row.mint()),
                    source: InvariantViolation::PairingRejected("token is inactive".to_string()),
                }
                .into());
            }
        }

        let now = chrono::Utc::now().timestamp();
        row_a.record.battle_status = BattleStatus::InBattle;
        row_a.record.opponent_mint = Some(*b);
        row_a.record.battle_start_timestamp = now;
        row_b.record.battle_status = BattleStatus::InBattle;
        row_b.record.opponent_mint = Some(*a);
        row_b.record.battle_start_timestamp = now;

        self.reconciler
            .commit_battles(&[&guard_a, &guard_b], vec![row_a, row_b])
            .await?;

        info!("⚔️  Battle started on {}: {} vs {}", network, a, b);
        self.notifier.notify(LifecycleEvent::BattleStarted {
            network,
            mint_a: a.to_string(),
            mint_b: b.to_string(),
        });
        Ok(())
    }

    /// One victory scan: a single price snapshot values every InBattle token,
    /// and each duel yields at most one winner.
    pub async fn detect_winners(&self, network: Network) -> Result<VictoryScan, BattleError> {
        let tier = self.tier(network)?;
        let snapshot = fetch_snapshot(self.price.as_ref(), network, self.price_timeout).await?;
        if snapshot.stale {
            warn!(
                "⚠️  Scanning {} with a stale SOL price ({} micro-USD)",
                network, snapshot.sol_price_micro_usd
            );
        }
        let price = snapshot.sol_price_micro_usd;

        let in_battle = self
            .reconciler
            .read(move |db| db.battles_by_status(network, BattleStatus::InBattle))
            .await?;
        let standings: HashMap<Pubkey, Standing> = in_battle
            .iter()
            .filter(|r| r.is_active())
            .map(|r| (*r.mint(), Standing::of(r, price, &tier)))
            .collect();

        let mut ordered: Vec<&Standing> = standings.values().collect();
        ordered.sort_by_key(|s| s.mint.to_string());

        let mut seen = HashSet::new();
        let mut winners = Vec::new();
        for side in ordered {
            if !seen.insert(side.mint) {
                continue;
            }
            let other = side.opponent.and_then(|m| standings.get(&m));
            if let Some(other) = other {
                seen.insert(other.mint);
            }
            if let Some(winner) = decide(side, other) {
                winners.push(winner.clone());
            }
        }

        let mut scan = VictoryScan {
            network,
            sol_price_micro_usd: price,
            price_stale: snapshot.stale,
            examined: standings.len(),
            victories: Vec::new(),
            failures: Vec::new(),
        };

        for winner in winners {
            match self.finalize_victory(network, &winner).await {
                Ok(true) => scan.victories.push(winner.mint.to_string()),
                Ok(false) => {}
                Err(e) => {
                    warn!("⚠️  Victory for {} not finalized, will retry: {}", winner.mint, e);
                    scan.failures.push(ScanFailure {
                        mint: winner.mint.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "🏆 Victory scan on {}: {} in battle, {} victories, {} failures",
            network,
            scan.examined,
            scan.victories.len(),
            scan.failures.len()
        );
        Ok(scan)
    }

    /// Finalize one winner. The token stays InBattle unless the external
    /// call succeeds. Returns false when the token already moved on.
    async fn finalize_victory(&self, network: Network, winner: &Standing) -> Result<bool, BattleError> {
        let guard = self.reconciler.lock_mint(network, &winner.mint).await;
        let mut row = self.locked_row(&guard, &winner.mint).await?;
        if row.record.battle_status != BattleStatus::InBattle || !row.is_active() {
            debug!("{} is {}, skipping finalization", winner.mint, row.record.battle_status);
            return Ok(false);
        }

        let receipt = self.call_finalizer(network, &winner.mint).await?;

        row.record.battle_status = BattleStatus::VictoryPending;
        row.record.victory_timestamp = chrono::Utc::now().timestamp();
        row.market_cap_micro_usd = Some(winner.market_cap_micro_usd);
        row.volume_micro_usd = Some(winner.volume_micro_usd);
        row.battle_score = winner.score;
        let loser = row.record.opponent_mint;
        self.reconciler.commit_battles(&[&guard], vec![row]).await?;
        drop(guard);

        info!(
            "🏆 {} won on {} (signature {:?})",
            winner.mint, network, receipt.signature
        );
        self.notifier.notify(LifecycleEvent::VictoryDetected {
            network,
            winner: winner.mint.to_string(),
            loser: loser.map(|m| m.to_string()),
            market_cap_micro_usd: winner.market_cap_micro_usd,
            volume_micro_usd: winner.volume_micro_usd,
        });

        if let Some(pool) = &receipt.pool {
            info!("🏊 Pool {} created for {}", pool, winner.mint);
            if let Err(e) = self.complete_listing(network, &winner.mint).await {
                warn!("⚠️  Listing {} deferred: {}", winner.mint, e);
            }
        }
        Ok(true)
    }

    async fn call_finalizer(
        &self,
        network: Network,
        mint: &Pubkey,
    ) -> Result<FinalizeReceipt, ExternalCallError> {
        match tokio::time::timeout(self.finalizer_timeout, self.finalizer.finalize(network, mint)).await {
            Ok(result) => result,
            Err(_) => Err(ExternalCallError::Timeout {
                what: "victory finalization",
                after_ms: self.finalizer_timeout.as_millis() as u64,
            }),
        }
    }

    /// VictoryPending → Listed after finalization. The loser is retired
    /// locally; its battle status is left as the chain reports it.
    pub async fn complete_listing(&self, network: Network, mint: &Pubkey) -> Result<(), BattleError> {
        let guard = self.reconciler.lock_mint(network, mint).await;
        let mut row = self.locked_row(&guard, mint).await?;
        expect_status(&row, BattleStatus::VictoryPending)?;

        let now = chrono::Utc::now().timestamp();
        let loser = row.record.opponent_mint.take();
        row.record.battle_status = BattleStatus::Listed;
        row.record.listing_timestamp = now;
        self.reconciler.commit_battles(&[&guard], vec![row]).await?;
        drop(guard);

        info!("📈 {} listed on {}", mint, network);
        if let Some(loser) = loser {
            let reason = format!("lost battle to {}", mint);
            self.reconciler
                .deactivate(network, RecordKind::Battle, &loser, now, &reason)
                .await?;
        }
        Ok(())
    }

    /// Listed → PoolCreated once the pool is confirmed tradable.
    pub async fn confirm_pool(&self, network: Network, mint: &Pubkey) -> Result<(), BattleError> {
        let guard = self.reconciler.lock_mint(network, mint).await;
        let mut row = self.locked_row(&guard, mint).await?;
        expect_status(&row, BattleStatus::Listed)?;
        row.record.battle_status = BattleStatus::PoolCreated;
        self.reconciler.commit_battles(&[&guard], vec![row]).await?;
        info!("🏊 Pool live for {} on {}", mint, network);
        Ok(())
    }
}

fn expect_status(row: &BattleRow, expected: BattleStatus) -> Result<(), BattleError> {
    if row.record.battle_status != expected {
        return Err(BattleError::WrongStatus {
            mint: row.mint().to_string(),
            expected: expected.to_string(),
            actual: row.record.battle_status.to_string(),
        });
    }
    Ok(())
}
