//! ⏱️ Background loops: periodic full scan and victory detection.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::battle::BattleEngine;
use crate::sync::SyncOrchestrator;
use crate::types::Network;

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
    // A slow pass delays the next one instead of bursting to catch up
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Spawn the full-scan backstop. The first pass runs immediately.
pub fn spawn_full_scan(
    sync: Arc<SyncOrchestrator>,
    period: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("🔍 Full scan: Started (interval={}s)", period.as_secs());
        let mut interval = ticker(period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = sync.full_scan(&shutdown).await;
            let failures: usize = report.networks.iter().map(|n| n.tally.failures.len()).sum();
            if failures > 0 {
                warn!("⚠️  Full scan finished with {} failure(s)", failures);
            }
            if report.cancelled {
                break;
            }
        }
        info!("🔍 Full scan: Stopped");
    })
}

/// Spawn the victory loop: promote qualified tokens, then decide duels.
pub fn spawn_victory_loop(
    battles: Arc<BattleEngine>,
    networks: Vec<Network>,
    period: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "🏆 Victory loop: Started (interval={}s, networks={:?})",
            period.as_secs(),
            networks
        );
        let mut interval = ticker(period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            for &network in &networks {
                if shutdown.is_cancelled() {
                    break;
                }
                run_victory_cycle(&battles, network).await;
            }
        }
        info!("🏆 Victory loop: Stopped");
    })
}

async fn run_victory_cycle(battles: &BattleEngine, network: Network) {
    match battles.promote_qualified(network).await {
        Ok(promoted) if !promoted.is_empty() => {
            info!("✅ {} token(s) qualified on {}", promoted.len(), network)
        }
        Ok(_) => {}
        Err(e) => warn!("⚠️  Qualification pass on {} failed: {}", network, e),
    }

    match battles.detect_winners(network).await {
        Ok(scan) => {
            debug!(
                "🏆 {}: {} examined, {} victories, {} failures",
                network,
                scan.examined,
                scan.victories.len(),
                scan.failures.len()
            );
            for failure in &scan.failures {
                warn!("⚠️  Victory handling for {} failed: {}", failure.mint, failure.error);
            }
        }
        Err(e) => warn!("⚠️  Victory scan on {} failed: {}", network, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::reconciler::Reconciler;
    use crate::testing::{
        battle_record, observation, test_tier, FixedPrice, RecordingFinalizer, RecordingNotifier,
    };
    use crate::types::{BattleStatus, DecodedRecord};
    use solana_sdk::pubkey::Pubkey;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_victory_loop_promotes_and_stops_on_cancel() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let reconciler = Arc::new(Reconciler::new(
            db.clone(),
            Arc::new(RecordingNotifier::default()),
            HashMap::from([(Network::Devnet, test_tier())]),
            Duration::from_secs(5),
        ));
        let mint = Pubkey::new_unique();
        reconciler
            .reconcile(
                Network::Devnet,
                DecodedRecord::Battle(battle_record(mint, BattleStatus::Created, 10, 0)),
                observation(1, Some(100_000_000)),
            )
            .await
            .unwrap();

        let battles = Arc::new(BattleEngine::new(
            reconciler,
            Arc::new(FixedPrice(Some(100_000_000))),
            Arc::new(RecordingFinalizer::default()),
            Arc::new(RecordingNotifier::default()),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let shutdown = CancellationToken::new();
        let handle = spawn_victory_loop(
            battles,
            vec![Network::Devnet],
            Duration::from_secs(3600),
            shutdown.clone(),
        );

        // The first tick fires immediately
        let mut promoted = false;
        for _ in 0..100 {
            let row = db.get_battle(Network::Devnet, &mint.to_string()).unwrap().unwrap();
            if row.record.battle_status == BattleStatus::Qualified {
                promoted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(promoted);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
