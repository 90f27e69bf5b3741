//! Lifecycle announcements for downstream collaborators (points, notifications).
//!
//! Delivery is fire-and-forget: a notifier must not block or fail the caller.

use serde::Serialize;
use tracing::info;

use crate::types::{BattleStatus, LaunchStatus, Network};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    LaunchStatusChanged {
        network: Network,
        mint: String,
        from: Option<LaunchStatus>,
        to: LaunchStatus,
    },
    BattleStatusChanged {
        network: Network,
        mint: String,
        from: Option<BattleStatus>,
        to: BattleStatus,
    },
    BattleStarted {
        network: Network,
        mint_a: String,
        mint_b: String,
    },
    VictoryDetected {
        network: Network,
        winner: String,
        loser: Option<String>,
        market_cap_micro_usd: u64,
        volume_micro_usd: u64,
    },
    TokenDeactivated {
        network: Network,
        mint: String,
        reason: String,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: LifecycleEvent);
}

/// Writes events to the log as JSON.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: LifecycleEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!("📣 {}", json),
            Err(_) => info!("📣 {:?}", event),
        }
    }
}
