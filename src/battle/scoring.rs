//! Battle scoring
//!
//! Each side of a duel earns one point per victory threshold it meets:
//! market cap and cumulative trade volume, both in micro-USD at the scan's
//! price snapshot. Two points wins.

use std::cmp::Ordering;

use solana_sdk::pubkey::Pubkey;

use crate::bonding_curve::{lamports_to_micro_usd, MICRO_USD_PER_USD};
use crate::config::TierConfig;
use crate::db::BattleRow;
use crate::types::BattleStatus;

pub const WINNING_SCORE: u8 = 2;

/// Tier thresholds in engine units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierParams {
    pub qualification_lamports: u64,
    pub victory_market_cap_micro_usd: u64,
    pub victory_volume_micro_usd: u64,
    pub matchmaking_tolerance_lamports: u64,
}

impl From<&TierConfig> for TierParams {
    fn from(cfg: &TierConfig) -> Self {
        let micro = MICRO_USD_PER_USD as u64;
        Self {
            qualification_lamports: cfg.qualification_lamports,
            victory_market_cap_micro_usd: cfg.victory_market_cap_usd.saturating_mul(micro),
            victory_volume_micro_usd: cfg.victory_volume_usd.saturating_mul(micro),
            matchmaking_tolerance_lamports: cfg.matchmaking_tolerance_lamports,
        }
    }
}

/// Lamports valued at `sol_price_micro_usd`, saturating at u64::MAX.
pub fn to_micro_usd(lamports: u64, sol_price_micro_usd: u64) -> u64 {
    u64::try_from(lamports_to_micro_usd(lamports, sol_price_micro_usd)).unwrap_or(u64::MAX)
}

pub fn score(market_cap_micro_usd: u64, volume_micro_usd: u64, tier: &TierParams) -> u8 {
    (market_cap_micro_usd >= tier.victory_market_cap_micro_usd) as u8
        + (volume_micro_usd >= tier.victory_volume_micro_usd) as u8
}

/// A created token qualifies once it has collected the tier minimum.
pub fn qualifies(row: &BattleRow, tier: &TierParams) -> bool {
    row.record.battle_status == BattleStatus::Created
        && row.record.sol_collected >= tier.qualification_lamports
}

/// One side of a duel valued at a single price snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub mint: Pubkey,
    pub opponent: Option<Pubkey>,
    pub market_cap_micro_usd: u64,
    pub volume_micro_usd: u64,
    pub score: u8,
    pub last_trade_timestamp: i64,
}

impl Standing {
    pub fn of(row: &BattleRow, sol_price_micro_usd: u64, tier: &TierParams) -> Self {
        let market_cap = to_micro_usd(row.record.sol_collected, sol_price_micro_usd);
        let volume = to_micro_usd(row.record.total_trade_volume, sol_price_micro_usd);
        Self {
            mint: row.record.mint,
            opponent: row.record.opponent_mint,
            market_cap_micro_usd: market_cap,
            volume_micro_usd: volume,
            score: score(market_cap, volume, tier),
            last_trade_timestamp: row.record.last_trade_timestamp,
        }
    }

    pub fn has_won(&self) -> bool {
        self.score >= WINNING_SCORE
    }
}

/// Order two winning sides: earlier last trade first, then higher market
/// cap, then the smaller mint. `Less` means `a` takes the win.
pub fn tie_break(a: &Standing, b: &Standing) -> Ordering {
    a.last_trade_timestamp
        .cmp(&b.last_trade_timestamp)
        .then_with(|| b.market_cap_micro_usd.cmp(&a.market_cap_micro_usd))
        .then_with(|| a.mint.to_string().cmp(&b.mint.to_string()))
}

/// Winner of a duel at this snapshot, if either side has two points.
pub fn decide<'a>(a: &'a Standing, b: Option<&'a Standing>) -> Option<&'a Standing> {
    match (a.has_won(), b.filter(|s| s.has_won())) {
        (true, Some(b)) => Some(if tie_break(a, b) == Ordering::Greater { b } else { a }),
        (true, None) => Some(a),
        (false, Some(b)) => Some(b),
        (false, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> TierParams {
        TierParams::from(&TierConfig {
            qualification_lamports: 1,
            victory_market_cap_usd: 1200,
            victory_volume_usd: 200,
            matchmaking_tolerance_lamports: 0,
        })
    }

    fn standing(mc_usd: u64, vol_usd: u64, last_trade: i64) -> Standing {
        let t = tier();
        let mc = mc_usd * 1_000_000;
        let vol = vol_usd * 1_000_000;
        Standing {
            mint: Pubkey::new_unique(),
            opponent: None,
            market_cap_micro_usd: mc,
            volume_micro_usd: vol,
            score: score(mc, vol, &t),
            last_trade_timestamp: last_trade,
        }
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let t = tier();
        assert_eq!(score(1_200_000_000, 200_000_000, &t), 2);
        assert_eq!(score(1_199_999_999, 250_000_000, &t), 1);
        assert_eq!(score(0, 0, &t), 0);
    }

    #[test]
    fn test_sol_values_at_snapshot_price() {
        // 12 SOL and 2.5 SOL at $100
        assert_eq!(to_micro_usd(12_000_000_000, 100_000_000), 1_200_000_000);
        assert_eq!(to_micro_usd(2_500_000_000, 100_000_000), 250_000_000);
        assert_eq!(to_micro_usd(u64::MAX, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_single_winner() {
        let a = standing(1200, 250, 50);
        let b = standing(300, 20, 10);
        assert_eq!(decide(&a, Some(&b)).map(|s| s.mint), Some(a.mint));
        assert_eq!(decide(&b, Some(&a)).map(|s| s.mint), Some(a.mint));
        assert!(decide(&b, None).is_none());
    }

    #[test]
    fn test_tie_break_order() {
        let early = standing(1300, 300, 10);
        let late = standing(5000, 900, 20);
        assert_eq!(decide(&late, Some(&early)).map(|s| s.mint), Some(early.mint));

        let mut bigger = standing(2000, 300, 10);
        let smaller = standing(1500, 300, 10);
        assert_eq!(decide(&smaller, Some(&bigger)).map(|s| s.mint), Some(bigger.mint));

        // Full tie falls back to the mint
        bigger.market_cap_micro_usd = smaller.market_cap_micro_usd;
        let expected = if bigger.mint.to_string() < smaller.mint.to_string() {
            bigger.mint
        } else {
            smaller.mint
        };
        assert_eq!(decide(&bigger, Some(&smaller)).map(|s| s.mint), Some(expected));
        assert_eq!(decide(&smaller, Some(&bigger)).map(|s| s.mint), Some(expected));
    }
}
