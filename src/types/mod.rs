use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

use crate::error::InvariantViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Devnet,
    Mainnet,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Devnet, Network::Mainnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Devnet => "devnet",
            Network::Mainnet => "mainnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "devnet" => Ok(Network::Devnet),
            "mainnet" | "mainnet-beta" => Ok(Network::Mainnet),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Launch,
    Battle,
    Buyer,
    PriceOracle,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Launch => "launch",
            RecordKind::Battle => "battle",
            RecordKind::Buyer => "buyer",
            RecordKind::PriceOracle => "price_oracle",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "launch" => Some(RecordKind::Launch),
            "battle" => Some(RecordKind::Battle),
            "buyer" => Some(RecordKind::Buyer),
            "price_oracle" => Some(RecordKind::PriceOracle),
            _ => None,
        }
    }
}

/// Launch lifecycle, ordinals as written by the launch program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaunchStatus {
    Active,
    ReadyToGraduate,
    GraduationInProgress,
    Graduated,
    Failed,
    Paused,
}

impl LaunchStatus {
    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(LaunchStatus::Active),
            1 => Some(LaunchStatus::ReadyToGraduate),
            2 => Some(LaunchStatus::GraduationInProgress),
            3 => Some(LaunchStatus::Graduated),
            4 => Some(LaunchStatus::Failed),
            5 => Some(LaunchStatus::Paused),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            LaunchStatus::Active => 0,
            LaunchStatus::ReadyToGraduate => 1,
            LaunchStatus::GraduationInProgress => 2,
            LaunchStatus::Graduated => 3,
            LaunchStatus::Failed => 4,
            LaunchStatus::Paused => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LaunchStatus::Graduated | LaunchStatus::Failed)
    }

    /// Launch status only moves forward; pause/resume is the one reversible edge.
    pub fn can_transition_to(&self, next: LaunchStatus) -> bool {
        use LaunchStatus::*;
        if *self == next {
            return true;
        }
        match (*self, next) {
            (Active, Paused) | (Paused, Active) => true,
            (Active | Paused, ReadyToGraduate) => true,
            (Active | Paused, Failed) => true,
            (ReadyToGraduate, GraduationInProgress | Graduated) => true,
            (GraduationInProgress, Graduated) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Battle lifecycle. Ordinal order is the only legal direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BattleStatus {
    Created,
    Qualified,
    InBattle,
    VictoryPending,
    Listed,
    PoolCreated,
}

impl BattleStatus {
    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(BattleStatus::Created),
            1 => Some(BattleStatus::Qualified),
            2 => Some(BattleStatus::InBattle),
            3 => Some(BattleStatus::VictoryPending),
            4 => Some(BattleStatus::Listed),
            5 => Some(BattleStatus::PoolCreated),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    /// Statuses in which an opponent must be recorded.
    pub fn requires_opponent(&self) -> bool {
        matches!(self, BattleStatus::InBattle | BattleStatus::VictoryPending)
    }
}

impl fmt::Display for BattleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One per created token on the launch program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub creator: Pubkey,
    pub mint: Pubkey,
    pub tier: u8,
    pub virtual_sol_init: u64,
    pub constant_k: u128,
    pub target_sol: u64,
    pub deadline: i64,
    pub sol_raised: u64,
    pub status: LaunchStatus,
    pub created_at: i64,
    pub graduated_at: Option<i64>,
    pub pool: Option<Pubkey>,
    pub total_buyers: u32,
    pub total_tokens_sold: u64,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub bump: u8,
}

impl LaunchRecord {
    /// Virtual SOL reserve the curve prices against.
    pub fn virtual_sol_reserve(&self) -> Option<u64> {
        self.virtual_sol_init.checked_add(self.sol_raised)
    }
}

/// One per token on the battle program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleRecord {
    pub mint: Pubkey,
    pub sol_collected: u64,
    pub tokens_sold: u64,
    pub total_trade_volume: u64,
    pub is_active: bool,
    pub battle_status: BattleStatus,
    pub opponent_mint: Option<Pubkey>,
    pub creation_timestamp: i64,
    pub last_trade_timestamp: i64,
    pub battle_start_timestamp: i64,
    pub victory_timestamp: i64,
    pub listing_timestamp: i64,
    pub qualification_timestamp: i64,
    pub bump: u8,
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

impl BattleRecord {
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let has_opponent = self.opponent_mint.is_some();
        if has_opponent != self.battle_status.requires_opponent() {
            return Err(InvariantViolation::OpponentMismatch {
                status: self.battle_status.to_string(),
                has_opponent,
            });
        }
        Ok(())
    }
}

/// One per (launch, buyer) pair; exists only after a first buy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyerRecord {
    pub launch: Pubkey,
    pub buyer: Pubkey,
    pub sol_spent: u64,
    pub tokens_received: u64,
    pub refund_claimed: bool,
    pub thawed: bool,
    pub first_buy_timestamp: i64,
    pub last_buy_timestamp: i64,
    pub bump: u8,
}

/// Singleton per network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceOracleRecord {
    pub sol_price_micro_usd: u64,
    pub last_update_timestamp: i64,
    pub next_update_timestamp: i64,
    pub keeper_authority: Pubkey,
    pub update_count: u64,
}

impl PriceOracleRecord {
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.next_update_timestamp <= self.last_update_timestamp {
            return Err(InvariantViolation::OracleWindow {
                last: self.last_update_timestamp,
                next: self.next_update_timestamp,
            });
        }
        Ok(())
    }

    pub fn is_stale_at(&self, now: i64) -> bool {
        now > self.next_update_timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    Launch(LaunchRecord),
    Battle(BattleRecord),
    Buyer(BuyerRecord),
    PriceOracle(PriceOracleRecord),
}

impl DecodedRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            DecodedRecord::Launch(_) => RecordKind::Launch,
            DecodedRecord::Battle(_) => RecordKind::Battle,
            DecodedRecord::Buyer(_) => RecordKind::Buyer,
            DecodedRecord::PriceOracle(_) => RecordKind::PriceOracle,
        }
    }

    /// The mint this record is about, for the kinds keyed by mint.
    pub fn mint(&self) -> Option<&Pubkey> {
        match self {
            DecodedRecord::Launch(r) => Some(&r.mint),
            DecodedRecord::Battle(r) => Some(&r.mint),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battle_status_ordinals_round_trip() {
        for v in 0..=5u8 {
            let status = BattleStatus::from_ordinal(v).unwrap();
            assert_eq!(status.ordinal(), v);
        }
        assert!(BattleStatus::from_ordinal(6).is_none());
        assert!(BattleStatus::Qualified < BattleStatus::InBattle);
    }

    #[test]
    fn test_launch_transitions() {
        assert!(LaunchStatus::Active.can_transition_to(LaunchStatus::Paused));
        assert!(LaunchStatus::Paused.can_transition_to(LaunchStatus::Active));
        assert!(LaunchStatus::ReadyToGraduate.can_transition_to(LaunchStatus::Graduated));
        assert!(!LaunchStatus::Graduated.can_transition_to(LaunchStatus::Active));
        assert!(!LaunchStatus::Failed.can_transition_to(LaunchStatus::Active));
        assert!(!LaunchStatus::ReadyToGraduate.can_transition_to(LaunchStatus::Active));
        assert!(LaunchStatus::from_ordinal(6).is_none());
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("mainnet-beta".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("DEVNET".parse::<Network>().unwrap(), Network::Devnet);
        assert!("testnet".parse::<Network>().is_err());
    }

    #[test]
    fn test_oracle_window() {
        let oracle = PriceOracleRecord {
            sol_price_micro_usd: 150_000_000,
            last_update_timestamp: 100,
            next_update_timestamp: 100,
            keeper_authority: Pubkey::new_unique(),
            update_count: 1,
        };
        assert!(oracle.check_invariants().is_err());
        assert!(oracle.is_stale_at(101));
    }
}
