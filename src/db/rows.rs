//! Cache row shapes and their SQLite column mappings.
//!
//! u64 values are stored bit-cast into INTEGER columns, the u128 curve
//! constant as decimal TEXT, addresses as base58 TEXT.

use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::types::{
    BattleRecord, BattleStatus, BuyerRecord, LaunchRecord, LaunchStatus, Network,
    PriceOracleRecord,
};

/// Cached projection of a launch-program token.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRow {
    pub network: Network,
    pub address: Pubkey,
    pub record: LaunchRecord,
    pub progress_percent: f64,
    pub market_cap_micro_usd: Option<u64>,
    pub time_remaining_secs: i64,
    /// Recomputed from positions on every write
    pub holder_count: u32,
    pub deactivated_at: Option<i64>,
    pub observed_slot: u64,
    pub updated_at: i64,
}

/// Cached projection of a battle-program token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleRow {
    pub network: Network,
    pub address: Pubkey,
    pub record: BattleRecord,
    pub market_cap_micro_usd: Option<u64>,
    pub volume_micro_usd: Option<u64>,
    /// Thresholds reached at the last reconcile (0..=2)
    pub battle_score: u8,
    pub deactivated_at: Option<i64>,
    /// Last status read from the chain; `record.battle_status` may run ahead
    /// of it when the engine pairs or promotes locally.
    pub chain_status: BattleStatus,
    pub observed_slot: u64,
    pub updated_at: i64,
}

impl BattleRow {
    pub fn mint(&self) -> &Pubkey {
        &self.record.mint
    }

    /// Active on-chain and not retired locally after losing a duel.
    pub fn is_active(&self) -> bool {
        self.record.is_active && self.deactivated_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRow {
    pub network: Network,
    pub address: Pubkey,
    pub record: BuyerRecord,
    pub observed_slot: u64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRow {
    pub network: Network,
    pub address: Pubkey,
    pub record: PriceOracleRecord,
    pub observed_slot: u64,
    pub updated_at: i64,
}

/// JSON view of a battle row for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct BattleSummary {
    pub network: Network,
    pub mint: String,
    pub status: String,
    pub opponent_mint: Option<String>,
    pub sol_collected: u64,
    pub market_cap_usd: Option<f64>,
    pub volume_usd: Option<f64>,
    pub battle_score: u8,
    pub is_active: bool,
}

impl From<&BattleRow> for BattleSummary {
    fn from(row: &BattleRow) -> Self {
        Self {
            network: row.network,
            mint: row.record.mint.to_string(),
            status: row.record.battle_status.to_string(),
            opponent_mint: row.record.opponent_mint.map(|m| m.to_string()),
            sol_collected: row.record.sol_collected,
            market_cap_usd: row.market_cap_micro_usd.map(|v| v as f64 / 1_000_000.0),
            volume_usd: row.volume_micro_usd.map(|v| v as f64 / 1_000_000.0),
            battle_score: row.battle_score,
            is_active: row.is_active(),
        }
    }
}

pub(crate) fn to_sql_u64(v: u64) -> i64 {
    v as i64
}

fn u64_col(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)? as u64)
}

fn opt_u64_col(row: &Row, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|v| v as u64))
}

fn pubkey_col(row: &Row, idx: usize) -> rusqlite::Result<Pubkey> {
    let s: String = row.get(idx)?;
    Pubkey::from_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_pubkey_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Pubkey>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => Pubkey::from_str(&s)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn network_col(row: &Row, idx: usize) -> rusqlite::Result<Network> {
    let s: String = row.get(idx)?;
    Network::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

fn ordinal_col<T>(row: &Row, idx: usize, parse: fn(u8) -> Option<T>) -> rusqlite::Result<T> {
    let v: i64 = row.get(idx)?;
    u8::try_from(v)
        .ok()
        .and_then(parse)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, v))
}

pub(crate) const LAUNCH_COLUMNS: &str = "network, mint, address, creator, tier, virtual_sol_init, \
    constant_k, target_sol, deadline, sol_raised, status, created_at, graduated_at, pool, \
    total_buyers, total_tokens_sold, name, symbol, uri, bump, progress_percent, \
    market_cap_micro_usd, time_remaining_secs, holder_count, deactivated_at, observed_slot, updated_at";

pub(crate) fn launch_from_row(row: &Row) -> rusqlite::Result<LaunchRow> {
    let k_text: String = row.get(6)?;
    let constant_k = k_text
        .parse::<u128>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(LaunchRow {
        network: network_col(row, 0)?,
        address: pubkey_col(row, 2)?,
        record: LaunchRecord {
            mint: pubkey_col(row, 1)?,
            creator: pubkey_col(row, 3)?,
            tier: row.get(4)?,
            virtual_sol_init: u64_col(row, 5)?,
            constant_k,
            target_sol: u64_col(row, 7)?,
            deadline: row.get(8)?,
            sol_raised: u64_col(row, 9)?,
            status: ordinal_col(row, 10, LaunchStatus::from_ordinal)?,
            created_at: row.get(11)?,
            graduated_at: row.get(12)?,
            pool: opt_pubkey_col(row, 13)?,
            total_buyers: row.get(14)?,
            total_tokens_sold: u64_col(row, 15)?,
            name: row.get(16)?,
            symbol: row.get(17)?,
            uri: row.get(18)?,
            bump: row.get(19)?,
        },
        progress_percent: row.get(20)?,
        market_cap_micro_usd: opt_u64_col(row, 21)?,
        time_remaining_secs: row.get(22)?,
        holder_count: row.get(23)?,
        deactivated_at: row.get(24)?,
        observed_slot: u64_col(row, 25)?,
        updated_at: row.get(26)?,
    })
}

pub(crate) const BATTLE_COLUMNS: &str = "network, mint, address, sol_collected, tokens_sold, \
    total_trade_volume, chain_active, battle_status, opponent_mint, creation_ts, last_trade_ts, \
    battle_start_ts, victory_ts, listing_ts, qualification_ts, bump, name, symbol, uri, \
    market_cap_micro_usd, volume_micro_usd, battle_score, deactivated_at, observed_slot, updated_at, \
    chain_status";

pub(crate) fn battle_from_row(row: &Row) -> rusqlite::Result<BattleRow> {
    Ok(BattleRow {
        network: network_col(row, 0)?,
        address: pubkey_col(row, 2)?,
        record: BattleRecord {
            mint: pubkey_col(row, 1)?,
            sol_collected: u64_col(row, 3)?,
            tokens_sold: u64_col(row, 4)?,
            total_trade_volume: u64_col(row, 5)?,
            is_active: row.get(6)?,
            battle_status: ordinal_col(row, 7, BattleStatus::from_ordinal)?,
            opponent_mint: opt_pubkey_col(row, 8)?,
            creation_timestamp: row.get(9)?,
            last_trade_timestamp: row.get(10)?,
            battle_start_timestamp: row.get(11)?,
            victory_timestamp: row.get(12)?,
            listing_timestamp: row.get(13)?,
            qualification_timestamp: row.get(14)?,
            bump: row.get(15)?,
            name: row.get(16)?,
            symbol: row.get(17)?,
            uri: row.get(18)?,
        },
        market_cap_micro_usd: opt_u64_col(row, 19)?,
        volume_micro_usd: opt_u64_col(row, 20)?,
        battle_score: row.get(21)?,
        deactivated_at: row.get(22)?,
        chain_status: ordinal_col(row, 25, BattleStatus::from_ordinal)?,
        observed_slot: u64_col(row, 23)?,
        updated_at: row.get(24)?,
    })
}

pub(crate) const POSITION_COLUMNS: &str = "network, launch, buyer, address, sol_spent, \
    tokens_received, refund_claimed, thawed, first_buy_ts, last_buy_ts, bump, observed_slot, updated_at";

pub(crate) fn position_from_row(row: &Row) -> rusqlite::Result<PositionRow> {
    Ok(PositionRow {
        network: network_col(row, 0)?,
        address: pubkey_col(row, 3)?,
        record: BuyerRecord {
            launch: pubkey_col(row, 1)?,
            buyer: pubkey_col(row, 2)?,
            sol_spent: u64_col(row, 4)?,
            tokens_received: u64_col(row, 5)?,
            refund_claimed: row.get(6)?,
            thawed: row.get(7)?,
            first_buy_timestamp: row.get(8)?,
            last_buy_timestamp: row.get(9)?,
            bump: row.get(10)?,
        },
        observed_slot: u64_col(row, 11)?,
        updated_at: row.get(12)?,
    })
}

pub(crate) const ORACLE_COLUMNS: &str = "network, address, sol_price_micro_usd, last_update_ts, \
    next_update_ts, keeper_authority, update_count, observed_slot, updated_at";

pub(crate) fn oracle_from_row(row: &Row) -> rusqlite::Result<OracleRow> {
    Ok(OracleRow {
        network: network_col(row, 0)?,
        address: pubkey_col(row, 1)?,
        record: PriceOracleRecord {
            sol_price_micro_usd: u64_col(row, 2)?,
            last_update_timestamp: row.get(3)?,
            next_update_timestamp: row.get(4)?,
            keeper_authority: pubkey_col(row, 5)?,
            update_count: u64_col(row, 6)?,
        },
        observed_slot: u64_col(row, 7)?,
        updated_at: row.get(8)?,
    })
}
