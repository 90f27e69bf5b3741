//! Byte-exact encoders for the account layouts. Used to build fixtures and
//! by the in-memory account source.

use solana_sdk::pubkey::Pubkey;

use super::{
    BUYER_RECORD_DISCRIMINATOR, PRICE_ORACLE_DISCRIMINATOR, TOKEN_BATTLE_STATE_DISCRIMINATOR,
    TOKEN_LAUNCH_DISCRIMINATOR,
};
use crate::types::{BattleRecord, BuyerRecord, LaunchRecord, PriceOracleRecord};

#[derive(Default)]
struct AccountWriter {
    buf: Vec<u8>,
}

impl AccountWriter {
    fn with_discriminator(disc: [u8; 8]) -> Self {
        let mut w = Self::default();
        w.buf.extend_from_slice(&disc);
        w
    }

    fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(v as u8)
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u128(&mut self, v: u128) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn pubkey(&mut self, v: &Pubkey) -> &mut Self {
        self.buf.extend_from_slice(v.as_ref());
        self
    }

    fn string(&mut self, v: &str) -> &mut Self {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub fn encode_launch(r: &LaunchRecord) -> Vec<u8> {
    let mut w = AccountWriter::with_discriminator(TOKEN_LAUNCH_DISCRIMINATOR);
    w.pubkey(&r.creator)
        .pubkey(&r.mint)
        .u8(r.tier)
        .u64(r.virtual_sol_init)
        .u128(r.constant_k)
        .u64(r.target_sol)
        .i64(r.deadline)
        .u64(r.sol_raised)
        .u8(r.status.ordinal())
        .i64(r.created_at);
    match r.graduated_at {
        Some(ts) => w.u8(1).i64(ts),
        None => w.u8(0),
    };
    match &r.pool {
        Some(pool) => w.u8(1).pubkey(pool),
        None => w.u8(0),
    };
    w.u32(r.total_buyers)
        .u64(r.total_tokens_sold)
        .string(&r.name)
        .string(&r.symbol)
        .string(&r.uri)
        .u8(r.bump);
    w.finish()
}

pub fn encode_battle(r: &BattleRecord) -> Vec<u8> {
    let mut w = AccountWriter::with_discriminator(TOKEN_BATTLE_STATE_DISCRIMINATOR);
    w.pubkey(&r.mint)
        .u64(r.sol_collected)
        .u64(r.tokens_sold)
        .u64(r.total_trade_volume)
        .bool(r.is_active)
        .u8(r.battle_status.ordinal())
        .pubkey(&r.opponent_mint.unwrap_or_default())
        .i64(r.creation_timestamp)
        .i64(r.last_trade_timestamp)
        .i64(r.battle_start_timestamp)
        .i64(r.victory_timestamp)
        .i64(r.listing_timestamp)
        .i64(r.qualification_timestamp)
        .u8(r.bump)
        .string(&r.name)
        .string(&r.symbol)
        .string(&r.uri);
    w.finish()
}

pub fn encode_buyer(r: &BuyerRecord) -> Vec<u8> {
    let mut w = AccountWriter::with_discriminator(BUYER_RECORD_DISCRIMINATOR);
    w.pubkey(&r.launch)
        .pubkey(&r.buyer)
        .u64(r.sol_spent)
        .u64(r.tokens_received)
        .bool(r.refund_claimed)
        .bool(r.thawed)
        .i64(r.first_buy_timestamp)
        .i64(r.last_buy_timestamp)
        .u8(r.bump);
    w.finish()
}

pub fn encode_price_oracle(r: &PriceOracleRecord) -> Vec<u8> {
    let mut w = AccountWriter::with_discriminator(PRICE_ORACLE_DISCRIMINATOR);
    w.u64(r.sol_price_micro_usd)
        .i64(r.last_update_timestamp)
        .i64(r.next_update_timestamp)
        .pubkey(&r.keeper_authority)
        .u64(r.update_count);
    w.finish()
}
