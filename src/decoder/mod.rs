//! Account decoder for the launch and battle programs.
//!
//! Layouts are Anchor/Borsh: an 8-byte discriminator, then fields at fixed
//! offsets in declaration order. `Option<T>` is a one-byte tag followed by `T`
//! only when present, strings are a u32 little-endian length plus UTF-8 bytes.
//! Offsets are the schema, so every read is bounds-checked and fails closed.

pub mod encode;

use solana_sdk::pubkey::Pubkey;

use crate::error::DecodeError;
use crate::types::{
    BattleRecord, BattleStatus, BuyerRecord, DecodedRecord, LaunchRecord, LaunchStatus,
    PriceOracleRecord, RecordKind,
};

// Account discriminators: sha256("account:<StructName>")[..8]
pub const TOKEN_LAUNCH_DISCRIMINATOR: [u8; 8] = [92, 242, 228, 230, 214, 216, 8, 148];
pub const TOKEN_BATTLE_STATE_DISCRIMINATOR: [u8; 8] = [54, 102, 185, 22, 231, 3, 228, 117];
pub const BUYER_RECORD_DISCRIMINATOR: [u8; 8] = [107, 122, 54, 31, 4, 54, 209, 38];
pub const PRICE_ORACLE_DISCRIMINATOR: [u8; 8] = [57, 140, 120, 176, 191, 65, 52, 89];

const DISCRIMINATORS: [([u8; 8], RecordKind); 4] = [
    (TOKEN_LAUNCH_DISCRIMINATOR, RecordKind::Launch),
    (TOKEN_BATTLE_STATE_DISCRIMINATOR, RecordKind::Battle),
    (BUYER_RECORD_DISCRIMINATOR, RecordKind::Buyer),
    (PRICE_ORACLE_DISCRIMINATOR, RecordKind::PriceOracle),
];

// Smallest encodings (empty strings, absent options)
pub const MIN_LAUNCH_LEN: usize = 157;
pub const MIN_BATTLE_LEN: usize = 159;
pub const MIN_BUYER_LEN: usize = 107;
pub const MIN_PRICE_ORACLE_LEN: usize = 72;

/// No known record fits in fewer bytes than this.
pub const MIN_RECORD_LEN: usize = MIN_PRICE_ORACLE_LEN;

pub fn discriminator_for(kind: RecordKind) -> [u8; 8] {
    match kind {
        RecordKind::Launch => TOKEN_LAUNCH_DISCRIMINATOR,
        RecordKind::Battle => TOKEN_BATTLE_STATE_DISCRIMINATOR,
        RecordKind::Buyer => BUYER_RECORD_DISCRIMINATOR,
        RecordKind::PriceOracle => PRICE_ORACLE_DISCRIMINATOR,
    }
}

/// Look up the record kind for the leading discriminator of `data`.
pub fn record_kind(data: &[u8]) -> Result<RecordKind, DecodeError> {
    if data.len() < 8 {
        return Err(DecodeError::Truncated {
            offset: 0,
            needed: 8,
            len: data.len(),
        });
    }
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&data[..8]);
    DISCRIMINATORS
        .iter()
        .find(|(disc, _)| *disc == tag)
        .map(|(_, kind)| *kind)
        .ok_or(DecodeError::UnknownType(tag))
}

/// Decode raw account bytes into a typed record.
pub fn decode(data: &[u8]) -> Result<DecodedRecord, DecodeError> {
    if data.len() < MIN_RECORD_LEN {
        return Err(DecodeError::Truncated {
            offset: 0,
            needed: MIN_RECORD_LEN,
            len: data.len(),
        });
    }

    let kind = record_kind(data)?;
    let mut reader = AccountReader::new(data, 8);

    let record = match kind {
        RecordKind::Launch => DecodedRecord::Launch(parse_launch(&mut reader)?),
        RecordKind::Battle => DecodedRecord::Battle(parse_battle(&mut reader)?),
        RecordKind::Buyer => DecodedRecord::Buyer(parse_buyer(&mut reader)?),
        RecordKind::PriceOracle => DecodedRecord::PriceOracle(parse_price_oracle(&mut reader)?),
    };
    Ok(record)
}

fn parse_launch(r: &mut AccountReader<'_>) -> Result<LaunchRecord, DecodeError> {
    let creator = r.read_pubkey()?;
    let mint = r.read_pubkey()?;
    let tier = r.read_u8()?;
    let virtual_sol_init = r.read_u64()?;
    let constant_k = r.read_u128()?;
    let target_sol = r.read_u64()?;
    let deadline = r.read_i64()?;
    let sol_raised = r.read_u64()?;
    let status_raw = r.read_u8()?;
    let status = LaunchStatus::from_ordinal(status_raw).ok_or(DecodeError::InvalidEnum {
        field: "launch_status",
        value: status_raw,
    })?;
    let created_at = r.read_i64()?;
    let graduated_at = r.read_option("graduated_at", |r| r.read_i64())?;
    let pool = r.read_option("pool", |r| r.read_pubkey())?;
    let total_buyers = r.read_u32()?;
    let total_tokens_sold = r.read_u64()?;
    let name = r.read_string("name")?;
    let symbol = r.read_string("symbol")?;
    let uri = r.read_string("uri")?;
    let bump = r.read_u8()?;

    Ok(LaunchRecord {
        creator,
        mint,
        tier,
        virtual_sol_init,
        constant_k,
        target_sol,
        deadline,
        sol_raised,
        status,
        created_at,
        graduated_at,
        pool,
        total_buyers,
        total_tokens_sold,
        name,
        symbol,
        uri,
        bump,
    })
}

fn parse_battle(r: &mut AccountReader<'_>) -> Result<BattleRecord, DecodeError> {
    let mint = r.read_pubkey()?;
    let sol_collected = r.read_u64()?;
    let tokens_sold = r.read_u64()?;
    let total_trade_volume = r.read_u64()?;
    let is_active = r.read_bool("is_active")?;
    let status_raw = r.read_u8()?;
    let battle_status = BattleStatus::from_ordinal(status_raw).ok_or(DecodeError::InvalidEnum {
        field: "battle_status",
        value: status_raw,
    })?;
    // Fixed-width on-chain; the default address means "no opponent"
    let opponent = r.read_pubkey()?;
    let opponent_mint = if opponent == Pubkey::default() {
        None
    } else {
        Some(opponent)
    };
    let creation_timestamp = r.read_i64()?;
    let last_trade_timestamp = r.read_i64()?;
    let battle_start_timestamp = r.read_i64()?;
    let victory_timestamp = r.read_i64()?;
    let listing_timestamp = r.read_i64()?;
    let qualification_timestamp = r.read_i64()?;
    let bump = r.read_u8()?;
    let name = r.read_string("name")?;
    let symbol = r.read_string("symbol")?;
    let uri = r.read_string("uri")?;

    Ok(BattleRecord {
        mint,
        sol_collected,
        tokens_sold,
        total_trade_volume,
        is_active,
        battle_status,
        opponent_mint,
        creation_timestamp,
        last_trade_timestamp,
        battle_start_timestamp,
        victory_timestamp,
        listing_timestamp,
        qualification_timestamp,
        bump,
        name,
        symbol,
        uri,
    })
}

fn parse_buyer(r: &mut AccountReader<'_>) -> Result<BuyerRecord, DecodeError> {
    Ok(BuyerRecord {
        launch: r.read_pubkey()?,
        buyer: r.read_pubkey()?,
        sol_spent: r.read_u64()?,
        tokens_received: r.read_u64()?,
        refund_claimed: r.read_bool("refund_claimed")?,
        thawed: r.read_bool("thawed")?,
        first_buy_timestamp: r.read_i64()?,
        last_buy_timestamp: r.read_i64()?,
        bump: r.read_u8()?,
    })
}

fn parse_price_oracle(r: &mut AccountReader<'_>) -> Result<PriceOracleRecord, DecodeError> {
    Ok(PriceOracleRecord {
        sol_price_micro_usd: r.read_u64()?,
        last_update_timestamp: r.read_i64()?,
        next_update_timestamp: r.read_i64()?,
        keeper_authority: r.read_pubkey()?,
        update_count: r.read_u64()?,
    })
}

/// Bounds-checked cursor over account bytes.
pub struct AccountReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AccountReader<'a> {
    pub fn new(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .offset
            .checked_add(needed)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::Truncated {
                offset: self.offset,
                needed,
                len: self.data.len(),
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(DecodeError::InvalidEnum { field, value }),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, DecodeError> {
        Ok(u128::from_le_bytes(self.take_array()?))
    }

    pub fn read_pubkey(&mut self) -> Result<Pubkey, DecodeError> {
        Ok(Pubkey::new_from_array(self.take_array()?))
    }

    pub fn read_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { field })
    }

    /// Borsh `Option<T>`: the payload is only present when the tag is 1.
    pub fn read_option<T>(
        &mut self,
        field: &'static str,
        read: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, DecodeError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => read(self).map(Some),
            tag => Err(DecodeError::InvalidOptionTag { field, tag }),
        }
    }
}
