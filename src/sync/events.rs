//! Inbound webhook event schema.
//!
//! Batches arrive as a JSON array of enhanced-transaction events. Each item is
//! validated on its own: a malformed item is rejected and reported while the
//! rest of the batch goes through. Only the mints named in balance changes
//! and token transfers are used; the description is a logging hint.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::str::FromStr;

/// Wrapped SOL shows up in most swaps and never names a program token.
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub signature: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub account_data: Option<Vec<AccountData>>,
    #[serde(default)]
    pub token_transfers: Option<Vec<TokenTransfer>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    pub account: String,
    #[serde(default)]
    pub token_balance_changes: Option<Vec<TokenBalanceChange>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalanceChange {
    pub mint: String,
    #[serde(default)]
    pub user_account: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub mint: String,
    #[serde(default)]
    pub from_user_account: Option<String>,
    #[serde(default)]
    pub to_user_account: Option<String>,
}

/// Classification from the free-text description, for logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventHint {
    TokenCreated,
    TokenBought,
    TokenSold,
    BattleEvent,
    Unknown,
}

impl WebhookEvent {
    pub fn hint(&self) -> EventHint {
        let desc = self.description.as_deref().unwrap_or_default().to_lowercase();
        if desc.contains("create") || desc.contains("initialize") {
            EventHint::TokenCreated
        } else if desc.contains("buy") || desc.contains("bought") || desc.contains("purchase") {
            EventHint::TokenBought
        } else if desc.contains("sell") || desc.contains("sold") {
            EventHint::TokenSold
        } else if desc.contains("battle") {
            EventHint::BattleEvent
        } else {
            EventHint::Unknown
        }
    }

    /// Every mint the event touches, validated. Any unparsable mint rejects
    /// the whole event.
    pub fn mints(&self) -> Result<Vec<Pubkey>, String> {
        let from_balances = self
            .account_data
            .iter()
            .flatten()
            .flat_map(|a| a.token_balance_changes.iter().flatten())
            .map(|c| c.mint.as_str());
        let from_transfers = self
            .token_transfers
            .iter()
            .flatten()
            .map(|t| t.mint.as_str());

        from_balances
            .chain(from_transfers)
            .filter(|m| *m != WRAPPED_SOL_MINT)
            .map(|m| Pubkey::from_str(m).map_err(|_| format!("invalid mint {:?}", m)))
            .collect()
    }

    /// `(mint, holder)` pairs from balance changes and transfer receivers.
    /// Holders that do not parse are skipped.
    pub fn holders(&self) -> Vec<(Pubkey, Pubkey)> {
        let from_balances = self
            .account_data
            .iter()
            .flatten()
            .flat_map(|a| a.token_balance_changes.iter().flatten())
            .map(|c| (c.mint.as_str(), c.user_account.as_deref()));
        let from_transfers = self
            .token_transfers
            .iter()
            .flatten()
            .map(|t| (t.mint.as_str(), t.to_user_account.as_deref()));

        from_balances
            .chain(from_transfers)
            .filter(|(mint, _)| *mint != WRAPPED_SOL_MINT)
            .filter_map(|(mint, user)| {
                Some((Pubkey::from_str(mint).ok()?, Pubkey::from_str(user?).ok()?))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEvent {
    pub index: usize,
    pub signature: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub accepted: Vec<WebhookEvent>,
    pub rejected: Vec<RejectedEvent>,
    /// Unique affected mints in first-seen order
    pub mints: Vec<Pubkey>,
    /// Unique `(mint, holder)` pairs whose positions may have moved
    pub holders: Vec<(Pubkey, Pubkey)>,
}

pub fn parse_batch(items: Vec<Value>) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    let mut seen = HashSet::new();
    let mut seen_holders = HashSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let signature = item
            .get("signature")
            .and_then(Value::as_str)
            .map(str::to_string);

        let event: WebhookEvent = match serde_json::from_value(item) {
            Ok(event) => event,
            Err(e) => {
                batch.rejected.push(RejectedEvent {
                    index,
                    signature,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if event.signature.trim().is_empty() {
            batch.rejected.push(RejectedEvent {
                index,
                signature: None,
                reason: "empty signature".to_string(),
            });
            continue;
        }

        match event.mints() {
            Ok(mints) => {
                for mint in mints {
                    if seen.insert(mint) {
                        batch.mints.push(mint);
                    }
                }
                for pair in event.holders() {
                    if seen_holders.insert(pair) {
                        batch.holders.push(pair);
                    }
                }
                batch.accepted.push(event);
            }
            Err(reason) => batch.rejected.push(RejectedEvent {
                index,
                signature: Some(event.signature),
                reason,
            }),
        }
    }
    batch
}
