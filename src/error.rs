//! Error taxonomy for the sync engine.
//!
//! Each class maps to a different recovery path: decode errors skip the record,
//! persistence and external-call errors are retried by the caller, invariant
//! violations reject the single offending record.

use thiserror::Error;

/// Raw account bytes could not be turned into a typed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown account discriminator {0:?}")]
    UnknownType([u8; 8]),

    #[error("truncated account data: need {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("unrecognized {field} ordinal {value}")]
    InvalidEnum { field: &'static str, value: u8 },

    #[error("invalid option tag {tag} for {field}")]
    InvalidOptionTag { field: &'static str, tag: u8 },

    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurveError {
    #[error("bonding curve reserve is empty")]
    ZeroReserve,

    #[error("trade would drain the curve reserve")]
    Underflow,

    #[error("bonding curve arithmetic overflow")]
    Overflow,
}

/// Relational store failures. Retryable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("corrupt cached row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                PersistenceError::Constraint(err.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => {
                PersistenceError::Corrupt(err.to_string())
            }
            _ => PersistenceError::Unavailable(err.to_string()),
        }
    }
}

/// RPC, price feed and finalization failures. Retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalCallError {
    #[error("rpc call failed: {0}")]
    Rpc(String),

    #[error("price feed failed: {0}")]
    PriceFeed(String),

    #[error("finalization failed: {0}")]
    Finalization(String),

    #[error("{what} timed out after {after_ms}ms")]
    Timeout { what: &'static str, after_ms: u64 },

    #[error("{0} is not configured")]
    NotConfigured(String),
}

/// A decoded record contradicts an on-chain or cache invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("battle status regression {from} -> {to}")]
    StatusRegression { from: String, to: String },

    #[error("illegal launch status transition {from} -> {to}")]
    IllegalLaunchTransition { from: String, to: String },

    #[error("opponent presence mismatch: status {status}, opponent set = {has_opponent}")]
    OpponentMismatch { status: String, has_opponent: bool },

    #[error("sol_raised decreased from {cached} to {incoming} while active")]
    SolRaisedDecreased { cached: u64, incoming: u64 },

    #[error("refund_claimed reverted to false")]
    RefundReverted,

    #[error("oracle next update {next} is not after last update {last}")]
    OracleWindow { last: i64, next: i64 },

    #[error("record names {found}, expected {expected}")]
    IdentityMismatch { expected: String, found: String },

    #[error("pairing rejected: {0}")]
    PairingRejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("persisting {identity} failed: {source}")]
    Persistence {
        identity: String,
        #[source]
        source: PersistenceError,
    },

    #[error("rejected record for {identity}: {source}")]
    Invariant {
        identity: String,
        #[source]
        source: InvariantViolation,
    },

    #[error("store write for {identity} timed out after {after_ms}ms")]
    Timeout { identity: String, after_ms: u64 },
}

impl ReconcileError {
    pub fn identity(&self) -> &str {
        match self {
            ReconcileError::Persistence { identity, .. }
            | ReconcileError::Invariant { identity, .. }
            | ReconcileError::Timeout { identity, .. } => identity,
        }
    }

    /// Persistence failures and timeouts are worth retrying, invariant violations are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::Invariant { .. })
    }
}

/// Outcome classes for a single-identity sync (manual resync, event intake, scans).
/// Each variant implies a different operator action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("{mint} not found on-chain")]
    NotFound { mint: String },

    #[error("{mint} found but malformed: {source}")]
    Malformed {
        mint: String,
        #[source]
        source: DecodeError,
    },

    #[error("{mint} decoded but failed to persist: {source}")]
    PersistFailed {
        mint: String,
        #[source]
        source: ReconcileError,
    },

    #[error("{mint} rejected: {source}")]
    Rejected {
        mint: String,
        #[source]
        source: InvariantViolation,
    },

    #[error("fetching {mint} failed: {source}")]
    Fetch {
        mint: String,
        #[source]
        source: ExternalCallError,
    },

    #[error("invalid identity {0:?}")]
    InvalidIdentity(String),
}

impl SyncError {
    pub fn mint(&self) -> &str {
        match self {
            SyncError::NotFound { mint }
            | SyncError::Malformed { mint, .. }
            | SyncError::PersistFailed { mint, .. }
            | SyncError::Rejected { mint, .. }
            | SyncError::Fetch { mint, .. } => mint,
            SyncError::InvalidIdentity(raw) => raw,
        }
    }

    /// Short machine-readable tag used in HTTP responses and scan reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotFound { .. } => "not_found",
            SyncError::Malformed { .. } => "malformed",
            SyncError::PersistFailed { .. } => "persist_failed",
            SyncError::Rejected { .. } => "rejected",
            SyncError::Fetch { .. } => "fetch_failed",
            SyncError::InvalidIdentity(_) => "invalid_identity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BattleError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    External(#[from] ExternalCallError),

    #[error("{mint} is not cached")]
    UnknownToken { mint: String },

    #[error("{mint} is {actual}, expected {expected}")]
    WrongStatus {
        mint: String,
        expected: String,
        actual: String,
    },

    #[error("no tier configured for {0}")]
    NoTier(String),
}
