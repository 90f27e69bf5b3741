// Battle Sync - on-chain account cache
// Mirrors launch, battle, buyer and oracle accounts into SQLite and drives the battle lifecycle

pub mod battle;
pub mod bonding_curve;
pub mod config;
pub mod db;
pub mod decoder;
pub mod error;
pub mod finalizer;
pub mod notify;
pub mod pda;
pub mod price;
pub mod reconciler;
pub mod rpc;
pub mod scheduler;
pub mod server;
pub mod sync;
pub mod types;

#[cfg(test)]
mod testing;

pub use db::Database;
