pub mod rows;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::error::PersistenceError;
use crate::types::{BattleStatus, Network, RecordKind};
use rows::{
    battle_from_row, launch_from_row, oracle_from_row, position_from_row, to_sql_u64,
    BATTLE_COLUMNS, LAUNCH_COLUMNS, ORACLE_COLUMNS, POSITION_COLUMNS,
};

pub use rows::{BattleRow, BattleSummary, LaunchRow, OracleRow, PositionRow};

type StoreResult<T> = std::result::Result<T, PersistenceError>;

/// Off-chain cache of launch, battle, position and oracle state.
///
/// Only the reconciler writes through the upsert methods; everything else
/// reads. The connection sits behind a mutex so the handle can be shared
/// across blocking tasks.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P, wal_mode: bool) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .context("Failed to open database connection")?;

        if wal_mode {
            conn.execute_batch("PRAGMA journal_mode=WAL;")
                .context("Failed to enable WAL mode")?;
        }

        let db = Self { conn: Mutex::new(conn) };
        db.initialize_schema()?;

        info!("✅ Database initialized successfully");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory database")?;
        let db = Self { conn: Mutex::new(conn) };
        db.initialize_schema()?;
        Ok(db)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PersistenceError::Unavailable("connection mutex poisoned".to_string()))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            -- Launch-program tokens
            CREATE TABLE IF NOT EXISTS launches (
                network TEXT NOT NULL,
                mint TEXT NOT NULL,
                address TEXT NOT NULL,
                creator TEXT NOT NULL,
                tier INTEGER NOT NULL,
                virtual_sol_init INTEGER NOT NULL,
                constant_k TEXT NOT NULL,
                target_sol INTEGER NOT NULL,
                deadline INTEGER NOT NULL,
                sol_raised INTEGER NOT NULL,
                status INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                graduated_at INTEGER,
                pool TEXT,
                total_buyers INTEGER NOT NULL,
                total_tokens_sold INTEGER NOT NULL,
                name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                uri TEXT NOT NULL,
                bump INTEGER NOT NULL,
                progress_percent REAL NOT NULL,
                market_cap_micro_usd INTEGER,
                time_remaining_secs INTEGER NOT NULL,
                holder_count INTEGER NOT NULL DEFAULT 0,
                deactivated_at INTEGER,
                observed_slot INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY(network, mint)
            );

            -- Battle-program tokens
            CREATE TABLE IF NOT EXISTS battle_tokens (
                network TEXT NOT NULL,
                mint TEXT NOT NULL,
                address TEXT NOT NULL,
                sol_collected INTEGER NOT NULL,
                tokens_sold INTEGER NOT NULL,
                total_trade_volume INTEGER NOT NULL,
                chain_active INTEGER NOT NULL,
                battle_status INTEGER NOT NULL CHECK(battle_status BETWEEN 0 AND 5),
                opponent_mint TEXT,
                creation_ts INTEGER NOT NULL,
                last_trade_ts INTEGER NOT NULL,
                battle_start_ts INTEGER NOT NULL,
                victory_ts INTEGER NOT NULL,
                listing_ts INTEGER NOT NULL,
                qualification_ts INTEGER NOT NULL,
                bump INTEGER NOT NULL,
                name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                uri TEXT NOT NULL,
                market_cap_micro_usd INTEGER,
                volume_micro_usd INTEGER,
                battle_score INTEGER NOT NULL DEFAULT 0,
                deactivated_at INTEGER,
                observed_slot INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                chain_status INTEGER NOT NULL CHECK(chain_status BETWEEN 0 AND 5),
                PRIMARY KEY(network, mint),
                CHECK((opponent_mint IS NOT NULL) = (battle_status IN (2, 3)))
            );

            -- Buyer positions, one per (launch, buyer)
            CREATE TABLE IF NOT EXISTS positions (
                network TEXT NOT NULL,
                launch TEXT NOT NULL,
                buyer TEXT NOT NULL,
                address TEXT NOT NULL,
                sol_spent INTEGER NOT NULL,
                tokens_received INTEGER NOT NULL,
                refund_claimed INTEGER NOT NULL,
                thawed INTEGER NOT NULL,
                first_buy_ts INTEGER NOT NULL,
                last_buy_ts INTEGER NOT NULL,
                bump INTEGER NOT NULL,
                observed_slot INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY(network, launch, buyer)
            );

            -- Price oracle singleton per network
            CREATE TABLE IF NOT EXISTS price_oracle (
                network TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                sol_price_micro_usd INTEGER NOT NULL,
                last_update_ts INTEGER NOT NULL,
                next_update_ts INTEGER NOT NULL,
                keeper_authority TEXT NOT NULL,
                update_count INTEGER NOT NULL,
                observed_slot INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_battle_status ON battle_tokens(network, battle_status);
            CREATE INDEX IF NOT EXISTS idx_launches_address ON launches(network, address);
            CREATE INDEX IF NOT EXISTS idx_positions_launch ON positions(network, launch);
            "#,
        )
        .context("Failed to initialize database schema")?;

        info!("📊 Database schema initialized");
        Ok(())
    }

    // ---- Launches ----

    pub fn get_launch(&self, network: Network, mint: &str) -> StoreResult<Option<LaunchRow>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM launches WHERE network = ?1 AND mint = ?2",
            LAUNCH_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![network.as_str(), mint], launch_from_row)
            .optional()?;
        Ok(row)
    }

    /// Insert or replace a launch row. `holder_count` is always recomputed
    /// from positions so the stored value never drifts from them.
    pub fn upsert_launch(&self, row: &LaunchRow) -> StoreResult<u32> {
        let conn = self.conn()?;
        let r = &row.record;
        let network = row.network.as_str();
        let address = row.address.to_string();

        conn.execute(
            r#"
            INSERT OR REPLACE INTO launches (
                network, mint, address, creator, tier, virtual_sol_init, constant_k, target_sol,
                deadline, sol_raised, status, created_at, graduated_at, pool, total_buyers,
                total_tokens_sold, name, symbol, uri, bump, progress_percent, market_cap_micro_usd,
                time_remaining_secs, holder_count, deactivated_at, observed_slot, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
                ?19, ?20, ?21, ?22, ?23,
                (SELECT COUNT(*) FROM positions
                 WHERE network = ?1 AND launch = ?3 AND tokens_received > 0 AND refund_claimed = 0),
                ?24, ?25, ?26
            )
            "#,
            params![
                network,
                r.mint.to_string(),
                address,
                r.creator.to_string(),
                r.tier,
                to_sql_u64(r.virtual_sol_init),
                r.constant_k.to_string(),
                to_sql_u64(r.target_sol),
                r.deadline,
                to_sql_u64(r.sol_raised),
                r.status.ordinal(),
                r.created_at,
                r.graduated_at,
                r.pool.map(|p| p.to_string()),
                r.total_buyers,
                to_sql_u64(r.total_tokens_sold),
                r.name,
                r.symbol,
                r.uri,
                r.bump,
                row.progress_percent,
                row.market_cap_micro_usd.map(to_sql_u64),
                row.time_remaining_secs,
                row.deactivated_at,
                to_sql_u64(row.observed_slot),
                row.updated_at,
            ],
        )?;

        let holders: u32 = conn.query_row(
            "SELECT holder_count FROM launches WHERE network = ?1 AND mint = ?2",
            params![network, r.mint.to_string()],
            |row| row.get(0),
        )?;
        Ok(holders)
    }

    // ---- Battle tokens ----

    pub fn get_battle(&self, network: Network, mint: &str) -> StoreResult<Option<BattleRow>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM battle_tokens WHERE network = ?1 AND mint = ?2",
            BATTLE_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![network.as_str(), mint], battle_from_row)
            .optional()?;
        Ok(row)
    }

    /// Write every row in one transaction: all land or none do.
    pub fn upsert_battles(&self, rows: &[BattleRow]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for row in rows {
            let r = &row.record;
            tx.execute(
                r#"
                INSERT OR REPLACE INTO battle_tokens (
                    network, mint, address, sol_collected, tokens_sold, total_trade_volume,
                    chain_active, battle_status, opponent_mint, creation_ts, last_trade_ts,
                    battle_start_ts, victory_ts, listing_ts, qualification_ts, bump, name, symbol,
                    uri, market_cap_micro_usd, volume_micro_usd, battle_score, deactivated_at,
                    observed_slot, updated_at, chain_status
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                    ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26
                )
                "#,
                params![
                    row.network.as_str(),
                    r.mint.to_string(),
                    row.address.to_string(),
                    to_sql_u64(r.sol_collected),
                    to_sql_u64(r.tokens_sold),
                    to_sql_u64(r.total_trade_volume),
                    r.is_active,
                    r.battle_status.ordinal(),
                    r.opponent_mint.map(|m| m.to_string()),
                    r.creation_timestamp,
                    r.last_trade_timestamp,
                    r.battle_start_timestamp,
                    r.victory_timestamp,
                    r.listing_timestamp,
                    r.qualification_timestamp,
                    r.bump,
                    r.name,
                    r.symbol,
                    r.uri,
                    row.market_cap_micro_usd.map(to_sql_u64),
                    row.volume_micro_usd.map(to_sql_u64),
                    row.battle_score,
                    row.deactivated_at,
                    to_sql_u64(row.observed_slot),
                    row.updated_at,
                    row.chain_status.ordinal(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn battles_by_status(
        &self,
        network: Network,
        status: BattleStatus,
    ) -> StoreResult<Vec<BattleRow>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM battle_tokens WHERE network = ?1 AND battle_status = ?2 ORDER BY mint",
            BATTLE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![network.as_str(), status.ordinal()], battle_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---- Positions ----

    pub fn get_position(
        &self,
        network: Network,
        launch: &str,
        buyer: &str,
    ) -> StoreResult<Option<PositionRow>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM positions WHERE network = ?1 AND launch = ?2 AND buyer = ?3",
            POSITION_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![network.as_str(), launch, buyer], position_from_row)
            .optional()?;
        Ok(row)
    }

    /// Upsert a position and refresh the owning launch's holder count in the
    /// same transaction. Returns the new holder count.
    pub fn upsert_position(&self, row: &PositionRow) -> StoreResult<u32> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let r = &row.record;
        let network = row.network.as_str();
        let launch = r.launch.to_string();

        tx.execute(
            r#"
            INSERT OR REPLACE INTO positions (
                network, launch, buyer, address, sol_spent, tokens_received, refund_claimed,
                thawed, first_buy_ts, last_buy_ts, bump, observed_slot, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                network,
                launch,
                r.buyer.to_string(),
                row.address.to_string(),
                to_sql_u64(r.sol_spent),
                to_sql_u64(r.tokens_received),
                r.refund_claimed,
                r.thawed,
                r.first_buy_timestamp,
                r.last_buy_timestamp,
                r.bump,
                to_sql_u64(row.observed_slot),
                row.updated_at,
            ],
        )?;

        let holders: u32 = tx.query_row(
            "SELECT COUNT(*) FROM positions
             WHERE network = ?1 AND launch = ?2 AND tokens_received > 0 AND refund_claimed = 0",
            params![network, launch],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE launches SET holder_count = ?1 WHERE network = ?2 AND address = ?3",
            params![holders, network, launch],
        )?;
        tx.commit()?;
        Ok(holders)
    }

    // ---- Price oracle ----

    pub fn get_oracle(&self, network: Network) -> StoreResult<Option<OracleRow>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM price_oracle WHERE network = ?1", ORACLE_COLUMNS);
        let row = conn
            .query_row(&sql, params![network.as_str()], oracle_from_row)
            .optional()?;
        Ok(row)
    }

    pub fn upsert_oracle(&self, row: &OracleRow) -> StoreResult<()> {
        let conn = self.conn()?;
        let r = &row.record;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO price_oracle (
                network, address, sol_price_micro_usd, last_update_ts, next_update_ts,
                keeper_authority, update_count, observed_slot, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                row.network.as_str(),
                row.address.to_string(),
                to_sql_u64(r.sol_price_micro_usd),
                r.last_update_timestamp,
                r.next_update_timestamp,
                r.keeper_authority.to_string(),
                to_sql_u64(r.update_count),
                to_sql_u64(row.observed_slot),
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Every cached mint on a network, tagged with the program it belongs to.
    pub fn known_mints(&self, network: Network) -> StoreResult<Vec<(RecordKind, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT 'launch', mint FROM launches WHERE network = ?1
             UNION ALL
             SELECT 'battle', mint FROM battle_tokens WHERE network = ?1
             ORDER BY 2",
        )?;
        let rows = stmt
            .query_map(params![network.as_str()], |row| {
                let kind: String = row.get(0)?;
                let mint: String = row.get(1)?;
                Ok((kind, mint))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(kind, mint)| RecordKind::from_str_opt(&kind).map(|k| (k, mint)))
            .collect())
    }

    /// Soft-deactivate a cached token. Rows are never deleted.
    pub fn deactivate(
        &self,
        network: Network,
        kind: RecordKind,
        mint: &str,
        at: i64,
    ) -> StoreResult<bool> {
        let table = match kind {
            RecordKind::Launch => "launches",
            RecordKind::Battle => "battle_tokens",
            other => {
                return Err(PersistenceError::Constraint(format!(
                    "{} rows cannot be deactivated",
                    other.as_str()
                )))
            }
        };
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE {} SET deactivated_at = COALESCE(deactivated_at, ?1) WHERE network = ?2 AND mint = ?3",
            table
        );
        let changed = conn.execute(&sql, params![at, network.as_str(), mint])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BattleRecord, BuyerRecord, LaunchRecord, LaunchStatus, PriceOracleRecord};
    use solana_sdk::pubkey::Pubkey;

    fn battle_row(network: Network, status: BattleStatus) -> BattleRow {
        let opponent = status.requires_opponent().then(Pubkey::new_unique);
        BattleRow {
            network,
            address: Pubkey::new_unique(),
            record: BattleRecord {
                mint: Pubkey::new_unique(),
                sol_collected: u64::MAX - 7,
                tokens_sold: 1,
                total_trade_volume: 2,
                is_active: true,
                battle_status: status,
                opponent_mint: opponent,
                creation_timestamp: 10,
                last_trade_timestamp: 20,
                battle_start_timestamp: 30,
                victory_timestamp: 0,
                listing_timestamp: 0,
                qualification_timestamp: 15,
                bump: 255,
                name: "Ares".to_string(),
                symbol: "ARES".to_string(),
                uri: String::new(),
            },
            market_cap_micro_usd: Some(1_200_000_000),
            volume_micro_usd: None,
            battle_score: 1,
            deactivated_at: None,
            chain_status: status,
            observed_slot: 99,
            updated_at: 1_760_000_000,
        }
    }

    fn launch_row() -> LaunchRow {
        LaunchRow {
            network: Network::Devnet,
            address: Pubkey::new_unique(),
            record: LaunchRecord {
                creator: Pubkey::new_unique(),
                mint: Pubkey::new_unique(),
                tier: 1,
                virtual_sol_init: 353_000_000,
                constant_k: 378_769_000_000_000_000_000_000,
                target_sol: 1_000_000_000,
                deadline: 2_000,
                sol_raised: 10,
                status: LaunchStatus::Active,
                created_at: 1_000,
                graduated_at: None,
                pool: None,
                total_buyers: 0,
                total_tokens_sold: 0,
                name: "Launch".to_string(),
                symbol: "LNCH".to_string(),
                uri: "u".to_string(),
                bump: 1,
            },
            progress_percent: 0.000001,
            market_cap_micro_usd: None,
            time_remaining_secs: 1_000,
            holder_count: 0,
            deactivated_at: None,
            observed_slot: 5,
            updated_at: 1_000,
        }
    }

    fn position(launch: Pubkey, tokens: u64, refunded: bool) -> PositionRow {
        PositionRow {
            network: Network::Devnet,
            address: Pubkey::new_unique(),
            record: BuyerRecord {
                launch,
                buyer: Pubkey::new_unique(),
                sol_spent: 1,
                tokens_received: tokens,
                refund_claimed: refunded,
                thawed: false,
                first_buy_timestamp: 1,
                last_buy_timestamp: 2,
                bump: 3,
            },
            observed_slot: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_battle_row_round_trip_and_network_isolation() {
        let db = Database::open_in_memory().unwrap();
        let row = battle_row(Network::Devnet, BattleStatus::InBattle);
        db.upsert_battles(&[row.clone()]).unwrap();

        let mint = row.mint().to_string();
        assert_eq!(db.get_battle(Network::Devnet, &mint).unwrap(), Some(row));
        assert!(db.get_battle(Network::Mainnet, &mint).unwrap().is_none());
    }

    #[test]
    fn test_pair_write_is_atomic() {
        let db = Database::open_in_memory().unwrap();
        let good = battle_row(Network::Devnet, BattleStatus::InBattle);
        let mut bad = battle_row(Network::Devnet, BattleStatus::InBattle);
        // Violates the opponent CHECK constraint
        bad.record.opponent_mint = None;

        let err = db.upsert_battles(&[good.clone(), bad]).unwrap_err();
        assert!(matches!(err, PersistenceError::Constraint(_)));
        assert!(db
            .get_battle(Network::Devnet, &good.mint().to_string())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_battles_by_status() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![
            battle_row(Network::Devnet, BattleStatus::InBattle),
            battle_row(Network::Devnet, BattleStatus::Qualified),
            battle_row(Network::Mainnet, BattleStatus::InBattle),
        ];
        db.upsert_battles(&rows).unwrap();
        let in_battle = db
            .battles_by_status(Network::Devnet, BattleStatus::InBattle)
            .unwrap();
        assert_eq!(in_battle.len(), 1);
        assert_eq!(in_battle[0], rows[0]);
    }

    #[test]
    fn test_launch_round_trip_and_holder_count() {
        let db = Database::open_in_memory().unwrap();
        let launch = launch_row();
        assert_eq!(db.upsert_launch(&launch).unwrap(), 0);

        let mint = launch.record.mint.to_string();
        let stored = db.get_launch(Network::Devnet, &mint).unwrap().unwrap();
        assert_eq!(stored, launch);

        assert_eq!(db.upsert_position(&position(launch.address, 10, false)).unwrap(), 1);
        assert_eq!(db.upsert_position(&position(launch.address, 0, false)).unwrap(), 1);
        assert_eq!(db.upsert_position(&position(launch.address, 5, true)).unwrap(), 1);
        assert_eq!(db.upsert_position(&position(launch.address, 7, false)).unwrap(), 2);

        let stored = db.get_launch(Network::Devnet, &mint).unwrap().unwrap();
        assert_eq!(stored.holder_count, 2);

        // A rewrite of the launch keeps the count derived from positions
        assert_eq!(db.upsert_launch(&launch).unwrap(), 2);
    }

    #[test]
    fn test_oracle_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let row = OracleRow {
            network: Network::Mainnet,
            address: Pubkey::new_unique(),
            record: PriceOracleRecord {
                sol_price_micro_usd: 150_000_000,
                last_update_timestamp: 1,
                next_update_timestamp: 2,
                keeper_authority: Pubkey::new_unique(),
                update_count: 3,
            },
            observed_slot: 4,
            updated_at: 5,
        };
        db.upsert_oracle(&row).unwrap();
        assert_eq!(db.get_oracle(Network::Mainnet).unwrap(), Some(row));
        assert!(db.get_oracle(Network::Devnet).unwrap().is_none());
    }

    #[test]
    fn test_known_mints_and_deactivate() {
        let db = Database::open_in_memory().unwrap();
        let battle = battle_row(Network::Devnet, BattleStatus::Created);
        let launch = launch_row();
        db.upsert_battles(&[battle.clone()]).unwrap();
        db.upsert_launch(&launch).unwrap();

        let mints = db.known_mints(Network::Devnet).unwrap();
        assert_eq!(mints.len(), 2);
        assert!(mints.contains(&(RecordKind::Battle, battle.mint().to_string())));

        let mint = battle.mint().to_string();
        assert!(db.deactivate(Network::Devnet, RecordKind::Battle, &mint, 42).unwrap());
        // First deactivation time sticks
        db.deactivate(Network::Devnet, RecordKind::Battle, &mint, 99).unwrap();
        let stored = db.get_battle(Network::Devnet, &mint).unwrap().unwrap();
        assert_eq!(stored.deactivated_at, Some(42));
        assert!(!stored.is_active());
    }

    #[test]
    fn test_on_disk_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let row = battle_row(Network::Mainnet, BattleStatus::Listed);
        {
            let db = Database::new(&path, true).unwrap();
            db.upsert_battles(&[row.clone()]).unwrap();
        }
        let db = Database::new(&path, true).unwrap();
        assert_eq!(
            db.get_battle(Network::Mainnet, &row.mint().to_string()).unwrap(),
            Some(row)
        );
    }
}
