use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::fs;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{bail, Context, Result};

use crate::types::Network;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "BATTLE_SYNC_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub networks: NetworksConfig,
    pub tiers: HashMap<String, TierConfig>,
    pub sync: SyncConfig,
    pub price: PriceConfig,
    #[serde(default)]
    pub finalizer: FinalizerConfig,
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub wal_mode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworksConfig {
    pub devnet: Option<NetworkConfig>,
    pub mainnet: Option<NetworkConfig>,
}

impl NetworksConfig {
    pub fn get(&self, network: Network) -> Option<&NetworkConfig> {
        match network {
            Network::Devnet => self.devnet.as_ref(),
            Network::Mainnet => self.mainnet.as_ref(),
        }
    }

    /// Configured networks in a stable order.
    pub fn enabled(&self) -> Vec<(Network, &NetworkConfig)> {
        Network::ALL
            .iter()
            .filter_map(|n| self.get(*n).map(|cfg| (*n, cfg)))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    pub rpc_endpoint: String,
    pub battle_program: String,
    pub launch_program: String,
    /// Key into `[tiers]`
    pub tier: String,
}

impl NetworkConfig {
    pub fn battle_program_id(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.battle_program)
            .with_context(|| format!("Invalid battle program ID: {}", self.battle_program))
    }

    pub fn launch_program_id(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.launch_program)
            .with_context(|| format!("Invalid launch program ID: {}", self.launch_program))
    }
}

/// Per-tier battle thresholds. USD values are whole dollars.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierConfig {
    pub qualification_lamports: u64,
    pub victory_market_cap_usd: u64,
    pub victory_volume_usd: u64,
    pub matchmaking_tolerance_lamports: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    pub scan_interval_secs: u64,
    pub victory_scan_interval_secs: u64,
    pub concurrency: usize,
    pub rpc_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub price_timeout_ms: u64,
    pub finalizer_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Enumerate program-owned accounts during full scans, not just cached mints.
    #[serde(default = "default_true")]
    pub scan_program_accounts: bool,
}

impl SyncConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }

    pub fn finalizer_timeout(&self) -> Duration {
        Duration::from_millis(self.finalizer_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    /// On-chain price oracle account
    Oracle,
    /// Pyth Hermes HTTP API
    Hermes,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceConfig {
    pub source: PriceSource,
    pub hermes_endpoint: String,
    pub sol_usd_feed_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FinalizerConfig {
    /// Service that creates the pool for a winner. Victories stay pending without it.
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Bearer secret expected on webhook and admin requests
    pub webhook_secret: Option<String>,
    #[serde(default = "default_max_batch")]
    pub max_batch_events: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_batch() -> usize {
    1000
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()
            .with_context(|| format!("Invalid config file: {}", path))?;

        Ok(config)
    }

    pub fn load_or_default() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load(&path);
        }
        // Try config.toml first, then config.example.toml
        Self::load("config.toml")
            .or_else(|_| Self::load("config.example.toml"))
            .context("Failed to load configuration")
    }

    pub fn tier_for(&self, network: Network) -> Result<&TierConfig> {
        let net = self
            .networks
            .get(network)
            .with_context(|| format!("Network {} is not configured", network))?;
        self.tiers
            .get(&net.tier)
            .with_context(|| format!("Tier '{}' for {} is not defined", net.tier, network))
    }

    pub fn validate(&self) -> Result<()> {
        let enabled = self.networks.enabled();
        if enabled.is_empty() {
            bail!("At least one network must be configured");
        }
        for (network, net) in enabled {
            net.battle_program_id()?;
            net.launch_program_id()?;
            self.tier_for(network)?;
        }
        if self.sync.concurrency == 0 {
            bail!("sync.concurrency must be at least 1");
        }
        if self.sync.scan_interval_secs == 0 || self.sync.victory_scan_interval_secs == 0 {
            bail!("Scan intervals must be non-zero");
        }
        Ok(())
    }
}
