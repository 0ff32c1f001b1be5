use serde::Deserialize;
use std::path::Path;

/// Top-level config loaded from `tracepixel.toml`, overridable by environment
/// variables of the same name (see `Config::load`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_connection: String,
    pub enrichment_channel_capacity: usize,
    pub writer_channel_capacity: usize,
    pub edge_concurrency: usize,
    pub etl_interval_seconds: u64,
    pub etl_batch_size: u64,
    pub spool_directory: String,
    pub spool_rotate_bytes: u64,
    pub datacenter_refresh_interval_secs: u64,
    pub geo_api_requests_per_minute: u32,
    pub tenant_config_db: String,
    pub ipc_socket_path: String,
    pub ipc_acceptors: usize,
    pub purge: PurgeConfig,
    pub replay_retention_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_connection: "http://localhost:8123/tracepixel".to_string(),
            enrichment_channel_capacity: 10_000,
            writer_channel_capacity: 10_000,
            edge_concurrency: 1_000,
            etl_interval_seconds: 60,
            etl_batch_size: 10_000,
            spool_directory: "./spool".to_string(),
            spool_rotate_bytes: 100 * 1024 * 1024,
            datacenter_refresh_interval_secs: 7 * 24 * 3600,
            geo_api_requests_per_minute: 500,
            tenant_config_db: "./tracepixel_tenants.db".to_string(),
            ipc_socket_path: "./tracepixel.sock".to_string(),
            ipc_acceptors: 4,
            purge: PurgeConfig::default(),
            replay_retention_secs: 3600,
        }
    }
}

/// Raw purge procedure: disabled unless an operator opts in (spec.md §3.2, §9).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub retain_days: u32,
    pub dry_run: bool,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 24 * 3600,
            retain_days: 180,
            dry_run: true,
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults if the file is
    /// absent. Environment variables named like the TOML keys (upper-cased,
    /// `TRACEPIXEL_` prefixed) override individual fields after the file load.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let mut config: Config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            Config::default()
        };

        if let Ok(v) = std::env::var("TRACEPIXEL_STORE_CONNECTION") {
            config.store_connection = v;
        }
        if let Ok(v) = std::env::var("TRACEPIXEL_SPOOL_DIRECTORY") {
            config.spool_directory = v;
        }
        if let Ok(v) = std::env::var("TRACEPIXEL_IPC_SOCKET_PATH") {
            config.ipc_socket_path = v;
        }
        if let Some(v) = std::env::var("TRACEPIXEL_ETL_INTERVAL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.etl_interval_seconds = v;
        }

        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}
