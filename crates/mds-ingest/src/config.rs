//! Configuration management

use serde::{Deserialize, Serialize};

use crate::db::DbConfig;
use crate::models::SyncSource;
use crate::sync::SyncOptions;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default maximum database connections in the pool.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DB_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Sync Configuration Constants
// ============================================================================

/// Sequential by default to stay under the BLS request ceiling.
pub const DEFAULT_MAX_CONCURRENT: usize = 1;

/// Default retries for transient BLS failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Service configuration, read from the environment (and `.env`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_keys: ApiKeys,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Required unless the run is a dry run
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    /// Required for HUD
    pub hud: Option<String>,
    /// Optional; Census allows keyless requests at a lower quota
    pub census: Option<String>,
    /// Optional; selects the v2 BLS endpoint when set
    pub bls: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub dry_run: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DB_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults.
    ///
    /// Nothing is required at this point; [`Config::validate`] checks the
    /// settings a given run needs.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database: DatabaseConfig {
                url: non_empty_var("DATABASE_URL"),
                max_connections: parsed_var("DB_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
                min_connections: parsed_var("DB_MIN_CONNECTIONS")
                    .unwrap_or(DEFAULT_DB_MIN_CONNECTIONS),
                connect_timeout_secs: parsed_var("DB_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DB_CONNECT_TIMEOUT_SECS),
            },
            api_keys: ApiKeys {
                hud: non_empty_var("HUD_API_KEY"),
                census: non_empty_var("CENSUS_API_KEY"),
                bls: non_empty_var("BLS_API_KEY"),
            },
            sync: SyncConfig {
                max_concurrent: parsed_var("SYNC_MAX_CONCURRENT").unwrap_or(DEFAULT_MAX_CONCURRENT),
                max_retries: parsed_var("SYNC_MAX_RETRIES").unwrap_or(DEFAULT_MAX_RETRIES),
                dry_run: std::env::var("DRY_RUN").map(|v| v == "true").unwrap_or(false),
            },
        })
    }

    /// Check the settings needed to sync `sources`
    pub fn validate(&self, sources: &[SyncSource]) -> anyhow::Result<()> {
        if !self.sync.dry_run && self.database.url.is_none() {
            anyhow::bail!("DATABASE_URL environment variable is required");
        }

        if sources.contains(&SyncSource::Hud) && self.api_keys.hud.is_none() {
            anyhow::bail!("HUD_API_KEY is required for HUD data sync");
        }

        if self.sync.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be greater than 0");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.database.max_connections < self.sync.max_concurrent as u32 {
            tracing::warn!(
                max_connections = self.database.max_connections,
                max_concurrent = self.sync.max_concurrent,
                "Pool is smaller than the concurrency cap; workers will wait on connections"
            );
        }

        Ok(())
    }

    /// Pool settings, if a database URL is configured
    pub fn db_config(&self) -> Option<DbConfig> {
        self.database.url.as_ref().map(|url| DbConfig {
            url: url.clone(),
            max_connections: self.database.max_connections,
            min_connections: self.database.min_connections,
            connect_timeout_secs: self.database.connect_timeout_secs,
            ..DbConfig::default()
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_concurrent: self.sync.max_concurrent,
            max_retries: self.sync.max_retries,
            dry_run: self.sync.dry_run,
            ..SyncOptions::default()
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "DB_MAX_CONNECTIONS",
        "DB_MIN_CONNECTIONS",
        "DB_CONNECT_TIMEOUT",
        "HUD_API_KEY",
        "CENSUS_API_KEY",
        "BLS_API_KEY",
        "SYNC_MAX_CONCURRENT",
        "SYNC_MAX_RETRIES",
        "DRY_RUN",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_load_defaults() {
        clear_env();

        let config = Config::load().unwrap();
        assert_eq!(config.database.url, None);
        assert_eq!(config.database.max_connections, DEFAULT_DB_MAX_CONNECTIONS);
        assert_eq!(config.sync.max_concurrent, 1);
        assert_eq!(config.sync.max_retries, 3);
        assert!(!config.sync.dry_run);
        assert!(config.db_config().is_none());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/mds");
        std::env::set_var("SYNC_MAX_CONCURRENT", "4");
        std::env::set_var("BLS_API_KEY", "  ");
        std::env::set_var("DRY_RUN", "true");

        let config = Config::load().unwrap();
        assert_eq!(config.sync.max_concurrent, 4);
        assert_eq!(config.api_keys.bls, None);
        assert!(config.sync.dry_run);
        assert!(config.sync_options().dry_run);

        let db = config.db_config().unwrap();
        assert_eq!(db.url, "postgres://localhost/mds");
        assert_eq!(db.connect_timeout_secs, DEFAULT_DB_CONNECT_TIMEOUT_SECS);

        clear_env();
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        let err = config.validate(&[SyncSource::Bls]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        config.sync.dry_run = true;
        assert!(config.validate(&[SyncSource::Bls]).is_ok());

        let err = config.validate(&SyncSource::ALL).unwrap_err();
        assert!(err.to_string().contains("HUD_API_KEY"));

        config.api_keys.hud = Some("key".into());
        config.database.min_connections = 20;
        assert!(config.validate(&SyncSource::ALL).is_err());
    }
}
