use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CardboxConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub enrichment: EnrichmentConfig,
    pub search: SearchConfig,
    pub smart_decks: SmartDeckConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub media_dir: String,
}

/// How enrichment work is scheduled relative to the call that triggered it.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnrichMode {
    /// The create/update call awaits enrichment before returning.
    Inline,
    /// The call returns immediately; completion is signalled by a `CardProcessed` event.
    Background,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub mode: EnrichMode,
    /// Dispatch AI work to the isolated worker context instead of calling providers directly.
    pub use_worker: bool,
    /// Upper bound for any single AI call.
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub lsh_planes: usize,
    /// Fixed seed for the LSH hyperplanes. `None` draws from entropy.
    pub lsh_seed: Option<u64>,
    pub default_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SmartDeckConfig {
    pub recent_days: i64,
    pub stale_days: i64,
    pub frequent_size: usize,
    pub tag_deck_min_cards: usize,
}

/// Argon2id cost parameters used for encrypted exports.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CryptoConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for CardboxConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            storage: StorageConfig::default(),
            enrichment: EnrichmentConfig::default(),
            search: SearchConfig::default(),
            smart_decks: SmartDeckConfig::default(),
            crypto: CryptoConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = default_cardbox_dir();
        Self {
            db_path: dir.join("cards.db").to_string_lossy().into_owned(),
            media_dir: dir.join("media").to_string_lossy().into_owned(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: EnrichMode::Background,
            use_worker: true,
            timeout_secs: 30,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lsh_planes: 10,
            lsh_seed: None,
            default_limit: 20,
        }
    }
}

impl Default for SmartDeckConfig {
    fn default() -> Self {
        Self {
            recent_days: 7,
            stale_days: 30,
            frequent_size: 5,
            tag_deck_min_cards: 3,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Returns `~/.cardbox/`
pub fn default_cardbox_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cardbox")
}

/// Returns the default config file path: `~/.cardbox/config.toml`
pub fn default_config_path() -> PathBuf {
    default_cardbox_dir().join("config.toml")
}

impl CardboxConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CardboxConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (CARDBOX_DB, CARDBOX_MEDIA_DIR, CARDBOX_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CARDBOX_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("CARDBOX_MEDIA_DIR") {
            self.storage.media_dir = val;
        }
        if let Ok(val) = std::env::var("CARDBOX_LOG_LEVEL") {
            self.log.level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// Resolve the media directory, expanding `~` if needed.
    pub fn resolved_media_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.media_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
