//! Configuration management.
//!
//! All policy constants (origin check TTL, lookup concurrency budget,
//! notification debounce window) live here rather than in the modules that
//! consume them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use crate::types::{ChannelId, PlayerClass};

/// Top-level configuration for the coordination service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Origin reputation checking
    pub reputation: ReputationConfig,
    /// Match log import
    pub import: ImportConfig,
    /// Live identity handling
    pub identity: IdentityConfig,
    /// Voice server channel metadata
    pub voice: VoiceConfig,
    /// Game server metadata
    pub game: GameConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,
    /// Connection pool size
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// External classification endpoint
    pub check_url: String,
    /// Contact address sent with every lookup, required by the service's
    /// usage policy
    pub contact: String,
    /// Seconds a cached verdict stays valid
    pub check_ttl_secs: u64,
    /// Maximum concurrent external lookups
    pub max_in_flight: usize,
    /// Seconds between backlog drain passes
    pub backlog_interval_secs: u64,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Base URL of the match log source, e.g. `https://logs.example/api/v1/log`
    pub source_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Milliseconds the outward notification debounce window stays open
    pub debounce_ms: u64,
    /// Game account ids granted the admin flag on sighting
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Bot account name, excluded from identity tracking
    pub username: String,
    /// Channel id -> per-class skill tag, merged into voice account tags
    pub channel_tags: HashMap<ChannelId, HashMap<PlayerClass, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Maps accepted by the change-level command
    pub maps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/mixmaster".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            check_url: "https://check.getipintel.net/check.php".to_string(),
            contact: String::new(),
            check_ttl_secs: 6 * 60 * 60,
            max_in_flight: 12,
            backlog_interval_secs: 60,
            timeout_secs: 30,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            source_url: "https://logs.tf/api/v1/log".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            admins: Vec::new(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            username: "mix-master".to_string(),
            channel_tags: HashMap::new(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self { maps: Vec::new() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            reputation: ReputationConfig::default(),
            import: ImportConfig::default(),
            identity: IdentityConfig::default(),
            voice: VoiceConfig::default(),
            game: GameConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MixConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("MIX_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(max) = env::var("MIX_DATABASE_MAX_CONNECTIONS") {
            config.database.max_connections = max
                .parse()
                .context("Invalid MIX_DATABASE_MAX_CONNECTIONS value")?;
        }

        if let Ok(url) = env::var("MIX_REPUTATION_URL") {
            config.reputation.check_url = url;
        }
        config.reputation.contact = env::var("MIX_REPUTATION_CONTACT")
            .context("MIX_REPUTATION_CONTACT environment variable is required")?;
        if let Ok(ttl) = env::var("MIX_REPUTATION_TTL_SECS") {
            config.reputation.check_ttl_secs =
                ttl.parse().context("Invalid MIX_REPUTATION_TTL_SECS value")?;
        }
        if let Ok(max) = env::var("MIX_REPUTATION_MAX_IN_FLIGHT") {
            config.reputation.max_in_flight = max
                .parse()
                .context("Invalid MIX_REPUTATION_MAX_IN_FLIGHT value")?;
        }
        if let Ok(interval) = env::var("MIX_REPUTATION_BACKLOG_INTERVAL_SECS") {
            config.reputation.backlog_interval_secs = interval
                .parse()
                .context("Invalid MIX_REPUTATION_BACKLOG_INTERVAL_SECS value")?;
        }
        if let Ok(timeout) = env::var("MIX_REPUTATION_TIMEOUT_SECS") {
            config.reputation.timeout_secs = timeout
                .parse()
                .context("Invalid MIX_REPUTATION_TIMEOUT_SECS value")?;
        }

        if let Ok(url) = env::var("MIX_LOG_SOURCE_URL") {
            config.import.source_url = url;
        }
        if let Ok(timeout) = env::var("MIX_LOG_SOURCE_TIMEOUT_SECS") {
            config.import.timeout_secs = timeout
                .parse()
                .context("Invalid MIX_LOG_SOURCE_TIMEOUT_SECS value")?;
        }

        if let Ok(window) = env::var("MIX_DEBOUNCE_MS") {
            config.identity.debounce_ms =
                window.parse().context("Invalid MIX_DEBOUNCE_MS value")?;
        }
        if let Ok(admins) = env::var("MIX_ADMINS") {
            config.identity.admins = admins
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(username) = env::var("MIX_VOICE_USERNAME") {
            config.voice.username = username;
        }
        if let Ok(tags) = env::var("MIX_VOICE_CHANNEL_TAGS") {
            config.voice.channel_tags =
                serde_json::from_str(&tags).context("Invalid MIX_VOICE_CHANNEL_TAGS JSON")?;
        }

        if let Ok(maps) = env::var("MIX_GAME_MAPS") {
            config.game.maps = maps
                .split(',')
                .map(str::trim)
                .filter(|map| !map.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(level) = env::var("MIX_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(anyhow::anyhow!("Database URL cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("Database pool size must be non-zero"));
        }
        if self.reputation.contact.is_empty() {
            return Err(anyhow::anyhow!(
                "Reputation contact address is required by the lookup service"
            ));
        }
        if self.reputation.max_in_flight == 0 {
            return Err(anyhow::anyhow!("Reputation lookup budget must be non-zero"));
        }
        if self.reputation.check_ttl_secs == 0 {
            return Err(anyhow::anyhow!("Origin check TTL must be non-zero"));
        }
        if self.import.source_url.is_empty() {
            return Err(anyhow::anyhow!("Match log source URL cannot be empty"));
        }
        if self.identity.debounce_ms == 0 {
            return Err(anyhow::anyhow!("Debounce window must be non-zero"));
        }
        Ok(())
    }
}
