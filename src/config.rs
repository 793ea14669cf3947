//! Configuration management with validation and defaults
//!
//! Settings are grouped per component. A `ConfigLoader` reads an optional
//! TOML file, applies `BINGO_*` environment overrides, then validates.

use crate::errors::{BingoResult, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BingoConfig {
    pub game: GameConfig,
    pub prizes: PrizeConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub broadcast: BroadcastConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
}

/// Game pacing and pricing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Card price in minor currency units
    pub card_price: u64,
    pub special_card_price: u64,
    /// Time between two drawn numbers
    pub draw_interval_ms: u64,
    /// Delay between game creation and the scheduled start
    pub purchase_window_ms: u64,
    /// Bingo at or before this many draws also wins the jackpot
    pub jackpot_draw_threshold: usize,
    /// Refund card purchases when a game with sold cards is canceled
    pub refund_on_cancel: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            card_price: 100,
            special_card_price: 200,
            draw_interval_ms: 1_000,
            purchase_window_ms: 60_000,
            jackpot_draw_threshold: 40,
            refund_on_cancel: true,
        }
    }
}

/// Percentages of the collected pool, must sum to 100
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPercentages {
    pub bingo: u8,
    pub quine: u8,
    pub jackpot: u8,
    pub platform: u8,
}

impl SplitPercentages {
    pub fn total(&self) -> u32 {
        self.bingo as u32 + self.quine as u32 + self.jackpot as u32 + self.platform as u32
    }
}

/// Prize split for standard and special games
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PrizeConfig {
    pub standard: SplitPercentages,
    pub special: SplitPercentages,
}

impl Default for PrizeConfig {
    fn default() -> Self {
        Self {
            standard: SplitPercentages { bingo: 50, quine: 20, jackpot: 10, platform: 20 },
            special: SplitPercentages { bingo: 55, quine: 20, jackpot: 10, platform: 15 },
        }
    }
}

impl PrizeConfig {
    pub fn split_for(&self, is_special: bool) -> SplitPercentages {
        if is_special {
            self.special
        } else {
            self.standard
        }
    }
}

/// Game creation cadence
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Pause after a game ends before the next one is created
    pub cooldown_ms: u64,
    /// Every Nth scheduled game is special (0 disables)
    pub special_every: u32,
    /// UTC hours whose games are always special
    pub special_hours_utc: Vec<u32>,
    /// Delay before retrying a failed game creation
    pub retry_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_ms: 30_000,
            special_every: 10,
            special_hours_utc: vec![21],
            retry_delay_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    RocksDb,
    Memory,
}

/// Storage configuration with optimization settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    pub max_write_buffer_number: i32,
    pub target_file_size_mb: u64,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
    /// Optimistic transaction attempts before surfacing a persistence failure
    pub max_conflict_retries: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/bingo_data".to_string(),
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            clear_on_start: false, // Production default: preserve data
            max_conflict_retries: 8,
        }
    }
}

/// Broadcast hub settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Outbound queue length per connection; events beyond it are dropped
    pub connection_queue_capacity: usize,
    pub heartbeat_interval_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            connection_queue_capacity: 256,
            heartbeat_interval_ms: 30_000,
        }
    }
}

/// HTTP/WebSocket surface
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "bingohall=info,tower_http=info".to_string(),
        }
    }
}

impl BingoConfig {
    /// Configuration for production deployment with persistence
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                write_buffer_size_mb: 128,
                target_file_size_mb: 128,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Millisecond timings and in-memory storage for tests
    pub fn testing() -> Self {
        Self {
            game: GameConfig {
                draw_interval_ms: 1,
                purchase_window_ms: 50,
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                enabled: false,
                cooldown_ms: 10,
                retry_delay_ms: 10,
                ..Default::default()
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                clear_on_start: true, // Testing mode: clear DB
                ..Default::default()
            },
            api: ApiConfig {
                enabled: false,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_filter: "bingohall=debug".to_string(),
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> BingoResult<()> {
        for (name, split) in [("prizes.standard", self.prizes.standard), ("prizes.special", self.prizes.special)] {
            if split.total() != 100 {
                return Err(invalid(name, split.total().to_string(), "percentages must sum to 100"));
            }
        }

        if self.game.card_price == 0 {
            return Err(invalid("game.card_price", "0".to_string(), "card price must be > 0"));
        }
        if self.game.special_card_price == 0 {
            return Err(invalid("game.special_card_price", "0".to_string(), "card price must be > 0"));
        }
        if self.game.jackpot_draw_threshold == 0 || self.game.jackpot_draw_threshold > 90 {
            return Err(invalid(
                "game.jackpot_draw_threshold",
                self.game.jackpot_draw_threshold.to_string(),
                "threshold must be within 1..=90",
            ));
        }
        if self.broadcast.connection_queue_capacity == 0 {
            return Err(invalid("broadcast.connection_queue_capacity", "0".to_string(), "capacity must be > 0"));
        }
        if self.storage.max_conflict_retries == 0 {
            return Err(invalid("storage.max_conflict_retries", "0".to_string(), "at least one attempt is required"));
        }
        if let Some(hour) = self.scheduler.special_hours_utc.iter().find(|h| **h > 23) {
            return Err(invalid("scheduler.special_hours_utc", hour.to_string(), "hours must be within 0..=23"));
        }
        if self.api.enabled && self.api.port == 0 {
            return Err(invalid("api.port", "0".to_string(), "API port cannot be zero when API is enabled"));
        }

        Ok(())
    }

    pub fn draw_interval(&self) -> Duration {
        Duration::from_millis(self.game.draw_interval_ms)
    }

    pub fn purchase_window(&self) -> Duration {
        Duration::from_millis(self.game.purchase_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.scheduler.cooldown_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.scheduler.retry_delay_ms)
    }

    pub fn card_price(&self, is_special: bool) -> u64 {
        if is_special {
            self.game.special_card_price
        } else {
            self.game.card_price
        }
    }
}

fn invalid(field: &str, value: String, reason: &str) -> crate::errors::BingoError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    }
    .into()
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> BingoResult<BingoConfig> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => BingoConfig::production(),
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> BingoResult<BingoConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        Self::parse(&content)
    }

    /// Parse a TOML document; missing sections fall back to defaults
    pub fn parse(content: &str) -> BingoResult<BingoConfig> {
        toml::from_str(content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(config: &mut BingoConfig) -> BingoResult<()> {
        if let Ok(dir) = env::var("BINGO_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Ok(host) = env::var("BINGO_API_HOST") {
            config.api.host = host;
        }
        if let Some(port) = parse_env::<u16>("BINGO_API_PORT")? {
            config.api.port = port;
        }
        if let Some(interval) = parse_env::<u64>("BINGO_DRAW_INTERVAL_MS")? {
            config.game.draw_interval_ms = interval;
        }
        if let Some(window) = parse_env::<u64>("BINGO_PURCHASE_WINDOW_MS")? {
            config.game.purchase_window_ms = window;
        }
        if let Some(price) = parse_env::<u64>("BINGO_CARD_PRICE")? {
            config.game.card_price = price;
        }
        if let Some(enabled) = parse_env::<bool>("BINGO_SCHEDULER_ENABLED")? {
            config.scheduler.enabled = enabled;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> BingoResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            ConfigurationError::InvalidValue {
                field: name.to_string(),
                value: raw,
                reason: "could not be parsed".to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BingoConfig::default().validate().is_ok());
        assert!(BingoConfig::production().validate().is_ok());
        assert!(BingoConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_split_must_sum_to_100() {
        let mut config = BingoConfig::default();
        config.prizes.standard.platform = 25;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jackpot_threshold_bounds() {
        let mut config = BingoConfig::default();
        config.game.jackpot_draw_threshold = 91;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ConfigLoader::parse(
            r#"
            [game]
            card_price = 250
            draw_interval_ms = 500

            [prizes.standard]
            bingo = 60
            quine = 20
            jackpot = 5
            platform = 15
            "#,
        )
        .unwrap();

        assert_eq!(config.game.card_price, 250);
        assert_eq!(config.draw_interval(), Duration::from_millis(500));
        assert_eq!(config.game.jackpot_draw_threshold, 40);
        assert_eq!(config.prizes.standard.bingo, 60);
        assert_eq!(config.prizes.special, PrizeConfig::default().special);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_card_price_by_kind() {
        let config = BingoConfig::default();
        assert_eq!(config.card_price(false), 100);
        assert_eq!(config.card_price(true), 200);
    }
}
