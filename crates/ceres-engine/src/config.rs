//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CERES_DB_PATH=/var/lib/ceres/ceres.db                              │
//! │     CERES_MAX_PAYMENT_METHODS=1                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/ceres/ceres.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.ceres.engine/ceres.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "./ceres.db"
//! max_connections = 5
//!
//! [sales]
//! max_payment_methods = 2
//! require_items_for_direct_sale = true
//! max_final_discount_percent = "10"
//!
//! [events]
//! channel_capacity = 256
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use ceres_core::MAX_PAYMENT_METHODS;
use ceres_db::DbConfig;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./ceres.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Sale policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesSettings {
    /// Distinct payment methods a sale may be split across (1 or 2).
    #[serde(default = "default_max_payment_methods")]
    pub max_payment_methods: usize,

    /// Reject direct sales without line items.
    #[serde(default = "default_true")]
    pub require_items_for_direct_sale: bool,

    /// Upper bound for the whole-order discount.
    #[serde(default = "default_max_final_discount")]
    pub max_final_discount_percent: Decimal,
}

fn default_max_payment_methods() -> usize {
    MAX_PAYMENT_METHODS
}

fn default_true() -> bool {
    true
}

fn default_max_final_discount() -> Decimal {
    Decimal::ONE_HUNDRED
}

impl Default for SalesSettings {
    fn default() -> Self {
        SalesSettings {
            max_payment_methods: default_max_payment_methods(),
            require_items_for_direct_sale: default_true(),
            max_final_discount_percent: default_max_final_discount(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Buffer size of the event channel handed out by `ChannelSink`.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for EventSettings {
    fn default() -> Self {
        EventSettings {
            channel_capacity: default_channel_capacity(),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sales: SalesSettings,

    #[serde(default)]
    pub events: EventSettings,
}

impl EngineConfig {
    /// Loads defaults, then the TOML file (if present), then `CERES_*`
    /// environment overrides, then validates.
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Same as [`load`](Self::load) but falls back to defaults on any error.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_toml(contents: &str) -> EngineResult<Self> {
        toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> EngineResult<()> {
        let methods = self.sales.max_payment_methods;
        if methods == 0 || methods > MAX_PAYMENT_METHODS {
            return Err(EngineError::Config(format!(
                "max_payment_methods must be between 1 and {MAX_PAYMENT_METHODS}, got {methods}"
            )));
        }

        let discount = self.sales.max_final_discount_percent;
        if discount < Decimal::ZERO || discount > Decimal::ONE_HUNDRED {
            return Err(EngineError::Config(format!(
                "max_final_discount_percent must be between 0 and 100, got {discount}"
            )));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(EngineError::Config(
                "events.channel_capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CERES_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(value) = std::env::var("CERES_DB_MAX_CONNECTIONS") {
            match value.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %value, "Ignoring invalid CERES_DB_MAX_CONNECTIONS"),
            }
        }

        if let Ok(value) = std::env::var("CERES_MAX_PAYMENT_METHODS") {
            match value.parse::<usize>() {
                Ok(n) => self.sales.max_payment_methods = n,
                Err(_) => warn!(value = %value, "Ignoring invalid CERES_MAX_PAYMENT_METHODS"),
            }
        }

        if let Ok(value) = std::env::var("CERES_REQUIRE_ITEMS_FOR_DIRECT_SALE") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.sales.require_items_for_direct_sale = true,
                "0" | "false" | "no" => self.sales.require_items_for_direct_sale = false,
                _ => warn!(value = %value, "Ignoring invalid CERES_REQUIRE_ITEMS_FOR_DIRECT_SALE"),
            }
        }

        if let Ok(value) = std::env::var("CERES_MAX_FINAL_DISCOUNT_PERCENT") {
            match Decimal::from_str(&value) {
                Ok(d) => self.sales.max_final_discount_percent = d,
                Err(_) => warn!(value = %value, "Ignoring invalid CERES_MAX_FINAL_DISCOUNT_PERCENT"),
            }
        }

        if let Ok(value) = std::env::var("CERES_EVENT_CHANNEL_CAPACITY") {
            if let Ok(n) = value.parse::<usize>() {
                self.events.channel_capacity = n;
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ceres", "engine")
            .map(|dirs| dirs.config_dir().join("ceres.toml"))
    }

    /// Database configuration derived from the `[database]` section.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }
}
