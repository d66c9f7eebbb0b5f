//! Ledger configuration.
//!
//! Loaded once from TOML and handed to [`Ledger`](crate::Ledger) as a value.
//! Operations read it per call; nothing here is global.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::Amount;
use crate::amount::Percentage;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Target used when a driver has no override (or a zero override).
    pub global_daily_target: Amount,
    /// Driver payout share used when a driver has no override.
    pub global_fare_percentage: Percentage,
    pub operating_hours: OperatingHours,
    pub bonus: BonusConfig,
    pub payout_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            global_daily_target: Amount::from_major(3000),
            global_fare_percentage: Percentage::clamped(50),
            operating_hours: OperatingHours::default(),
            bonus: BonusConfig::default(),
            payout_timeout_ms: 10_000,
        }
    }
}

impl LedgerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(raw)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if !self.global_daily_target.is_positive() {
            return Err(ConfigError::Invalid(format!(
                "global_daily_target must be positive, got {}",
                self.global_daily_target
            )));
        }
        if self.bonus.enabled && !self.bonus.amount.is_positive() {
            return Err(ConfigError::Invalid(
                "bonus.amount must be positive when bonus is enabled".into(),
            ));
        }
        if self.payout_timeout_ms == 0 {
            return Err(ConfigError::Invalid("payout_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn payout_timeout(&self) -> Duration {
        Duration::from_millis(self.payout_timeout_ms)
    }
}

/// Daily window during which the target reset may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct OperatingHours {
    #[serde(deserialize_with = "clock_time")]
    pub start: NaiveTime,
    #[serde(deserialize_with = "clock_time")]
    pub end: NaiveTime,
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::MIN,
        }
    }
}

impl OperatingHours {
    /// A window whose end is before its start spans midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct BonusConfig {
    pub enabled: bool,
    pub amount: Amount,
}

/// Accepts `HH:MM` or `HH:MM:SS`.
fn clock_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M"))
        .map_err(|_| serde::de::Error::custom(format!("invalid time of day '{raw}'")))
}
