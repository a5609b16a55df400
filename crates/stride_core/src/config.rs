//! Engine configuration.
//!
//! # Responsibility
//! - Define every tunable business constant in one serde-backed struct.
//! - Load it from TOML, falling back to defaults per field.
//!
//! # Invariants
//! - A config returned by [`EngineConfig::from_toml_str`] or
//!   [`EngineConfig::load`] has passed [`EngineConfig::validate`].

use crate::clock::CalendarOffset;
use crate::model::calendar::CallType;
use crate::recurrence::BiweeklyAnchor;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Invalid { field: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config TOML: {err}"),
            Self::Invalid { field, message } => write!(f, "invalid config `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub accountability: AccountabilityConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Upper bound on waiting for a write lock before failing.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Absolute directory for rolling log files; `None` disables file logs.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Non-cancelled bookings allowed per participant per Monday–Sunday week.
    #[serde(default = "default_weekly_booking_limit")]
    pub weekly_booking_limit: u32,
    #[serde(default = "default_slot_minutes")]
    pub discipline_slot_minutes: u32,
    #[serde(default = "default_slot_minutes")]
    pub mentorship_slot_minutes: u32,
    /// Minutes east of UTC of the calendar wall clock.
    #[serde(default)]
    pub calendar_utc_offset_minutes: i32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            weekly_booking_limit: default_weekly_booking_limit(),
            discipline_slot_minutes: default_slot_minutes(),
            mentorship_slot_minutes: default_slot_minutes(),
            calendar_utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountabilityConfig {
    #[serde(default = "default_max_missed")]
    pub default_max_missed: u32,
    /// Literal a participant must type to desert.
    #[serde(default = "default_desertion_confirmation")]
    pub desertion_confirmation: String,
    #[serde(default = "default_max_postpones")]
    pub max_postpones: u32,
    /// Days after `due_date` before a pending instance expires.
    #[serde(default)]
    pub task_expiry_grace_days: u32,
}

impl Default for AccountabilityConfig {
    fn default() -> Self {
        Self {
            default_max_missed: default_max_missed(),
            desertion_confirmation: default_desertion_confirmation(),
            max_postpones: default_max_postpones(),
            task_expiry_grace_days: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Minor currency units used when a mentor has no explicit rate.
    #[serde(default = "default_base_price")]
    pub default_base_price: i64,
    /// Lower bound on capacity so sparse calendars don't price at 2x.
    #[serde(default = "default_floor_capacity")]
    pub floor_capacity: f64,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    #[serde(default = "default_weeks_per_horizon")]
    pub weeks_per_horizon: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default_base_price: default_base_price(),
            floor_capacity: default_floor_capacity(),
            horizon_days: default_horizon_days(),
            weeks_per_horizon: default_weeks_per_horizon(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_solo_cycle_days")]
    pub solo_cycle_days: u32,
    /// First "on" week start for BIWEEKLY rules; unset means epoch weeks.
    #[serde(default)]
    pub biweekly_anchor: Option<NaiveDate>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            solo_cycle_days: default_solo_cycle_days(),
            biweekly_anchor: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("stride.sqlite3")
}
fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    crate::logging::default_log_level().to_string()
}
fn default_weekly_booking_limit() -> u32 {
    2
}
fn default_slot_minutes() -> u32 {
    60
}
fn default_max_missed() -> u32 {
    3
}
fn default_desertion_confirmation() -> String {
    "DESERT".to_string()
}
fn default_max_postpones() -> u32 {
    3
}
fn default_base_price() -> i64 {
    1_000
}
fn default_floor_capacity() -> f64 {
    1.0
}
fn default_horizon_days() -> u32 {
    30
}
fn default_weeks_per_horizon() -> f64 {
    4.2
}
fn default_solo_cycle_days() -> u32 {
    100
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, message: &str| {
            Err(ConfigError::Invalid {
                field,
                message: message.to_string(),
            })
        };
        if self.scheduling.weekly_booking_limit == 0 {
            return invalid("scheduling.weekly_booking_limit", "must be at least 1");
        }
        if self.scheduling.discipline_slot_minutes == 0 {
            return invalid("scheduling.discipline_slot_minutes", "must be at least 1");
        }
        if self.scheduling.mentorship_slot_minutes == 0 {
            return invalid("scheduling.mentorship_slot_minutes", "must be at least 1");
        }
        if self.scheduling.calendar_utc_offset_minutes.abs() >= 24 * 60 {
            return invalid(
                "scheduling.calendar_utc_offset_minutes",
                "must be within ±23:59",
            );
        }
        if self.accountability.default_max_missed == 0 {
            return invalid("accountability.default_max_missed", "must be at least 1");
        }
        if self.accountability.desertion_confirmation.trim().is_empty() {
            return invalid("accountability.desertion_confirmation", "must not be blank");
        }
        if self.pricing.default_base_price < 0 {
            return invalid("pricing.default_base_price", "must not be negative");
        }
        if self.pricing.floor_capacity.is_nan() || self.pricing.floor_capacity <= 0.0 {
            return invalid("pricing.floor_capacity", "must be positive");
        }
        if self.pricing.weeks_per_horizon.is_nan() || self.pricing.weeks_per_horizon <= 0.0 {
            return invalid("pricing.weeks_per_horizon", "must be positive");
        }
        if self.pricing.horizon_days == 0 {
            return invalid("pricing.horizon_days", "must be at least 1");
        }
        if self.cycle.solo_cycle_days == 0 {
            return invalid("cycle.solo_cycle_days", "must be at least 1");
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.database.lock_timeout_ms)
    }

    pub fn calendar_offset(&self) -> CalendarOffset {
        CalendarOffset::from_minutes(self.scheduling.calendar_utc_offset_minutes)
    }

    pub fn biweekly_anchor(&self) -> BiweeklyAnchor {
        self.cycle
            .biweekly_anchor
            .map_or(BiweeklyAnchor::UnixEpoch, BiweeklyAnchor::Date)
    }

    /// Slot length for one calendar.
    pub fn slot_minutes(&self, call_type: CallType) -> u32 {
        match call_type {
            CallType::Discipline => self.scheduling.discipline_slot_minutes,
            CallType::Mentorship => self.scheduling.mentorship_slot_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};
    use crate::model::calendar::CallType;
    use crate::recurrence::BiweeklyAnchor;
    use chrono::NaiveDate;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").expect("empty config should parse");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.scheduling.weekly_booking_limit, 2);
        assert_eq!(config.accountability.default_max_missed, 3);
        assert_eq!(config.pricing.horizon_days, 30);
        assert_eq!(config.cycle.solo_cycle_days, 100);
    }

    #[test]
    fn sections_override_individual_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
[scheduling]
mentorship_slot_minutes = 45

[pricing]
default_base_price = 2500
"#,
        )
        .expect("partial config should parse");
        assert_eq!(config.slot_minutes(CallType::Mentorship), 45);
        assert_eq!(config.slot_minutes(CallType::Discipline), 60);
        assert_eq!(config.pricing.default_base_price, 2500);
        assert_eq!(config.scheduling.weekly_booking_limit, 2);
    }

    #[test]
    fn biweekly_anchor_reads_iso_date() {
        let config = EngineConfig::from_toml_str("[cycle]\nbiweekly_anchor = \"2030-01-06\"\n")
            .expect("anchor date should parse");
        assert_eq!(
            config.biweekly_anchor(),
            BiweeklyAnchor::Date(NaiveDate::from_ymd_opt(2030, 1, 6).unwrap())
        );
        assert_eq!(
            EngineConfig::default().biweekly_anchor(),
            BiweeklyAnchor::UnixEpoch
        );
    }

    #[test]
    fn zero_slot_length_is_rejected() {
        let err = EngineConfig::from_toml_str("[scheduling]\ndiscipline_slot_minutes = 0\n")
            .expect_err("zero slot length must be rejected");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "scheduling.discipline_slot_minutes",
                ..
            }
        ));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stride.toml");
        std::fs::write(&path, "[accountability]\ndefault_max_missed = 5\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.accountability.default_max_missed, 5);
    }
}
