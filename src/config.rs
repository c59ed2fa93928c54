// src/config.rs

use chrono::{FixedOffset, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

lazy_static! {
    // 24-hour wall-clock time, both fields zero-padded.
    static ref RUN_AT_RE: Regex =
        Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("valid time pattern");
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid RECONCILE_AT value '{value}': expected HH:MM (24-hour)")]
    InvalidRunAt { value: String },

    #[error("RECONCILE_UTC_OFFSET_MINUTES out of range: {minutes}")]
    OffsetOutOfRange { minutes: i32 },
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    3000
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_reconcile_at() -> String {
    "22:30".to_string()
}
fn default_utc_offset_minutes() -> i32 {
    330
}
fn default_keep_alive_interval_minutes() -> u64 {
    14
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    // Server configuration
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_environment")]
    pub environment: String,

    // Manual trigger authentication (required, no default)
    pub cron_secret: String,

    // Daily schedule, wall-clock time in the configured offset
    #[serde(default = "default_reconcile_at")]
    pub reconcile_at: String,
    #[serde(default = "default_utc_offset_minutes")]
    pub reconcile_utc_offset_minutes: i32,
    #[serde(default)]
    pub enable_test_job: bool,

    // Keep-alive self ping (production only, off unless a URL is set)
    #[serde(default)]
    pub keep_alive_url: Option<String>,
    #[serde(default = "default_keep_alive_interval_minutes")]
    pub keep_alive_interval_minutes: u64,

    // Optional JSON seed file for the user directory
    #[serde(default)]
    pub directory_file: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env::<AppConfig>()
    }

    pub fn run_at(&self) -> Result<NaiveTime, ConfigError> {
        parse_run_at(&self.reconcile_at)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.reconcile_utc_offset_minutes * 60).ok_or(
            ConfigError::OffsetOutOfRange {
                minutes: self.reconcile_utc_offset_minutes,
            },
        )
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

pub fn parse_run_at(value: &str) -> Result<NaiveTime, ConfigError> {
    let invalid = || ConfigError::InvalidRunAt {
        value: value.to_string(),
    };
    let caps = RUN_AT_RE.captures(value.trim()).ok_or_else(invalid)?;
    let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
    let minute: u32 = caps[2].parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_env(extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut vars = vec![("CRON_SECRET".to_string(), "test-secret".to_string())];
        for (key, value) in extra {
            vars.push((key.to_string(), value.to_string()));
        }
        vars
    }

    #[test]
    fn test_parse_run_at_accepts_24_hour_times() {
        assert_eq!(
            parse_run_at("22:30").expect("valid"),
            NaiveTime::from_hms_opt(22, 30, 0).expect("valid test time")
        );
        assert_eq!(
            parse_run_at("00:00").expect("valid"),
            NaiveTime::from_hms_opt(0, 0, 0).expect("valid test time")
        );
        assert_eq!(
            parse_run_at(" 09:05 ").expect("valid"),
            NaiveTime::from_hms_opt(9, 5, 0).expect("valid test time")
        );
    }

    #[test]
    fn test_parse_run_at_rejects_malformed_values() {
        for value in ["24:00", "7:30", "22:3", "2230", "aa:bb", "22:30:00", ""] {
            assert!(parse_run_at(value).is_err(), "accepted {value:?}");
        }
    }

    #[test]
    fn test_minimal_environment_gets_defaults() {
        let config: AppConfig = envy::from_iter(minimal_env(&[])).expect("minimal config");

        assert_eq!(config.server_addr(), "127.0.0.1:3000");
        assert_eq!(config.reconcile_at, "22:30");
        assert_eq!(config.reconcile_utc_offset_minutes, 330);
        assert!(!config.enable_test_job);
        assert_eq!(config.keep_alive_interval_minutes, 14);
        assert!(!config.is_production());
        assert_eq!(
            config.utc_offset().expect("offset"),
            FixedOffset::east_opt(330 * 60).expect("valid test offset")
        );
    }

    #[test]
    fn test_missing_cron_secret_is_an_error() {
        let result: Result<AppConfig, _> = envy::from_iter(Vec::<(String, String)>::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_offset_out_of_range_is_rejected() {
        let config: AppConfig = envy::from_iter(minimal_env(&[(
            "RECONCILE_UTC_OFFSET_MINUTES",
            "1500",
        )]))
        .expect("config parses");
        assert!(config.utc_offset().is_err());
    }
}
