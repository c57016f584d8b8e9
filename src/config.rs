use std::env;

use thiserror::Error;

use crate::application::LedgerOptions;
use crate::domain::TransitionPolicy;

const DEFAULT_DATABASE: &str = "leave-tracker.db";
const DEFAULT_LOG_LEVEL: &str = "warn";

/// Top-level configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: String,
    pub ledger: LedgerOptions,
    pub notifications: NotificationConfig,
    pub telemetry: TelemetryConfig,
}

/// Who hears about leave events besides the requester.
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    pub admin_emails: Vec<String>,
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database = lookup("LEAVE_TRACKER_DATABASE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let log_level =
            lookup("LEAVE_TRACKER_LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let admin_emails = lookup("LEAVE_TRACKER_ADMIN_EMAILS")
            .map(|v| parse_email_list(&v))
            .unwrap_or_default();

        let policy = match lookup("LEAVE_TRACKER_TRANSITION_POLICY") {
            Some(value) => TransitionPolicy::from_str(&value)
                .ok_or(ConfigError::InvalidTransitionPolicy(value))?,
            None => TransitionPolicy::default(),
        };

        let enforce_allowance = match lookup("LEAVE_TRACKER_ENFORCE_ALLOWANCE") {
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidFlag {
                key: "LEAVE_TRACKER_ENFORCE_ALLOWANCE",
                value,
            })?,
            None => false,
        };

        Ok(Self {
            database,
            ledger: LedgerOptions {
                policy,
                enforce_allowance,
            },
            notifications: NotificationConfig { admin_emails },
            telemetry: TelemetryConfig { log_level },
        })
    }
}

fn parse_email_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("LEAVE_TRACKER_TRANSITION_POLICY must be 'permissive' or 'strict', got '{0}'")]
    InvalidTransitionPolicy(String),

    #[error("{key} must be a boolean, got '{value}'")]
    InvalidFlag { key: &'static str, value: String },
}
