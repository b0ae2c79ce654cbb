use std::{env, str::FromStr, time::Duration};

use chrono::NaiveTime;
use chrono_tz::Tz;
use thiserror::Error;
use url::Url;

use crate::slots::OpeningHours;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ReminderConfig {
    pub interval: Duration,
    pub min_lead_minutes: i64,
    pub max_lead_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_port: u16,
    pub shop_timezone: Tz,
    pub shop_name: String,
    pub operator_email: Option<String>,
    pub smtp: Option<SmtpConfig>,
    pub reminder: ReminderConfig,
    pub retention_interval: Duration,
    pub opening_hours: OpeningHours,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub admin_session_ttl_hours: i64,
    pub uploads_dir: String,
    pub public_base_url: Option<Url>,
    pub max_upload_bytes: usize,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window: Duration,
}

/// Loads `.env` (if present) and reads the configuration from the environment.
pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    Config::from_env()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let smtp = match (env::var("EMAIL_USER").ok(), env::var("EMAIL_PASS").ok()) {
            (Some(username), Some(password)) => Some(SmtpConfig {
                host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
                port: parse_var("SMTP_PORT", 465)?,
                username,
                password,
            }),
            _ => None,
        };

        let reminder = ReminderConfig {
            interval: Duration::from_secs(parse_var("REMINDER_INTERVAL_SECS", 120)?),
            min_lead_minutes: parse_var("REMINDER_MIN_LEAD_MINUTES", 25)?,
            max_lead_minutes: parse_var("REMINDER_MAX_LEAD_MINUTES", 35)?,
        };

        let opening_hours = OpeningHours::new(
            parse_time("OPENING_FIRST_SLOT", "10:00")?,
            parse_time("OPENING_LAST_SLOT", "19:30")?,
            parse_var("SLOT_STEP_MINUTES", 30)?,
        )
        .map_err(ConfigError::Inconsistent)?;

        let public_base_url = match env::var("PUBLIC_BASE_URL") {
            Ok(raw) => Some(Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                key: "PUBLIC_BASE_URL",
                value: raw.clone(),
                reason: e.to_string(),
            })?),
            Err(_) => None,
        };

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://reservations.db".to_string()),
            http_port: parse_var("PORT", 3001)?,
            shop_timezone: parse_var("SHOP_TIMEZONE", chrono_tz::Europe::Vilnius)?,
            shop_name: env::var("SHOP_NAME").unwrap_or_else(|_| "Variklio Sala".to_string()),
            operator_email: non_empty_var("OPERATOR_EMAIL"),
            smtp,
            reminder,
            retention_interval: Duration::from_secs(parse_var("RETENTION_INTERVAL_SECS", 86_400)?),
            opening_hours,
            admin_username: non_empty_var("ADMIN_USERNAME"),
            admin_password: non_empty_var("ADMIN_PASSWORD"),
            admin_session_ttl_hours: parse_var("ADMIN_SESSION_TTL_HOURS", 24)?,
            uploads_dir: env::var("UPLOADS_DIR").unwrap_or_else(|_| "uploads".to_string()),
            public_base_url,
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            rate_limit_max_requests: parse_var("RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_window: Duration::from_secs(parse_var("RATE_LIMIT_WINDOW_SECS", 900)?),
        };
        config.reminder.validate()?;
        Ok(config)
    }
}

impl ReminderConfig {
    /// The lead-time window must be at least one poll wide, otherwise a
    /// reservation can slip between two consecutive polls.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_lead_minutes > self.max_lead_minutes {
            return Err(ConfigError::Inconsistent(format!(
                "reminder window is inverted: {} > {} minutes",
                self.min_lead_minutes, self.max_lead_minutes
            )));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "reminder interval must be positive".to_string(),
            ));
        }
        let width_secs = (self.max_lead_minutes - self.min_lead_minutes) as u64 * 60;
        if width_secs < self.interval.as_secs() {
            return Err(ConfigError::Inconsistent(format!(
                "reminder window ({width_secs}s) is narrower than the poll interval ({}s)",
                self.interval.as_secs()
            )));
        }
        Ok(())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_time(key: &'static str, default: &str) -> Result<NaiveTime, ConfigError> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder(interval_secs: u64, min: i64, max: i64) -> ReminderConfig {
        ReminderConfig {
            interval: Duration::from_secs(interval_secs),
            min_lead_minutes: min,
            max_lead_minutes: max,
        }
    }

    #[test]
    fn default_reminder_window_is_valid() {
        assert!(reminder(120, 25, 35).validate().is_ok());
    }

    #[test]
    fn inverted_window_is_rejected() {
        assert!(reminder(120, 35, 25).validate().is_err());
    }

    #[test]
    fn window_narrower_than_poll_is_rejected() {
        // 2 minute window polled every 5 minutes could miss reservations
        assert!(reminder(300, 29, 31).validate().is_err());
        assert!(reminder(120, 29, 31).validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(reminder(0, 25, 35).validate().is_err());
    }
}
