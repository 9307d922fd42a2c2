use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_JWT_SECRET: &str = "mediintake-dev-secret";

/// One hour up to one year.
const JWT_TTL_HOURS_RANGE: RangeInclusive<i64> = 1..=8760;
const DATABASE_POOL_SIZE_RANGE: RangeInclusive<u32> = 1..=1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{key} must be within {min}..={max}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: String,
        min: String,
        max: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Unset selects the in-memory store.
    pub database_url: Option<String>,
    pub database_pool_size: u32,
    pub admin_username: String,
    pub admin_password: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub conversation_service_url: String,
    pub voice_session_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            host: text("HOST", "127.0.0.1"),
            port: parse(&lookup, "PORT", 8080)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_pool_size: parse_in(&lookup, "DATABASE_POOL_SIZE", 10, DATABASE_POOL_SIZE_RANGE)?,
            admin_username: text("ADMIN_USERNAME", DEFAULT_ADMIN_USERNAME),
            admin_password: text("ADMIN_PASSWORD", DEFAULT_ADMIN_PASSWORD),
            jwt_secret: text("JWT_SECRET", DEFAULT_JWT_SECRET),
            jwt_ttl_hours: parse_in(&lookup, "JWT_TTL_HOURS", 24, JWT_TTL_HOURS_RANGE)?,
            conversation_service_url: text("CONVERSATION_SERVICE_URL", "http://localhost:5000")
                .trim_end_matches('/')
                .to_string(),
            voice_session_ttl: Duration::from_secs(parse(&lookup, "VOICE_SESSION_TTL_SECS", 1800)?),
        })
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }

    pub fn uses_default_admin(&self) -> bool {
        self.admin_username == DEFAULT_ADMIN_USERNAME && self.admin_password == DEFAULT_ADMIN_PASSWORD
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_in<F, T>(lookup: &F, key: &'static str, default: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Display,
{
    let value = parse(lookup, key, default)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value: value.to_string(),
            min: range.start().to_string(),
            max: range.end().to_string(),
        })
    }
}
