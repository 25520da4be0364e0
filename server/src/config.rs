//! Server configuration from the process environment.
//!
//! DESIGN
//! ======
//! Every setting has a default so a bare `cargo run` talks to a backend on
//! `localhost:5000`. Values that are present but unparseable are rejected at
//! startup rather than silently replaced, except boolean flags, which fall
//! back to their default.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TOKEN_COOKIE_DAYS: i64 = 7;
/// Accepted cookie lifetimes. Zero or negative would issue cookies that are
/// already expired.
const TOKEN_COOKIE_DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=3650;
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("BACKEND_URL must be an http(s) URL, got {0:?}")]
    BackendUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Backend host without the `/api` prefix or a trailing slash.
    pub backend_url: String,
    pub port: u16,
    /// Built page assets served for everything the router does not handle.
    pub static_dir: PathBuf,
    pub cookie_secure: bool,
    pub token_cookie_days: i64,
    pub backend_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_owned(),
            port: DEFAULT_PORT,
            static_dir: default_static_dir(),
            cookie_secure: true,
            token_cookie_days: DEFAULT_TOKEN_COOKIE_DAYS,
            backend_timeout: Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a malformed numeric value or backend URL,
    /// or a `TOKEN_COOKIE_DAYS` outside `1..=3650`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// As [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend_url = match lookup("BACKEND_URL") {
            Some(raw) => normalize_backend_url(&raw)?,
            None => defaults.backend_url,
        };
        let backend_timeout_secs = parse_or(&lookup, "BACKEND_TIMEOUT_SECS", DEFAULT_BACKEND_TIMEOUT_SECS)?;
        let token_cookie_days = parse_or(&lookup, "TOKEN_COOKIE_DAYS", defaults.token_cookie_days)?;
        if !TOKEN_COOKIE_DAYS_RANGE.contains(&token_cookie_days) {
            return Err(ConfigError::Invalid { key: "TOKEN_COOKIE_DAYS", value: token_cookie_days.to_string() });
        }

        Ok(Self {
            backend_url,
            port: parse_or(&lookup, "PORT", defaults.port)?,
            static_dir: lookup("STATIC_DIR").map_or(defaults.static_dir, PathBuf::from),
            cookie_secure: lookup("COOKIE_SECURE").as_deref().and_then(parse_bool).unwrap_or(defaults.cookie_secure),
            token_cookie_days,
            backend_timeout: Duration::from_secs(backend_timeout_secs),
        })
    }
}

fn default_static_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../public")
}

fn normalize_backend_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_owned())
    } else {
        Err(ConfigError::BackendUrl(raw.to_owned()))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
