use crate::aggregate::SeriesMode;
use crate::history::HistoryWindow;
use std::{env, time::Duration};
use thiserror::Error;
use url::Url;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_API_VERSION: &str = "v20.0";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    /// Base URL for the authorize, token and revoke endpoints.
    pub login_server: Url,
    pub port: u16,
    pub history_window: HistoryWindow,
    pub series_mode: SeriesMode,
    pub api_version: String,
    pub upstream_timeout: Duration,
    pub session_ttl: Duration,
    /// Scheme used when building the OAuth callback URL from the request host.
    pub callback_scheme: String,
    /// Render error details into the callback failure page. Development only.
    pub debug_errors: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));

        let client_id = required("CLIENT_ID")?;
        let client_secret = required("CLIENT_SECRET")?;
        let login_server = Url::parse(required("LOGIN_SERVER")?.trim_end_matches('/')).map_err(
            |err| ConfigError::Invalid {
                key: "LOGIN_SERVER",
                message: err.to_string(),
            },
        )?;
        if !matches!(login_server.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "LOGIN_SERVER",
                message: "expected an http(s) URL".to_string(),
            });
        }

        let port = parse_or("PORT", var("PORT"), DEFAULT_PORT)?;
        let history_window = parse_or("HISTORY_WINDOW", var("HISTORY_WINDOW"), HistoryWindow::default())?;
        let series_mode = parse_or("SERIES_MODE", var("SERIES_MODE"), SeriesMode::PerAuthor)?;
        let timeout_secs = parse_or("UPSTREAM_TIMEOUT_SECS", var("UPSTREAM_TIMEOUT_SECS"), DEFAULT_TIMEOUT_SECS)?;
        let ttl_secs = parse_or("SESSION_TTL_SECS", var("SESSION_TTL_SECS"), DEFAULT_SESSION_TTL_SECS)?;
        let debug_errors = parse_or("DEBUG_ERRORS", var("DEBUG_ERRORS"), false)?;

        let callback_scheme = var("CALLBACK_SCHEME").unwrap_or_else(|| "https".to_string());
        if callback_scheme != "https" && callback_scheme != "http" {
            return Err(ConfigError::Invalid {
                key: "CALLBACK_SCHEME",
                message: format!("expected 'http' or 'https', got '{callback_scheme}'"),
            });
        }

        Ok(Self {
            client_id,
            client_secret,
            login_server,
            port,
            history_window,
            series_mode,
            api_version: var("API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            upstream_timeout: Duration::from_secs(timeout_secs),
            session_ttl: Duration::from_secs(ttl_secs),
            callback_scheme,
            debug_errors,
        })
    }

    pub fn secure_cookies(&self) -> bool {
        self.callback_scheme == "https"
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            message: err.to_string(),
        }),
    }
}
