//! Runtime configuration
//!
//! Values come from the process environment (after an optional `.env` file is
//! loaded by the binary) and can be overridden by command-line flags.

use std::env;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Bucket the configuration page uploads logos to
pub const DEFAULT_LOGO_BUCKET: &str = "public-logos";
const DEFAULT_BIND: &str = "127.0.0.1:3000";
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the hosted backend (no trailing slash)
    pub backend_url: String,

    /// Public (anon) API key sent with every backend request
    pub anon_key: String,

    /// Address the HTTP server listens on
    pub bind: SocketAddr,

    /// Externally visible URL, used to build the magic-link redirect
    pub site_url: String,

    /// Storage bucket for uploaded logos
    pub logo_bucket: String,

    /// Directory served under `/static`
    pub static_dir: PathBuf,

    /// Largest accepted request body (spreadsheets and logos)
    pub max_upload_bytes: usize,

    /// Mark cookies `Secure` (enable behind HTTPS)
    pub secure_cookies: bool,

    /// Timeout applied to each backend request
    pub http_timeout: Duration,
}

/// Values given on the command line; `None` keeps the environment value
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub site_url: Option<String>,
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Build the configuration from the process environment
    pub fn from_env(overrides: Overrides) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok(), overrides)
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F, overrides: Overrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = non_empty("SUPABASE_URL")
            .or_else(|| non_empty("REACT_APP_SUPABASE_URL"))
            .ok_or(ConfigError::Missing("SUPABASE_URL"))?
            .trim_end_matches('/')
            .to_string();

        let anon_key = non_empty("SUPABASE_ANON_KEY")
            .or_else(|| non_empty("REACT_APP_SUPABASE_ANON_KEY"))
            .ok_or(ConfigError::Missing("SUPABASE_ANON_KEY"))?;

        let bind = match overrides.bind {
            Some(bind) => bind,
            None => parse_setting(
                "HORARIOS_BIND",
                non_empty("HORARIOS_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            )?,
        };

        let site_url = overrides
            .site_url
            .or_else(|| non_empty("HORARIOS_SITE_URL"))
            .unwrap_or_else(|| format!("http://{}", bind))
            .trim_end_matches('/')
            .to_string();

        let logo_bucket =
            non_empty("HORARIOS_LOGO_BUCKET").unwrap_or_else(|| DEFAULT_LOGO_BUCKET.to_string());

        let static_dir = overrides
            .static_dir
            .or_else(|| non_empty("HORARIOS_STATIC_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR));

        let max_upload_bytes = match non_empty("HORARIOS_MAX_UPLOAD_BYTES") {
            Some(value) => parse_setting("HORARIOS_MAX_UPLOAD_BYTES", value)?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let secure_cookies = match non_empty("HORARIOS_SECURE_COOKIES") {
            Some(value) => parse_flag("HORARIOS_SECURE_COOKIES", value)?,
            None => false,
        };

        let timeout_secs = match non_empty("HORARIOS_HTTP_TIMEOUT_SECS") {
            Some(value) => parse_setting("HORARIOS_HTTP_TIMEOUT_SECS", value)?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Config {
            backend_url,
            anon_key,
            bind,
            site_url,
            logo_bucket,
            static_dir,
            max_upload_bytes,
            secure_cookies,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Public URL of an object stored in a public bucket
    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.backend_url, bucket, path
        )
    }

    /// Where the emailed sign-in link sends the visitor back to
    pub fn auth_redirect_url(&self) -> String {
        format!("{}/auth/confirm", self.site_url)
    }
}

/// Load an env file into the process environment
///
/// A missing file is fine, since settings may come from the environment
/// itself. Unreadable or malformed files are errors.
pub fn load_env_file(path: &Path) -> Result<(), dotenvy::Error> {
    match dotenvy::from_path(path) {
        Err(dotenvy::Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn parse_setting<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn parse_flag(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
impl Config {
    /// Configuration pointing at a backend that is never contacted
    pub(crate) fn for_tests() -> Self {
        Config {
            backend_url: "https://backend.test".to_string(),
            anon_key: "anon-key".to_string(),
            bind: DEFAULT_BIND.parse().expect("valid default bind"),
            site_url: "http://localhost:3000".to_string(),
            logo_bucket: DEFAULT_LOGO_BUCKET.to_string(),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            secure_cookies: false,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}
