//! Configuration loading from `.env` files.

use std::{env, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_LINK_BASE: &str = "https://nostter.com/";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bot API token. Only `serve` needs it.
    pub telegram_token: Option<String>,
    pub telegram_api_url: String,
    /// Relays every lookup is sent to, in order. A list written with spaces
    /// after the commas has to be quoted in the `.env` file.
    pub relays: Vec<String>,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    /// Enable Schnorr signature verification of relay events.
    pub verify_sig: bool,
    /// Accept `ws://` and loopback/private relay hints from references.
    pub allow_local_hints: bool,
    /// Upper bound on a single fan-out query.
    pub query_timeout: Duration,
    /// Maximum number of handlers running at once.
    pub max_in_flight: usize,
    /// Web client URL that `note1…` ids are appended to.
    pub link_base: String,
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let telegram_token = non_empty("TELEGRAM_BOT_TOKEN");
        let telegram_api_url =
            non_empty("TELEGRAM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let relays = csv_strings(env::var("RELAYS").unwrap_or_default());
        let tor_socks = non_empty("TOR_SOCKS");
        let verify_sig = env::var("VERIFY_SIG").unwrap_or_else(|_| "0".into()) == "1";
        let allow_local_hints = non_empty("ALLOW_LOCAL_HINTS").as_deref() == Some("1");
        let query_timeout_secs = number_or("QUERY_TIMEOUT_SECS", DEFAULT_QUERY_TIMEOUT_SECS)?;
        let max_in_flight = number_or("MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?;
        let link_base = non_empty("LINK_BASE").unwrap_or_else(|| DEFAULT_LINK_BASE.into());
        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Ok(Self {
            telegram_token,
            telegram_api_url,
            relays,
            tor_socks,
            verify_sig,
            allow_local_hints,
            query_timeout: Duration::from_secs(query_timeout_secs),
            max_in_flight,
            link_base,
            log_format,
        })
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a positive number, falling back to `default` when unset or invalid.
fn number_or<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = non_empty(var) else {
        return Ok(default);
    };
    match raw.parse::<T>() {
        Ok(v) if v == T::default() => bail!("{var} must be greater than zero"),
        Ok(v) => Ok(v),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
