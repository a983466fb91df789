use figment::{providers::Env, Figment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_SCHEMA_PATH: &str = "schema/schema.json";
const DEFAULT_MAX_PAGE_LIMIT: u64 = 100;
const DEFAULT_DATASTORE_TIMEOUT_SECS: u64 = 30;

/// Environment variables the service reads.
const ENV_KEYS: [&str; 7] = [
    "BIND_ADDR",
    "SCHEMA_PATH",
    "DATASTORE_URL",
    "DATASTORE_TIMEOUT_SECS",
    "MAX_PAGE_LIMIT",
    "STRICT_BOOLEANS",
    "SORT_VALIDATION",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("{key} has an invalid value \"{value}\": {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Env values arrive pre-parsed (`5` as a number, `true` as a bool); they are
/// read back as text so every key gets the same validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Flag(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    fn into_text(self) -> String {
        match self {
            RawValue::Flag(b) => b.to_string(),
            RawValue::Int(n) => n.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Text(s) => s,
        }
    }
}

/// Layered settings before validation; keys are the lowercased env names.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    bind_addr: Option<RawValue>,
    schema_path: Option<RawValue>,
    datastore_url: Option<RawValue>,
    datastore_timeout_secs: Option<RawValue>,
    max_page_limit: Option<RawValue>,
    strict_booleans: Option<RawValue>,
    sort_validation: Option<RawValue>,
}

/// Service settings, read from the environment (and `.env` via dotenv).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub schema_path: PathBuf,
    /// Without a data store only the planning endpoints can answer.
    pub datastore_url: Option<String>,
    pub datastore_timeout: Duration,
    pub max_page_limit: u64,
    pub strict_booleans: bool,
    pub strict_sort: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            datastore_url: None,
            datastore_timeout: Duration::from_secs(DEFAULT_DATASTORE_TIMEOUT_SECS),
            max_page_limit: DEFAULT_MAX_PAGE_LIMIT,
            strict_booleans: false,
            strict_sort: false,
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason,
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected true or false")),
    }
}

/// Blank values count as unset.
fn text(value: Option<RawValue>) -> Option<String> {
    value
        .map(|v| v.into_text().trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_figment(Figment::new().merge(Env::raw().only(&ENV_KEYS)))
    }

    /// Validates whatever the providers supplied; unset keys keep their defaults.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let raw: RawConfig = figment.extract()?;
        let mut config = Config::default();

        let bind = text(raw.bind_addr).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        config.bind_addr = bind
            .parse()
            .map_err(|_| invalid("BIND_ADDR", &bind, "expected host:port"))?;

        if let Some(path) = text(raw.schema_path) {
            config.schema_path = PathBuf::from(path);
        }

        if let Some(url) = text(raw.datastore_url) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("DATASTORE_URL", &url, "expected an http(s) URL"));
            }
            config.datastore_url = Some(url);
        }

        if let Some(raw) = text(raw.datastore_timeout_secs) {
            let secs: u64 = raw
                .parse()
                .map_err(|_| invalid("DATASTORE_TIMEOUT_SECS", &raw, "expected whole seconds"))?;
            config.datastore_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = text(raw.max_page_limit) {
            config.max_page_limit = match raw.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("MAX_PAGE_LIMIT", &raw, "expected a positive integer")),
            };
        }

        if let Some(raw) = text(raw.strict_booleans) {
            config.strict_booleans = parse_flag("STRICT_BOOLEANS", &raw)?;
        }

        if let Some(raw) = text(raw.sort_validation) {
            config.strict_sort = match raw.to_ascii_lowercase().as_str() {
                "strict" => true,
                "off" | "none" => false,
                _ => return Err(invalid("SORT_VALIDATION", &raw, "expected strict or off")),
            };
        }

        Ok(config)
    }
}
