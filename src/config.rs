use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::parse_users;
use crate::engine::EngineConfig;
use crate::limits::MIN_SLOT_GRANULARITY_MINUTES;

/// Server settings read from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Shared password, used when `users` is empty.
    pub password: String,
    /// Per-user passwords from `SLOTBOOK_USERS` (`name:password,...`).
    pub users: BTreeMap<String, String>,
    pub max_connections: usize,
    /// WAL appends since the last rewrite before the compactor runs.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("SLOTBOOK_{name}"));
        let defaults = EngineConfig::default();

        let tls_cert = var("TLS_CERT");
        let tls_key = var("TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        let users = match var("USERS") {
            None => BTreeMap::new(),
            Some(raw) => parse_users(&raw).ok_or_else(|| ConfigError::invalid("USERS", raw))?,
        };

        let slot_granularity = parse_or(&var, "SLOT_GRANULARITY_MINUTES", defaults.slot_granularity)?;
        if slot_granularity < MIN_SLOT_GRANULARITY_MINUTES {
            return Err(ConfigError::invalid(
                "SLOT_GRANULARITY_MINUTES",
                slot_granularity.to_string(),
            ));
        }
        let backoff_ms: u64 = parse_or(
            &var,
            "RETRY_BACKOFF_MS",
            u64::try_from(defaults.retry_backoff.as_millis()).unwrap_or(5),
        )?;

        Ok(Self {
            bind: var("BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&var, "PORT", 5433)?,
            data_dir: PathBuf::from(var("DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: var("PASSWORD").unwrap_or_else(|| "slotbook".into()),
            users,
            max_connections: parse_or(&var, "MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&var, "COMPACT_THRESHOLD", 1000)?,
            metrics_port: parse_opt(&var, "METRICS_PORT")?,
            tls_cert,
            tls_key,
            engine: EngineConfig {
                slot_granularity,
                commit_retries: parse_or(&var, "COMMIT_RETRIES", defaults.commit_retries)?,
                retry_backoff: Duration::from_millis(backoff_ms),
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }
}

fn parse_opt<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse() {
            Ok(v) => Ok(Some(v)),
            Err(_) => Err(ConfigError::invalid(name, raw)),
        },
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(var, name)?.unwrap_or(default))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { name: String, value: String },
    TlsPair,
}

impl ConfigError {
    fn invalid(name: &str, value: String) -> Self {
        ConfigError::Invalid {
            name: format!("SLOTBOOK_{name}"),
            value,
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { name, value } => {
                write!(f, "invalid value for {name}: {value:?}")
            }
            ConfigError::TlsPair => write!(
                f,
                "both SLOTBOOK_TLS_CERT and SLOTBOOK_TLS_KEY must be set, or neither"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
