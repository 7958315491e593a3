use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DATABASE_PATH: &str = "dwitter.db";
pub const DEFAULT_BLOB_TIMEOUT_MS: u64 = 5000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} is not set")]
    Missing(&'static str),
}

/// Runtime configuration, read from the environment (and `.env` when present)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: String,
    pub blob: Option<BlobConfig>,
}

/// Where media blobs live. Absent when `BLOB_API_URL` is not set.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobConfig {
    pub api_url: String,
    pub public_prefix: String,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_path = lookup("DATABASE_PATH").unwrap_or_else(|| {
            log::info!("DATABASE_PATH not set, using default: {}", DEFAULT_DATABASE_PATH);
            DEFAULT_DATABASE_PATH.to_string()
        });

        let blob = match lookup("BLOB_API_URL") {
            Some(api_url) => {
                let public_prefix =
                    lookup("BLOB_PUBLIC_PREFIX").ok_or(ConfigError::Missing("BLOB_PUBLIC_PREFIX"))?;
                let timeout_ms: u64 =
                    parse_or("BLOB_TIMEOUT_MS", lookup("BLOB_TIMEOUT_MS"), DEFAULT_BLOB_TIMEOUT_MS)?;
                Some(BlobConfig {
                    api_url,
                    public_prefix,
                    timeout: Duration::from_millis(timeout_ms),
                })
            }
            None => {
                log::warn!("BLOB_API_URL not set, media blobs will not be released");
                None
            }
        };

        Ok(Self {
            database_path,
            blob,
        })
    }

    pub fn blob(&self) -> Result<&BlobConfig, ConfigError> {
        self.blob.as_ref().ok_or(ConfigError::Missing("BLOB_API_URL"))
    }
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => {
            log::info!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}
