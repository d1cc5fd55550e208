use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::cache::DEFAULT_TTL;

const DEFAULT_BUCKET: &str = "tsinfo";
const DEFAULT_PREFIX: &str = "trade-data/";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TRADESCOUT_CACHE_TTL_SECS must be a whole number of seconds, got {0:?}")]
    InvalidTtl(String),

    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// Runtime settings read from the environment. CLI flags override them in `main`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub bucket: String,
    pub prefix: String,
    pub cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = get("TRADESCOUT_DATA_DIR")
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);

        let bucket = non_empty(&get, "TRADESCOUT_BUCKET")?.unwrap_or_else(|| DEFAULT_BUCKET.into());
        let prefix = get("TRADESCOUT_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.into());

        let cache_ttl = match get("TRADESCOUT_CACHE_TTL_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidTtl(raw))?,
            None => DEFAULT_TTL,
        };

        Ok(Self {
            data_dir,
            bucket,
            prefix,
            cache_ttl,
        })
    }
}

fn non_empty(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<String>, ConfigError> {
    match get(var) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::Empty { var }),
        other => Ok(other),
    }
}
