//! Configuration loading and state folder resolution
//!
//! Resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority, applied by the binary)
//! 2. Environment variable (`ETFSCOUT_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Extraction and scoring logic never read configuration directly; all
//! knobs are resolved here and passed in explicitly.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Pipeline configuration
///
/// Every field has a compiled default so a bare run works without any
/// config file. TOML fields are all optional for the same reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Identifiers per checkpoint batch
    pub batch_size: usize,
    /// Concurrent fetch+extract workers per batch
    pub worker_count: usize,
    /// Transient-failure retries per identifier
    pub max_retries: u32,
    /// Lower bound of the randomized inter-attempt delay (milliseconds)
    pub min_delay_ms: u64,
    /// Upper bound of the randomized inter-attempt delay (milliseconds)
    pub max_delay_ms: u64,
    /// Minimum interval between requests to the source, shared by all
    /// workers (milliseconds)
    pub rate_limit_ms: u64,
    /// Per-request fetch timeout (seconds)
    pub fetch_timeout_secs: u64,
    /// User-Agent header sent with each fetch
    pub user_agent: String,
    /// Directory holding checkpoints and the run manifest
    pub state_dir: Option<PathBuf>,
    /// Directory receiving consolidated export artifacts
    pub output_dir: Option<PathBuf>,
    /// Optional deny-list file (one token per line, `#` comments)
    pub denylist_path: Option<PathBuf>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            worker_count: 4,
            max_retries: 3,
            min_delay_ms: 500,
            max_delay_ms: 2500,
            rate_limit_ms: 1000,
            fetch_timeout_secs: 15,
            user_agent: concat!("etfscout/", env!("CARGO_PKG_VERSION")).to_string(),
            state_dir: None,
            output_dir: None,
            denylist_path: None,
        }
    }
}

impl ScrapeConfig {
    /// Load configuration from an optional TOML file, then apply
    /// environment-variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("read {}: {}", p.display(), e)))?;
                let cfg: ScrapeConfig = toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("parse {}: {}", p.display(), e)))?;
                info!(path = %p.display(), "Configuration loaded from TOML");
                cfg
            }
            None => {
                let default_path = default_config_path();
                if let Some(p) = default_path.filter(|p| p.exists()) {
                    let content = std::fs::read_to_string(&p)
                        .map_err(|e| Error::Config(format!("read {}: {}", p.display(), e)))?;
                    let cfg: ScrapeConfig = toml::from_str(&content)
                        .map_err(|e| Error::Config(format!("parse {}: {}", p.display(), e)))?;
                    info!(path = %p.display(), "Configuration loaded from default TOML");
                    cfg
                } else {
                    ScrapeConfig::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `ETFSCOUT_*` environment overrides on top of file values
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("ETFSCOUT_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = env_parse::<usize>("ETFSCOUT_WORKER_COUNT") {
            self.worker_count = v;
        }
        if let Some(v) = env_parse::<u32>("ETFSCOUT_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("ETFSCOUT_RATE_LIMIT_MS") {
            self.rate_limit_ms = v;
        }
        if let Ok(v) = std::env::var("ETFSCOUT_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ETFSCOUT_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(v));
        }
    }

    /// Reject configurations that cannot produce a correct run
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(Error::Config(format!(
                "min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    /// State directory holding checkpoints and the run manifest,
    /// created if missing.
    pub fn resolve_state_dir(&self) -> Result<PathBuf> {
        let dir = match &self.state_dir {
            Some(d) => d.clone(),
            None => default_state_dir(),
        };
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            info!(dir = %dir.display(), "Created state directory");
        }
        Ok(dir)
    }

    /// Output directory for export artifacts, created if missing
    pub fn resolve_output_dir(&self) -> Result<PathBuf> {
        let dir = match &self.output_dir {
            Some(d) => d.clone(),
            None => PathBuf::from("."),
        };
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(var = name, value = %raw, "Ignoring unparseable environment override");
                None
            }
        },
        Err(_) => None,
    }
}

/// Default configuration file path for the platform
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("etfscout").join("config.toml"))
}

/// OS-dependent default state folder path
fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("etfscout"))
        .unwrap_or_else(|| PathBuf::from("./etfscout_state"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScrapeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = ScrapeConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_delay_bounds_rejected() {
        let config = ScrapeConfig {
            min_delay_ms: 3000,
            max_delay_ms: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ScrapeConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: ScrapeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.batch_size, config.batch_size);
        assert_eq!(parsed.user_agent, config.user_agent);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: ScrapeConfig = toml::from_str("batch_size = 10").unwrap();
        assert_eq!(parsed.batch_size, 10);
        assert_eq!(parsed.worker_count, 4);
    }
}
