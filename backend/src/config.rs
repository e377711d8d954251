use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::imaging::acquirer::DEFAULT_MAX_IMAGE_BYTES;
use crate::inference::backends::{ChartInstructConfig, UniChartConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid backend configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Runtime settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub daily_limit: u32,
    pub max_image_bytes: usize,
    pub fetch_timeout: Duration,
    pub backends_config: PathBuf,
    pub supabase_url: String,
    pub supabase_key: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let daily_limit: u32 = parse_or(&lookup, "DAILY_LIMIT", 50)?;
        if daily_limit == 0 {
            return Err(ConfigError::Invalid {
                name: "DAILY_LIMIT",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            bind_host: lookup("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8081)?,
            jwt_secret: required("JWT_SECRET")?,
            token_ttl_minutes: parse_or(&lookup, "TOKEN_TTL_MINUTES", 30)?,
            daily_limit,
            max_image_bytes: parse_or(&lookup, "MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES)?,
            fetch_timeout: Duration::from_secs(parse_or(&lookup, "FETCH_TIMEOUT_SECS", 30)?),
            backends_config: lookup("BACKENDS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/backends.yaml")),
            supabase_url: required("SUPABASE_URL")?,
            supabase_key: required("SUPABASE_KEY")?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// Model settings for both backends, read from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendsConfig {
    pub chartinstruct: ChartInstructConfig,
    pub unichart: UniChartConfig,
}

impl BackendsConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: BackendsConfig = serde_yaml::from_str(&config_str)?;

        // Relative model paths are taken relative to the YAML file.
        if let Some(base) = path.parent() {
            for file in [
                &mut config.chartinstruct.model_path,
                &mut config.chartinstruct.tokenizer_path,
                &mut config.unichart.model_path,
                &mut config.unichart.tokenizer_path,
            ] {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        Ok(config)
    }
}
