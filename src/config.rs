use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Process configuration, read once at startup from `SALONBOOK_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub api_token: String,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            api_token: "salonbook".into(),
            metrics_port: None,
            compact_threshold: 1000,
        }
    }
}

fn parse<T: FromStr>(var: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| v.trim().parse().map_err(|_| ConfigError::Invalid { var, value: v }))
        .transpose()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            bind: lookup("SALONBOOK_BIND").unwrap_or(d.bind),
            port: parse("SALONBOOK_PORT", lookup("SALONBOOK_PORT"))?.unwrap_or(d.port),
            data_dir: lookup("SALONBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            api_token: lookup("SALONBOOK_API_TOKEN").unwrap_or(d.api_token),
            metrics_port: parse("SALONBOOK_METRICS_PORT", lookup("SALONBOOK_METRICS_PORT"))?,
            compact_threshold: parse("SALONBOOK_COMPACT_THRESHOLD", lookup("SALONBOOK_COMPACT_THRESHOLD"))?
                .unwrap_or(d.compact_threshold),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_port.map(|p| ([0, 0, 0, 0], p).into())
    }
}
