//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/tidepool/config.toml or
/// /etc/tidepool/config.toml.
/// Env overrides: TIDEPOOL_POOL, TIDEPOOL_DISCOVERY_PORT,
/// TIDEPOOL_TRANSPORT_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Pool name; discovery only pairs peers sharing it (default "tidepool").
    #[serde(default = "default_pool")]
    pub pool: String,
    /// Discovery UDP port (default 47471).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Mesh transport TCP port (default 47472).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
}

fn default_pool() -> String {
    "tidepool".to_string()
}
fn default_discovery_port() -> u16 {
    47471
}
fn default_transport_port() -> u16 {
    47472
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: default_pool(),
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_else(Config::default);
    if let Ok(s) = std::env::var("TIDEPOOL_POOL") {
        if !s.is_empty() {
            c.pool = s;
        }
    }
    if let Ok(s) = std::env::var("TIDEPOOL_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Ok(s) = std::env::var("TIDEPOOL_TRANSPORT_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.transport_port = p;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/tidepool/config.toml"));
    }
    out.push(PathBuf::from("/etc/tidepool/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
