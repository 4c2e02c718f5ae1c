//! Configuration loading.
//!
//! The daemon is configured by an INI file with a `[GLOBAL]` and a
//! `[GOSSIP]` section. The file is named on the command line with `-c`, or
//! discovered: the `GOSSIP_CONFIG_PATH` environment variable names a search
//! root, then a fixed list of locations is probed, and as a last resort a
//! default config is seeded into `~/.gossip/config.ini` from the built-in
//! template. All config errors are fatal before any task is spawned.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment variable naming a directory to look for `config.ini` in.
pub const CONFIG_PATH_ENV: &str = "GOSSIP_CONFIG_PATH";

const CONFIG_FILE_NAME: &str = "config.ini";

const DEFAULT_CONFIG_TEMPLATE: &str = "\
[GLOBAL]
HOSTKEY = hostkey.pem

[GOSSIP]
cache_size = 50
max_connections = 30
bootstrapper =
listen_address = 127.0.0.1:6001
api_address = 127.0.0.1:7001
max_ttl = 10
";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file does not exist: {0}")]
    NotFound(PathBuf),
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing config key {section}.{key}")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },
    #[error("invalid value for {section}.{key}: {value:?}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

/// Parsed daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the host key file. The key is an opaque identifier owned by
    /// outer layers; the daemon never reads into it.
    pub host_key_path: PathBuf,
    /// Capacity of both message caches.
    pub cache_size: usize,
    /// Capacity of both connection pools.
    pub max_connections: usize,
    /// Single well-known peer dialed at startup, if any.
    pub bootstrapper: Option<SocketAddrV4>,
    /// P2P listening endpoint.
    pub listen_address: SocketAddrV4,
    /// API listening endpoint.
    pub api_address: SocketAddrV4,
    /// Hop budget stamped onto peer-update floods.
    pub max_ttl: u8,
}

impl Config {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse INI text into a config.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let values = parse_ini(text);
        Ok(Self {
            host_key_path: PathBuf::from(require(&values, "GLOBAL", "HOSTKEY")?),
            cache_size: require_parsed(&values, "GOSSIP", "cache_size")?,
            max_connections: require_parsed(&values, "GOSSIP", "max_connections")?,
            bootstrapper: optional_addr(&values, "GOSSIP", "bootstrapper")?,
            listen_address: require_parsed(&values, "GOSSIP", "listen_address")?,
            api_address: require_parsed(&values, "GOSSIP", "api_address")?,
            max_ttl: require_parsed(&values, "GOSSIP", "max_ttl")?,
        })
    }
}

/// Resolve the config file location. A path given on the command line wins
/// and must exist; otherwise the environment and the search path are
/// consulted, and a default config is seeded when nothing is found.
pub fn locate_config(cli_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = cli_path {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ConfigError::NotFound(path.to_path_buf()))
        };
    }

    let mut candidates = Vec::new();
    if let Ok(root) = std::env::var(CONFIG_PATH_ENV) {
        candidates.push(PathBuf::from(root).join(CONFIG_FILE_NAME));
    }
    candidates.push(PathBuf::from("config").join(CONFIG_FILE_NAME));
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".gossip").join(CONFIG_FILE_NAME));
        candidates.push(home.join(".config").join("gossip").join(CONFIG_FILE_NAME));
    }

    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }

    // Nothing found anywhere: seed a default config so the daemon can at
    // least come up with local-only settings.
    let preferred = dirs::home_dir()
        .map(|home| home.join(".gossip").join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    tracing::warn!(
        path = %preferred.display(),
        "no config file found in any search path, seeding the default template"
    );
    if let Some(parent) = preferred.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: preferred.clone(),
            source,
        })?;
    }
    std::fs::write(&preferred, DEFAULT_CONFIG_TEMPLATE).map_err(|source| ConfigError::Io {
        path: preferred.clone(),
        source,
    })?;
    Ok(preferred)
}

/// Minimal INI reader: `[SECTION]` headers, `key = value` pairs, `#`/`;`
/// comments. Keys are returned as `SECTION.key`.
fn parse_ini(text: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let mut section = String::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = header.trim().to_string();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(
                format!("{section}.{}", key.trim()),
                value.trim().to_string(),
            );
        }
    }
    values
}

fn require<'a>(
    values: &'a HashMap<String, String>,
    section: &'static str,
    key: &'static str,
) -> Result<&'a str, ConfigError> {
    values
        .get(&format!("{section}.{key}"))
        .map(String::as_str)
        .ok_or(ConfigError::MissingKey { section, key })
}

fn require_parsed<T: std::str::FromStr>(
    values: &HashMap<String, String>,
    section: &'static str,
    key: &'static str,
) -> Result<T, ConfigError> {
    let value = require(values, section, key)?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        section,
        key,
        value: value.to_string(),
    })
}

fn optional_addr(
    values: &HashMap<String, String>,
    section: &'static str,
    key: &'static str,
) -> Result<Option<SocketAddrV4>, ConfigError> {
    let value = require(values, section, key)?;
    if value.is_empty() {
        return Ok(None);
    }
    let addr: SocketAddrV4 = value.parse().map_err(|_| ConfigError::InvalidValue {
        section,
        key,
        value: value.to_string(),
    })?;
    if addr.port() == 0 {
        return Err(ConfigError::InvalidValue {
            section,
            key,
            value: value.to_string(),
        });
    }
    Ok(Some(addr))
}
