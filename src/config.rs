//! Configuration management for GalleryStore
//!
//! Supports configuration via:
//! - Environment variables (primary)
//! - Optional TOML config file (secondary)
//!
//! Environment variables take precedence over config file values.
//! Provider credentials do NOT live here; they are records in the
//! provider configuration store, editable at runtime.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Max request body size in bytes (default: 100MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

/// Data file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Provider configuration store (default: data/providers.json)
    #[serde(default = "default_provider_store")]
    pub provider_store: PathBuf,

    /// Gallery content snapshot (default: data/gallery.json)
    #[serde(default = "default_gallery_snapshot")]
    pub gallery_snapshot: PathBuf,
}

fn default_bind_address() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_size() -> usize {
    100 * 1024 * 1024 // 100MB, bounds original uploads
}

fn default_provider_store() -> PathBuf {
    PathBuf::from("data/providers.json")
}

fn default_gallery_snapshot() -> PathBuf {
    PathBuf::from("data/gallery.json")
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    /// Data file locations
    #[serde(default = "default_paths")]
    pub paths: PathsConfig,

    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server() -> ServerConfig {
    ServerConfig {
        bind_address: default_bind_address(),
        timeout_secs: default_timeout_secs(),
        max_body_size: default_max_body_size(),
    }
}

fn default_paths() -> PathsConfig {
    PathsConfig {
        provider_store: default_provider_store(),
        gallery_snapshot: default_gallery_snapshot(),
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - GALLERY_BIND_ADDRESS: server bind address (default: 0.0.0.0:8080)
    /// - GALLERY_TIMEOUT_SECS: request timeout (default: 30)
    /// - GALLERY_MAX_BODY_SIZE: max request size in bytes (default: 100MB)
    /// - GALLERY_PROVIDER_STORE: provider store path
    /// - GALLERY_SNAPSHOT: gallery snapshot path
    /// - GALLERY_LOG_LEVEL: log level (default: info)
    /// - GALLERY_CONFIG_FILE: optional path to TOML config file
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Try to load from config file first if specified
        let config_file = std::env::var("GALLERY_CONFIG_FILE").ok();
        let mut config = if let Some(path) = &config_file {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        if let Ok(addr) = std::env::var("GALLERY_BIND_ADDRESS") {
            config.server.bind_address = addr.parse()?;
        }

        if let Ok(timeout) = std::env::var("GALLERY_TIMEOUT_SECS") {
            config.server.timeout_secs = timeout.parse()?;
        }

        if let Ok(size) = std::env::var("GALLERY_MAX_BODY_SIZE") {
            config.server.max_body_size = size.parse()?;
        }

        if let Ok(path) = std::env::var("GALLERY_PROVIDER_STORE") {
            config.paths.provider_store = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("GALLERY_SNAPSHOT") {
            config.paths.gallery_snapshot = PathBuf::from(path);
        }

        if let Ok(level) = std::env::var("GALLERY_LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: default_server(),
            paths: default_paths(),
            log_level: default_log_level(),
        }
    }
}
