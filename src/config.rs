//! Layered configuration: built-in defaults, an optional config file, and
//! `GEMINI_RELAY__*` environment overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use ::config::{Config, Environment, File};

/// Effective application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub websocket: WebSocketConfig,
    /// Shared secret for `Authorization: Bearer <key>`. Empty disables auth.
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// "release" or "debug"; debug lowers the default log threshold.
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Seconds between application-level PING frames.
    pub ping_interval: u64,
    /// Grace beyond the ping interval before a silent peer is dropped.
    pub pong_timeout: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            websocket: WebSocketConfig::default(),
            api_key: String::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6543,
            mode: "release".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data.db".to_string(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: 30,
            pong_timeout: 10,
        }
    }
}

/// Load configuration, layering the optional file and environment over the
/// defaults. The file format is picked by extension (TOML or YAML).
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let mut builder = Config::builder()
        .set_default("server.port", 6543_i64)?
        .set_default("server.mode", "release")?
        .set_default("database.path", "./data.db")?
        .set_default("websocket.ping_interval", 30_i64)?
        .set_default("websocket.pong_timeout", 10_i64)?
        .set_default("api_key", "")?;

    if let Some(path) = path {
        builder = builder.add_source(File::from(path.to_path_buf()));
    }
    builder = builder.add_source(Environment::with_prefix("GEMINI_RELAY").separator("__"));

    let cfg = builder.build().with_context(|| match path {
        Some(path) => format!("loading config from {}", path.display()),
        None => "loading default config".to_string(),
    })?;
    cfg.try_deserialize().context("parsing configuration")
}
