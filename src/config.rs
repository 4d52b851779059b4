use anyhow::{Context, Result};
use log::LevelFilter;

use crate::core::log_buffer::DEFAULT_CAPACITY;
use crate::core::log_capture::DEFAULT_CAPTURE_LEVEL;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8787;

/// Default cap on request bodies read off the network.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

pub const ENV_PORT: &str = "EDITOR_REMOTE_PORT";
pub const ENV_LOG_CAPACITY: &str = "EDITOR_REMOTE_LOG_CAPACITY";
pub const ENV_DEBUG: &str = "EDITOR_REMOTE_DEBUG";
pub const ENV_CAPTURE_LEVEL: &str = "EDITOR_REMOTE_CAPTURE_LEVEL";

/// Process-wide server settings. Nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Loopback port to bind. `0` picks an ephemeral port.
    pub port: u16,
    /// Ring buffer capacity for captured log records
    pub log_capacity: usize,
    /// Most verbose level mirrored into the ring buffer (console verbosity is separate)
    pub capture_level: LevelFilter,
    /// Log requests and endpoint registration at info level
    pub debug_logging: bool,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            log_capacity: DEFAULT_CAPACITY,
            capture_level: DEFAULT_CAPTURE_LEVEL,
            debug_logging: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `EDITOR_REMOTE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup(ENV_PORT) {
            config.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {:?}", ENV_PORT, port))?;
        }
        if let Some(capacity) = lookup(ENV_LOG_CAPACITY) {
            config.log_capacity = capacity
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {:?}", ENV_LOG_CAPACITY, capacity))?;
        }
        if let Some(level) = lookup(ENV_CAPTURE_LEVEL) {
            config.capture_level = level
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {:?}", ENV_CAPTURE_LEVEL, level))?;
        }
        if let Some(debug) = lookup(ENV_DEBUG) {
            config.debug_logging = parse_flag(&debug);
        }

        Ok(config)
    }

    /// Apply CLI overrides on top (CLI → ENV → defaults).
    pub fn with_overrides(
        mut self,
        port: Option<u16>,
        log_capacity: Option<usize>,
        capture_level: Option<LevelFilter>,
        debug: bool,
    ) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(capacity) = log_capacity {
            self.log_capacity = capacity;
        }
        if let Some(level) = capture_level {
            self.capture_level = level;
        }
        self.debug_logging |= debug;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
