//! Registry Configuration
//!
//! Configurable parameters for the peer registry service.
//! Loaded from TOML; CLI arguments override individual fields.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the registry service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    // === Network ===

    /// Address the HTTP API binds to
    pub bind_address: String,

    /// Port for the HTTP API
    pub api_port: u16,

    /// Origins allowed to call the API from a browser
    pub allowed_origins: Vec<String>,

    // === Limits ===

    /// Largest page ListPeers will return; bigger limits are clamped
    pub max_page_size: u64,

    /// Page size used when a request omits the limit
    pub default_page_size: u64,

    /// Per-request deadline (milliseconds)
    pub request_timeout_ms: u64,

    /// Capacity of the change notification channel
    pub event_buffer: usize,

    // === Storage ===

    /// Keep peers in RocksDB under the data directory
    pub persist: bool,

    /// Interval for maintenance tasks (seconds)
    pub maintenance_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            // Network
            bind_address: "0.0.0.0".to_string(),
            api_port: 9090,
            allowed_origins: vec![
                "http://localhost:4200".to_string(),  // Angular dev server
                "http://127.0.0.1:4200".to_string(),
            ],

            // Limits
            max_page_size: 100,
            default_page_size: 20,
            request_timeout_ms: 5_000,
            event_buffer: 256,

            // Storage
            persist: true,
            maintenance_interval_secs: 60,
        }
    }
}

impl RegistryConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_api_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.api_port = port;
        }
        self
    }

    pub fn with_bind_address(mut self, address: Option<String>) -> Self {
        if let Some(address) = address {
            self.bind_address = address;
        }
        self
    }

    pub fn with_in_memory(mut self, in_memory: bool) -> Self {
        if in_memory {
            self.persist = false;
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            anyhow::bail!("bind_address ({}) is not an IP address", self.bind_address);
        }

        if self.max_page_size == 0 || self.default_page_size == 0 {
            anyhow::bail!("page sizes must be positive");
        }

        if self.default_page_size > self.max_page_size {
            anyhow::bail!(
                "default_page_size ({}) must not exceed max_page_size ({})",
                self.default_page_size,
                self.max_page_size
            );
        }

        if self.max_page_size > i64::MAX as u64 {
            anyhow::bail!("max_page_size ({}) is out of range", self.max_page_size);
        }

        if self.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be positive");
        }

        if self.event_buffer == 0 {
            anyhow::bail!("event_buffer must be positive");
        }

        if self.maintenance_interval_secs == 0 {
            anyhow::bail!("maintenance_interval_secs must be positive");
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }
}
