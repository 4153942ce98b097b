//! Binding configuration parameters
//!
//! Pool capacities, session limits and tracing for one advertised
//! service. Loaded from JSON by the demo host; `postcard` is used when
//! the configuration is stored in a compact form.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Core binding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Service-instance identifier advertised to clients
    pub service_name: heapless::String<32>,

    // --- Pools ---
    /// Maximum concurrently open sessions
    pub max_sessions: u16,
    /// In-flight asynchronous commands
    pub command_pool_size: u16,
    /// Live subscription records (Add-Handler registrations + one-shot callbacks)
    pub subscription_pool_size: u16,

    // --- Diagnostics ---
    /// Emit per-message `trace!` lines
    pub trace_messages: bool,
    /// Maximum log level for the console logger ("error" .. "trace")
    pub log_level: heapless::String<8>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            service_name: heapless::String::try_from("ifbind").unwrap_or_default(),

            max_sessions: 8,
            command_pool_size: 5,
            subscription_pool_size: 3,

            trace_messages: true,
            log_level: heapless::String::try_from("info").unwrap_or_default(),
        }
    }
}

impl BindingConfig {
    /// Reject configurations the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::PoolSize("max_sessions"));
        }
        if self.command_pool_size == 0 {
            return Err(ConfigError::PoolSize("command_pool_size"));
        }
        if self.subscription_pool_size == 0 {
            return Err(ConfigError::PoolSize("subscription_pool_size"));
        }
        Ok(())
    }

    /// Parse a JSON document. Absent fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `log` level filter for [`log_level`](Self::log_level).
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}
