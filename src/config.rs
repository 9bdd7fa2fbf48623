//! Transport configuration.
//!
//! All tunables of the uplink. Values can be overridden from the key-value
//! store (postcard blob under [`CONFIG_KEY`]); the peer URI lives next to it
//! under [`URI_KEY`].

use core::fmt;
use core::time::Duration;

use heapless::Vec;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::kv_store::{KvError, KvStore};
use crate::link::backoff::{DEFAULT_BACKOFF_MS, MAX_BACKOFF_STEPS};

/// Key of the serialized [`TransportConfig`].
pub const CONFIG_KEY: &str = "link_cfg";

/// Key of the peer WebSocket URI.
pub const URI_KEY: &str = "ws_uri";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed range validation. The message names the field.
    ValidationFailed(&'static str),
    /// Stored blob did not deserialize.
    Corrupted,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::Corrupted => write!(f, "config corrupted"),
        }
    }
}

/// Uplink tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    // --- Liveness ---
    /// Heartbeat period while connected. A link with no inbound activity
    /// for twice this long is dropped.
    pub heartbeat_interval_ms: u32,

    // --- Reconnect ---
    /// Delay after the 1st, 2nd, ... consecutive connect failure. The last
    /// entry repeats.
    pub backoff_schedule_ms: Vec<u32, MAX_BACKOFF_STEPS>,
    /// Connect plus handshake budget.
    pub connect_timeout_ms: u32,

    // --- Data path ---
    /// Per-frame transmit budget.
    pub send_timeout_ms: u32,
    /// Longest the worker waits for outbound data before polling the link.
    pub poll_interval_ms: u32,

    // --- Shutdown ---
    /// How long `stop` waits for the worker before releasing it.
    pub shutdown_grace_ms: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let mut backoff_schedule_ms = Vec::new();
        for ms in DEFAULT_BACKOFF_MS {
            let _ = backoff_schedule_ms.push(ms);
        }
        Self {
            heartbeat_interval_ms: 10_000,
            backoff_schedule_ms,
            connect_timeout_ms: 5_000,
            send_timeout_ms: 1_000,
            poll_interval_ms: 20,
            shutdown_grace_ms: 500,
        }
    }
}

fn ms(v: u32) -> Duration {
    Duration::from_millis(u64::from(v))
}

impl TransportConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        ms(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        ms(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        ms(self.send_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        ms(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        ms(self.shutdown_grace_ms)
    }

    /// Range-check every field. Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_interval_ms must be > 0",
            ));
        }
        if self.backoff_schedule_ms.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "backoff_schedule_ms must not be empty",
            ));
        }
        if self.backoff_schedule_ms.contains(&0) {
            return Err(ConfigError::ValidationFailed(
                "backoff_schedule_ms steps must be > 0",
            ));
        }
        if self.backoff_schedule_ms.windows(2).any(|w| w[1] < w[0]) {
            return Err(ConfigError::ValidationFailed(
                "backoff_schedule_ms must be non-decreasing",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "connect_timeout_ms must be > 0",
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("send_timeout_ms must be > 0"));
        }
        if self.shutdown_grace_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "shutdown_grace_ms must be > 0",
            ));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms >= self.heartbeat_interval_ms {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be > 0 and < heartbeat_interval_ms",
            ));
        }
        Ok(())
    }

    /// Decode and validate a stored blob.
    pub fn from_blob(bytes: &[u8]) -> Result<Self, ConfigError> {
        let cfg: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_blob(&self) -> Result<std::vec::Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Corrupted)
    }

    /// Stored config, or defaults if it is missing, corrupt, or invalid.
    pub fn load_from(kv: &KvStore) -> Self {
        match kv.get_blob(CONFIG_KEY) {
            Ok(bytes) => match Self::from_blob(&bytes) {
                Ok(cfg) => {
                    info!("CFG: loaded link config ({} bytes)", bytes.len());
                    cfg
                }
                Err(e) => {
                    warn!("CFG: stored link config rejected ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(KvError::NotFound) => {
                info!("CFG: no stored link config, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!("CFG: link config read failed ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Validate and persist.
    pub fn store_into(&self, kv: &KvStore) -> crate::error::Result<()> {
        self.validate()?;
        kv.set_blob(CONFIG_KEY, &self.to_blob()?)?;
        info!("CFG: link config saved");
        Ok(())
    }
}

/// Stored peer URI, if provisioning wrote one.
pub fn load_uri(kv: &KvStore) -> Option<String> {
    match kv.get_str(URI_KEY) {
        Ok(uri) if !uri.is_empty() => Some(uri),
        Ok(_) | Err(KvError::NotFound) => None,
        Err(e) => {
            warn!("CFG: uri read failed ({})", e);
            None
        }
    }
}

pub fn store_uri(kv: &KvStore, uri: &str) -> crate::error::Result<()> {
    kv.set_str(URI_KEY, uri)?;
    Ok(())
}
