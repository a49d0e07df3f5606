//! Transport configuration.
//!
//! Loaded from JSON or built with the fluent `with_*` setters. Durations are
//! expressed in milliseconds on the wire:
//!
//! ```
//! use framewire::config::TransportConfig;
//!
//! let config = TransportConfig::from_json(r#"{ "framing": true, "receive_timeout": 30000 }"#).unwrap();
//! assert_eq!(config.receive_timeout, Some(std::time::Duration::from_secs(30)));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

/// Default receive chunk size, also the capacity of pooled buffers.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 8 * 1024;

/// Default number of buffers created when a pool is built.
pub const DEFAULT_INITIAL_POOL_BUFFERS: usize = 16;

/// How the peer's certificate is validated during a TLS upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerTrust {
    /// Validate against the platform trust store.
    #[default]
    System,
    /// Accept any certificate. Test setups only.
    AcceptAny,
}

/// Policy handed to a [`StreamUpgrade`](crate::session::StreamUpgrade).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsPolicy {
    /// Run the stream upgrade after connect/accept.
    pub enabled: bool,
    /// Peer certificate validation mode.
    pub peer_trust: PeerTrust,
    /// Expected server name (client role).
    pub server_name: Option<String>,
    /// Allowed protocol versions, e.g. `["tls1.2", "tls1.3"]`. Empty = upgrader default.
    pub protocols: Vec<String>,
    /// Check certificate revocation.
    pub check_revocation: bool,
}

/// Configuration shared by every session of a server or client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Length-prefixed framing; when off every read is dispatched raw.
    pub framing: bool,
    /// Receive chunk size and pooled buffer capacity.
    pub receive_buffer_size: usize,
    /// Buffers allocated up front when the pool is created.
    pub initial_pool_buffers: usize,
    /// Maximum idle buffers retained by the pool (`None` = unbounded).
    pub max_pooled_buffers: Option<usize>,
    /// Largest payload accepted or sent in framing mode.
    pub max_payload_size: u32,
    #[serde(with = "millis")]
    pub connect_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub send_timeout: Option<Duration>,
    #[serde(with = "millis")]
    pub receive_timeout: Option<Duration>,
    /// Disable Nagle's algorithm.
    pub no_delay: bool,
    /// SO_LINGER on close (`None` = OS default).
    #[serde(with = "millis")]
    pub linger: Option<Duration>,
    pub tls: TlsPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            framing: true,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            initial_pool_buffers: DEFAULT_INITIAL_POOL_BUFFERS,
            max_pooled_buffers: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            connect_timeout: None,
            send_timeout: None,
            receive_timeout: None,
            no_delay: true,
            linger: None,
            tls: TlsPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make a session unusable.
    pub fn validate(&self) -> Result<()> {
        if self.receive_buffer_size == 0 {
            return Err(TransportError::Config(
                "receive_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.max_payload_size == 0 {
            return Err(TransportError::Config(
                "max_payload_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_framing(mut self, framing: bool) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    pub fn with_initial_pool_buffers(mut self, count: usize) -> Self {
        self.initial_pool_buffers = count;
        self
    }

    pub fn with_max_pooled_buffers(mut self, limit: usize) -> Self {
        self.max_pooled_buffers = Some(limit);
        self
    }

    pub fn with_max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = Some(linger);
        self
    }

    pub fn with_tls(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }
}

/// `Option<Duration>` as optional integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms: Option<u64> = Option::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}
