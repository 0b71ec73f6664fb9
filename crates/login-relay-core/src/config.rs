//! Relay configuration.
//!
//! Built once at process start (the server maps CLI flags and environment
//! variables onto it) and shared read-only by every request afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Backend host used when neither the environment nor the request names one.
pub const DEFAULT_BACKEND_HOST: &str = "172.16.2.51";
/// Backend port used when neither the environment nor the request names one.
pub const DEFAULT_BACKEND_PORT: u16 = 2387;

/// Settings for talking to the authentication backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Default backend host. Requests may override it.
    pub backend_host: String,
    /// Default backend port. Requests may override it.
    pub backend_port: u16,
    /// Upper bound for establishing the TCP connection (DNS included).
    pub connect_timeout: Duration,
    /// Upper bound for receiving the full reply line.
    pub read_timeout: Duration,
    /// Longest reply line accepted before it is treated as malformed.
    pub max_response_bytes: usize,
    /// Answer `200 null` on connection failure instead of `502`.
    pub legacy_status: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend_host: DEFAULT_BACKEND_HOST.to_string(),
            backend_port: DEFAULT_BACKEND_PORT,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(1),
            max_response_bytes: 64 * 1024,
            legacy_status: false,
        }
    }
}

impl RelayConfig {
    /// Reject settings that would make every exchange fail or hang.
    pub fn validate(&self) -> Result<()> {
        if self.backend_host.trim().is_empty() {
            return Err(Error::Config("backend host must not be empty".into()));
        }
        if self.backend_port == 0 {
            return Err(Error::Config("backend port must be non-zero".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connect timeout must be non-zero".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be non-zero".into()));
        }
        if self.max_response_bytes == 0 {
            return Err(Error::Config("max response bytes must be non-zero".into()));
        }
        Ok(())
    }
}
