//! login-relay core library
//!
//! Shared functionality for the login relay:
//! - Line-delimited JSON protocol for the authentication backend
//! - The relay performing one login exchange per call
//! - Relay configuration
//! - Common error types

pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod tracing_init;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use protocol::{LoginCommand, LoginRequest, LoginResult};
pub use relay::{LoginRelay, RelayError};
