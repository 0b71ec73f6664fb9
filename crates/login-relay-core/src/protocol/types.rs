//! Message types for the backend login protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field the backend sets on a successful login.
pub const LOGIN_ID_FIELD: &str = "LOGIN_ID";

/// One inbound login attempt, resolved against the configured defaults.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
    pub device_id: i64,
    pub order_id: String,
    pub target_host: String,
    pub target_port: u16,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("login", &self.login)
            .field("password", &"***")
            .field("device_id", &self.device_id)
            .field("order_id", &self.order_id)
            .field("target_host", &self.target_host)
            .field("target_port", &self.target_port)
            .finish()
    }
}

/// Command verb sent in the `METHOD` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "LOGIN")]
    Login,
}

/// Wire payload of a login command. Field order is the on-wire key order.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCommand {
    #[serde(rename = "METHOD")]
    pub method: Method,
    #[serde(rename = "ORDER_ID")]
    pub order_id: String,
    #[serde(rename = "LOGIN")]
    pub login: String,
    #[serde(rename = "PASSWORD")]
    pub password: String,
    #[serde(rename = "DEVICE_ID")]
    pub device_id: i64,
}

impl From<&LoginRequest> for LoginCommand {
    fn from(request: &LoginRequest) -> Self {
        Self {
            method: Method::Login,
            order_id: request.order_id.clone(),
            login: request.login.clone(),
            password: request.password.clone(),
            device_id: request.device_id,
        }
    }
}

impl LoginCommand {
    /// Same command with the password masked, for log output.
    pub fn redacted(&self) -> Self {
        Self {
            password: "***".to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for LoginCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCommand")
            .field("method", &self.method)
            .field("order_id", &self.order_id)
            .field("login", &self.login)
            .field("password", &"***")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Decoded backend reply. Keys keep the order the backend sent them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginResult(Map<String, Value>);

impl LoginResult {
    /// Result carrying no fields; what a failed exchange degrades to.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The backend-issued login identifier, if present and non-empty.
    pub fn login_id(&self) -> Option<&str> {
        match self.0.get(LOGIN_ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.login_id().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for LoginResult {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
