use std::sync::Arc;

use axum::extract::{Form, FromRequest, Multipart, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, warn};

use login_relay_core::{LoginRelay, LoginRequest, RelayConfig};

use crate::error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

/// Build the HTTP router.
///
/// `/index.php` is kept as an alias so existing clients keep working.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(login))
        .route("/index.php", post(login))
        .route("/health", get(health))
        .with_state(state)
}

/// Raw form fields. Everything is optional here so that absence can be
/// reported with one message instead of a per-field rejection.
///
/// Read from `application/x-www-form-urlencoded` or `multipart/form-data`
/// bodies. A repeated key keeps its last value; unknown keys and file
/// uploads are ignored.
#[derive(Debug, Default)]
pub struct LoginForm {
    pub login: Option<String>,
    pub password: Option<String>,
    pub device_id: Option<String>,
    pub order_id: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<String>,
}

impl LoginForm {
    /// Record one body field, overwriting an earlier value for the same key.
    pub fn set(&mut self, key: &str, value: String) {
        let slot = match key {
            "login" => &mut self.login,
            "password" => &mut self.password,
            "device_id" => &mut self.device_id,
            "order_id" => &mut self.order_id,
            "ip_address" => &mut self.ip_address,
            "port" => &mut self.port,
            _ => return,
        };
        *slot = Some(value);
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut form = Self::default();
        for (key, value) in pairs {
            form.set(&key, value);
        }
        form
    }

    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(|e| {
            debug!(error = %e, "Unreadable multipart body");
            ApiError::MalformedBody
        })? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            if field.file_name().is_some() {
                continue;
            }
            let value = field.text().await.map_err(|e| {
                debug!(error = %e, field = %name, "Unreadable multipart field");
                ApiError::MalformedBody
            })?;
            form.set(&name, value);
        }
        Ok(form)
    }

    /// Validate the form and resolve the backend target against `config`.
    pub fn into_request(self, config: &RelayConfig) -> Result<LoginRequest, ApiError> {
        let (Some(login), Some(password), Some(device_id), Some(order_id)) =
            (self.login, self.password, self.device_id, self.order_id)
        else {
            return Err(ApiError::MissingParameters);
        };

        let device_id = device_id
            .trim()
            .parse::<i64>()
            .map_err(|_| ApiError::InvalidParameter {
                field: "device_id",
                expected: "an integer",
            })?;

        let target_host = self
            .ip_address
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| config.backend_host.clone());

        let target_port = match self.port.as_deref().map(str::trim) {
            None | Some("") => config.backend_port,
            Some(raw) => raw
                .parse::<u16>()
                .ok()
                .filter(|&p| p != 0)
                .ok_or(ApiError::InvalidParameter {
                    field: "port",
                    expected: "a port number between 1 and 65535",
                })?,
        };

        Ok(LoginRequest {
            login,
            password,
            device_id,
            order_id,
            target_host,
            target_port,
        })
    }
}

impl<S> FromRequest<S> for LoginForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        match content_type.as_deref() {
            // No body type at all reads as an empty form.
            None => Ok(Self::default()),
            Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
                let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                    .await
                    .map_err(|e| {
                        debug!(error = %e, "Unreadable urlencoded body");
                        ApiError::MalformedBody
                    })?;
                Ok(Self::from_pairs(pairs))
            }
            Some(ct) if ct.starts_with("multipart/form-data") => {
                let multipart = Multipart::from_request(req, state).await.map_err(|e| {
                    debug!(error = %e, "Unreadable multipart body");
                    ApiError::MalformedBody
                })?;
                Self::from_multipart(multipart).await
            }
            Some(other) => {
                debug!(content_type = %other, "Unsupported login body type");
                Err(ApiError::UnsupportedContentType)
            }
        }
    }
}

/// `POST /`: relay a login attempt to the backend.
///
/// Any reply from the backend, including an unusable one, is answered with
/// `200` and the decoded object (`{}` when unusable, in legacy mode too).
/// Only a failed connection is an error; legacy mode turns that one case
/// into `200 null`.
pub async fn login(
    State(state): State<AppState>,
    form: LoginForm,
) -> Result<Response, ApiError> {
    let request = form.into_request(&state.config)?;
    let mut relay = LoginRelay::new(&state.config);

    match relay.login(&request).await {
        Ok(result) => Ok((StatusCode::OK, Json(result)).into_response()),
        Err(e) if state.config.legacy_status => {
            warn!(error = %e, "Backend unavailable, answering null for compatibility");
            Ok((StatusCode::OK, Json(serde_json::Value::Null)).into_response())
        }
        Err(e) => {
            warn!(
                error = %e,
                host = %request.target_host,
                port = request.target_port,
                "Backend unavailable"
            );
            Err(ApiError::BackendUnavailable(e))
        }
    }
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}
