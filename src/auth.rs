use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use constant_time_eq::constant_time_eq;
use tracing::{error, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

/// The shared secret protected routes expect in `x-api-key`.
#[derive(Debug, Clone, Default)]
pub struct ApiKey(Option<Arc<str>>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    Allowed,
    /// No key configured: fail closed.
    Unconfigured,
    Rejected,
}

impl ApiKey {
    pub fn new(key: Option<String>) -> Self {
        Self(key.map(Arc::from))
    }

    pub fn check(&self, provided: Option<&str>) -> KeyCheck {
        let Some(expected) = &self.0 else {
            return KeyCheck::Unconfigured;
        };
        match provided {
            Some(p) if constant_time_eq(p.as_bytes(), expected.as_bytes()) => KeyCheck::Allowed,
            _ => KeyCheck::Rejected,
        }
    }
}

/// Middleware for routes behind the API key.
pub async fn require_api_key(State(key): State<ApiKey>, request: Request, next: Next) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match key.check(provided) {
        KeyCheck::Allowed => next.run(request).await,
        KeyCheck::Unconfigured => {
            error!("request to {} refused: no API key configured", request.uri().path());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "API key not configured on server" })),
            )
                .into_response()
        }
        KeyCheck::Rejected => {
            warn!("request to {} refused: bad or missing API key", request.uri().path());
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "invalid or missing API key" })),
            )
                .into_response()
        }
    }
}
