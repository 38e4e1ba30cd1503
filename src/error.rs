use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Missing prompt")]
    InvalidInput,

    #[error("Too many requests, try again later")]
    RateLimited,

    // detail goes to the log only
    #[error("Server misconfigured")]
    Misconfigured,

    #[error("{message}")]
    Upstream {
        status: StatusCode,
        message: String,
        raw: Value,
    },

    // transport, timeout or parse failure
    #[error("Server error")]
    ServerError,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::InvalidInput => StatusCode::BAD_REQUEST,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::Misconfigured | ProxyError::ServerError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream { status, .. } => *status,
        }
    }
}

// Upstream statuses are relayed as-is; anything that is not an error status
// becomes a gateway error.
pub fn upstream_status(code: u16) -> StatusCode {
    match StatusCode::from_u16(code) {
        Ok(status) if status.is_client_error() || status.is_server_error() => status,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();

        match self {
            ProxyError::MethodNotAllowed => {
                let mut response = (status, Json(json!({ "error": error }))).into_response();
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("POST"));
                response
            }
            ProxyError::Upstream { raw, .. } => {
                (status, Json(json!({ "error": error, "raw": raw }))).into_response()
            }
            _ => (status, Json(json!({ "error": error }))).into_response(),
        }
    }
}
