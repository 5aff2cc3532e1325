//! Error handling module

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Failures talking to the Sensibo cloud API
#[derive(Error, Debug)]
pub enum SensiboError {
    /// Network failure. `connect` is set when the request never reached the
    /// server.
    #[error("Transport error: {message}")]
    Transport { message: String, connect: bool },

    /// No reply within the request deadline. The request may have been applied.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Non-2xx reply, or a 2xx envelope whose status is not "success"
    #[error("Sensibo rejected request ({status}): {message}")]
    RemoteRejection { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl SensiboError {
    /// Whether a read may be re-issued after this failure
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SensiboError::MalformedResponse(_))
    }

    /// Whether the request provably never reached the vendor
    pub fn is_pre_send(&self) -> bool {
        matches!(self, SensiboError::Transport { connect: true, .. })
    }
}

impl From<reqwest::Error> for SensiboError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return SensiboError::Timeout(e.to_string());
        }
        if e.is_decode() {
            return SensiboError::MalformedResponse(e.to_string());
        }
        if let Some(status) = e.status() {
            return SensiboError::RemoteRejection {
                status: status.as_u16(),
                message: e.to_string(),
            };
        }
        SensiboError::Transport {
            message: e.to_string(),
            connect: e.is_connect(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] SensiboError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Upstream(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
