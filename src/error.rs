use axum::{
    Json,
    response::{IntoResponse, Response},
};
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Message reported for transport failures, before any hook sees them.
pub const NETWORK_ERROR_MESSAGE: &str = "Connection error. Check your network.";

/// The single error type returned by every request made through the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("network error: {message}")]
    Network { message: String },

    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// The access token could not be decoded or has expired.
    #[error("Invalid token")]
    TokenInvalid,

    /// The refresh endpoint failed; the session has been cleared.
    #[error("token refresh failed: {message}")]
    RefreshFailed { message: String },

    /// A successful response whose body did not match the expected shape.
    #[error("failed to decode response: {message}")]
    Decode { message: String },

    /// The request could not be assembled (bad URL, header name or value).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        ApiError::Network {
            message: message.into(),
        }
    }

    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError::Http {
            status: status.as_u16(),
            message: message.into(),
        }
    }

    pub fn refresh_failed(message: impl Into<String>) -> Self {
        ApiError::RefreshFailed {
            message: message.into(),
        }
    }

    /// HTTP status carried by the error; `0` when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Http { status, .. } => *status,
            ApiError::TokenInvalid | ApiError::RefreshFailed { .. } => {
                StatusCode::UNAUTHORIZED.as_u16()
            }
            _ => 0,
        }
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Http { status, .. } if *status == StatusCode::UNAUTHORIZED.as_u16())
    }

    /// Human-readable message, without the variant prefix used by `Display`.
    pub fn message(&self) -> String {
        match self {
            ApiError::Network { message }
            | ApiError::Http { message, .. }
            | ApiError::RefreshFailed { message }
            | ApiError::Decode { message }
            | ApiError::InvalidRequest { message } => message.clone(),
            ApiError::TokenInvalid => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ApiError::InvalidRequest {
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ApiError::Decode {
                message: err.to_string(),
            }
        } else {
            ApiError::network(NETWORK_ERROR_MESSAGE)
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode {
            message: err.to_string(),
        }
    }
}

/// Error envelope shape used by the `{success, message}` style responses.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
    #[serde(rename = "isNetworkError")]
    pub is_network_error: bool,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            status: err.status(),
            message: err.message(),
            is_network_error: err.is_network_error(),
        }
    }
}

/// Lets axum handlers and extractors return `ApiError` directly.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Http { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::TokenInvalid | ApiError::RefreshFailed { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Network { .. } | ApiError::Decode { .. } => StatusCode::BAD_GATEWAY,
            ApiError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        };

        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
