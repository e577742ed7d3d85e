//! Error types for the server: startup failures and dispatch rejections.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Errors that stop the server from starting or running.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("no dispatch secret configured (use --secret or CHAIN_SOLVER_SECRET)")]
    MissingSecret,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] chain_solver::ConfigError),
}

/// Why a dispatch request was turned away.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("POST only")]
    MethodNotAllowed,

    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Missing fields")]
    MissingFields,

    #[error("Forbidden")]
    Forbidden,
}

impl DispatchError {
    pub fn status(self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidJson | Self::MissingFields => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
