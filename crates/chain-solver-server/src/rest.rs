//! HTTP dispatch endpoint.
//!
//! `POST /api/quiz` validates `{email, secret, url}`, answers immediately,
//! and runs the chain on its own task. The chain's outcome is only logged.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use chain_solver::ChainController;

use crate::error::{DispatchError, ServerError};

/// Shared state for all handlers.
pub struct AppState {
    pub secret: String,
    pub controller: Arc<ChainController>,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/quiz", post(dispatch).fallback(method_not_allowed))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    tracing::info!("dispatch endpoint listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// A validated dispatch body.
#[derive(Debug, PartialEq, Eq)]
pub struct DispatchRequest {
    pub email: String,
    pub secret: String,
    pub url: String,
}

impl DispatchRequest {
    /// Parse a raw body. All three fields must be non-empty strings.
    /// `email` and `url` are trimmed; the secret is kept byte for byte.
    pub fn parse(body: &[u8]) -> Result<Self, DispatchError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| DispatchError::InvalidJson)?;

        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .ok_or(DispatchError::MissingFields)
        };

        Ok(Self {
            email: field("email")?.trim().to_string(),
            secret: field("secret")?.to_string(),
            url: field("url")?.trim().to_string(),
        })
    }
}

async fn dispatch(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match DispatchRequest::parse(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("dispatch rejected: {e}");
            return e.into_response();
        }
    };

    if request.secret != state.secret {
        tracing::warn!(email = %request.email, "dispatch rejected: secret mismatch");
        return DispatchError::Forbidden.into_response();
    }

    let session = state
        .controller
        .session(request.email, request.secret, request.url);
    tracing::info!(session = %session.id, email = %session.email, url = %session.start_url, "dispatch accepted");

    // The handle is dropped; the chain runs to its own end.
    let _ = state.controller.spawn(session);

    Json(json!({ "status": "accepted" })).into_response()
}

async fn method_not_allowed() -> DispatchError {
    DispatchError::MethodNotAllowed
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_body() {
        let req =
            DispatchRequest::parse(br#"{"email":"a@b.com","secret":"S","url":" http://x/start "}"#)
                .unwrap();
        assert_eq!(
            req,
            DispatchRequest {
                email: "a@b.com".into(),
                secret: "S".into(),
                url: "http://x/start".into(),
            }
        );
    }

    #[test]
    fn secret_is_not_trimmed() {
        let req =
            DispatchRequest::parse(br#"{"email":" a@b.com ","secret":" S","url":"http://x"}"#)
                .unwrap();
        assert_eq!(req.email, "a@b.com");
        assert_eq!(req.secret, " S");
    }

    #[test]
    fn rejects_unparsable_body() {
        assert_eq!(
            DispatchRequest::parse(b"{not json").unwrap_err(),
            DispatchError::InvalidJson
        );
        assert_eq!(DispatchRequest::parse(b"").unwrap_err(), DispatchError::InvalidJson);
    }

    #[test]
    fn rejects_missing_empty_or_mistyped_fields() {
        for body in [
            r#"{"email":"a@b.com","secret":"S"}"#,
            r#"{"email":"","secret":"S","url":"http://x"}"#,
            r#"{"email":"a@b.com","secret":42,"url":"http://x"}"#,
            r#"[]"#,
        ] {
            assert_eq!(
                DispatchRequest::parse(body.as_bytes()).unwrap_err(),
                DispatchError::MissingFields,
                "{body}"
            );
        }
    }
}
