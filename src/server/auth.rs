//! Dispatch trigger authentication
//!
//! Dispatch endpoints are invoked by a scheduled job holding a shared secret.
//! The check runs as route middleware so a rejected request never reaches a
//! handler, and therefore never touches the subscription store.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::Error;

/// Resolved dispatch secret
#[derive(Default)]
pub struct DispatchAuth {
    secret: Option<String>,
}

impl std::fmt::Debug for DispatchAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchAuth")
            .field("configured", &self.secret.is_some())
            .finish()
    }
}

impl DispatchAuth {
    /// Gate dispatch with `secret`; `None` disables the dispatch endpoints
    #[must_use]
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Whether a secret is configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Check the bearer credential in `headers`
    pub fn verify(&self, headers: &HeaderMap) -> crate::Result<()> {
        let Some(secret) = &self.secret else {
            return Err(Error::Unavailable(
                "Dispatch secret not configured; dispatch endpoints disabled".to_string(),
            ));
        };

        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")));

        let Some(provided) = provided else {
            return Err(Error::Unauthorized(
                "Missing Authorization header. Use: Authorization: Bearer <secret>".to_string(),
            ));
        };

        if bool::from(provided.as_bytes().ct_eq(secret.as_bytes())) {
            Ok(())
        } else {
            Err(Error::Unauthorized("Invalid dispatch secret".to_string()))
        }
    }
}

/// Reject dispatch requests without the shared secret
pub async fn dispatch_auth_middleware(
    State(auth): State<Arc<DispatchAuth>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Err(e) = auth.verify(request.headers()) {
        warn!(path = %request.uri().path(), error = %e, "Dispatch request rejected");
        return e.into_response();
    }
    next.run(request).await
}
