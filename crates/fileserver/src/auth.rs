//! HTTP Basic authentication against a static credential table

use std::collections::HashMap;

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Basic, Authorization, HeaderMapExt};

use crate::access::Identity;
use crate::error::AppError;
use crate::state::ServerState;

/// Static identity → secret table
#[derive(Clone, Default)]
pub struct Credentials {
    users: HashMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Credentials {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    /// Resolve an identity if the secret matches
    pub fn verify(&self, username: &str, password: &str) -> Option<Identity> {
        let expected = self.users.get(username)?;
        constant_time_eq::constant_time_eq(expected.as_bytes(), password.as_bytes())
            .then(|| Identity::new(username))
    }
}

/// Reject requests without valid Basic credentials
///
/// Pre-flight `OPTIONS` requests pass through untouched. On success the
/// [`Identity`] is stored as a request extension for the handlers.
pub async fn require_basic_auth(
    State(state): State<ServerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.method() == Method::OPTIONS {
        return Ok(next.run(req).await);
    }

    let identity = req
        .headers()
        .typed_get::<Authorization<Basic>>()
        .and_then(|auth| state.credentials().verify(auth.username(), auth.password()));

    match identity {
        Some(identity) => {
            req.extensions_mut().insert(identity);
            Ok(next.run(req).await)
        }
        None => {
            tracing::debug!("Rejected unauthenticated request to {}", req.uri().path());
            Err(AppError::Unauthorized {
                realm: state.realm().to_string(),
            })
        }
    }
}
