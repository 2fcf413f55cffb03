// Cross-site request gate for cookie-authenticated routes.
//
// Browsers attach the session cookie to cross-site requests, so routes that
// hand out or revoke edit authority only accept an `Origin` from the
// configured allow-list. Requests without an `Origin` header pass through.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::ORIGIN, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::{ErrorCode, ServerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedOrigins(Arc<[HeaderValue]>);

impl Default for AllowedOrigins {
    fn default() -> Self {
        Self(Vec::new().into())
    }
}

impl AllowedOrigins {
    /// Comma-separated origins, e.g. `https://notee.app,https://localhost:5173`.
    /// Blank and unparsable entries are skipped.
    pub fn parse(comma_separated: &str) -> Self {
        let origins: Vec<HeaderValue> = comma_separated
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();
        Self(origins.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn allows(&self, origin: &HeaderValue) -> bool {
        self.0.iter().any(|allowed| allowed == origin)
    }
}

pub async fn require_allowed_origin(
    State(origins): State<AllowedOrigins>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(origin) = request.headers().get(ORIGIN) {
        if !origins.allows(origin) {
            debug!(origin = ?origin, "rejecting request from disallowed origin");
            return ServerError::from_code(ErrorCode::AuthForbidden).into_response();
        }
    }

    next.run(request).await
}
