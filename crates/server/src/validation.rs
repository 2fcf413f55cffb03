// Request body validation.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{ErrorCode, ServerError};

/// Maximum REST request body in bytes (1 MiB).
pub const MAX_REST_BODY_BYTES: usize = 1024 * 1024;

/// A JSON body extractor that returns a structured [`ServerError`] on failure
/// instead of axum's plain-text rejection.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => Err(rejection_error(&rejection).into_response()),
        }
    }
}

fn rejection_error(rejection: &JsonRejection) -> ServerError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ServerError::from_code(ErrorCode::PayloadTooLarge)
            .with_details(json!({ "limit_bytes": MAX_REST_BODY_BYTES }));
    }

    let (message, details) = classify_json_rejection(rejection);
    ServerError::new(ErrorCode::ValidationFailed, message).with_details(details)
}

fn classify_json_rejection(rejection: &JsonRejection) -> (String, Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            (format!("invalid JSON payload: {}", e.body_text()), json!({ "kind": "data_error" }))
        }
        JsonRejection::JsonSyntaxError(e) => {
            (format!("malformed JSON: {e}"), json!({ "kind": "syntax_error" }))
        }
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            json!({ "kind": "missing_content_type" }),
        ),
        other => (format!("request body error: {other}"), json!({ "kind": "body_error" })),
    }
}
