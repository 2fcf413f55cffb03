pub mod auth;
pub mod note;
pub mod tree;

use axum::{
    extract::rejection::PathRejection,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use notee_common::tree::IntegrityError;
use notee_common::types::Revision;
use serde_json::json;
use tracing::error;

use crate::{
    auth::{
        editor::{require_edit_permission, EditorArbiter},
        origin::{require_allowed_origin, AllowedOrigins},
        session::{require_session, SessionResolver},
    },
    documents::DocumentStore,
    error::{ErrorCode, ServerError},
    lock::{LeaseLockManager, LockError},
    store::{Store, StoreError},
};

#[derive(Clone)]
pub struct ApiState {
    pub documents: DocumentStore,
    pub locks: LeaseLockManager,
    pub editors: EditorArbiter,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { message: String },
    NotFound,
    RevisionConflict { current_revision: Revision },
    Integrity(IntegrityError),
    LockTimeout { resource_key: String },
    Internal(anyhow::Error),
}

impl From<LockError> for ApiError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Timeout { resource_key } => Self::LockTimeout { resource_key },
            LockError::Store(error) => Self::Internal(error.into()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::Internal(error.into())
    }
}

impl From<IntegrityError> for ApiError {
    fn from(error: IntegrityError) -> Self {
        Self::Integrity(error)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest { message: rejection.body_text() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest { message } => {
                ServerError::new(ErrorCode::ValidationFailed, message).into_response()
            }
            Self::NotFound => ServerError::from_code(ErrorCode::NotFound).into_response(),
            Self::RevisionConflict { current_revision } => {
                ServerError::from_code(ErrorCode::RevisionConflict)
                    .with_details(json!({ "currentRevision": current_revision }))
                    .into_response()
            }
            Self::Integrity(error) => {
                let (code, details) = match &error {
                    IntegrityError::DuplicateFolderIds { folder_ids } => {
                        (ErrorCode::TreeDuplicateIds, json!({ "errorFolderIds": folder_ids }))
                    }
                    IntegrityError::MissingNotes { note_ids } => {
                        (ErrorCode::TreeMissingNotes, json!({ "errorNoteIds": note_ids }))
                    }
                    IntegrityError::DanglingNotes { note_ids } => {
                        (ErrorCode::TreeDanglingNotes, json!({ "errorNoteIds": note_ids }))
                    }
                };
                ServerError::new(code, error.to_string()).with_details(details).into_response()
            }
            Self::LockTimeout { resource_key } => {
                tracing::warn!(resource_key = %resource_key, "lease acquisition timed out");
                ServerError::from_code(ErrorCode::LockTimeout).into_response()
            }
            Self::Internal(error) => {
                error!(error = ?error, "api internal error");
                ServerError::from_code(ErrorCode::InternalError).into_response()
            }
        }
    }
}

/// All `/api` routes. Every route requires a session; write routes also
/// require edit authority, and the editor-authority routes reject foreign
/// origins.
pub fn build_router(
    store: Store,
    locks: LeaseLockManager,
    session_cookie_name: &str,
    allowed_origins: AllowedOrigins,
) -> Router {
    let state = ApiState {
        documents: DocumentStore::new(store.clone()),
        editors: EditorArbiter::new(store.clone(), locks.clone()),
        locks,
    };
    let resolver = SessionResolver::new(store, session_cookie_name);

    Router::new()
        .route(
            "/api/tree",
            get(tree::get_tree).merge(
                post(tree::update_tree)
                    .route_layer(middleware::from_fn(require_edit_permission)),
            ),
        )
        .route(
            "/api/note",
            get(note::list_notes).merge(
                post(note::create_note)
                    .route_layer(middleware::from_fn(require_edit_permission)),
            ),
        )
        .route(
            "/api/note/{note_id}",
            get(note::get_note).merge(
                patch(note::update_note)
                    .route_layer(middleware::from_fn(require_edit_permission)),
            ),
        )
        .route(
            "/api/auth",
            get(auth::get_status).route_layer(middleware::from_fn_with_state(
                allowed_origins.clone(),
                require_allowed_origin,
            )),
        )
        .route(
            "/api/auth/active-editor",
            post(auth::acquire_active_editor)
                .delete(auth::release_active_editor)
                .route_layer(middleware::from_fn_with_state(
                    allowed_origins,
                    require_allowed_origin,
                )),
        )
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(resolver, require_session))
}
