use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{ApiError, ApiState};
use crate::auth::AuthContext;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub is_active_editor: bool,
    pub does_account_have_active_editor: bool,
    pub session: SessionView,
    pub account: AccountView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AccountView {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEditorGrant {
    pub session_tab: SessionTabView,
}

#[derive(Debug, Serialize)]
pub struct SessionTabView {
    pub token: String,
}

pub async fn get_status(Extension(auth): Extension<AuthContext>) -> Json<AuthStatus> {
    let is_active_editor = auth.has_edit_permission();
    let AuthContext { account, session, .. } = auth;

    Json(AuthStatus {
        is_active_editor,
        does_account_have_active_editor: account.active_edit_session_tab_id.is_some(),
        session: SessionView { expires_at: session.expires_at },
        account: AccountView { id: account.id, email: account.email },
    })
}

/// Take edit authority for the calling tab, creating the tab if the request
/// did not present one. Any other tab of the account loses authority.
pub async fn acquire_active_editor(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ActiveEditorGrant>, ApiError> {
    let tab = state
        .editors
        .acquire_editor(auth.account.id, auth.session.id, auth.session_tab.clone())
        .await?;
    Ok(Json(ActiveEditorGrant { session_tab: SessionTabView { token: tab.token } }))
}

pub async fn release_active_editor(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<StatusCode, ApiError> {
    state.editors.release_editor(auth.account.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
