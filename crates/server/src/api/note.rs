use axum::{
    extract::{rejection::PathRejection, Extension, Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use notee_common::types::{NoteDocument, NoteNotice, NoteSummary, Revision};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{ApiError, ApiState};
use crate::auth::AuthContext;
use crate::documents::WriteOutcome;
use crate::lock::ResourceKind;
use crate::validation::ValidatedJson;

#[derive(Debug, Serialize)]
pub struct NoteView {
    pub id: Uuid,
    pub title: String,
    pub revision: Revision,
    pub notices: Vec<NoteNotice>,
    pub content: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl From<NoteDocument> for NoteView {
    fn from(note: NoteDocument) -> Self {
        Self {
            id: note.id,
            title: note.title,
            revision: note.revision,
            notices: note.notices,
            content: note.content,
            created: note.created_at,
            modified: note.modified_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NoteSummaryView {
    pub id: Uuid,
    pub title: String,
    pub revision: Revision,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl From<NoteSummary> for NoteSummaryView {
    fn from(note: NoteSummary) -> Self {
        Self {
            id: note.id,
            title: note.title,
            revision: note.revision,
            created: note.created_at,
            modified: note.modified_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NoteEnvelope {
    pub note: NoteView,
}

#[derive(Debug, Serialize)]
pub struct NotesEnvelope {
    pub notes: Vec<NoteSummaryView>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNoteRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateNoteRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub revision: Revision,
}

pub async fn list_notes(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<NotesEnvelope>, ApiError> {
    let notes = state.documents.list_notes(auth.account.id).await?;
    Ok(Json(NotesEnvelope { notes: notes.into_iter().map(NoteSummaryView::from).collect() }))
}

pub async fn get_note(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<NoteEnvelope>, ApiError> {
    let Path(note_id) = path?;
    let note =
        state.documents.read_note(auth.account.id, note_id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(NoteEnvelope { note: note.into() }))
}

/// New notes are not added to the tree here; the client follows up with a
/// tree update that references them.
pub async fn create_note(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(body): ValidatedJson<CreateNoteRequest>,
) -> Result<Json<NoteEnvelope>, ApiError> {
    let note = state.documents.create_note(auth.account.id, body.title, body.content).await?;
    info!(account_id = %auth.account.id, note_id = %note.id, "note created");
    Ok(Json(NoteEnvelope { note: note.into() }))
}

pub async fn update_note(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    path: Result<Path<Uuid>, PathRejection>,
    ValidatedJson(body): ValidatedJson<UpdateNoteRequest>,
) -> Result<Json<NoteEnvelope>, ApiError> {
    let Path(note_id) = path?;
    let account_id = auth.account.id;

    // unknown notes never take a lease
    if state.documents.read_note(account_id, note_id).await?.is_none() {
        return Err(ApiError::NotFound);
    }

    let documents = &state.documents;
    state
        .locks
        .with_lease(ResourceKind::Note, note_id, || async move {
            let UpdateNoteRequest { title, content, revision } = body;
            let outcome = documents
                .write_note(account_id, note_id, revision, |note| {
                    if let Some(title) = title {
                        note.title = title;
                    }
                    if let Some(content) = content {
                        note.content = content;
                    }
                })
                .await?;

            match outcome {
                WriteOutcome::Committed(note) => Ok(Json(NoteEnvelope { note: note.into() })),
                WriteOutcome::Conflict { current_revision } => {
                    Err(ApiError::RevisionConflict { current_revision })
                }
                WriteOutcome::NotFound => Err(ApiError::NotFound),
            }
        })
        .await
}
