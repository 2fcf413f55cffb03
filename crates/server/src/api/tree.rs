use axum::{
    extract::{Extension, State},
    Json,
};
use chrono::{DateTime, Utc};
use notee_common::tree::{validate_structure, TreeNode};
use notee_common::types::{Revision, TreeDocument};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, ApiState};
use crate::auth::AuthContext;
use crate::documents::{check_next_revision, WriteOutcome};
use crate::lock::ResourceKind;
use crate::validation::ValidatedJson;

#[derive(Debug, Serialize)]
pub struct TreeView {
    pub structure: Vec<TreeNode>,
    pub revision: Revision,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl From<TreeDocument> for TreeView {
    fn from(tree: TreeDocument) -> Self {
        Self {
            structure: tree.structure,
            revision: tree.revision,
            created: tree.created_at,
            modified: tree.modified_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTreeRequest {
    pub structure: Vec<TreeNode>,
    pub revision: Revision,
}

pub async fn get_tree(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<TreeView>, ApiError> {
    let tree = state.documents.read_tree(auth.account.id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(tree.into()))
}

/// Replace the whole tree. The submitted structure must reference every note
/// the account owns and nothing else.
pub async fn update_tree(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(body): ValidatedJson<UpdateTreeRequest>,
) -> Result<Json<TreeView>, ApiError> {
    let account_id = auth.account.id;
    let tree = state.documents.read_tree(account_id).await?.ok_or(ApiError::NotFound)?;

    // cheap rejection before queueing on the lease
    if !check_next_revision(tree.revision, body.revision) {
        return Err(ApiError::RevisionConflict { current_revision: tree.revision });
    }

    let documents = &state.documents;
    state
        .locks
        .with_lease(ResourceKind::Tree, tree.id, || async move {
            let note_ids = documents.note_ids(account_id).await?;
            validate_structure(&body.structure, &note_ids)?;

            let UpdateTreeRequest { structure, revision } = body;
            let outcome = documents
                .write_tree(account_id, revision, |tree| tree.structure = structure)
                .await?;
            match outcome {
                WriteOutcome::Committed(tree) => {
                    info!(%account_id, revision = tree.revision, "tree committed");
                    Ok(Json(tree.into()))
                }
                WriteOutcome::Conflict { current_revision } => {
                    Err(ApiError::RevisionConflict { current_revision })
                }
                WriteOutcome::NotFound => Err(ApiError::NotFound),
            }
        })
        .await
}
