// Core document types shared by the server and clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tree::TreeNode;

/// Optimistic-concurrency counter. Starts at 0, each committed write is +1.
pub type Revision = i32;

/// The single folder/note tree owned by an account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeDocument {
    pub id: Uuid,
    pub account_id: Uuid,
    pub revision: Revision,
    pub structure: Vec<TreeNode>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Server-attached message displayed above a note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteNotice {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub content: String,
    #[serde(rename = "created", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// A note body. `content` is ciphertext produced by the client; the server
/// never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteDocument {
    pub id: Uuid,
    pub account_id: Uuid,
    pub title: String,
    pub revision: Revision,
    pub content: String,
    #[serde(default)]
    pub notices: Vec<NoteNotice>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl NoteDocument {
    pub fn summary(&self) -> NoteSummary {
        NoteSummary {
            id: self.id,
            title: self.title.clone(),
            revision: self.revision,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// List projection of a note, without content or notices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteSummary {
    pub id: Uuid,
    pub title: String,
    pub revision: Revision,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}
