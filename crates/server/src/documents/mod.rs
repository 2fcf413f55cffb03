// Revisioned documents: the per-account tree and the notes.
//
// Every committed write moves the revision from `n` to exactly `n + 1`.
// Callers hold the document's lease while writing; the Postgres UPDATE is
// additionally guarded on the revision it read, so a writer that skipped
// the lease is reported as a conflict rather than silently overwritten.

use chrono::{DateTime, Utc};
use notee_common::tree::TreeNode;
use notee_common::types::{NoteDocument, NoteNotice, NoteSummary, Revision, TreeDocument};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::store::{MemoryStore, Store, StoreError};

/// Result of a revisioned write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    Committed(T),
    /// The submitted revision was not `current_revision + 1`. Nothing changed.
    Conflict { current_revision: Revision },
    NotFound,
}

/// True when `expected` is exactly one past `current`.
pub fn check_next_revision(current: Revision, expected: Revision) -> bool {
    current.checked_add(1) == Some(expected)
}

trait Revisioned: Clone {
    fn revision(&self) -> Revision;

    /// Copy identity from `current` and set the new revision and timestamp.
    fn stamp(&mut self, current: &Self, revision: Revision, modified_at: DateTime<Utc>);
}

impl Revisioned for TreeDocument {
    fn revision(&self) -> Revision {
        self.revision
    }

    fn stamp(&mut self, current: &Self, revision: Revision, modified_at: DateTime<Utc>) {
        self.id = current.id;
        self.account_id = current.account_id;
        self.created_at = current.created_at;
        self.revision = revision;
        self.modified_at = modified_at;
    }
}

impl Revisioned for NoteDocument {
    fn revision(&self) -> Revision {
        self.revision
    }

    fn stamp(&mut self, current: &Self, revision: Revision, modified_at: DateTime<Utc>) {
        self.id = current.id;
        self.account_id = current.account_id;
        self.created_at = current.created_at;
        self.revision = revision;
        self.modified_at = modified_at;
    }
}

/// Apply `mutator` to a copy of `current`, or report the current revision
/// when `expected` is not the next one.
fn prepare_write<D, F>(current: &D, expected: Revision, mutator: F) -> Result<D, Revision>
where
    D: Revisioned,
    F: FnOnce(&mut D),
{
    if !check_next_revision(current.revision(), expected) {
        return Err(current.revision());
    }

    let mut next = current.clone();
    mutator(&mut next);
    next.stamp(current, expected, Utc::now());
    Ok(next)
}

#[derive(sqlx::FromRow)]
struct TreeRow {
    id: Uuid,
    account_id: Uuid,
    revision: Revision,
    structure: Json<Vec<TreeNode>>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<TreeRow> for TreeDocument {
    fn from(row: TreeRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            revision: row.revision,
            structure: row.structure.0,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NoteRow {
    id: Uuid,
    account_id: Uuid,
    title: String,
    revision: Revision,
    content: String,
    notices: Json<Vec<NoteNotice>>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<NoteRow> for NoteDocument {
    fn from(row: NoteRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            title: row.title,
            revision: row.revision,
            content: row.content,
            notices: row.notices.0,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NoteSummaryRow {
    id: Uuid,
    title: String,
    revision: Revision,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<NoteSummaryRow> for NoteSummary {
    fn from(row: NoteSummaryRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            revision: row.revision,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

const TREE_COLUMNS: &str = "id, account_id, revision, structure, created_at, modified_at";
const NOTE_COLUMNS: &str =
    "id, account_id, title, revision, content, notices, created_at, modified_at";

#[derive(Clone)]
pub struct DocumentStore {
    store: Store,
}

impl DocumentStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn read_tree(&self, account_id: Uuid) -> Result<Option<TreeDocument>, StoreError> {
        match &self.store {
            Store::Postgres(pool) => read_tree_pg(pool, account_id).await,
            Store::Memory(memory) => Ok(memory.read().await.trees.get(&account_id).cloned()),
        }
    }

    /// Create the account's empty tree at revision 0, or return the existing one.
    pub async fn provision_tree(&self, account_id: Uuid) -> Result<TreeDocument, StoreError> {
        let now = Utc::now();
        let fresh = TreeDocument {
            id: Uuid::new_v4(),
            account_id,
            revision: 0,
            structure: Vec::new(),
            created_at: now,
            modified_at: now,
        };

        match &self.store {
            Store::Postgres(pool) => {
                sqlx::query(
                    r#"
INSERT INTO trees (id, account_id, revision, structure, created_at, modified_at)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (account_id) DO NOTHING
                    "#,
                )
                .bind(fresh.id)
                .bind(fresh.account_id)
                .bind(fresh.revision)
                .bind(Json(&fresh.structure))
                .bind(fresh.created_at)
                .bind(fresh.modified_at)
                .execute(pool)
                .await?;

                // a concurrent provision may have won the insert
                Ok(read_tree_pg(pool, account_id).await?.unwrap_or(fresh))
            }
            Store::Memory(memory) => {
                let mut guard = memory.write().await;
                Ok(guard.trees.entry(account_id).or_insert(fresh).clone())
            }
        }
    }

    /// Replace the tree through `mutator` if `expected` is the next revision.
    ///
    /// Call inside the tree's lease.
    pub async fn write_tree<F>(
        &self,
        account_id: Uuid,
        expected: Revision,
        mutator: F,
    ) -> Result<WriteOutcome<TreeDocument>, StoreError>
    where
        F: FnOnce(&mut TreeDocument),
    {
        match &self.store {
            Store::Postgres(pool) => {
                let Some(current) = read_tree_pg(pool, account_id).await? else {
                    return Ok(WriteOutcome::NotFound);
                };
                let next = match prepare_write(&current, expected, mutator) {
                    Ok(next) => next,
                    Err(current_revision) => {
                        return Ok(WriteOutcome::Conflict { current_revision });
                    }
                };

                let updated = sqlx::query_as::<_, TreeRow>(&format!(
                    r#"
UPDATE trees
SET structure = $1, revision = $2, modified_at = $3
WHERE id = $4 AND revision = $5
RETURNING {TREE_COLUMNS}
                    "#
                ))
                .bind(Json(&next.structure))
                .bind(next.revision)
                .bind(next.modified_at)
                .bind(current.id)
                .bind(current.revision)
                .fetch_optional(pool)
                .await?;

                match updated {
                    Some(row) => Ok(WriteOutcome::Committed(row.into())),
                    None => Ok(lost_race(pool, "trees", current.id, current.revision).await?),
                }
            }
            Store::Memory(memory) => {
                let mut guard = memory.write().await;
                let Some(current) = guard.trees.get(&account_id) else {
                    return Ok(WriteOutcome::NotFound);
                };
                Ok(match prepare_write(current, expected, mutator) {
                    Ok(next) => {
                        guard.trees.insert(account_id, next.clone());
                        WriteOutcome::Committed(next)
                    }
                    Err(current_revision) => WriteOutcome::Conflict { current_revision },
                })
            }
        }
    }

    pub async fn list_notes(&self, account_id: Uuid) -> Result<Vec<NoteSummary>, StoreError> {
        match &self.store {
            Store::Postgres(pool) => {
                let rows = sqlx::query_as::<_, NoteSummaryRow>(
                    r#"
SELECT id, title, revision, created_at, modified_at
FROM notes
WHERE account_id = $1
ORDER BY created_at, id
                    "#,
                )
                .bind(account_id)
                .fetch_all(pool)
                .await?;

                Ok(rows.into_iter().map(NoteSummary::from).collect())
            }
            Store::Memory(memory) => {
                let guard = memory.read().await;
                let mut notes: Vec<NoteSummary> =
                    account_notes(&guard, account_id).map(NoteDocument::summary).collect();
                notes.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
                Ok(notes)
            }
        }
    }

    /// Ids of every note the account owns.
    pub async fn note_ids(&self, account_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        match &self.store {
            Store::Postgres(pool) => {
                let ids = sqlx::query_scalar::<_, Uuid>(
                    "SELECT id FROM notes WHERE account_id = $1 ORDER BY created_at, id",
                )
                .bind(account_id)
                .fetch_all(pool)
                .await?;
                Ok(ids)
            }
            Store::Memory(memory) => {
                let guard = memory.read().await;
                let mut notes: Vec<&NoteDocument> = account_notes(&guard, account_id).collect();
                notes.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
                Ok(notes.into_iter().map(|note| note.id).collect())
            }
        }
    }

    pub async fn read_note(
        &self,
        account_id: Uuid,
        note_id: Uuid,
    ) -> Result<Option<NoteDocument>, StoreError> {
        match &self.store {
            Store::Postgres(pool) => read_note_pg(pool, account_id, note_id).await,
            Store::Memory(memory) => Ok(memory
                .read()
                .await
                .notes
                .get(&note_id)
                .filter(|note| note.account_id == account_id)
                .cloned()),
        }
    }

    /// New note at revision 0 with no notices.
    pub async fn create_note(
        &self,
        account_id: Uuid,
        title: String,
        content: String,
    ) -> Result<NoteDocument, StoreError> {
        let now = Utc::now();
        let note = NoteDocument {
            id: Uuid::new_v4(),
            account_id,
            title,
            revision: 0,
            content,
            notices: Vec::new(),
            created_at: now,
            modified_at: now,
        };

        match &self.store {
            Store::Postgres(pool) => {
                let row = sqlx::query_as::<_, NoteRow>(&format!(
                    r#"
INSERT INTO notes ({NOTE_COLUMNS})
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
RETURNING {NOTE_COLUMNS}
                    "#
                ))
                .bind(note.id)
                .bind(note.account_id)
                .bind(&note.title)
                .bind(note.revision)
                .bind(&note.content)
                .bind(Json(&note.notices))
                .bind(note.created_at)
                .bind(note.modified_at)
                .fetch_one(pool)
                .await?;
                Ok(row.into())
            }
            Store::Memory(memory) => {
                memory.write().await.notes.insert(note.id, note.clone());
                Ok(note)
            }
        }
    }

    /// Update a note through `mutator` if `expected` is the next revision.
    ///
    /// Call inside the note's lease.
    pub async fn write_note<F>(
        &self,
        account_id: Uuid,
        note_id: Uuid,
        expected: Revision,
        mutator: F,
    ) -> Result<WriteOutcome<NoteDocument>, StoreError>
    where
        F: FnOnce(&mut NoteDocument),
    {
        match &self.store {
            Store::Postgres(pool) => {
                let Some(current) = read_note_pg(pool, account_id, note_id).await? else {
                    return Ok(WriteOutcome::NotFound);
                };
                let next = match prepare_write(&current, expected, mutator) {
                    Ok(next) => next,
                    Err(current_revision) => {
                        return Ok(WriteOutcome::Conflict { current_revision });
                    }
                };

                let updated = sqlx::query_as::<_, NoteRow>(&format!(
                    r#"
UPDATE notes
SET title = $1, content = $2, notices = $3, revision = $4, modified_at = $5
WHERE id = $6 AND account_id = $7 AND revision = $8
RETURNING {NOTE_COLUMNS}
                    "#
                ))
                .bind(&next.title)
                .bind(&next.content)
                .bind(Json(&next.notices))
                .bind(next.revision)
                .bind(next.modified_at)
                .bind(current.id)
                .bind(account_id)
                .bind(current.revision)
                .fetch_optional(pool)
                .await?;

                match updated {
                    Some(row) => Ok(WriteOutcome::Committed(row.into())),
                    None => Ok(lost_race(pool, "notes", current.id, current.revision).await?),
                }
            }
            Store::Memory(memory) => {
                let mut guard = memory.write().await;
                let Some(current) =
                    guard.notes.get(&note_id).filter(|note| note.account_id == account_id)
                else {
                    return Ok(WriteOutcome::NotFound);
                };
                Ok(match prepare_write(current, expected, mutator) {
                    Ok(next) => {
                        guard.notes.insert(note_id, next.clone());
                        WriteOutcome::Committed(next)
                    }
                    Err(current_revision) => WriteOutcome::Conflict { current_revision },
                })
            }
        }
    }
}

fn account_notes(store: &MemoryStore, account_id: Uuid) -> impl Iterator<Item = &NoteDocument> {
    store.notes.values().filter(move |note| note.account_id == account_id)
}

async fn read_tree_pg(
    pool: &PgPool,
    account_id: Uuid,
) -> Result<Option<TreeDocument>, StoreError> {
    let row = sqlx::query_as::<_, TreeRow>(&format!(
        "SELECT {TREE_COLUMNS} FROM trees WHERE account_id = $1"
    ))
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(TreeDocument::from))
}

async fn read_note_pg(
    pool: &PgPool,
    account_id: Uuid,
    note_id: Uuid,
) -> Result<Option<NoteDocument>, StoreError> {
    let row = sqlx::query_as::<_, NoteRow>(&format!(
        "SELECT {NOTE_COLUMNS} FROM notes WHERE id = $1 AND account_id = $2"
    ))
    .bind(note_id)
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(NoteDocument::from))
}

/// The guarded UPDATE matched nothing: someone else moved the revision or
/// removed the row between our read and our write.
async fn lost_race<T>(
    pool: &PgPool,
    table: &'static str,
    id: Uuid,
    read_revision: Revision,
) -> Result<WriteOutcome<T>, StoreError> {
    let revision = sqlx::query_scalar::<_, Revision>(&format!(
        "SELECT revision FROM {table} WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(match revision {
        Some(current_revision) => {
            warn!(table, %id, read_revision, current_revision, "revision moved under lease");
            WriteOutcome::Conflict { current_revision }
        }
        None => WriteOutcome::NotFound,
    })
}
