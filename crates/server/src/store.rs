// Backing store shared by the lock manager, the document store and
// session resolution.
//
// Production runs on Postgres. The in-memory variant mirrors the same
// tables and constraints so router and concurrency tests run without a
// database.

use std::collections::HashMap;
use std::sync::Arc;

use notee_common::types::{NoteDocument, TreeDocument};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{AccountRecord, SessionRecord, SessionTabRecord};
use crate::lock::LeaseRecord;

/// Postgres SQLSTATE for `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub enum Store {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryStore>>),
}

impl Store {
    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryStore::default())))
    }
}

/// Table-per-map mirror of the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Keyed by `resource_key`, which gives the uniqueness constraint for free.
    pub(crate) leases: HashMap<String, LeaseRecord>,
    pub(crate) accounts: HashMap<Uuid, AccountRecord>,
    pub(crate) sessions: HashMap<Uuid, SessionRecord>,
    pub(crate) session_tabs: HashMap<Uuid, SessionTabRecord>,
    /// Keyed by account id; one tree per account.
    pub(crate) trees: HashMap<Uuid, TreeDocument>,
    pub(crate) notes: HashMap<Uuid, NoteDocument>,
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(database_error) => {
            database_error.code().as_deref() == Some(UNIQUE_VIOLATION)
        }
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::Store;
    use crate::auth::{generate_token, AccountRecord, SessionRecord};

    /// Insert an account with one live session into a memory store.
    pub(crate) async fn seed_account(store: &Store, email: &str) -> (AccountRecord, SessionRecord) {
        let Store::Memory(memory) = store else {
            panic!("fixtures only seed the memory store");
        };

        let now = Utc::now();
        let account = AccountRecord {
            id: Uuid::new_v4(),
            email: email.to_owned(),
            active_edit_session_tab_id: None,
            created_at: now,
            modified_at: now,
        };
        let session = new_session(account.id);

        let mut guard = memory.write().await;
        guard.accounts.insert(account.id, account.clone());
        guard.sessions.insert(session.id, session.clone());
        (account, session)
    }

    /// Add another session (a second device) to an existing account.
    pub(crate) async fn seed_session(store: &Store, account_id: Uuid) -> SessionRecord {
        let Store::Memory(memory) = store else {
            panic!("fixtures only seed the memory store");
        };

        let session = new_session(account_id);
        memory.write().await.sessions.insert(session.id, session.clone());
        session
    }

    fn new_session(account_id: Uuid) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: Uuid::new_v4(),
            account_id,
            token: generate_token(),
            disabled: false,
            expires_at: now + Duration::days(7),
            created_at: now,
            modified_at: now,
        }
    }
}
