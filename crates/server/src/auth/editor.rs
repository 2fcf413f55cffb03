// Single-active-editor arbitration.
//
// An account has at most one tab with edit authority, recorded as
// `accounts.active_edit_session_tab_id`. Acquiring always wins and replaces
// the previous holder. Writes are gated on the presented tab token matching
// that tab.

use axum::{
    extract::{Extension, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::{generate_token, AccountRecord, AuthContext, SessionTabRecord};
use crate::error::{ErrorCode, ServerError};
use crate::lock::{LeaseLockManager, LockError, ResourceKind};
use crate::store::{MemoryStore, Store};

/// Edit authority requires all three: a tab was matched, it is the account's
/// active editor, and the presented token is that tab's token.
pub fn has_edit_permission(
    account: &AccountRecord,
    session_tab: Option<&SessionTabRecord>,
    presented_token: Option<&str>,
) -> bool {
    let Some(tab) = session_tab else {
        return false;
    };

    account.active_edit_session_tab_id == Some(tab.id)
        && presented_token == Some(tab.token.as_str())
}

/// Gate for write routes. Runs after [`super::session::require_session`].
pub async fn require_edit_permission(
    Extension(auth): Extension<AuthContext>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.has_edit_permission() {
        debug!(account_id = %auth.account.id, "write rejected without edit authority");
        return ServerError::from_code(ErrorCode::AuthForbidden).into_response();
    }

    next.run(request).await
}

#[derive(Clone)]
pub struct EditorArbiter {
    store: Store,
    locks: LeaseLockManager,
}

impl EditorArbiter {
    pub fn new(store: Store, locks: LeaseLockManager) -> Self {
        Self { store, locks }
    }

    /// Make `existing_tab` (or a new tab of `session_id`) the account's
    /// active editor. Returns the tab whose token the client must present.
    pub async fn acquire_editor(
        &self,
        account_id: Uuid,
        session_id: Uuid,
        existing_tab: Option<SessionTabRecord>,
    ) -> Result<SessionTabRecord, LockError> {
        self.locks
            .with_lease(ResourceKind::Account, account_id, || async move {
                let tab = match existing_tab {
                    Some(tab) => tab,
                    None => self.create_tab(session_id).await?,
                };
                self.set_active_editor(account_id, Some(tab.id)).await?;
                info!(%account_id, session_tab_id = %tab.id, "active editor acquired");
                Ok(tab)
            })
            .await
    }

    /// Clear the account's active editor, whichever tab held it.
    pub async fn release_editor(&self, account_id: Uuid) -> Result<(), LockError> {
        self.locks
            .with_lease(ResourceKind::Account, account_id, || async move {
                self.set_active_editor(account_id, None).await?;
                info!(%account_id, "active editor released");
                Ok(())
            })
            .await
    }

    async fn create_tab(&self, session_id: Uuid) -> Result<SessionTabRecord, LockError> {
        let now = Utc::now();
        let tab = SessionTabRecord {
            id: Uuid::new_v4(),
            session_id,
            token: generate_token(),
            created_at: now,
            modified_at: now,
        };

        match &self.store {
            Store::Postgres(pool) => Ok(create_tab_pg(pool, &tab).await?),
            Store::Memory(memory) => {
                memory.write().await.session_tabs.insert(tab.id, tab.clone());
                Ok(tab)
            }
        }
    }

    async fn set_active_editor(
        &self,
        account_id: Uuid,
        tab_id: Option<Uuid>,
    ) -> Result<(), LockError> {
        let now = Utc::now();

        match &self.store {
            Store::Postgres(pool) => {
                sqlx::query(
                    r#"
UPDATE accounts
SET active_edit_session_tab_id = $1, modified_at = $2
WHERE id = $3
                    "#,
                )
                .bind(tab_id)
                .bind(now)
                .bind(account_id)
                .execute(pool)
                .await?;
            }
            Store::Memory(memory) => {
                set_active_editor_memory(&mut *memory.write().await, account_id, tab_id);
            }
        }

        Ok(())
    }
}

async fn create_tab_pg(
    pool: &PgPool,
    tab: &SessionTabRecord,
) -> Result<SessionTabRecord, sqlx::Error> {
    sqlx::query_as::<_, SessionTabRecord>(
        r#"
INSERT INTO session_tabs (id, session_id, token, created_at, modified_at)
VALUES ($1, $2, $3, $4, $5)
RETURNING id, session_id, token, created_at, modified_at
        "#,
    )
    .bind(tab.id)
    .bind(tab.session_id)
    .bind(&tab.token)
    .bind(tab.created_at)
    .bind(tab.modified_at)
    .fetch_one(pool)
    .await
}

fn set_active_editor_memory(store: &mut MemoryStore, account_id: Uuid, tab_id: Option<Uuid>) {
    if let Some(account) = store.accounts.get_mut(&account_id) {
        account.active_edit_session_tab_id = tab_id;
        account.modified_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TOKEN_LEN;
    use crate::store::fixtures::{seed_account, seed_session};

    fn tab(token: &str) -> SessionTabRecord {
        let now = Utc::now();
        SessionTabRecord {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            token: token.to_owned(),
            created_at: now,
            modified_at: now,
        }
    }

    fn account(active: Option<Uuid>) -> AccountRecord {
        let now = Utc::now();
        AccountRecord {
            id: Uuid::new_v4(),
            email: "gate@notee.test".into(),
            active_edit_session_tab_id: active,
            created_at: now,
            modified_at: now,
        }
    }

    async fn stored_account(store: &Store, account_id: Uuid) -> AccountRecord {
        let Store::Memory(memory) = store else {
            panic!("memory store expected");
        };
        memory.read().await.accounts.get(&account_id).cloned().expect("account")
    }

    #[test]
    fn permission_requires_tab_activity_and_token() {
        let active = tab("token-a");
        let holder = account(Some(active.id));

        assert!(has_edit_permission(&holder, Some(&active), Some("token-a")));
        assert!(!has_edit_permission(&holder, None, Some("token-a")));
        assert!(!has_edit_permission(&holder, Some(&active), None));
        assert!(!has_edit_permission(&holder, Some(&active), Some("token-b")));

        let other = tab("token-b");
        assert!(!has_edit_permission(&holder, Some(&other), Some("token-b")));
        assert!(!has_edit_permission(&account(None), Some(&active), Some("token-a")));
    }

    #[tokio::test]
    async fn acquire_creates_tab_and_makes_it_active() {
        let store = Store::memory();
        let (owner, session) = seed_account(&store, "editor@notee.test").await;
        let arbiter = EditorArbiter::new(store.clone(), LeaseLockManager::new(store.clone()));

        let tab = arbiter.acquire_editor(owner.id, session.id, None).await.expect("acquire");
        assert_eq!(tab.session_id, session.id);
        assert_eq!(tab.token.len(), TOKEN_LEN);

        let refreshed = stored_account(&store, owner.id).await;
        assert_eq!(refreshed.active_edit_session_tab_id, Some(tab.id));
        assert!(has_edit_permission(&refreshed, Some(&tab), Some(&tab.token)));

        let again =
            arbiter.acquire_editor(owner.id, session.id, Some(tab.clone())).await.expect("reuse");
        assert_eq!(again, tab);
    }

    #[tokio::test]
    async fn latest_acquire_supersedes_previous_editor() {
        let store = Store::memory();
        let (owner, laptop) = seed_account(&store, "two-devices@notee.test").await;
        let phone = seed_session(&store, owner.id).await;
        let arbiter = EditorArbiter::new(store.clone(), LeaseLockManager::new(store.clone()));

        let tab_a = arbiter.acquire_editor(owner.id, laptop.id, None).await.expect("acquire a");
        let tab_b = arbiter.acquire_editor(owner.id, phone.id, None).await.expect("acquire b");

        let refreshed = stored_account(&store, owner.id).await;
        assert!(!has_edit_permission(&refreshed, Some(&tab_a), Some(&tab_a.token)));
        assert!(has_edit_permission(&refreshed, Some(&tab_b), Some(&tab_b.token)));
    }

    #[tokio::test]
    async fn release_clears_authority() {
        let store = Store::memory();
        let (owner, session) = seed_account(&store, "release@notee.test").await;
        let locks = LeaseLockManager::new(store.clone());
        let arbiter = EditorArbiter::new(store.clone(), locks.clone());

        let tab = arbiter.acquire_editor(owner.id, session.id, None).await.expect("acquire");
        arbiter.release_editor(owner.id).await.expect("release");

        let refreshed = stored_account(&store, owner.id).await;
        assert_eq!(refreshed.active_edit_session_tab_id, None);
        assert!(!has_edit_permission(&refreshed, Some(&tab), Some(&tab.token)));
        let lease = locks.current_lease(ResourceKind::Account, owner.id).await.expect("query");
        assert!(lease.is_none());
    }
}
