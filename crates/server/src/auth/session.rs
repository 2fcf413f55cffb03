// Session resolution.
//
// Sessions are issued elsewhere (login/registration). This module only turns
// the session cookie plus the optional tab token header into an
// `AuthContext`, or rejects the request with 401.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::{HeaderMap, COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, error};

use super::{AccountRecord, AuthContext, SessionRecord, SessionTabRecord, TOKEN_LEN};
use crate::error::{ErrorCode, ServerError};
use crate::store::{MemoryStore, Store, StoreError};

pub const DEFAULT_SESSION_COOKIE_NAME: &str = "notee-session";
pub const SESSION_TAB_HEADER: &str = "x-session-tab-token";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("missing session cookie")]
    MissingCookie,
    #[error("malformed session token")]
    MalformedToken,
    #[error("unknown session")]
    UnknownSession,
    #[error("session is disabled or expired")]
    Inactive,
    #[error(transparent)]
    Store(#[from] StoreError),
}

type SessionRow = (AccountRecord, SessionRecord, Option<SessionTabRecord>);

#[derive(Clone)]
pub struct SessionResolver {
    store: Store,
    cookie_name: Arc<str>,
}

impl SessionResolver {
    pub fn new(store: Store, cookie_name: impl Into<Arc<str>>) -> Self {
        Self { store, cookie_name: cookie_name.into() }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Result<AuthContext, SessionError> {
        let session_token =
            session_cookie(headers, &self.cookie_name).ok_or(SessionError::MissingCookie)?;
        if session_token.len() != TOKEN_LEN {
            return Err(SessionError::MalformedToken);
        }

        let presented_tab_token = headers
            .get(SESSION_TAB_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned);

        let (account, session, session_tab) = match &self.store {
            Store::Postgres(pool) => {
                lookup_pg(pool, session_token, presented_tab_token.as_deref()).await?
            }
            Store::Memory(memory) => {
                lookup_memory(&*memory.read().await, session_token, presented_tab_token.as_deref())
            }
        }
        .ok_or(SessionError::UnknownSession)?;

        if !session.is_usable_at(Utc::now()) {
            return Err(SessionError::Inactive);
        }

        Ok(AuthContext { account, session, session_tab, presented_tab_token })
    }
}

/// Resolve the session and stash the [`AuthContext`] in request extensions.
pub async fn require_session(
    State(resolver): State<SessionResolver>,
    mut request: Request,
    next: Next,
) -> Response {
    match resolver.resolve(request.headers()).await {
        Ok(auth) => {
            request.extensions_mut().insert(auth);
            next.run(request).await
        }
        Err(SessionError::Store(store_error)) => {
            error!(error = %store_error, "session lookup failed");
            ServerError::from_code(ErrorCode::InternalError).into_response()
        }
        Err(rejection) => {
            debug!(reason = %rejection, "rejecting request without a valid session");
            ServerError::from_code(ErrorCode::AuthInvalidSession).into_response()
        }
    }
}

fn session_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

async fn lookup_pg(
    pool: &PgPool,
    session_token: &str,
    tab_token: Option<&str>,
) -> Result<Option<SessionRow>, StoreError> {
    let Some(session) = sqlx::query_as::<_, SessionRecord>(
        r#"
SELECT id, account_id, token, disabled, expires_at, created_at, modified_at
FROM sessions
WHERE token = $1
        "#,
    )
    .bind(session_token)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let Some(account) = sqlx::query_as::<_, AccountRecord>(
        r#"
SELECT id, email, active_edit_session_tab_id, created_at, modified_at
FROM accounts
WHERE id = $1
        "#,
    )
    .bind(session.account_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let session_tab = match tab_token {
        Some(tab_token) => {
            sqlx::query_as::<_, SessionTabRecord>(
                r#"
SELECT id, session_id, token, created_at, modified_at
FROM session_tabs
WHERE token = $1 AND session_id = $2
                "#,
            )
            .bind(tab_token)
            .bind(session.id)
            .fetch_optional(pool)
            .await?
        }
        None => None,
    };

    Ok(Some((account, session, session_tab)))
}

fn lookup_memory(
    store: &MemoryStore,
    session_token: &str,
    tab_token: Option<&str>,
) -> Option<SessionRow> {
    let session = store.sessions.values().find(|session| session.token == session_token)?;
    let account = store.accounts.get(&session.account_id)?;
    let session_tab = tab_token.and_then(|tab_token| {
        store
            .session_tabs
            .values()
            .find(|tab| tab.token == tab_token && tab.session_id == session.id)
            .cloned()
    });

    Some((account.clone(), session.clone(), session_tab))
}
