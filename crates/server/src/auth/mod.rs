pub mod editor;
pub mod origin;
pub mod session;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use uuid::Uuid;

/// Length of session and tab tokens.
pub const TOKEN_LEN: usize = 128;

/// 96 random bytes encode to exactly [`TOKEN_LEN`] url-safe characters.
const TOKEN_BYTES: usize = TOKEN_LEN / 4 * 3;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AccountRecord {
    pub id: Uuid,
    pub email: String,
    pub active_edit_session_tab_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token: String,
    pub disabled: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.disabled && self.expires_at >= now
    }
}

/// One browser tab (or device window) within a session.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SessionTabRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Identity attached to every authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: AccountRecord,
    pub session: SessionRecord,
    /// The tab matched by the presented tab token, if any.
    pub session_tab: Option<SessionTabRecord>,
    pub presented_tab_token: Option<String>,
}

impl AuthContext {
    pub fn has_edit_permission(&self) -> bool {
        editor::has_edit_permission(
            &self.account,
            self.session_tab.as_ref(),
            self.presented_tab_token.as_deref(),
        )
    }
}

/// Fresh random token of [`TOKEN_LEN`] url-safe characters.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
