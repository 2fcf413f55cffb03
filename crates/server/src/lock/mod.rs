// Cooperative lease locks over the relational store.
//
// A lease is a row in `leases` whose `resource_key` is unique. Inserting the
// row takes the lock, deleting it releases the lock. A unique violation on
// insert means another holder has the key. Expired rows keep blocking until
// the sweeper deletes them.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{is_unique_violation, MemoryStore, Store, StoreError};

/// Default lease lifetime.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(5 * 60);
/// Acquisition attempts made by [`LeaseLockManager::with_lease`].
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;
/// Attempt `n`, counted from zero, sleeps `n * step` after failing.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(5);
/// Default period of [`spawn_lease_sweeper`].
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Kind of resource a lease protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Tree,
    Note,
    Account,
}

impl ResourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Note => "note",
            Self::Account => "account",
        }
    }
}

/// `"<kind>:<id>"`, the unique key of a lease row.
pub fn resource_key(kind: ResourceKind, id: Uuid) -> String {
    format!("{}:{id}", kind.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LeaseRecord {
    pub id: Uuid,
    pub resource_key: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    pub ttl: Duration,
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LEASE_TTL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out acquiring lease on {resource_key}")]
    Timeout { resource_key: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for LockError {
    fn from(error: sqlx::Error) -> Self {
        Self::Store(error.into())
    }
}

/// Acquires, releases and sweeps leases.
#[derive(Clone)]
pub struct LeaseLockManager {
    store: Store,
    config: LockConfig,
}

impl LeaseLockManager {
    pub fn new(store: Store) -> Self {
        Self::with_config(store, LockConfig::default())
    }

    pub fn with_config(store: Store, config: LockConfig) -> Self {
        Self { store, config }
    }

    /// One attempt at taking the lease. `None` means the key is held.
    pub async fn acquire(
        &self,
        kind: ResourceKind,
        id: Uuid,
    ) -> Result<Option<Uuid>, StoreError> {
        let key = resource_key(kind, id);
        let now = Utc::now();
        let lease = LeaseRecord {
            id: Uuid::new_v4(),
            resource_key: key,
            expires_at: expires_at_with_ttl(now, self.config.ttl),
            created_at: now,
            modified_at: now,
        };

        match &self.store {
            Store::Postgres(pool) => acquire_pg(pool, &lease).await,
            Store::Memory(memory) => Ok(acquire_memory(&mut *memory.write().await, lease)),
        }
    }

    /// Delete the lease if it still exists. Releasing twice is a no-op.
    pub async fn release(&self, lease_id: Uuid) -> Result<(), StoreError> {
        match &self.store {
            Store::Postgres(pool) => {
                sqlx::query("DELETE FROM leases WHERE id = $1")
                    .bind(lease_id)
                    .execute(pool)
                    .await?;
            }
            Store::Memory(memory) => {
                memory.write().await.leases.retain(|_, lease| lease.id != lease_id);
            }
        }

        Ok(())
    }

    /// Run `critical_section` while holding the lease on `(kind, id)`.
    ///
    /// The lease is released once the section finishes, whether it returned
    /// `Ok`, returned `Err` or panicked. A panic resumes after the release.
    /// A failed release is logged and does not replace the section's result.
    pub async fn with_lease<F, Fut, T, E>(
        &self,
        kind: ResourceKind,
        id: Uuid,
        critical_section: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let lease_id = self.acquire_with_retry(kind, id).await.map_err(E::from)?;

        let outcome =
            AssertUnwindSafe(async move { critical_section().await }).catch_unwind().await;

        if let Err(error) = self.release(lease_id).await {
            warn!(
                lease_id = %lease_id,
                resource_key = %resource_key(kind, id),
                error = %error,
                "failed to release lease, it will expire via the sweeper"
            );
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn acquire_with_retry(&self, kind: ResourceKind, id: Uuid) -> Result<Uuid, LockError> {
        for attempt in 0..self.config.max_attempts {
            if let Some(lease_id) = self.acquire(kind, id).await? {
                return Ok(lease_id);
            }

            debug!(resource_key = %resource_key(kind, id), attempt, "lease held, backing off");
            tokio::time::sleep(self.config.backoff_step * attempt).await;
        }

        Err(LockError::Timeout { resource_key: resource_key(kind, id) })
    }

    /// Delete every lease that expired before now. Returns the count removed.
    pub async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();

        match &self.store {
            Store::Postgres(pool) => {
                let deleted = sqlx::query("DELETE FROM leases WHERE expires_at < $1")
                    .bind(now)
                    .execute(pool)
                    .await?
                    .rows_affected();
                Ok(deleted)
            }
            Store::Memory(memory) => {
                let mut guard = memory.write().await;
                let before = guard.leases.len();
                guard.leases.retain(|_, lease| !lease.is_expired_at(now));
                Ok((before - guard.leases.len()) as u64)
            }
        }
    }

    /// The lease row currently holding `(kind, id)`, expired or not.
    pub async fn current_lease(
        &self,
        kind: ResourceKind,
        id: Uuid,
    ) -> Result<Option<LeaseRecord>, StoreError> {
        let key = resource_key(kind, id);

        match &self.store {
            Store::Postgres(pool) => {
                let lease = sqlx::query_as::<_, LeaseRecord>(
                    r#"
SELECT id, resource_key, expires_at, created_at, modified_at
FROM leases
WHERE resource_key = $1
                    "#,
                )
                .bind(key)
                .fetch_optional(pool)
                .await?;
                Ok(lease)
            }
            Store::Memory(memory) => Ok(memory.read().await.leases.get(&key).cloned()),
        }
    }
}

/// Sweep expired leases now and then on every `interval` tick.
///
/// Failures are logged and the loop keeps going. Abort the handle to stop.
pub fn spawn_lease_sweeper(manager: LeaseLockManager, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match manager.sweep_expired().await {
                Ok(0) => {}
                Ok(swept) => info!(swept, "swept expired leases"),
                Err(error) => warn!(error = %error, "expired lease sweep failed"),
            }
        }
    })
}

async fn acquire_pg(pool: &PgPool, lease: &LeaseRecord) -> Result<Option<Uuid>, StoreError> {
    let inserted = sqlx::query_scalar::<_, Uuid>(
        r#"
INSERT INTO leases (id, resource_key, expires_at, created_at, modified_at)
VALUES ($1, $2, $3, $4, $5)
RETURNING id
        "#,
    )
    .bind(lease.id)
    .bind(&lease.resource_key)
    .bind(lease.expires_at)
    .bind(lease.created_at)
    .bind(lease.modified_at)
    .fetch_one(pool)
    .await;

    match inserted {
        Ok(lease_id) => Ok(Some(lease_id)),
        Err(error) if is_unique_violation(&error) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn acquire_memory(store: &mut MemoryStore, lease: LeaseRecord) -> Option<Uuid> {
    if store.leases.contains_key(&lease.resource_key) {
        return None;
    }

    let lease_id = lease.id;
    store.leases.insert(lease.resource_key.clone(), lease);
    Some(lease_id)
}

fn expires_at_with_ttl(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
