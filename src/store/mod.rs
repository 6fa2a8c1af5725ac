//! Storage collaborators for accounts, sessions, tenants and rate-limit counters.
//!
//! Flow Overview: the auth subsystem talks to these traits only. `memory`
//! backs tests and single-process dev runs; `postgres` backs production and is
//! what makes rate limiting correct across multiple service instances.
//!
//! Single-row updates are last-writer-wins. Nothing here holds a lock across
//! requests.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::{future::Future, pin::Pin, sync::Arc};
use uuid::Uuid;

use crate::model::{Account, Tenant};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryAccountStore, MemoryCounterStore, MemorySessionStore, MemoryTenantStore};
pub use postgres::{PgAccountStore, PgCounterStore, PgSessionStore, PgTenantStore};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Outcome of inserting a row guarded by a unique column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Conflict,
}

/// Server-side half of a cookie session. The cookie only carries an opaque id;
/// the account is re-fetched by its API key on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub account_key: String,
    pub issued_at: DateTime<Utc>,
    pub last_refresh: DateTime<Utc>,
}

pub trait AccountStore: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Account>>;

    /// Lookup by normalized email among non-deleted accounts.
    fn find_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<Account>>;

    fn find_by_api_key<'a>(&'a self, api_key: &'a str) -> StoreFuture<'a, Option<Account>>;

    fn find_by_reset_digest<'a>(&'a self, digest: &'a [u8]) -> StoreFuture<'a, Option<Account>>;

    /// Checks every account, soft-deleted ones included.
    fn api_key_taken<'a>(&'a self, api_key: &'a str) -> StoreFuture<'a, bool>;

    /// Insert a new account; `Conflict` when the email is already registered.
    fn insert<'a>(&'a self, account: &'a Account) -> StoreFuture<'a, InsertOutcome>;

    fn update<'a>(&'a self, account: &'a Account) -> StoreFuture<'a, ()>;

    fn soft_delete(
        &self,
        id: Uuid,
        deleted_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    fn restore(&self, id: Uuid) -> StoreFuture<'_, bool>;

    /// Hard-delete accounts soft-deleted before `cutoff`.
    fn purge_deleted(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64>;
}

pub trait SessionStore: Send + Sync {
    fn insert<'a>(&'a self, digest: &'a [u8], record: &'a SessionRecord)
    -> StoreFuture<'a, InsertOutcome>;

    fn find<'a>(&'a self, digest: &'a [u8]) -> StoreFuture<'a, Option<SessionRecord>>;

    fn touch<'a>(&'a self, digest: &'a [u8], at: DateTime<Utc>) -> StoreFuture<'a, ()>;

    /// Idempotent: deleting a missing session is not an error.
    fn delete<'a>(&'a self, digest: &'a [u8]) -> StoreFuture<'a, ()>;

    /// Delete sessions last refreshed before `cutoff`.
    fn purge_idle(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64>;
}

pub trait TenantStore: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Tenant>>;

    /// Lookup by URL key. `with_deleted` widens the default scope.
    fn find_by_url_key<'a>(
        &'a self,
        url_key: &'a str,
        with_deleted: bool,
    ) -> StoreFuture<'a, Option<Tenant>>;

    /// Checks every tenant, soft-deleted ones included.
    fn url_key_taken<'a>(&'a self, url_key: &'a str) -> StoreFuture<'a, bool>;

    fn insert<'a>(&'a self, tenant: &'a Tenant) -> StoreFuture<'a, InsertOutcome>;

    fn soft_delete(
        &self,
        id: Uuid,
        deleted_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    fn restore(&self, id: Uuid) -> StoreFuture<'_, bool>;

    fn purge_deleted(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64>;
}

/// Shared fixed-window counters for the rate limiter.
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new count. A key that reached
    /// `expires_at` starts over from zero.
    fn increment<'a>(
        &'a self,
        key: &'a str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, u64>;

    /// Delete counters whose window ended at or before `now`.
    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64>;
}

/// Where a store keeps its rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
}

impl Backend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(anyhow::anyhow!("unknown store backend: {other}")),
        }
    }
}

/// Connect the shared pool used by every `PostgreSQL` store.
///
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn connect(dsn: &str) -> Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(std::time::Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

/// Which backend holds the rows and which holds the rate-limit counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub store: Backend,
    pub rate_limit_store: Backend,
    pub dsn: Option<String>,
}

/// Every store the service needs, opened from a [`StorageConfig`].
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub tenants: Arc<dyn TenantStore>,
    pub counters: Arc<dyn CounterStore>,
    pub pool: Option<sqlx::PgPool>,
}

impl StorageConfig {
    fn needs_database(&self) -> bool {
        self.store == Backend::Postgres || self.rate_limit_store == Backend::Postgres
    }

    /// # Errors
    /// Returns an error if a postgres backend is selected without a DSN.
    pub fn validate(&self) -> Result<()> {
        if self.needs_database() && self.dsn.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("a DSN is required when a postgres store is selected");
        }
        Ok(())
    }

    /// Open the configured stores, connecting to the database only when a
    /// postgres backend is selected.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the database is
    /// unreachable.
    pub async fn open(&self) -> Result<Stores> {
        self.validate()?;
        let pool = match self.dsn.as_deref() {
            Some(dsn) if self.needs_database() => Some(connect(dsn).await?),
            _ => None,
        };

        let (accounts, sessions, tenants): (
            Arc<dyn AccountStore>,
            Arc<dyn SessionStore>,
            Arc<dyn TenantStore>,
        ) = match (self.store, &pool) {
            (Backend::Postgres, Some(pool)) => (
                Arc::new(PgAccountStore::new(pool.clone())),
                Arc::new(PgSessionStore::new(pool.clone())),
                Arc::new(PgTenantStore::new(pool.clone())),
            ),
            _ => (
                Arc::new(MemoryAccountStore::new()),
                Arc::new(MemorySessionStore::new()),
                Arc::new(MemoryTenantStore::new()),
            ),
        };
        let counters: Arc<dyn CounterStore> = match (self.rate_limit_store, &pool) {
            (Backend::Postgres, Some(pool)) => Arc::new(PgCounterStore::new(pool.clone())),
            _ => Arc::new(MemoryCounterStore::new()),
        };

        tracing::info!(
            store = self.store.as_str(),
            rate_limit_store = self.rate_limit_store.as_str(),
            "stores opened"
        );
        Ok(Stores {
            accounts,
            sessions,
            tenants,
            counters,
            pool,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub accounts: u64,
    pub tenants: u64,
}

/// Hard-delete accounts and tenants soft-deleted before `cutoff`.
///
/// # Errors
/// Returns an error if either store fails; accounts go first.
pub async fn purge_deleted(
    accounts: &dyn AccountStore,
    tenants: &dyn TenantStore,
    cutoff: DateTime<Utc>,
) -> Result<PurgeReport> {
    let accounts = accounts
        .purge_deleted(cutoff)
        .await
        .context("failed to purge soft-deleted accounts")?;
    let tenants = tenants
        .purge_deleted(cutoff)
        .await
        .context("failed to purge soft-deleted tenants")?;
    tracing::info!(accounts, tenants, %cutoff, "purged soft-deleted rows");
    Ok(PurgeReport { accounts, tenants })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub counters: u64,
}

/// Drop sessions idle for longer than `idle_timeout` and counters whose
/// window has closed.
///
/// # Errors
/// Returns an error if either store fails; sessions go first.
pub async fn sweep_expired(
    sessions: &dyn SessionStore,
    counters: &dyn CounterStore,
    idle_timeout: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let sessions = sessions
        .purge_idle(now - idle_timeout)
        .await
        .context("failed to purge idle sessions")?;
    let counters = counters
        .purge_expired(now)
        .await
        .context("failed to purge expired rate limit counters")?;
    tracing::debug!(sessions, counters, "swept expired rows");
    Ok(SweepReport { sessions, counters })
}

/// Run [`sweep_expired`] every `every` until the task is aborted. A failed
/// sweep is logged and retried on the next tick.
pub fn spawn_sweeper(
    sessions: Arc<dyn SessionStore>,
    counters: Arc<dyn CounterStore>,
    idle_timeout: Duration,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) =
                sweep_expired(sessions.as_ref(), counters.as_ref(), idle_timeout, Utc::now()).await
            {
                tracing::error!("sweep failed: {err:#}");
            }
        }
    })
}
