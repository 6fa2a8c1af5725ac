//! `PostgreSQL` stores (see `sql/schema.sql`).
//!
//! Every query runs inside a `db.query` span. Rate-limit counters live here so
//! that all service instances share the same windows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, Span};
use uuid::Uuid;

use super::{
    AccountStore, CounterStore, InsertOutcome, SessionRecord, SessionStore, StoreFuture,
    TenantStore,
};
use crate::model::{Account, Tenant};

const ACCOUNT_COLUMNS: &str = r"
    id, tenant_id, first_name, last_name, email, password_hash, password_salt,
    role, status, api_key, provider, oauth_sub, password_reset_digest,
    password_reset_sent_at, signed_in, created_at, updated_at, deleted_at, deleted_by
";

fn db_span(operation: &'static str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;
    Ok(Account {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        password_salt: row.try_get("password_salt")?,
        role: role.parse()?,
        status: status.parse()?,
        api_key: row.try_get("api_key")?,
        provider: row.try_get("provider")?,
        oauth_sub: row.try_get("oauth_sub")?,
        password_reset_digest: row.try_get("password_reset_digest")?,
        password_reset_sent_at: row.try_get("password_reset_sent_at")?,
        signed_in: row.try_get("signed_in")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
        deleted_by: row.try_get("deleted_by")?,
    })
}

fn tenant_from_row(row: &PgRow) -> Result<Tenant> {
    Ok(Tenant {
        id: row.try_get("id")?,
        url_key: row.try_get("url_key")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
        deleted_by: row.try_get("deleted_by")?,
    })
}

#[derive(Clone, Debug)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one<T>(&self, filter: &str, value: T) -> Result<Option<Account>>
    where
        T: for<'q> sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + Send,
    {
        let query = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {filter} = $1 AND deleted_at IS NULL LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup account")?;
        row.as_ref().map(account_from_row).transpose()
    }
}

impl AccountStore for PgAccountStore {
    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Account>> {
        Box::pin(self.find_one("id", id))
    }

    fn find_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<Account>> {
        Box::pin(self.find_one("email", email))
    }

    fn find_by_api_key<'a>(&'a self, api_key: &'a str) -> StoreFuture<'a, Option<Account>> {
        Box::pin(self.find_one("api_key", api_key))
    }

    fn find_by_reset_digest<'a>(&'a self, digest: &'a [u8]) -> StoreFuture<'a, Option<Account>> {
        Box::pin(self.find_one("password_reset_digest", digest))
    }

    fn api_key_taken<'a>(&'a self, api_key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let query = "SELECT EXISTS (SELECT 1 FROM accounts WHERE api_key = $1)";
            let row = sqlx::query(query)
                .bind(api_key)
                .fetch_one(&self.pool)
                .instrument(db_span("SELECT", query))
                .await
                .context("failed to check api key")?;
            Ok(row.try_get(0)?)
        })
    }

    fn insert<'a>(&'a self, account: &'a Account) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            let query = r"
                INSERT INTO accounts
                    (id, tenant_id, first_name, last_name, email, password_hash, password_salt,
                     role, status, api_key, provider, oauth_sub, password_reset_digest,
                     password_reset_sent_at, signed_in, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ";
            let result = sqlx::query(query)
                .bind(account.id)
                .bind(account.tenant_id)
                .bind(&account.first_name)
                .bind(&account.last_name)
                .bind(&account.email)
                .bind(&account.password_hash)
                .bind(&account.password_salt)
                .bind(account.role.as_str())
                .bind(account.status.as_str())
                .bind(&account.api_key)
                .bind(&account.provider)
                .bind(&account.oauth_sub)
                .bind(&account.password_reset_digest)
                .bind(account.password_reset_sent_at)
                .bind(account.signed_in)
                .bind(account.created_at)
                .bind(account.updated_at)
                .execute(&self.pool)
                .instrument(db_span("INSERT", query))
                .await;

            match result {
                Ok(_) => Ok(InsertOutcome::Created),
                Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
                Err(err) => Err(err).context("failed to insert account"),
            }
        })
    }

    fn update<'a>(&'a self, account: &'a Account) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = r"
                UPDATE accounts SET
                    tenant_id = $2, first_name = $3, last_name = $4, email = $5,
                    password_hash = $6, password_salt = $7, role = $8, status = $9,
                    provider = $10, oauth_sub = $11, password_reset_digest = $12,
                    password_reset_sent_at = $13, signed_in = $14, updated_at = $15
                WHERE id = $1
            ";
            sqlx::query(query)
                .bind(account.id)
                .bind(account.tenant_id)
                .bind(&account.first_name)
                .bind(&account.last_name)
                .bind(&account.email)
                .bind(&account.password_hash)
                .bind(&account.password_salt)
                .bind(account.role.as_str())
                .bind(account.status.as_str())
                .bind(&account.provider)
                .bind(&account.oauth_sub)
                .bind(&account.password_reset_digest)
                .bind(account.password_reset_sent_at)
                .bind(account.signed_in)
                .bind(account.updated_at)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to update account")?;
            Ok(())
        })
    }

    fn soft_delete(
        &self,
        id: Uuid,
        deleted_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let query = r"
                UPDATE accounts SET deleted_at = $2, deleted_by = $3
                WHERE id = $1 AND deleted_at IS NULL
            ";
            let result = sqlx::query(query)
                .bind(id)
                .bind(at)
                .bind(deleted_by)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to soft delete account")?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn restore(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let query = r"
                UPDATE accounts SET deleted_at = NULL, deleted_by = NULL
                WHERE id = $1 AND deleted_at IS NOT NULL
            ";
            let result = sqlx::query(query)
                .bind(id)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to restore account")?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn purge_deleted(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let query = "DELETE FROM accounts WHERE deleted_at IS NOT NULL AND deleted_at < $1";
            let result = sqlx::query(query)
                .bind(cutoff)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to purge accounts")?;
            Ok(result.rows_affected())
        })
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SessionStore for PgSessionStore {
    fn insert<'a>(
        &'a self,
        digest: &'a [u8],
        record: &'a SessionRecord,
    ) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            let query = r"
                INSERT INTO sessions (session_digest, account_key, issued_at, last_refresh)
                VALUES ($1, $2, $3, $4)
            ";
            let result = sqlx::query(query)
                .bind(digest)
                .bind(&record.account_key)
                .bind(record.issued_at)
                .bind(record.last_refresh)
                .execute(&self.pool)
                .instrument(db_span("INSERT", query))
                .await;
            match result {
                Ok(_) => Ok(InsertOutcome::Created),
                Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
                Err(err) => Err(err).context("failed to insert session"),
            }
        })
    }

    fn find<'a>(&'a self, digest: &'a [u8]) -> StoreFuture<'a, Option<SessionRecord>> {
        Box::pin(async move {
            let query = r"
                SELECT account_key, issued_at, last_refresh
                FROM sessions
                WHERE session_digest = $1
            ";
            let row = sqlx::query(query)
                .bind(digest)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", query))
                .await
                .context("failed to lookup session")?;
            row.map(|row| -> Result<SessionRecord> {
                Ok(SessionRecord {
                    account_key: row.try_get("account_key")?,
                    issued_at: row.try_get("issued_at")?,
                    last_refresh: row.try_get("last_refresh")?,
                })
            })
            .transpose()
        })
    }

    fn touch<'a>(&'a self, digest: &'a [u8], at: DateTime<Utc>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = "UPDATE sessions SET last_refresh = $2 WHERE session_digest = $1";
            sqlx::query(query)
                .bind(digest)
                .bind(at)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to refresh session")?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, digest: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = "DELETE FROM sessions WHERE session_digest = $1";
            sqlx::query(query)
                .bind(digest)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to delete session")?;
            Ok(())
        })
    }

    fn purge_idle(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let query = "DELETE FROM sessions WHERE last_refresh < $1";
            let result = sqlx::query(query)
                .bind(cutoff)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to purge idle sessions")?;
            Ok(result.rows_affected())
        })
    }
}

#[derive(Clone, Debug)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl TenantStore for PgTenantStore {
    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Tenant>> {
        Box::pin(async move {
            let query = r"
                SELECT id, url_key, name, created_at, updated_at, deleted_at, deleted_by
                FROM tenants
                WHERE id = $1 AND deleted_at IS NULL
            ";
            let row = sqlx::query(query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", query))
                .await
                .context("failed to lookup tenant")?;
            row.as_ref().map(tenant_from_row).transpose()
        })
    }

    fn find_by_url_key<'a>(
        &'a self,
        url_key: &'a str,
        with_deleted: bool,
    ) -> StoreFuture<'a, Option<Tenant>> {
        Box::pin(async move {
            let query = r"
                SELECT id, url_key, name, created_at, updated_at, deleted_at, deleted_by
                FROM tenants
                WHERE url_key = $1 AND ($2 OR deleted_at IS NULL)
            ";
            let row = sqlx::query(query)
                .bind(url_key)
                .bind(with_deleted)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", query))
                .await
                .context("failed to lookup tenant")?;
            row.as_ref().map(tenant_from_row).transpose()
        })
    }

    fn url_key_taken<'a>(&'a self, url_key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let query = "SELECT EXISTS (SELECT 1 FROM tenants WHERE url_key = $1)";
            let row = sqlx::query(query)
                .bind(url_key)
                .fetch_one(&self.pool)
                .instrument(db_span("SELECT", query))
                .await
                .context("failed to check url key")?;
            Ok(row.try_get(0)?)
        })
    }

    fn insert<'a>(&'a self, tenant: &'a Tenant) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            let query = r"
                INSERT INTO tenants (id, url_key, name, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5)
            ";
            let result = sqlx::query(query)
                .bind(tenant.id)
                .bind(&tenant.url_key)
                .bind(&tenant.name)
                .bind(tenant.created_at)
                .bind(tenant.updated_at)
                .execute(&self.pool)
                .instrument(db_span("INSERT", query))
                .await;
            match result {
                Ok(_) => Ok(InsertOutcome::Created),
                Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
                Err(err) => Err(err).context("failed to insert tenant"),
            }
        })
    }

    fn soft_delete(
        &self,
        id: Uuid,
        deleted_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let query = r"
                UPDATE tenants SET deleted_at = $2, deleted_by = $3
                WHERE id = $1 AND deleted_at IS NULL
            ";
            let result = sqlx::query(query)
                .bind(id)
                .bind(at)
                .bind(deleted_by)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to soft delete tenant")?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn restore(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let query = r"
                UPDATE tenants SET deleted_at = NULL, deleted_by = NULL
                WHERE id = $1 AND deleted_at IS NOT NULL
            ";
            let result = sqlx::query(query)
                .bind(id)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to restore tenant")?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn purge_deleted(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let query = "DELETE FROM tenants WHERE deleted_at IS NOT NULL AND deleted_at < $1";
            let result = sqlx::query(query)
                .bind(cutoff)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to purge tenants")?;
            Ok(result.rows_affected())
        })
    }
}

#[derive(Clone, Debug)]
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CounterStore for PgCounterStore {
    fn increment<'a>(
        &'a self,
        key: &'a str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            // Single statement so concurrent workers never lose an increment.
            let query = r"
                INSERT INTO rate_limit_counters (key, count, expires_at)
                VALUES ($1, 1, $3)
                ON CONFLICT (key) DO UPDATE SET
                    count = CASE
                        WHEN rate_limit_counters.expires_at <= $2 THEN 1
                        ELSE rate_limit_counters.count + 1
                    END,
                    expires_at = CASE
                        WHEN rate_limit_counters.expires_at <= $2 THEN EXCLUDED.expires_at
                        ELSE rate_limit_counters.expires_at
                    END
                RETURNING count
            ";
            let row = sqlx::query(query)
                .bind(key)
                .bind(now)
                .bind(expires_at)
                .fetch_one(&self.pool)
                .instrument(db_span("INSERT", query))
                .await
                .context("failed to increment rate limit counter")?;
            let count: i64 = row.try_get("count")?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let query = "DELETE FROM rate_limit_counters WHERE expires_at <= $1";
            let result = sqlx::query(query)
                .bind(now)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to purge rate limit counters")?;
            Ok(result.rows_affected())
        })
    }
}
