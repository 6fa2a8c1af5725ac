//! In-process stores for tests and single-instance dev runs.
//!
//! Counters kept here are per process; use the `postgres` stores when more
//! than one instance serves traffic.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountStore, CounterStore, InsertOutcome, SessionRecord, SessionStore, StoreFuture,
    TenantStore,
};
use crate::model::{Account, SoftDeletable, Tenant};

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<Uuid, Account>>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn find_live(&self, predicate: impl Fn(&Account) -> bool) -> Option<Account> {
        let accounts = self.accounts.lock().await;
        accounts
            .values()
            .find(|account| !account.is_deleted() && predicate(account))
            .cloned()
    }
}

impl AccountStore for MemoryAccountStore {
    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Account>> {
        Box::pin(async move { Ok(self.find_live(|account| account.id == id).await) })
    }

    fn find_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<Account>> {
        Box::pin(async move { Ok(self.find_live(|account| account.email == email).await) })
    }

    fn find_by_api_key<'a>(&'a self, api_key: &'a str) -> StoreFuture<'a, Option<Account>> {
        Box::pin(async move { Ok(self.find_live(|account| account.api_key == api_key).await) })
    }

    fn find_by_reset_digest<'a>(&'a self, digest: &'a [u8]) -> StoreFuture<'a, Option<Account>> {
        Box::pin(async move {
            Ok(self
                .find_live(|account| account.password_reset_digest.as_deref() == Some(digest))
                .await)
        })
    }

    fn api_key_taken<'a>(&'a self, api_key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let accounts = self.accounts.lock().await;
            Ok(accounts.values().any(|account| account.api_key == api_key))
        })
    }

    fn insert<'a>(&'a self, account: &'a Account) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().await;
            // The unique indexes cover soft-deleted rows too.
            if accounts
                .values()
                .any(|existing| existing.email == account.email || existing.api_key == account.api_key)
            {
                return Ok(InsertOutcome::Conflict);
            }
            accounts.insert(account.id, account.clone());
            Ok(InsertOutcome::Created)
        })
    }

    fn update<'a>(&'a self, account: &'a Account) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().await;
            let Some(existing) = accounts.get_mut(&account.id) else {
                return Err(anyhow::anyhow!("account {} not found", account.id));
            };
            *existing = account.clone();
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
            let mut accounts = self.accounts.lock().await;
            Ok(match accounts.get_mut(&id) {
                Some(account) if !account.is_deleted() => {
                    account.soft_delete(deleted_by, at);
                    true
                }
                _ => false,
            })
        })
    }

    fn restore(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().await;
            Ok(match accounts.get_mut(&id) {
                Some(account) if account.is_deleted() => {
                    account.restore();
                    true
                }
                _ => false,
            })
        })
    }

    fn purge_deleted(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().await;
            let before = accounts.len();
            accounts.retain(|_, account| !account.purgeable(cutoff));
            Ok(u64::try_from(before - accounts.len()).unwrap_or(u64::MAX))
        })
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert<'a>(
        &'a self,
        digest: &'a [u8],
        record: &'a SessionRecord,
    ) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(digest) {
                return Ok(InsertOutcome::Conflict);
            }
            sessions.insert(digest.to_vec(), record.clone());
            Ok(InsertOutcome::Created)
        })
    }

    fn find<'a>(&'a self, digest: &'a [u8]) -> StoreFuture<'a, Option<SessionRecord>> {
        Box::pin(async move { Ok(self.sessions.lock().await.get(digest).cloned()) })
    }

    fn touch<'a>(&'a self, digest: &'a [u8], at: DateTime<Utc>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if let Some(record) = self.sessions.lock().await.get_mut(digest) {
                record.last_refresh = at;
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, digest: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.sessions.lock().await.remove(digest);
            Ok(())
        })
    }

    fn purge_idle(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut sessions = self.sessions.lock().await;
            let before = sessions.len();
            sessions.retain(|_, record| record.last_refresh >= cutoff);
            Ok((before - sessions.len()) as u64)
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryTenantStore {
    tenants: Mutex<HashMap<Uuid, Tenant>>,
}

impl MemoryTenantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TenantStore for MemoryTenantStore {
    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Tenant>> {
        Box::pin(async move {
            let tenants = self.tenants.lock().await;
            Ok(tenants.get(&id).filter(|tenant| !tenant.is_deleted()).cloned())
        })
    }

    fn find_by_url_key<'a>(
        &'a self,
        url_key: &'a str,
        with_deleted: bool,
    ) -> StoreFuture<'a, Option<Tenant>> {
        Box::pin(async move {
            let tenants = self.tenants.lock().await;
            Ok(tenants
                .values()
                .find(|tenant| tenant.url_key == url_key && (with_deleted || !tenant.is_deleted()))
                .cloned())
        })
    }

    fn url_key_taken<'a>(&'a self, url_key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let tenants = self.tenants.lock().await;
            Ok(tenants.values().any(|tenant| tenant.url_key == url_key))
        })
    }

    fn insert<'a>(&'a self, tenant: &'a Tenant) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            let mut tenants = self.tenants.lock().await;
            if tenants.values().any(|existing| existing.url_key == tenant.url_key) {
                return Ok(InsertOutcome::Conflict);
            }
            tenants.insert(tenant.id, tenant.clone());
            Ok(InsertOutcome::Created)
        })
    }

    fn soft_delete(
        &self,
        id: Uuid,
        deleted_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut tenants = self.tenants.lock().await;
            Ok(match tenants.get_mut(&id) {
                Some(tenant) if !tenant.is_deleted() => {
                    tenant.soft_delete(deleted_by, at);
                    true
                }
                _ => false,
            })
        })
    }

    fn restore(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut tenants = self.tenants.lock().await;
            Ok(match tenants.get_mut(&id) {
                Some(tenant) if tenant.is_deleted() => {
                    tenant.restore();
                    true
                }
                _ => false,
            })
        })
    }

    fn purge_deleted(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut tenants = self.tenants.lock().await;
            let before = tenants.len();
            tenants.retain(|_, tenant| !tenant.purgeable(cutoff));
            Ok(u64::try_from(before - tenants.len()).unwrap_or(u64::MAX))
        })
    }
}

#[derive(Debug)]
struct Counter {
    count: u64,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment<'a>(
        &'a self,
        key: &'a str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut counters = self.counters.lock().await;
            counters.retain(|_, counter| counter.expires_at > now);
            let counter = counters.entry(key.to_string()).or_insert(Counter {
                count: 0,
                expires_at,
            });
            counter.count += 1;
            Ok(counter.count)
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut counters = self.counters.lock().await;
            let before = counters.len();
            counters.retain(|_, counter| counter.expires_at > now);
            Ok((before - counters.len()) as u64)
        })
    }
}
