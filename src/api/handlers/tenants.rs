//! Tenant onboarding and super-admin tenant lifecycle.
//!
//! Flow Overview:
//! 1) An authenticated account without a tenant creates one and becomes its
//!    admin (`POST /tenants`).
//! 2) Super admins soft-delete and restore tenants by URL key
//!    (`/v1/admin/tenants/{url_key}`).

use anyhow::Context;
use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::ToSchema;

use super::auth::{
    AuthState, RequestContext,
    clock::Clock,
    error::{AuthError, AuthResult, ValidationErrors},
    principal::Identity,
};
use crate::model::{Account, Role, SoftDeletable, Tenant, generate_url_key};
use crate::store::{AccountStore, InsertOutcome, TenantStore};

const URL_KEY_ATTEMPTS: usize = 8;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTenantRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TenantResponse {
    pub id: String,
    pub url_key: String,
    pub name: String,
    pub created_at: String,
    pub deleted: bool,
}

impl From<&Tenant> for TenantResponse {
    fn from(tenant: &Tenant) -> Self {
        Self {
            id: tenant.id.to_string(),
            url_key: tenant.url_key.clone(),
            name: tenant.name.clone(),
            created_at: tenant.created_at.to_rfc3339(),
            deleted: tenant.is_deleted(),
        }
    }
}

/// Source of candidate tenant URL keys.
pub type UrlKeyGenerator = Arc<dyn Fn() -> String + Send + Sync>;

pub struct TenantService {
    tenants: Arc<dyn TenantStore>,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    url_keys: UrlKeyGenerator,
}

impl TenantService {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tenants,
            accounts,
            clock,
            url_keys: Arc::new(generate_url_key),
        }
    }

    #[must_use]
    pub fn with_url_key_generator(mut self, url_keys: UrlKeyGenerator) -> Self {
        self.url_keys = url_keys;
        self
    }

    /// Create a tenant for an account that has none; the account becomes its
    /// admin.
    pub async fn onboard(&self, mut account: Account, name: &str) -> AuthResult<(Tenant, Account)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::Validation(ValidationErrors::single(
                "name",
                "can't be blank",
            )));
        }
        if account.tenant_id.is_some() || account.role == Role::SuperAdmin {
            return Err(AuthError::Validation(ValidationErrors::single(
                "tenant",
                "account already belongs to a tenant",
            )));
        }

        let now = self.clock.now();
        let mut created = None;
        for _ in 0..URL_KEY_ATTEMPTS {
            let url_key = self.unused_url_key().await?;
            let tenant = Tenant::new(name.to_string(), url_key, now);
            match self.tenants.insert(&tenant).await? {
                InsertOutcome::Created => {
                    created = Some(tenant);
                    break;
                }
                InsertOutcome::Conflict => debug!("tenant url key raced, drawing again"),
            }
        }
        let tenant = created.context("failed to allocate a tenant url key")?;

        account.tenant_id = Some(tenant.id);
        account.role = Role::Admin;
        account.updated_at = now;
        self.accounts
            .update(&account)
            .await
            .context("failed to attach account to tenant")?;
        info!(tenant_id = %tenant.id, account_id = %account.id, "tenant onboarded");
        Ok((tenant, account))
    }

    /// A key no tenant uses, soft-deleted ones included.
    pub async fn unused_url_key(&self) -> AuthResult<String> {
        for _ in 0..URL_KEY_ATTEMPTS {
            let candidate = (self.url_keys)();
            if !self.tenants.url_key_taken(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(anyhow::anyhow!("failed to draw an unused tenant url key").into())
    }

    pub async fn soft_delete(&self, identity: &Identity, url_key: &str) -> AuthResult<Tenant> {
        identity.require_role(Role::SuperAdmin)?;
        let mut tenant = self
            .tenants
            .find_by_url_key(url_key, false)
            .await?
            .ok_or(AuthError::NotFound)?;
        let now = self.clock.now();
        self.tenants
            .soft_delete(tenant.id, Some(identity.account_id), now)
            .await?;
        tenant.soft_delete(Some(identity.account_id), now);
        info!(tenant_id = %tenant.id, deleted_by = %identity.account_id, "tenant soft-deleted");
        Ok(tenant)
    }

    pub async fn restore(&self, identity: &Identity, url_key: &str) -> AuthResult<Tenant> {
        identity.require_role(Role::SuperAdmin)?;
        let mut tenant = self
            .tenants
            .find_by_url_key(url_key, true)
            .await?
            .ok_or(AuthError::NotFound)?;
        if tenant.is_deleted() {
            self.tenants.restore(tenant.id).await?;
            tenant.restore();
            info!(tenant_id = %tenant.id, "tenant restored");
        }
        Ok(tenant)
    }
}

#[utoipa::path(
    post,
    path = "/tenants",
    request_body = CreateTenantRequest,
    responses(
        (status = 201, description = "Tenant created; caller is now its admin.", body = TenantResponse),
        (status = 401, description = "Not signed in."),
        (status = 422, description = "Blank name or caller already has a tenant."),
    ),
    tag = "tenants"
)]
pub async fn create_tenant(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<CreateTenantRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let caller = auth_state.gateway().resolve_identity(&context).await?;
    let (tenant, _) = auth_state
        .tenants()
        .onboard(caller.account, &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(TenantResponse::from(&tenant))))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/tenants/{url_key}",
    params(("url_key" = String, Path, description = "Tenant URL key")),
    responses(
        (status = 200, description = "Tenant soft-deleted.", body = TenantResponse),
        (status = 401, description = "Missing or invalid bearer token."),
        (status = 403, description = "Caller is not a super admin."),
        (status = 404, description = "No live tenant with this key."),
    ),
    tag = "admin"
)]
pub async fn delete_tenant(
    context: RequestContext,
    Path(url_key): Path<String>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let caller = auth_state.gateway().resolve_identity(&context).await?;
    let tenant = auth_state
        .tenants()
        .soft_delete(&caller.identity, &url_key)
        .await?;
    Ok(Json(TenantResponse::from(&tenant)))
}

#[utoipa::path(
    post,
    path = "/v1/admin/tenants/{url_key}/restore",
    params(("url_key" = String, Path, description = "Tenant URL key")),
    responses(
        (status = 200, description = "Tenant restored.", body = TenantResponse),
        (status = 401, description = "Missing or invalid bearer token."),
        (status = 403, description = "Caller is not a super admin."),
        (status = 404, description = "No tenant with this key."),
    ),
    tag = "admin"
)]
pub async fn restore_tenant(
    context: RequestContext,
    Path(url_key): Path<String>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let caller = auth_state.gateway().resolve_identity(&context).await?;
    let tenant = auth_state
        .tenants()
        .restore(&caller.identity, &url_key)
        .await?;
    Ok(Json(TenantResponse::from(&tenant)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::Harness;
    use crate::model::URL_KEY_LENGTH;

    #[tokio::test]
    async fn onboarding_makes_creator_admin() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let account = harness.register("ada@example.com").await?;
        let (tenant, account) = harness.state.tenants().onboard(account, " Acme ").await?;
        assert_eq!(tenant.name, "Acme");
        assert_eq!(tenant.url_key.len(), URL_KEY_LENGTH);
        assert_eq!(account.tenant_id, Some(tenant.id));
        assert_eq!(account.role, Role::Admin);

        let again = harness.state.tenants().onboard(account, "Other").await;
        assert!(matches!(again, Err(AuthError::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn only_super_admin_deletes_and_restores() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let account = harness.register("ada@example.com").await?;
        let (tenant, admin) = harness.state.tenants().onboard(account, "Acme").await?;
        let service = harness.state.tenants();

        let admin_identity = Identity::from(&admin);
        assert!(matches!(
            service.soft_delete(&admin_identity, &tenant.url_key).await,
            Err(AuthError::Forbidden)
        ));

        let root = harness.super_admin("root@example.com").await?;
        let root_identity = Identity::from(&root);
        let deleted = service.soft_delete(&root_identity, &tenant.url_key).await?;
        assert!(deleted.is_deleted());
        assert_eq!(deleted.deleted_by, Some(root.id));
        assert!(matches!(
            service.soft_delete(&root_identity, &tenant.url_key).await,
            Err(AuthError::NotFound)
        ));

        // Deleted keys stay reserved.
        assert!(harness.tenants.url_key_taken(&tenant.url_key).await?);

        let restored = service.restore(&root_identity, &tenant.url_key).await?;
        assert!(!restored.is_deleted());
        Ok(())
    }

    #[tokio::test]
    async fn unused_url_key_has_twelve_chars() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        for _ in 0..16 {
            let key = harness.state.tenants().unused_url_key().await?;
            assert_eq!(key.len(), URL_KEY_LENGTH);
            assert!(!harness.tenants.url_key_taken(&key).await?);
        }
        Ok(())
    }

    /// Replays `keys` in order, then repeats the last one.
    fn scripted_keys(keys: &[&str]) -> UrlKeyGenerator {
        let keys: Vec<String> = keys.iter().map(|key| (*key).to_string()).collect();
        let next = std::sync::atomic::AtomicUsize::new(0);
        Arc::new(move || {
            let n = next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            keys.get(n.min(keys.len() - 1)).cloned().unwrap_or_default()
        })
    }

    #[tokio::test]
    async fn colliding_url_key_is_drawn_again() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let now = harness.clock.now();
        let old = Tenant::new("Old".to_string(), "collidecolli".to_string(), now);
        harness.tenants.insert(&old).await?;
        harness.tenants.soft_delete(old.id, None, now).await?;

        let service = TenantService::new(
            harness.tenants.clone(),
            harness.accounts.clone(),
            harness.clock.clone(),
        )
        .with_url_key_generator(scripted_keys(&["collidecolli", "freshfreshfr"]));

        let account = harness.register("ada@example.com").await?;
        let (tenant, _) = service.onboard(account, "Acme").await?;
        assert_eq!(tenant.url_key, "freshfreshfr");
        // The soft-deleted tenant keeps its key.
        let kept = harness.tenants.find_by_url_key("collidecolli", true).await?;
        assert_eq!(kept.map(|tenant| tenant.id), Some(old.id));
        Ok(())
    }

    #[tokio::test]
    async fn url_key_drawing_gives_up_when_every_candidate_is_taken() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let taken = Tenant::new("Taken".to_string(), "takentakenta".to_string(), harness.clock.now());
        harness.tenants.insert(&taken).await?;

        let service = TenantService::new(
            harness.tenants.clone(),
            harness.accounts.clone(),
            harness.clock.clone(),
        )
        .with_url_key_generator(scripted_keys(&["takentakenta"]));

        assert!(matches!(
            service.unused_url_key().await,
            Err(AuthError::Internal(_))
        ));
        Ok(())
    }
}
