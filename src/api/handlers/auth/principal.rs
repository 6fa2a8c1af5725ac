//! Resolved identity handed to downstream authorization.
//!
//! Role gates and tenant scoping consume this contract and nothing else.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use crate::model::{Account, Role};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Identity {
    pub account_id: Uuid,
    pub tenant_id: Option<Uuid>,
    #[schema(value_type = String, example = "member")]
    pub role: Role,
    pub email: String,
}

impl From<&Account> for Identity {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id,
            tenant_id: account.tenant_id,
            role: account.role,
            email: account.email.clone(),
        }
    }
}

impl Identity {
    /// Roles are ordered: `super_admin` passes every gate.
    pub fn require_role(&self, minimum: Role) -> AuthResult<()> {
        if self.role >= minimum {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Super admins see every tenant; everyone else only their own.
    #[must_use]
    pub fn can_access_tenant(&self, tenant_id: Uuid) -> bool {
        self.role == Role::SuperAdmin || self.tenant_id == Some(tenant_id)
    }
}
