use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::SoftDeletable;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    Admin,
    SuperAdmin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            other => Err(anyhow::anyhow!("unknown role: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Pending,
    Banned,
}

impl AccountStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Pending => "PENDING",
            Self::Banned => "BANNED",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "PENDING" => Ok(Self::Pending),
            "BANNED" => Ok(Self::Banned),
            other => Err(anyhow::anyhow!("unknown account status: {other}")),
        }
    }
}

/// Identity and credential holder.
///
/// `tenant_id` is `None` for platform-level super admins and for accounts that
/// have not onboarded a tenant yet. Only the digest of a password-reset token is
/// kept; the raw token travels in the reset email.
#[derive(Clone, Debug)]
pub struct Account {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub password_salt: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
    pub api_key: String,
    pub provider: Option<String>,
    pub oauth_sub: Option<String>,
    pub password_reset_digest: Option<Vec<u8>>,
    pub password_reset_sent_at: Option<DateTime<Utc>>,
    pub signed_in: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

impl Account {
    /// A fresh member account with no credential yet.
    #[must_use]
    pub fn new(
        first_name: String,
        last_name: String,
        email: String,
        api_key: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id: None,
            first_name,
            last_name,
            email,
            password_hash: None,
            password_salt: None,
            role: Role::Member,
            status: AccountStatus::Active,
            api_key,
            provider: None,
            oauth_sub: None,
            password_reset_digest: None,
            password_reset_sent_at: None,
            signed_in: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn clear_reset_token(&mut self) {
        self.password_reset_digest = None;
        self.password_reset_sent_at = None;
    }

    #[must_use]
    pub fn can_manage_team(&self) -> bool {
        matches!(self.role, Role::Admin | Role::SuperAdmin)
    }

    #[must_use]
    pub fn can_view_all_tenants(&self) -> bool {
        self.role == Role::SuperAdmin
    }
}

impl SoftDeletable for Account {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn deleted_by(&self) -> Option<Uuid> {
        self.deleted_by
    }

    fn set_deleted(&mut self, deleted_at: Option<DateTime<Utc>>, deleted_by: Option<Uuid>) {
        self.deleted_at = deleted_at;
        self.deleted_by = deleted_by;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new(
            "Ada".to_string(),
            "Lovelace".to_string(),
            "ada@example.com".to_string(),
            "key".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn role_and_status_parse_their_wire_names() -> anyhow::Result<()> {
        for role in [Role::Member, Role::Admin, Role::SuperAdmin] {
            assert_eq!(role.as_str().parse::<Role>()?, role);
        }
        for status in [
            AccountStatus::Active,
            AccountStatus::Inactive,
            AccountStatus::Pending,
            AccountStatus::Banned,
        ] {
            assert_eq!(status.as_str().parse::<AccountStatus>()?, status);
        }
        assert!("owner".parse::<Role>().is_err());
        assert!("active".parse::<AccountStatus>().is_err());
        Ok(())
    }

    #[test]
    fn roles_are_ordered_by_privilege() {
        assert!(Role::Member < Role::Admin);
        assert!(Role::Admin < Role::SuperAdmin);
    }

    #[test]
    fn new_account_is_active_member() {
        let account = account();
        assert!(account.is_active());
        assert_eq!(account.role, Role::Member);
        assert_eq!(account.name(), "Ada Lovelace");
        assert!(!account.can_manage_team());
    }

    #[test]
    fn clear_reset_token_drops_both_fields() {
        let mut account = account();
        account.password_reset_digest = Some(vec![1, 2, 3]);
        account.password_reset_sent_at = Some(Utc::now());
        account.clear_reset_token();
        assert!(account.password_reset_digest.is_none());
        assert!(account.password_reset_sent_at.is_none());
    }
}
