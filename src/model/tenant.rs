use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use uuid::Uuid;

use super::SoftDeletable;

pub const URL_KEY_LENGTH: usize = 12;

/// Entities addressed in URLs by a random key instead of their id.
pub trait UrlKeyed {
    fn url_key(&self) -> &str;
}

/// Draw a fresh candidate URL key. Uniqueness is the store's job.
#[must_use]
pub fn generate_url_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(URL_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// A tenant organization ("client").
#[derive(Clone, Debug, Serialize)]
pub struct Tenant {
    pub id: Uuid,
    pub url_key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub deleted_by: Option<Uuid>,
}

impl Tenant {
    #[must_use]
    pub fn new(name: String, url_key: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            url_key,
            name,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        }
    }
}

impl UrlKeyed for Tenant {
    fn url_key(&self) -> &str {
        &self.url_key
    }
}

impl SoftDeletable for Tenant {
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
