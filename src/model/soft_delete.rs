use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Entities that are marked as deleted instead of being removed.
///
/// Default lookups exclude deleted rows; history stays in place until an
/// explicit purge after the retention window.
pub trait SoftDeletable {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn deleted_by(&self) -> Option<Uuid>;

    fn set_deleted(&mut self, deleted_at: Option<DateTime<Utc>>, deleted_by: Option<Uuid>);

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }

    fn soft_delete(&mut self, deleted_by: Option<Uuid>, at: DateTime<Utc>) {
        self.set_deleted(Some(at), deleted_by);
    }

    fn restore(&mut self) {
        self.set_deleted(None, None);
    }

    /// True when the row was deleted before `cutoff` and may be purged.
    fn purgeable(&self, cutoff: DateTime<Utc>) -> bool {
        self.deleted_at().is_some_and(|deleted_at| deleted_at < cutoff)
    }
}
