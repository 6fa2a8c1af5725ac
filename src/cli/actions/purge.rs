use crate::store::{self, StorageConfig};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub storage: StorageConfig,
    pub older_than_days: u32,
    pub session_timeout_seconds: i64,
}

fn cutoff(now: DateTime<Utc>, older_than_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(older_than_days))
}

/// Execute the purge action.
/// # Errors
/// Returns an error if the stores cannot be opened or a purge query fails.
/// Idle sessions and closed rate-limit windows are dropped on every run.
pub async fn execute(args: Args) -> Result<()> {
    let stores = args.storage.open().await?;
    let cutoff = cutoff(Utc::now(), args.older_than_days);

    let report = store::purge_deleted(stores.accounts.as_ref(), stores.tenants.as_ref(), cutoff)
        .await
        .context("purge failed")?;
    let swept = store::sweep_expired(
        stores.sessions.as_ref(),
        stores.counters.as_ref(),
        Duration::seconds(args.session_timeout_seconds),
        Utc::now(),
    )
    .await
    .context("sweep failed")?;

    info!(
        accounts = report.accounts,
        tenants = report.tenants,
        sessions = swept.sessions,
        counters = swept.counters,
        older_than_days = args.older_than_days,
        "purge complete"
    );
    println!(
        "purged {} accounts and {} tenants deleted before {}",
        report.accounts,
        report.tenants,
        cutoff.to_rfc3339()
    );
    println!(
        "purged {} idle sessions and {} expired rate limit counters",
        swept.sessions, swept.counters
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cutoff_subtracts_whole_days() -> Result<()> {
        let now = Utc
            .with_ymd_and_hms(2024, 4, 1, 12, 0, 0)
            .single()
            .context("valid date")?;
        let expected = Utc
            .with_ymd_and_hms(2024, 1, 2, 12, 0, 0)
            .single()
            .context("valid date")?;
        assert_eq!(cutoff(now, 90), expected);
        Ok(())
    }

    #[tokio::test]
    async fn purge_over_memory_store_succeeds() -> Result<()> {
        execute(Args {
            storage: StorageConfig::default(),
            older_than_days: 90,
            session_timeout_seconds: 1800,
        })
        .await
    }
}
