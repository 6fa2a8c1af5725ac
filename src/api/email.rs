//! Email outbox worker and delivery abstractions.
//!
//! Password-reset requests hand a message to [`EmailOutbox`] and return
//! immediately. A background task drains the queue and passes each message to
//! an [`EmailSender`], retrying failures with exponential backoff and jitter
//! until `max_attempts` is reached; the message is then dropped and logged.
//!
//! The default sender is [`LogEmailSender`], which logs instead of sending.
use anyhow::Result;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc, time::sleep};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::handlers::auth::ResetNotifier;
use crate::model::Account;

pub const PASSWORD_RESET_TEMPLATE: &str = "password_reset";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction used by the outbox worker.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Dev sender: logs the envelope, and the payload only at debug.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            "email outbox send stub"
        );
        debug!(payload = %message.payload_json, "email outbox payload");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    /// Default worker config: 5 max attempts and 5s->5m exponential backoff
    /// with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    #[cfg(test)]
    fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_millis(1)
        } else {
            self.backoff_base
        };
        let backoff_max = self.backoff_max.max(backoff_base);
        Self {
            max_attempts,
            backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half of the outbox. Cloning shares the same worker.
#[derive(Clone, Debug)]
pub struct EmailOutbox {
    queue: mpsc::UnboundedSender<EmailMessage>,
}

impl EmailOutbox {
    /// Spawn the delivery worker and return the handle used to enqueue.
    #[must_use]
    pub fn spawn(sender: Arc<dyn EmailSender>, config: EmailWorkerConfig) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        spawn_outbox_worker(rx, sender, config);
        Self { queue }
    }

    pub fn enqueue(&self, message: EmailMessage) {
        if self.queue.send(message).is_err() {
            error!("email outbox worker is gone, message dropped");
        }
    }
}

impl ResetNotifier for EmailOutbox {
    fn notify(&self, account: &Account, _token: &str, reset_url: &str) {
        let payload = json!({
            "name": account.name(),
            "reset_url": reset_url,
        });
        self.enqueue(EmailMessage {
            to_email: account.email.clone(),
            template: PASSWORD_RESET_TEMPLATE.to_string(),
            payload_json: payload.to_string(),
        });
    }
}

/// Spawn a background task that drains the outbox until every producer is
/// dropped.
pub fn spawn_outbox_worker(
    mut rx: mpsc::UnboundedReceiver<EmailMessage>,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        while let Some(message) = rx.recv().await {
            let span = info_span!(
                "email.deliver",
                to_email = %message.to_email,
                template = %message.template
            );
            let attempts = deliver(sender.as_ref(), &message, &config)
                .instrument(span)
                .await;
            if let Err(err) = attempts {
                error!(to_email = %message.to_email, "email delivery failed: {err:#}");
            }
        }
        debug!("email outbox closed");
    })
}

/// Send with retries; returns the number of attempts used.
async fn deliver(sender: &dyn EmailSender, message: &EmailMessage, config: &EmailWorkerConfig) -> Result<u32> {
    let mut attempt = 1;
    loop {
        match sender.send(message) {
            Ok(()) => return Ok(attempt),
            Err(err) if attempt >= config.max_attempts() => {
                return Err(err.context(format!("giving up after {attempt} attempts")));
            }
            Err(err) => {
                let delay = backoff_delay(attempt, config.backoff_base(), config.backoff_max());
                warn!(attempt, delay_ms = delay.as_millis(), "email send failed, retrying: {err}");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let delay = base.checked_mul(1u32 << shift).unwrap_or(max).min(max);
    jitter_delay(delay)
}

/// Somewhere in `[delay / 2, delay]`.
fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Fails the first `failures` sends, then records what it delivers.
    struct FlakySender {
        failures: Mutex<u32>,
        delivered: Mutex<Vec<EmailMessage>>,
        delivered_tx: mpsc::UnboundedSender<()>,
    }

    impl EmailSender for FlakySender {
        fn send(&self, message: &EmailMessage) -> Result<()> {
            let mut failures = self.failures.lock().map_err(|_| anyhow!("poisoned"))?;
            if *failures > 0 {
                *failures -= 1;
                return Err(anyhow!("smtp unavailable"));
            }
            self.delivered
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .push(message.clone());
            let _ = self.delivered_tx.send(());
            Ok(())
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to_email: "ada@example.com".to_string(),
            template: PASSWORD_RESET_TEMPLATE.to_string(),
            payload_json: "{}".to_string(),
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);
        let first = backoff_delay(1, base, max);
        assert!(first >= Duration::from_millis(2500) && first <= base);
        let third = backoff_delay(3, base, max);
        assert!(third >= Duration::from_secs(10) && third <= Duration::from_secs(20));
        let capped = backoff_delay(30, base, max);
        assert!(capped >= Duration::from_secs(150) && capped <= max);
    }

    #[test]
    fn normalize_repairs_degenerate_values() {
        let config = EmailWorkerConfig::new()
            .with_max_attempts(0)
            .with_backoff_base_seconds(0)
            .with_backoff_max_seconds(0)
            .normalize();
        assert_eq!(config.max_attempts(), 1);
        assert!(!config.backoff_base().is_zero());
        assert!(config.backoff_max() >= config.backoff_base());
    }

    #[tokio::test]
    async fn deliver_retries_then_gives_up() {
        let (delivered_tx, _rx) = mpsc::unbounded_channel();
        let sender = FlakySender {
            failures: Mutex::new(2),
            delivered: Mutex::new(Vec::new()),
            delivered_tx,
        };
        let config = EmailWorkerConfig::new()
            .with_max_attempts(3)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4));
        let attempts = deliver(&sender, &message(), &config).await;
        assert_eq!(attempts.ok(), Some(3));

        let stubborn = FlakySender {
            failures: Mutex::new(10),
            delivered: Mutex::new(Vec::new()),
            delivered_tx: mpsc::unbounded_channel().0,
        };
        assert!(deliver(&stubborn, &message(), &config).await.is_err());
    }

    #[tokio::test]
    async fn reset_notification_is_queued_without_token_in_envelope() -> Result<()> {
        let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();
        let sender = Arc::new(FlakySender {
            failures: Mutex::new(1),
            delivered: Mutex::new(Vec::new()),
            delivered_tx,
        });
        let config = EmailWorkerConfig::new()
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2));
        let outbox = EmailOutbox::spawn(sender.clone(), config);

        let account = Account::new(
            "Ada".to_string(),
            "Lovelace".to_string(),
            "ada@example.com".to_string(),
            "api-key".to_string(),
            Utc::now(),
        );
        outbox.notify(&account, "raw-token", "https://warden.dev/reset-password/raw-token");

        delivered_rx.recv().await.ok_or_else(|| anyhow!("not delivered"))?;
        let delivered = sender
            .delivered
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].to_email, "ada@example.com");
        assert_eq!(delivered[0].template, PASSWORD_RESET_TEMPLATE);
        let payload: serde_json::Value = serde_json::from_str(&delivered[0].payload_json)?;
        assert_eq!(payload["name"], "Ada Lovelace");
        assert_eq!(
            payload["reset_url"],
            "https://warden.dev/reset-password/raw-token"
        );
        Ok(())
    }
}
