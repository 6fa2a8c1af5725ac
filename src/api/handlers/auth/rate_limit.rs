//! Rate limiting for auth flows.
//!
//! Flow Overview:
//! 1) Each rule counts requests per `(rule, discriminator)` in fixed windows of
//!    `period` seconds aligned to the unix epoch.
//! 2) The counter lives in a shared [`CounterStore`] so every service instance
//!    sees the same windows.
//! 3) A request with no discriminator (unknown IP, missing email) skips that
//!    rule only.
//! 4) Over the limit, the caller answers 429 with
//!    `Retry-After = period - (now mod period)`.
//!
//! Counter store failures propagate; the gateway fails closed.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use std::{future::Future, pin::Pin, sync::Arc};
use tracing::warn;

use super::clock::Clock;
use super::utils::normalize_email;
use crate::store::CounterStore;

pub type LimitFuture<'a> = Pin<Box<dyn Future<Output = Result<RateLimitDecision>> + Send + 'a>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitRule {
    LoginByIp,
    LoginByEmail,
    PasswordResetByIp,
    PasswordResetByEmail,
    SignupByIp,
    GenericApiByIp,
}

impl RateLimitRule {
    pub const ALL: [Self; 6] = [
        Self::LoginByIp,
        Self::LoginByEmail,
        Self::PasswordResetByIp,
        Self::PasswordResetByEmail,
        Self::SignupByIp,
        Self::GenericApiByIp,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LoginByIp => "login-by-ip",
            Self::LoginByEmail => "login-by-email",
            Self::PasswordResetByIp => "password-reset-by-ip",
            Self::PasswordResetByEmail => "password-reset-by-email",
            Self::SignupByIp => "signup-by-ip",
            Self::GenericApiByIp => "generic-api-by-ip",
        }
    }

    #[must_use]
    pub const fn limit(self) -> u64 {
        match self {
            Self::LoginByIp | Self::LoginByEmail | Self::SignupByIp => 5,
            Self::PasswordResetByIp | Self::PasswordResetByEmail => 3,
            Self::GenericApiByIp => 300,
        }
    }

    #[must_use]
    pub const fn period_seconds(self) -> i64 {
        match self {
            Self::LoginByIp | Self::LoginByEmail => 20,
            Self::PasswordResetByIp | Self::PasswordResetByEmail | Self::SignupByIp => 3600,
            Self::GenericApiByIp => 300,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitAction {
    Login,
    PasswordReset,
    Signup,
    Api,
}

impl RateLimitAction {
    #[must_use]
    pub const fn ip_rule(self) -> RateLimitRule {
        match self {
            Self::Login => RateLimitRule::LoginByIp,
            Self::PasswordReset => RateLimitRule::PasswordResetByIp,
            Self::Signup => RateLimitRule::SignupByIp,
            Self::Api => RateLimitRule::GenericApiByIp,
        }
    }

    #[must_use]
    pub const fn email_rule(self) -> Option<RateLimitRule> {
        match self {
            Self::Login => Some(RateLimitRule::LoginByEmail),
            Self::PasswordReset => Some(RateLimitRule::PasswordResetByEmail),
            Self::Signup | Self::Api => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: u64 },
}

pub trait RateLimiter: Send + Sync {
    fn check<'a>(&'a self, rule: RateLimitRule, discriminator: Option<&'a str>) -> LimitFuture<'a>;

    fn check_ip<'a>(&'a self, ip: Option<&'a str>, action: RateLimitAction) -> LimitFuture<'a> {
        self.check(action.ip_rule(), ip)
    }

    fn check_email<'a>(&'a self, email: Option<&'a str>, action: RateLimitAction) -> LimitFuture<'a> {
        match action.email_rule() {
            Some(rule) => Box::pin(async move {
                let normalized = email.map(normalize_email).filter(|email| !email.is_empty());
                self.check(rule, normalized.as_deref()).await
            }),
            None => Box::pin(async { Ok(RateLimitDecision::Allowed) }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check<'a>(&'a self, _rule: RateLimitRule, _discriminator: Option<&'a str>) -> LimitFuture<'a> {
        Box::pin(async { Ok(RateLimitDecision::Allowed) })
    }
}

/// Fixed-window limiter over a shared counter store.
pub struct WindowRateLimiter {
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl WindowRateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { counters, clock }
    }
}

/// Seconds until the current window closes: `period - (now mod period)`.
#[must_use]
pub fn retry_after_seconds(now: DateTime<Utc>, period_seconds: i64) -> u64 {
    let remaining = period_seconds - now.timestamp().rem_euclid(period_seconds);
    u64::try_from(remaining).unwrap_or(1)
}

impl RateLimiter for WindowRateLimiter {
    fn check<'a>(&'a self, rule: RateLimitRule, discriminator: Option<&'a str>) -> LimitFuture<'a> {
        Box::pin(async move {
            let Some(discriminator) = discriminator.filter(|value| !value.is_empty()) else {
                return Ok(RateLimitDecision::Allowed);
            };

            let now = self.clock.now();
            let period = rule.period_seconds();
            let window = now.timestamp().div_euclid(period);
            let key = format!("{}:{discriminator}:{window}", rule.name());
            let expires_at = Utc
                .timestamp_opt((window + 1) * period, 0)
                .single()
                .unwrap_or(now);

            let count = self.counters.increment(&key, now, expires_at).await?;
            if count > rule.limit() {
                let retry_after_seconds = retry_after_seconds(now, period);
                warn!(
                    rule = rule.name(),
                    discriminator,
                    count,
                    retry_after_seconds,
                    "request throttled"
                );
                return Ok(RateLimitDecision::Limited {
                    retry_after_seconds,
                });
            }
            Ok(RateLimitDecision::Allowed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::clock::ManualClock;
    use crate::store::MemoryCounterStore;
    use chrono::Duration;

    fn limiter_at(start: DateTime<Utc>) -> (Arc<ManualClock>, WindowRateLimiter) {
        let clock = Arc::new(ManualClock::new(start));
        let limiter = WindowRateLimiter::new(Arc::new(MemoryCounterStore::default()), clock.clone());
        (clock, limiter)
    }

    fn window_start() -> DateTime<Utc> {
        // Aligned to a 20-second window boundary.
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now)
    }

    #[test]
    fn policy_table() {
        let table: Vec<(&str, u64, i64)> = RateLimitRule::ALL
            .iter()
            .map(|rule| (rule.name(), rule.limit(), rule.period_seconds()))
            .collect();
        assert_eq!(
            table,
            vec![
                ("login-by-ip", 5, 20),
                ("login-by-email", 5, 20),
                ("password-reset-by-ip", 3, 3600),
                ("password-reset-by-email", 3, 3600),
                ("signup-by-ip", 5, 3600),
                ("generic-api-by-ip", 300, 300),
            ]
        );
    }

    #[test]
    fn retry_after_counts_down_to_window_end() {
        let start = window_start();
        assert_eq!(retry_after_seconds(start, 20), 20);
        assert_eq!(retry_after_seconds(start + Duration::seconds(7), 20), 13);
        assert_eq!(retry_after_seconds(start + Duration::seconds(19), 20), 1);
    }

    #[tokio::test]
    async fn sixth_login_in_window_is_throttled_then_resets() -> Result<()> {
        let (clock, limiter) = limiter_at(window_start());
        for _ in 0..5 {
            assert_eq!(
                limiter.check_ip(Some("10.0.0.1"), RateLimitAction::Login).await?,
                RateLimitDecision::Allowed
            );
            clock.advance(Duration::seconds(1));
        }
        let decision = limiter.check_ip(Some("10.0.0.1"), RateLimitAction::Login).await?;
        let RateLimitDecision::Limited {
            retry_after_seconds,
        } = decision
        else {
            panic!("sixth request should be throttled");
        };
        assert_eq!(retry_after_seconds, 15);

        // Other IPs have their own counter.
        assert_eq!(
            limiter.check_ip(Some("10.0.0.2"), RateLimitAction::Login).await?,
            RateLimitDecision::Allowed
        );

        clock.advance(Duration::seconds(20));
        assert_eq!(
            limiter.check_ip(Some("10.0.0.1"), RateLimitAction::Login).await?,
            RateLimitDecision::Allowed
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_discriminator_skips_rule() -> Result<()> {
        let (_clock, limiter) = limiter_at(window_start());
        for _ in 0..10 {
            assert_eq!(
                limiter.check_ip(None, RateLimitAction::Login).await?,
                RateLimitDecision::Allowed
            );
            assert_eq!(
                limiter.check_email(Some("  "), RateLimitAction::Login).await?,
                RateLimitDecision::Allowed
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn email_rule_is_case_insensitive() -> Result<()> {
        let (_clock, limiter) = limiter_at(window_start());
        for email in ["a@x.io", "A@X.io", " a@x.IO "] {
            assert_eq!(
                limiter.check_email(Some(email), RateLimitAction::PasswordReset).await?,
                RateLimitDecision::Allowed
            );
        }
        assert!(matches!(
            limiter.check_email(Some("a@x.io"), RateLimitAction::PasswordReset).await?,
            RateLimitDecision::Limited { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn signup_has_no_email_rule() -> Result<()> {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_email(Some("a@x.io"), RateLimitAction::Signup).await?,
            RateLimitDecision::Allowed
        );
        Ok(())
    }
}
