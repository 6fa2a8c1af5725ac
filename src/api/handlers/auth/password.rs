//! Password strength policy and argon2 hashing.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

pub const DEFAULT_MIN_LENGTH: usize = 8;

const SPECIAL_CHARACTERS: &str = r#"!@#$%^&*()_+-=[]{};':"\|,.<>/?"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasswordPolicy {
    min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LENGTH)
    }
}

impl PasswordPolicy {
    #[must_use]
    pub const fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    #[must_use]
    pub const fn min_length(&self) -> usize {
        self.min_length
    }

    /// Every rule the password breaks, in a stable order. Empty means strong.
    #[must_use]
    pub fn violations(&self, password: &str) -> Vec<String> {
        let mut violations = Vec::new();
        if password.chars().count() < self.min_length {
            violations.push(format!(
                "must be at least {} characters long",
                self.min_length
            ));
        }
        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            violations.push("must include at least one uppercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            violations.push("must include at least one lowercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push("must include at least one number".to_string());
        }
        if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
            violations.push("must include at least one special character (!@#$%^&*...)".to_string());
        }
        violations
    }
}

/// A PHC-encoded argon2 hash and the salt embedded in it.
pub struct HashedPassword {
    pub hash: String,
    pub salt: String,
}

/// Hash with a freshly generated salt.
pub fn hash_password(password: &str) -> Result<HashedPassword> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string();
    Ok(HashedPassword {
        hash,
        salt: salt.as_str().to_string(),
    })
}

/// Constant-time comparison through argon2. A malformed stored hash never
/// verifies.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_password_reports_every_rule() {
        let violations = PasswordPolicy::default().violations("abc");
        assert_eq!(violations.len(), 4);
        assert!(violations[0].contains("at least 8 characters"));
        assert!(violations.iter().any(|v| v.contains("uppercase")));
        assert!(violations.iter().any(|v| v.contains("number")));
        assert!(violations.iter().any(|v| v.contains("special")));
    }

    #[test]
    fn strong_password_passes() {
        assert!(PasswordPolicy::default().violations("Abcdef1!").is_empty());
    }

    #[test]
    fn min_length_is_configurable() {
        let policy = PasswordPolicy::new(12);
        assert_eq!(policy.violations("Abcdef1!").len(), 1);
        assert!(policy.violations("Abcdefgh123!").is_empty());
    }

    #[test]
    fn hash_round_trip_and_fresh_salt() -> Result<()> {
        let first = hash_password("Abcdef1!")?;
        let second = hash_password("Abcdef1!")?;
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.hash, "Abcdef1!");
        assert!(verify_password("Abcdef1!", &first.hash));
        assert!(!verify_password("Abcdef1?", &first.hash));
        assert!(!verify_password("Abcdef1!", "not-a-phc-string"));
        Ok(())
    }
}
