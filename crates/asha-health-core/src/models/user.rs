//! Device operator models.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};

/// Registration input for a device operator.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    /// Optional; generated when empty
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    /// Plain text as typed; only its Argon2id hash is stored
    pub password: String,
    pub asha_id: String,
    pub phone: String,
    pub supervisor_id: Option<String>,
    pub territory_state: Option<String>,
    pub territory_district: Option<String>,
    pub territory_block: Option<String>,
    pub territory_village: Option<String>,
    pub preferred_language: Option<String>,
}

/// A stored device operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    /// Always lower-case
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub asha_id: String,
    pub phone: String,
    pub supervisor_id: String,
    pub territory_state: String,
    pub territory_district: String,
    pub territory_block: String,
    pub territory_village: String,
    pub preferred_language: Option<String>,
    pub created_at: String,
    pub is_active: bool,
}

/// Default UI language for new operators.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Argon2id hash of a password with a fresh random salt, in PHC string format.
///
/// CPU-intensive; call from a blocking task.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

/// Check a password against a stored PHC hash.
///
/// A wrong password is `Ok(false)`; a malformed stored hash is an error.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, password_hash::Error> {
    let parsed = PasswordHash::new(stored_hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Normalize an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_is_salted() {
        let a = hash_password("secret").unwrap();
        let b = hash_password("secret").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));

        assert!(verify_password("secret", &a).unwrap());
        assert!(verify_password("secret", &b).unwrap());
        assert!(!verify_password("Secret", &a).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(verify_password("secret", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Asha@Example.ORG "), "asha@example.org");
    }
}
