//! Salted Argon2id password hashing.

use argon2::{Config, Variant};
use rand::RngCore;

use crate::{error::AuthError, types::HashedPassword};

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 32;
pub const MIN_PASSWORD_LENGTH: usize = 8;

const SALT_LENGTH: usize = 16;

/// Argon2 work factors. The default costs roughly 100ms per hash on current
/// server hardware.
#[derive(Debug, Clone, Copy)]
pub struct HashCost {
    /// Memory in KiB.
    pub mem_cost: u32,
    /// Number of passes.
    pub time_cost: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            mem_cost: 19 * 1024,
            time_cost: 2,
        }
    }
}

impl HashCost {
    fn config(&self) -> Config<'static> {
        Config {
            variant: Variant::Argon2id,
            mem_cost: self.mem_cost,
            time_cost: self.time_cost,
            ..Config::default()
        }
    }
}

// lengths are measured in UTF-8 bytes
pub fn validate_username(username: &str) -> Result<(), AuthError> {
    let length = username.len();
    if length < MIN_USERNAME_LENGTH {
        return Err(AuthError::Validation(format!(
            "username must be at least {MIN_USERNAME_LENGTH} characters long"
        )));
    }
    if length > MAX_USERNAME_LENGTH {
        return Err(AuthError::Validation(format!(
            "username must be no more than {MAX_USERNAME_LENGTH} characters"
        )));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters long"
        )));
    }
    Ok(())
}

pub fn hash(password: &str, cost: &HashCost) -> Result<HashedPassword, AuthError> {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);

    let encoded = argon2::hash_encoded(password.as_bytes(), &salt, &cost.config())?;
    Ok(HashedPassword(encoded))
}

/// Constant-time check of `password` against a stored encoded hash. A hash that
/// fails to parse never matches.
pub fn verify(password: &str, hash: &HashedPassword) -> bool {
    argon2::verify_encoded(&hash.0, password.as_bytes()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHEAP: HashCost = HashCost {
        mem_cost: 64,
        time_cost: 1,
    };

    #[test]
    fn hash_round_trip() {
        let hashed = hash("password123", &CHEAP).unwrap();

        assert_ne!(hashed.0, "password123");
        assert!(hashed.0.starts_with("$argon2id$"));
        assert!(verify("password123", &hashed));
        assert!(!verify("password124", &hashed));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let first = hash("password123", &CHEAP).unwrap();
        let second = hash("password123", &CHEAP).unwrap();
        assert_ne!(first.0, second.0);
    }

    #[test]
    fn garbage_hash_never_matches() {
        assert!(!verify("password123", &HashedPassword("not a hash".into())));
    }

    #[test]
    fn username_bounds() {
        assert!(validate_username("al").is_err());
        assert!(validate_username("ali").is_ok());
        assert!(validate_username(&"a".repeat(32)).is_ok());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn password_minimum_length() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("12345678").is_ok());
    }

    #[test]
    fn lengths_count_bytes_not_characters() {
        // "é" is two bytes in UTF-8
        assert!(validate_username(&"é".repeat(16)).is_ok());
        assert!(validate_username(&"é".repeat(17)).is_err());
        assert!(validate_username("é").is_err());
        assert!(validate_username("éa").is_ok());

        assert!(validate_password(&"é".repeat(4)).is_ok());
        assert!(validate_password(&"é".repeat(3)).is_err());
    }
}
