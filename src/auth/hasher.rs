//! Password Hashing
//!
//! Argon2id PHC strings: algorithm, parameters and salt travel with the hash,
//! so verification keeps working after the work factor is retuned.

use super::AuthError;
use crate::config::HashingConfig;
use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version};
use password_hash::{PasswordHash, SaltString};

/// Salted, adaptive credential hashing
pub trait PasswordHasher: Send + Sync {
    /// Fails with `Validation` on empty input
    fn hash(&self, plaintext: &str) -> Result<String, AuthError>;

    /// Never errors: a malformed hash or a mismatch is simply `false`
    fn verify(&self, hash: &str, plaintext: &str) -> bool;
}

/// Argon2id implementation
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new(config: &HashingConfig) -> Result<Self, AuthError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AuthError::internal(anyhow::anyhow!("invalid argon2 parameters: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        if plaintext.is_empty() {
            return Err(AuthError::validation("password must not be empty"));
        }

        let salt_bytes = super::crypto::random_bytes::<16>()?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AuthError::internal(anyhow::anyhow!("salt encoding failed: {e}")))?;

        let phc = self
            .argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| AuthError::internal(anyhow::anyhow!("password hashing failed: {e}")))?
            .to_string();

        Ok(phc)
    }

    fn verify(&self, hash: &str, plaintext: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> Argon2Hasher {
        Argon2Hasher::new(&HashingConfig::fast_for_tests()).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("Secret123!").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert_ne!(hash, "Secret123!");
        assert!(hasher.verify(&hash, "Secret123!"));
        assert!(!hasher.verify(&hash, "Secret123?"));
    }

    #[test]
    fn test_same_password_gets_distinct_salts() {
        let hasher = fast_hasher();
        let a = hasher.hash("hunter22").unwrap();
        let b = hasher.hash("hunter22").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_password_rejected() {
        let hasher = fast_hasher();
        assert!(matches!(hasher.hash(""), Err(AuthError::Validation(_))));
    }

    #[test]
    fn test_malformed_hash_is_mismatch() {
        let hasher = fast_hasher();
        assert!(!hasher.verify("not-a-phc-string", "whatever"));
        assert!(!hasher.verify("", ""));
    }

    #[test]
    fn test_invalid_params_are_internal() {
        let config = HashingConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        let err = Argon2Hasher::new(&config).err().unwrap();
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(err.status(), crate::auth::Status::Internal);
    }
}
