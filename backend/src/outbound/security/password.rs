//! Argon2id password hashing producing PHC strings.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::domain::ports::{HashError, Hasher};

/// Argon2id with a configurable iteration count.
///
/// Verification reads the parameters from the stored digest, so raising the
/// cost does not invalidate existing hashes.
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    /// `cost` is the Argon2 time cost; zero is raised to one.
    ///
    /// # Errors
    /// [`HashError::Hashing`] when the parameters are rejected.
    pub fn new(cost: u32) -> Result<Self, HashError> {
        let params = Params::new(
            Params::DEFAULT_M_COST,
            cost.max(1),
            Params::DEFAULT_P_COST,
            None,
        )
        .map_err(|err| HashError::hashing(err.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl Hasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|digest| digest.to_string())
            .map_err(|err| HashError::hashing(err.to_string()))
    }

    fn compare(&self, password: &str, digest: &str) -> bool {
        PasswordHash::new(digest).is_ok_and(|parsed| {
            self.argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    }
}
