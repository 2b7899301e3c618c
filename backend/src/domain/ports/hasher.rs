//! Port for one-way password hashing.
use super::define_port_error;

define_port_error! {
    /// Errors surfaced by hashing adapters.
    pub enum HashError {
        Hashing { message: String } => "password hashing failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Hasher: Send + Sync {
    /// Self-describing digest of `password` with a fresh salt.
    fn hash(&self, password: &str) -> Result<String, HashError>;

    /// `false` for a wrong password and for malformed digests alike.
    fn compare(&self, password: &str, digest: &str) -> bool;
}
