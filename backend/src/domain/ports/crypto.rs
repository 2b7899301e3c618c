//! Port for symmetric authenticated encryption and digests.
use super::define_port_error;

define_port_error! {
    /// Errors surfaced by crypto adapters.
    pub enum CryptoError {
        Encrypt => "encryption failed",
        /// Wrong key, tampered ciphertext or truncated input.
        Decrypt => "decryption failed",
        Encoding { message: String } => "ciphertext encoding is invalid: {message}",
        Key { message: String } => "encryption key is unusable: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait SymmetricCrypto: Send + Sync {
    /// Ciphertext is `nonce || sealed`; every call uses a fresh nonce.
    fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt_bytes(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Encrypt text; the result is base64.
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;

    fn decrypt(&self, encoded: &str) -> Result<String, CryptoError>;

    /// Hex SHA-256 digest.
    fn hash(&self, data: &[u8]) -> String;

    /// Constant-time comparison of `data`'s digest with `digest`.
    fn compare_hash(&self, data: &[u8], digest: &str) -> bool;
}
