//! AES-256-GCM on `ring` with an Argon2id-derived key.
//!
//! Every seal draws a fresh random 96-bit nonce from the system CSPRNG and
//! prepends it to the ciphertext: `nonce || ciphertext || tag`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::domain::ports::{CryptoError, SymmetricCrypto};

/// Fixed so the same secret always yields the same key across processes.
const KDF_SALT: &[u8; 16] = b"skeleton.aead.v1";
const KDF_MEMORY_KIB: u32 = 19_456;
const KDF_ITERATIONS: u32 = 2;
const TAG_LEN: usize = 16;

/// Derive the 32-byte AEAD key from a configured secret.
fn derive_key(secret: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let params = argon2::Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, 1, Some(32))
        .map_err(|err| CryptoError::key(err.to_string()))?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut output = Zeroizing::new([0_u8; 32]);
    argon2
        .hash_password_into(secret, KDF_SALT, output.as_mut())
        .map_err(|err| CryptoError::key(err.to_string()))?;
    Ok(output)
}

/// Authenticated symmetric encryption keyed from a secret.
pub struct AesGcmCrypto {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl AesGcmCrypto {
    /// # Errors
    /// [`CryptoError::Key`] when the secret is empty or key setup fails.
    pub fn new(secret: &str) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::key("secret must not be empty"));
        }
        let derived = derive_key(secret.as_bytes())?;
        let unbound = UnboundKey::new(&AES_256_GCM, derived.as_ref())
            .map_err(|_| CryptoError::key("failed to create AES-256-GCM key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }
}

impl SymmetricCrypto for AesGcmCrypto {
    fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0_u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Encrypt)?;
        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Encrypt)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    fn decrypt_bytes(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::Decrypt)?;
        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(plaintext.to_vec())
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt_bytes(plaintext.as_bytes())
            .map(|sealed| STANDARD.encode(sealed))
    }

    fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let sealed = STANDARD
            .decode(encoded)
            .map_err(|err| CryptoError::encoding(err.to_string()))?;
        let plaintext = self.decrypt_bytes(&sealed)?;
        String::from_utf8(plaintext).map_err(|err| CryptoError::encoding(err.to_string()))
    }

    fn hash(&self, data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn compare_hash(&self, data: &[u8], digest: &str) -> bool {
        let Ok(expected) = hex::decode(digest.trim()) else {
            return false;
        };
        let actual = Sha256::digest(data);
        expected.len() == actual.len() && bool::from(actual.as_slice().ct_eq(&expected))
    }
}
