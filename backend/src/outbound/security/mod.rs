//! Security capabilities: password hashing, tokens and symmetric crypto.

mod aes_gcm;
mod jwt;
mod password;

use std::sync::Arc;

use mockable::Clock;

pub use aes_gcm::AesGcmCrypto;
pub use jwt::JwtIssuer;
pub use password::Argon2Hasher;

use crate::config::{ConfigError, CryptoConfig, HasherConfig, TokenConfig};
use crate::domain::ports::{Hasher, SymmetricCrypto, TokenIssuer};
use crate::outbound::InitError;
use crate::outbound::registry::announce;

/// # Errors
/// [`InitError::Config`] when the cost is rejected by Argon2.
pub fn registry_hasher(config: &HasherConfig) -> Result<Arc<dyn Hasher>, InitError> {
    let result = Argon2Hasher::new(config.cost)
        .map(|hasher| Arc::new(hasher) as Arc<dyn Hasher>)
        .map_err(|_| {
            InitError::from(ConfigError::Invalid {
                name: "BCRYPT_COST",
                value: config.cost.to_string(),
                expected: "an Argon2 iteration count",
            })
        });
    announce(
        "Registry.Hasher",
        "argon2id",
        &format!("cost={}", config.cost),
        result,
    )
}

/// # Errors
/// [`InitError::Config`] when `JWT_SECRET_KEY` is unset.
pub fn registry_token_issuer(
    config: &TokenConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn TokenIssuer>, InitError> {
    let result = config
        .require_secret()
        .map(|secret| {
            Arc::new(JwtIssuer::new(
                secret,
                config.issuer.clone(),
                config.expiry,
                config.refresh_window,
                clock,
            )) as Arc<dyn TokenIssuer>
        })
        .map_err(InitError::from);
    announce(
        "Registry.Token",
        "hs256",
        &format!("issuer={} expiry={:?}", config.issuer, config.expiry),
        result,
    )
}

/// # Errors
/// [`InitError::Config`] when `ENCRYPTION_KEY` is unset or unusable.
pub fn registry_crypto(config: &CryptoConfig) -> Result<Arc<dyn SymmetricCrypto>, InitError> {
    let result = config.require_key().map_err(InitError::from).and_then(|key| {
        AesGcmCrypto::new(key)
            .map(|crypto| Arc::new(crypto) as Arc<dyn SymmetricCrypto>)
            .map_err(|_| {
                InitError::from(ConfigError::Invalid {
                    name: "ENCRYPTION_KEY",
                    value: "<redacted>".to_owned(),
                    expected: "a non-empty secret",
                })
            })
    });
    announce("Registry.Crypto", "aes-256-gcm", "", result)
}
