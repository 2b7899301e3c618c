//! Object storage drivers and their registry.

mod local;

use std::sync::Arc;

pub use local::LocalStorage;

use crate::config::{ConfigError, DriverKind, StorageConfig, StorageDriver};
use crate::domain::ports::ObjectStorage;
use crate::outbound::InitError;
use crate::outbound::registry::announce;

const CAPABILITY: &str = "storage";

/// Settings a cloud driver needs before it could connect.
fn validate_cloud(config: &StorageConfig, driver: StorageDriver) -> Result<String, ConfigError> {
    Ok(match driver {
        StorageDriver::Gcs => format!("bucket={}", config.require_gcs_bucket()?),
        StorageDriver::S3 => {
            let (bucket, _, _) = config.require_s3_credentials()?;
            format!("bucket={bucket} region={}", config.s3_region)
        }
        StorageDriver::Minio => {
            let (bucket, _, _) = config.require_s3_credentials()?;
            format!("bucket={bucket} endpoint={}", config.require_s3_endpoint()?)
        }
        StorageDriver::Local => String::new(),
    })
}

/// Construct the configured object storage.
///
/// Cloud drivers validate their settings and then fail with
/// [`InitError::Unsupported`]; this build carries no cloud SDK.
///
/// # Errors
/// [`InitError::Config`] for missing cloud settings, [`InitError::Unsupported`]
/// for cloud drivers, [`InitError::Io`] when the local root cannot be created.
pub async fn registry_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>, InitError> {
    let driver = StorageDriver::select(&config.driver);
    if driver != StorageDriver::Local {
        return match validate_cloud(config, driver) {
            Ok(detail) => announce(
                "Registry.Storage",
                driver,
                &detail,
                Err(InitError::unsupported(CAPABILITY, driver)),
            ),
            Err(err) => announce("Registry.Storage", driver, "", Err(err.into())),
        };
    }

    let result = LocalStorage::open(
        &config.local_base_path,
        config.local_base_url.clone(),
        config.local_signing_key.as_deref(),
    )
    .map(|storage| Arc::new(storage) as Arc<dyn ObjectStorage>)
    .map_err(|err| InitError::io(CAPABILITY, driver, err));
    let detail = format!(
        "base_path={} signed={}",
        config.local_base_path.display(),
        config.local_signing_key.is_some()
    );
    announce("Registry.Storage", driver, &detail, result)
}
