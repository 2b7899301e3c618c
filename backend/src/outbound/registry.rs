//! Shared plumbing for the capability registries.

use std::fmt;

use tracing::{error, info};

use crate::config::ConfigError;

/// Capability construction failed; the process cannot start.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The backend could not be reached or rejected the connection.
    #[error("{capability} driver {driver} failed to connect: {message}")]
    Connect {
        capability: &'static str,
        driver: String,
        message: String,
    },
    /// The driver is recognised but not built into this binary.
    #[error("{capability} driver {driver} is not supported by this build")]
    Unsupported {
        capability: &'static str,
        driver: String,
    },
    /// A component built on top of the drivers could not be prepared.
    #[error("failed to set up {component}: {message}")]
    Setup {
        component: &'static str,
        message: String,
    },
    #[error("{capability} driver {driver} failed: {source}")]
    Io {
        capability: &'static str,
        driver: String,
        #[source]
        source: std::io::Error,
    },
}

impl InitError {
    pub(crate) fn connect(
        capability: &'static str,
        driver: impl fmt::Display,
        message: impl fmt::Display,
    ) -> Self {
        Self::Connect {
            capability,
            driver: driver.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn unsupported(capability: &'static str, driver: impl fmt::Display) -> Self {
        Self::Unsupported {
            capability,
            driver: driver.to_string(),
        }
    }

    pub fn setup(component: &'static str, message: impl fmt::Display) -> Self {
        Self::Setup {
            component,
            message: message.to_string(),
        }
    }

    pub(crate) fn io(
        capability: &'static str,
        driver: impl fmt::Display,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            capability,
            driver: driver.to_string(),
            source,
        }
    }
}

/// Log the single construction outcome of a capability.
///
/// `detail` must not contain secrets.
pub(crate) fn announce<T>(
    operation: &'static str,
    driver: impl fmt::Display,
    detail: &str,
    result: Result<T, InitError>,
) -> Result<T, InitError> {
    match &result {
        Ok(_) => info!(%operation, driver = %driver, detail, "capability ready"),
        Err(err) => error!(
            %operation,
            driver = %driver,
            detail,
            error = %err,
            "capability initialisation failed"
        ),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_convert_transparently() {
        let err = InitError::from(ConfigError::Missing {
            name: "JWT_SECRET_KEY",
        });
        assert_eq!(
            err.to_string(),
            "missing required configuration value: JWT_SECRET_KEY"
        );
    }

    #[test]
    fn announce_passes_results_through() {
        let ok = announce("Registry.Cache", "memory", "", Ok::<_, InitError>(7));
        assert_eq!(ok.expect("ok"), 7);
        let failed = announce::<()>(
            "Registry.Storage",
            "s3",
            "region=us-east-1",
            Err(InitError::unsupported("storage", "s3")),
        );
        assert!(matches!(failed, Err(InitError::Unsupported { .. })));
    }
}
