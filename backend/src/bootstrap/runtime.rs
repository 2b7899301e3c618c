//! The explicitly passed process runtime: configuration, tracer and log
//! setup.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mockable::Env;
use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::telemetry::{LogFormat, Tracer, init_logging};

/// Shared by every ingress; cheap to clone.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub config: Arc<Config>,
    pub tracer: Tracer,
    log_format: LogFormat,
    closed: Arc<AtomicBool>,
}

impl Runtime {
    #[must_use]
    pub fn new(config: Config, log_format: LogFormat) -> Self {
        Self {
            config: Arc::new(config),
            tracer: Tracer::default(),
            log_format,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load configuration from `env` and its dotfile and pick the log format.
    ///
    /// # Errors
    /// [`ConfigError`] when the dotfile is unreadable or a value is invalid.
    pub fn from_env<E: Env>(env: &E) -> Result<Self, ConfigError> {
        let config = Config::load(env)?;
        Ok(Self::new(config, LogFormat::from_env(env)))
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Install the log subscriber. Later calls are no-ops.
    pub fn init_logging(&self) -> bool {
        let installed = init_logging(self.log_format);
        if installed {
            info!(
                operation = "Runtime.Init",
                app = %self.config.app.name,
                format = ?self.log_format,
                "logging initialised"
            );
        }
        installed
    }

    /// Mark the runtime closed. Returns `false` when already closed.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            debug!(operation = "Runtime.Close", app = %self.config.app.name, "runtime closed");
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockable::MockEnv;

    #[test]
    fn loads_config_and_format_from_the_environment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dotfile = temp.path().join("missing.env");
        let dotfile_value = dotfile.to_string_lossy().into_owned();
        let mut env = MockEnv::new();
        env.expect_string().returning(move |key| match key {
            "APP_DOTFILE" => Some(dotfile_value.clone()),
            "APP_NAME" => Some("orders".to_owned()),
            "LOG_FORMAT" => Some("text".to_owned()),
            _ => None,
        });

        let runtime = Runtime::from_env(&env).expect("runtime");

        assert_eq!(runtime.config.app.name, "orders");
        assert_eq!(runtime.log_format(), LogFormat::Text);
    }

    #[test]
    fn invalid_values_fail_loading() {
        let mut env = MockEnv::new();
        env.expect_string().returning(|key| match key {
            "APP_DOTFILE" => Some("/nonexistent/skeleton.env".to_owned()),
            "APP_PORT" => Some("x".to_owned()),
            _ => None,
        });

        let err = Runtime::from_env(&env).expect_err("port must be numeric");
        assert!(matches!(err, ConfigError::Invalid { name: "APP_PORT", .. }));
    }

    #[test]
    fn close_is_idempotent_across_clones() {
        let runtime = Runtime::new(Config::default(), LogFormat::Json);
        let clone = runtime.clone();
        assert!(runtime.close());
        assert!(!clone.close());
    }

    #[test]
    fn logging_setup_can_repeat() {
        let runtime = Runtime::new(Config::default(), LogFormat::Json);
        runtime.init_logging();
        assert!(!runtime.init_logging());
    }
}
