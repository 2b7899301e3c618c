//! Job type to handler lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::JobHandler;

/// Handlers keyed by job type, e.g. `email:send`.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("JobRegistry").field("types", &types).finish()
    }
}

impl JobRegistry {
    /// Register `handler` for `job_type`, replacing any previous handler.
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(job_type.into(), handler);
        self
    }

    #[must_use]
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::domain::{JobContext, JobError};

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _ctx: JobContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn lookups_are_by_exact_type() {
        let mut registry = JobRegistry::default();
        registry
            .register("email:send", Arc::new(Noop))
            .register("sms:send", Arc::new(Noop));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("email:send").is_some());
        assert!(registry.get("email").is_none());
        assert_eq!(
            format!("{registry:?}"),
            r#"JobRegistry { types: ["email:send", "sms:send"] }"#
        );
    }
}
