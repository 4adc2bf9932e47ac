//! Handler registry keyed by job type.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::handler::JobHandler;

/// Job-type → handler map, built once at startup and handed to the dispatcher.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own job type.
    ///
    /// A second registration for the same type replaces the first and returns it.
    pub fn register<H: JobHandler + 'static>(
        &mut self,
        handler: H,
    ) -> Option<Arc<dyn JobHandler>> {
        self.register_arc(Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn register_arc(&mut self, handler: Arc<dyn JobHandler>) -> Option<Arc<dyn JobHandler>> {
        let job_type = handler.job_type().to_string();
        let previous = self.handlers.insert(job_type.clone(), handler);
        if previous.is_some() {
            warn!(subsystem = "jobs", component = "registry", %job_type, "Replaced job handler");
        } else {
            debug!(subsystem = "jobs", component = "registry", %job_type, "Registered job handler");
        }
        previous
    }

    /// Builder-style [`HandlerRegistry::register`].
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
