//! Handler file: maps job types to external commands.
//!
//! ```yaml
//! handlers:
//!   refresh_models:
//!     program: /opt/etl/refresh.sh
//!     args: ["--all"]
//!   render_tiles:
//!     program: /opt/etl/tiles
//!     payload_stdin: true
//!     retryable_exit_codes: [75]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use geoworker_jobs::{CommandHandler, CommandSpec, HandlerRegistry};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerFile {
    pub handlers: BTreeMap<String, CommandSpec>,
}

impl HandlerFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read handler file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Invalid handler file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let file: HandlerFile = serde_yaml::from_str(contents)?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        if self.handlers.is_empty() {
            bail!("no handlers defined");
        }
        for (job_type, spec) in &self.handlers {
            if job_type.trim().is_empty() {
                bail!("job type names must not be empty");
            }
            if spec.program.trim().is_empty() {
                bail!("handler '{}' has an empty program", job_type);
            }
        }
        Ok(())
    }

    pub fn into_registry(self) -> HandlerRegistry {
        self.handlers
            .into_iter()
            .fold(HandlerRegistry::new(), |registry, (job_type, spec)| {
                registry.with_handler(CommandHandler::new(job_type, spec))
            })
    }
}
