//! CLI Common Utilities
//!
//! Shared initialization for command handlers: configuration with CLI
//! overrides applied, the artifact store and a gateway.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::ai::Gateway;
use crate::config::{BackendKind, Config, ConfigLoader};
use crate::report::{ArtifactStore, ReportPipeline};
use crate::types::{Result, RunId};

/// Flags accepted by every command
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Explicit config file instead of the global/project chain
    pub config: Option<PathBuf>,
    pub provider: Option<BackendKind>,
    pub run_id: Option<String>,
}

/// Command execution context
pub struct CommandContext {
    pub config: Config,
    pub run_id: Option<RunId>,
    pipeline: ReportPipeline,
}

impl CommandContext {
    pub fn load(options: &GlobalOptions) -> Result<Self> {
        let mut config = match &options.config {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        if let Some(provider) = options.provider {
            config.llm.provider = provider;
        }
        Ok(Self::with_config(config, options.run_id.clone().map(RunId::new)))
    }

    pub fn with_config(config: Config, run_id: Option<RunId>) -> Self {
        let (store, run_id) = ArtifactStore::from_config(&config.output, run_id);
        if let Some(id) = &run_id {
            info!(run_id = %id, root = %store.root().display(), "Isolated run");
        }
        let label = run_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "reportweave".to_string());
        let gateway = Arc::new(Gateway::new(&config, label));

        Self {
            pipeline: ReportPipeline::new(config.clone(), gateway, store),
            config,
            run_id,
        }
    }

    pub fn pipeline(&self) -> &ReportPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &ArtifactStore {
        self.pipeline.store()
    }

    /// Per-stage call and token summary of this process
    pub fn metrics_report(&self) -> String {
        self.pipeline.gateway().metrics().summary().display()
    }
}
