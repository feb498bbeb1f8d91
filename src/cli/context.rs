use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::commands::WorkspaceArgs;
use crate::config::{load_settings, Settings};
use crate::db::Database;
use crate::errors::ConductorError;
use crate::models::Workspace;
use crate::runner::{AgentLauncher, ProcessLauncher};

/// Settings and database shared by every command handler.
pub struct AppContext {
    pub settings: Settings,
    pub db: Database,
}

impl AppContext {
    pub async fn load(config: Option<&str>, db_override: Option<&str>) -> Result<Self, ConductorError> {
        let settings = load_settings(config.map(Path::new)).await?;
        let db_path = match db_override {
            Some(path) => path.to_string(),
            None => settings.database_path.to_string_lossy().into_owned(),
        };
        debug!(database = %db_path, "Opening database");
        let db = Database::new(&db_path)?;
        Ok(Self { settings, db })
    }

    pub fn launcher(&self) -> Arc<dyn AgentLauncher> {
        Arc::new(ProcessLauncher::new(self.settings.runner_settings()))
    }

    /// Register the workspace directory, returning the stored row. The path is
    /// canonicalized so the same directory always maps to one workspace.
    pub fn workspace(&self, args: &WorkspaceArgs) -> Result<Workspace, ConductorError> {
        let path = std::fs::canonicalize(&args.workspace)
            .map_err(|e| ConductorError::NotFound(format!("workspace {}: {}", args.workspace, e)))?;
        if !path.is_dir() {
            return Err(ConductorError::NotFound(format!("workspace {} is not a directory", path.display())));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let config_dir = args.config_dir.as_deref().unwrap_or(&self.settings.config_dir);
        self.db.upsert_workspace(&name, &path.to_string_lossy(), config_dir)
    }
}
