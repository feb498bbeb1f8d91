use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::git::GitHelper;
use crate::github::GhClient;
use crate::pipeline::{DEFAULT_MAX_PARALLEL, DEFAULT_POLL_INTERVAL};
use crate::runner::RunnerSettings;
use crate::utils::expand_home;

pub const DEFAULT_AGENT_BINARY: &str = "claude";
pub const DEFAULT_CONFIG_DIR: &str = "~/.claude-personal";
pub const DEFAULT_DATABASE_PATH: &str = "conductor.db";

/// The configuration file as written. Every field is optional.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ConductorConfig {
    pub agent: Option<AgentConfig>,
    pub scheduler: Option<SchedulerConfig>,
    pub database: Option<DatabaseConfig>,
    pub helpers: Option<HelpersConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AgentConfig {
    pub binary: Option<String>,
    /// Agent configuration directory used for new workspaces.
    pub config_dir: Option<String>,
    pub kill_grace_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub stderr_cap: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SchedulerConfig {
    pub max_parallel: Option<usize>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DatabaseConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HelpersConfig {
    pub git_binary: Option<String>,
    pub git_timeout_secs: Option<u64>,
    pub gh_binary: Option<String>,
    pub gh_timeout_secs: Option<u64>,
}

/// Resolved configuration with every default applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub agent_binary: String,
    pub config_dir: String,
    pub kill_grace: Duration,
    pub run_timeout: Option<Duration>,
    pub stderr_cap: usize,
    pub max_parallel: usize,
    pub poll_interval: Duration,
    pub database_path: PathBuf,
    pub git_binary: String,
    pub git_timeout: Duration,
    pub gh_binary: String,
    pub gh_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&ConductorConfig::default())
    }
}

impl Settings {
    pub fn from_config(config: &ConductorConfig) -> Self {
        let agent = config.agent.clone().unwrap_or_default();
        let scheduler = config.scheduler.clone().unwrap_or_default();
        let database = config.database.clone().unwrap_or_default();
        let helpers = config.helpers.clone().unwrap_or_default();

        Self {
            agent_binary: agent.binary.unwrap_or_else(|| DEFAULT_AGENT_BINARY.to_string()),
            config_dir: agent.config_dir.unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string()),
            kill_grace: Duration::from_secs(agent.kill_grace_secs.unwrap_or(5)),
            run_timeout: agent.run_timeout_secs.map(Duration::from_secs),
            stderr_cap: agent.stderr_cap.unwrap_or(500),
            max_parallel: scheduler.max_parallel.unwrap_or(DEFAULT_MAX_PARALLEL),
            poll_interval: scheduler
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            database_path: expand_home(database.path.as_deref().unwrap_or(DEFAULT_DATABASE_PATH)),
            git_binary: helpers.git_binary.unwrap_or_else(|| "git".to_string()),
            git_timeout: Duration::from_secs(helpers.git_timeout_secs.unwrap_or(10)),
            gh_binary: helpers.gh_binary.unwrap_or_else(|| "gh".to_string()),
            gh_timeout: Duration::from_secs(helpers.gh_timeout_secs.unwrap_or(15)),
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            binary: self.agent_binary.clone(),
            kill_grace: self.kill_grace,
            run_timeout: self.run_timeout,
            stderr_cap: self.stderr_cap,
        }
    }

    pub fn git_helper(&self) -> GitHelper {
        GitHelper::new(self.git_binary.clone(), self.git_timeout)
    }

    pub fn gh_client(&self) -> GhClient {
        GhClient::new(self.gh_binary.clone(), self.gh_timeout)
    }
}
