use std::path::PathBuf;
use std::time::Duration;

/// Environment variable the agent reads its configuration directory from.
pub const CONFIG_DIR_ENV: &str = "CLAUDE_CONFIG_DIR";

/// Inherited variable that makes a nested agent misbehave; always cleared.
pub const NESTED_SESSION_ENV: &str = "CLAUDECODE";

/// Everything one agent invocation needs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_id: String,
    pub prompt: String,
    pub workspace_path: PathBuf,
    pub config_dir: PathBuf,
    pub skill: Option<String>,
    /// Routing hint only; recorded on the session, never passed to the agent.
    pub agent: Option<String>,
    pub model: Option<String>,
}

impl RunRequest {
    pub fn new(
        session_id: impl Into<String>,
        prompt: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            workspace_path: workspace_path.into(),
            config_dir: config_dir.into(),
            skill: None,
            agent: None,
            model: None,
        }
    }

    pub fn with_skill(mut self, skill: Option<String>) -> Self {
        self.skill = skill;
        self
    }

    pub fn with_agent(mut self, agent: Option<String>) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// The trailing prompt argument: `/<skill> <prompt>` when a skill is set.
    pub fn effective_prompt(&self) -> String {
        match self.skill.as_deref().filter(|s| !s.is_empty()) {
            Some(skill) => format!("/{} {}", skill, self.prompt),
            None => self.prompt.clone(),
        }
    }

    /// Argument list after the binary name.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--print",
            "--output-format",
            "stream-json",
            "--verbose",
            "--dangerously-skip-permissions",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(model) = self.model.as_deref().filter(|m| !m.is_empty()) {
            args.push("--model".to_string());
            args.push(model.to_string());
        }

        args.push(self.effective_prompt());
        args
    }
}

/// Process-level knobs shared by every run, resolved from configuration.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub binary: String,
    pub kill_grace: Duration,
    pub run_timeout: Option<Duration>,
    pub stderr_cap: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            kill_grace: Duration::from_secs(5),
            run_timeout: None,
            stderr_cap: 500,
        }
    }
}
