use serde::{Deserialize, Serialize};
use super::status::{PipelineStatus, StepStatus};

/// A named DAG of agent steps bound to one workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    /// Specification text the pipeline was planned from, if any.
    pub spec: Option<String>,
    pub status: PipelineStatus,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub id: String,
    pub pipeline_id: String,
    /// Declared order, not execution order.
    pub position: i64,
    pub name: String,
    pub description: Option<String>,
    pub agent: Option<String>,
    pub skill: Option<String>,
    pub model: Option<String>,
    pub prompt_template: Option<String>,
    pub depends_on: Vec<String>,
    pub status: StepStatus,
    pub session_id: Option<String>,
    pub output_summary: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl PipelineStep {
    /// The text sent to the agent before placeholder resolution: the
    /// template, else the description, else the name.
    pub fn raw_prompt(&self) -> &str {
        self.prompt_template
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.description.as_deref().filter(|d| !d.is_empty()))
            .unwrap_or(&self.name)
    }
}

/// Insert shape for a step whose dependencies are already step ids.
#[derive(Debug, Clone, Default)]
pub struct NewStep {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub agent: Option<String>,
    pub skill: Option<String>,
    pub model: Option<String>,
    pub prompt_template: Option<String>,
    pub depends_on: Vec<String>,
}

impl NewStep {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }
}
