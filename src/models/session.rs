use serde::{Deserialize, Serialize};
use super::status::{SessionStatus, TaskStatus};
use crate::protocol::{EventKind, ProtocolEvent};

/// One agent process invocation, standalone or bound to a pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub workspace_id: String,
    pub prompt: String,
    pub skill: Option<String>,
    pub agent: Option<String>,
    pub model: Option<String>,
    pub status: SessionStatus,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub num_turns: Option<u32>,
    pub duration_ms: Option<u64>,
    /// The agent's own session identifier, reported in its init and result lines.
    pub agent_session_id: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Values recorded on a session when its run ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    pub model: Option<String>,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub num_turns: Option<u32>,
    pub duration_ms: Option<u64>,
    pub agent_session_id: Option<String>,
}

impl SessionOutcome {
    pub fn status_only(status: SessionStatus) -> Self {
        Self {
            status,
            model: None,
            cost_usd: None,
            input_tokens: None,
            output_tokens: None,
            num_turns: None,
            duration_ms: None,
            agent_session_id: None,
        }
    }

    /// Metrics carried by a run's terminal event. Anything other than a
    /// finished run is recorded as an error.
    pub fn from_terminal(event: &ProtocolEvent) -> Self {
        let status = match event.kind {
            EventKind::RunFinished => SessionStatus::Completed,
            _ => SessionStatus::Error,
        };
        Self {
            status,
            model: event.model.clone(),
            cost_usd: event.cost_usd,
            input_tokens: event.input_tokens,
            output_tokens: event.output_tokens,
            num_turns: event.num_turns,
            duration_ms: event.duration_ms,
            agent_session_id: event.agent_session_id.clone(),
        }
    }
}

/// One node of a session's tool-invocation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorTask {
    pub id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub parent_id: Option<String>,
    pub tool_name: String,
    pub description: String,
    pub subagent_type: Option<String>,
    pub subagent_model: Option<String>,
    pub status: TaskStatus,
    pub input_summary: Option<String>,
    pub output_summary: Option<String>,
    pub depth: usize,
    pub duration_ms: Option<u64>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Filesystem change measured around one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffCapture {
    pub diff_stat: Option<String>,
    pub diff_content: Option<String>,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

impl DiffCapture {
    pub fn is_empty(&self) -> bool {
        self.diff_stat.is_none() && self.diff_content.is_none()
    }
}

/// Where runs for a workspace execute and which agent configuration they use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub path: String,
    pub config_dir: String,
    pub created_at: String,
}
