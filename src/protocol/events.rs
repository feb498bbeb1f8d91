use serde::{Deserialize, Serialize};

/// Discriminator of a normalized run event. The serialized name doubles as
/// the server-push event name used by transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    RunStarted,
    RunFinished,
    RunError,
    TextMessageStart,
    TextMessageContent,
    TextMessageEnd,
    ToolCallStart,
    ToolCallEnd,
    ToolCallResult,
    StateSnapshot,
    PipelineStarted,
    PipelineCompleted,
    PipelineFailed,
    PipelineStepStarted,
    PipelineStepCompleted,
    PipelineStepFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "RunStarted",
            Self::RunFinished => "RunFinished",
            Self::RunError => "RunError",
            Self::TextMessageStart => "TextMessageStart",
            Self::TextMessageContent => "TextMessageContent",
            Self::TextMessageEnd => "TextMessageEnd",
            Self::ToolCallStart => "ToolCallStart",
            Self::ToolCallEnd => "ToolCallEnd",
            Self::ToolCallResult => "ToolCallResult",
            Self::StateSnapshot => "StateSnapshot",
            Self::PipelineStarted => "PipelineStarted",
            Self::PipelineCompleted => "PipelineCompleted",
            Self::PipelineFailed => "PipelineFailed",
            Self::PipelineStepStarted => "PipelineStepStarted",
            Self::PipelineStepCompleted => "PipelineStepCompleted",
            Self::PipelineStepFailed => "PipelineStepFailed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized run event. Only the fields relevant to `kind` are
/// populated; everything else is omitted on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    // Text messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    // Tool calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_is_error: Option<bool>,

    // Run metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    // Pipelines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_completed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_total: Option<usize>,
}

impl ProtocolEvent {
    /// A bare event of `kind` with no timestamp and no optional fields.
    pub fn new(kind: EventKind, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            timestamp: None,
            message_id: None,
            text: None,
            role: None,
            tool_call_id: None,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            tool_is_error: None,
            model: None,
            cost_usd: None,
            input_tokens: None,
            output_tokens: None,
            cache_read_tokens: None,
            cache_write_tokens: None,
            num_turns: None,
            duration_ms: None,
            agent_session_id: None,
            state: None,
            error: None,
            pipeline_id: None,
            step_id: None,
            step_name: None,
            step_position: None,
            step_agent: None,
            steps_completed: None,
            steps_total: None,
        }
    }

    /// Same as `new` but stamped with the current time.
    pub fn now(kind: EventKind, session_id: impl Into<String>) -> Self {
        Self {
            timestamp: Some(crate::utils::now_rfc3339()),
            ..Self::new(kind, session_id)
        }
    }

    pub fn run_error(session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::now(EventKind::RunError, session_id)
        }
    }

    /// Finished or errored: the two kinds that close a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::RunFinished | EventKind::RunError)
    }

    /// Attach pipeline coordinates so consumers can rebuild per-step timelines.
    pub fn tagged(mut self, pipeline_id: &str, step_id: &str) -> Self {
        self.pipeline_id = Some(pipeline_id.to_string());
        self.step_id = Some(step_id.to_string());
        self
    }

    /// JSON body with every non-applicable field omitted.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_omits_empty_fields() {
        let event = ProtocolEvent {
            text: Some("hi".to_string()),
            message_id: Some("abc".to_string()),
            ..ProtocolEvent::new(EventKind::TextMessageContent, "s1")
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj["type"], "TextMessageContent");
        assert_eq!(obj["session_id"], "s1");
        assert_eq!(obj["text"], "hi");
        assert_eq!(obj.len(), 4);
        assert!(!obj.contains_key("tool_name"));
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(ProtocolEvent::new(EventKind::RunFinished, "s").is_terminal());
        assert!(ProtocolEvent::run_error("s", "boom").is_terminal());
        assert!(!ProtocolEvent::new(EventKind::ToolCallEnd, "s").is_terminal());
    }

    #[test]
    fn test_tagged_sets_pipeline_coordinates() {
        let event = ProtocolEvent::new(EventKind::RunStarted, "s").tagged("p1", "step1");
        assert_eq!(event.pipeline_id.as_deref(), Some("p1"));
        assert_eq!(event.step_id.as_deref(), Some("step1"));
    }

    #[test]
    fn test_event_kind_name_matches_serde() {
        let json = serde_json::to_string(&EventKind::PipelineStepFailed).unwrap();
        assert_eq!(json, format!("\"{}\"", EventKind::PipelineStepFailed.as_str()));
    }
}
