use serde_json::{json, Value};
use super::events::{EventKind, ProtocolEvent};
use super::message::{AgentMessage, ContentBlock, ConversationMessage, ResultMessage, SystemMessage};
use crate::utils::{now_rfc3339, truncate_with_marker};

/// Wire-level cap on tool result text, in characters.
pub const MAX_TOOL_RESULT_LEN: usize = 2_000;

fn make_message_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

/// Map one typed agent message to zero or more protocol events, in order.
pub fn convert(message: &AgentMessage, session_id: &str) -> Vec<ProtocolEvent> {
    let ts = now_rfc3339();
    match message {
        AgentMessage::System(sys) if sys.is_init() => vec![state_snapshot(sys, session_id, ts)],
        AgentMessage::Assistant(msg) => assistant_events(msg, session_id, &ts),
        AgentMessage::User(msg) => tool_results(msg, session_id, &ts),
        AgentMessage::Result(res) => vec![run_outcome(res, session_id, ts)],
        _ => Vec::new(),
    }
}

fn state_snapshot(sys: &SystemMessage, session_id: &str, ts: String) -> ProtocolEvent {
    ProtocolEvent {
        timestamp: Some(ts),
        agent_session_id: sys.session_id.clone(),
        state: Some(json!({
            "tools": sys.tools,
            "model": sys.model,
            "mcp_servers": sys.mcp_servers,
        })),
        ..ProtocolEvent::new(EventKind::StateSnapshot, session_id)
    }
}

fn assistant_events(msg: &ConversationMessage, session_id: &str, ts: &str) -> Vec<ProtocolEvent> {
    let stamped = |kind: EventKind| ProtocolEvent {
        timestamp: Some(ts.to_string()),
        ..ProtocolEvent::new(kind, session_id)
    };

    let mut events = Vec::new();
    for block in &msg.content {
        match block {
            ContentBlock::Text { text } => {
                let message_id = make_message_id();
                events.push(ProtocolEvent {
                    message_id: Some(message_id.clone()),
                    role: Some("assistant".to_string()),
                    ..stamped(EventKind::TextMessageStart)
                });
                events.push(ProtocolEvent {
                    message_id: Some(message_id.clone()),
                    text: Some(text.clone()),
                    ..stamped(EventKind::TextMessageContent)
                });
                events.push(ProtocolEvent {
                    message_id: Some(message_id),
                    ..stamped(EventKind::TextMessageEnd)
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                let tool_call_id = id.clone().unwrap_or_else(make_message_id);
                events.push(ProtocolEvent {
                    tool_call_id: Some(tool_call_id.clone()),
                    tool_name: Some(name.clone().unwrap_or_else(|| "unknown".to_string())),
                    tool_input: Some(serialize_input(input)),
                    ..stamped(EventKind::ToolCallStart)
                });
                events.push(ProtocolEvent {
                    tool_call_id: Some(tool_call_id),
                    ..stamped(EventKind::ToolCallEnd)
                });
            }
            _ => {}
        }
    }
    events
}

fn serialize_input(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tool_results(msg: &ConversationMessage, session_id: &str, ts: &str) -> Vec<ProtocolEvent> {
    msg.content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, content, is_error } => Some(ProtocolEvent {
                timestamp: Some(ts.to_string()),
                tool_call_id: Some(tool_use_id.clone().unwrap_or_default()),
                tool_result: Some(truncate_with_marker(&result_text(content), MAX_TOOL_RESULT_LEN)),
                tool_is_error: Some(*is_error),
                ..ProtocolEvent::new(EventKind::ToolCallResult, session_id)
            }),
            _ => None,
        })
        .collect()
}

/// Flatten tool result content: text sub-blocks joined by newlines, plain
/// strings as-is, anything else in its JSON form.
fn result_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .map(|part| part.get("text").and_then(Value::as_str).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn run_outcome(res: &ResultMessage, session_id: &str, ts: String) -> ProtocolEvent {
    if res.is_error {
        return ProtocolEvent {
            timestamp: Some(ts),
            error: Some(res.error_message()),
            ..ProtocolEvent::new(EventKind::RunError, session_id)
        };
    }
    ProtocolEvent {
        timestamp: Some(ts),
        cost_usd: res.cost_usd,
        duration_ms: res.duration_ms,
        num_turns: res.num_turns,
        input_tokens: res.usage.input_tokens,
        output_tokens: res.usage.output_tokens,
        cache_read_tokens: res.usage.cache_read_tokens,
        cache_write_tokens: res.usage.cache_write_tokens,
        model: res.model.clone(),
        agent_session_id: res.session_id.clone(),
        ..ProtocolEvent::new(EventKind::RunFinished, session_id)
    }
}
