use serde_json::Value;
use tracing::warn;
use super::message::{AgentMessage, ConversationMessage, ResultMessage, SystemMessage};
use crate::utils::truncate_chars;

/// Parse one NDJSON line from the agent's stream.
///
/// Blank lines, non-JSON text and JSON that is not an object yield `None`;
/// nothing here returns an error.
pub fn parse_line(raw: &str) -> Option<AgentMessage> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    let data: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, line = %truncate_chars(line, 200), "Failed to parse agent output line");
            return None;
        }
    };

    if !data.is_object() {
        warn!(line = %truncate_chars(line, 200), "Agent output line is not a JSON object");
        return None;
    }

    let kind = data.get("type").and_then(Value::as_str).unwrap_or("").to_string();
    let message = match kind.as_str() {
        "system" => AgentMessage::System(SystemMessage::from_value(&data)),
        "assistant" => AgentMessage::Assistant(ConversationMessage::from_value(&data)),
        "user" => AgentMessage::User(ConversationMessage::from_value(&data)),
        "result" => AgentMessage::Result(ResultMessage::from_value(&data)),
        _ => AgentMessage::Unknown { kind, raw: data },
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ContentBlock;

    #[test]
    fn test_blank_lines_yield_none() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   \n").is_none());
    }

    #[test]
    fn test_malformed_lines_yield_none() {
        assert!(parse_line("not json").is_none());
        assert!(parse_line("{\"type\": \"assistant\"").is_none());
        assert!(parse_line("[1, 2, 3]").is_none());
        assert!(parse_line("\"a string\"").is_none());
        assert!(parse_line("42").is_none());
    }

    #[test]
    fn test_kind_matches_type_field() {
        let lines = [
            (r#"{"type":"system","subtype":"init","session_id":"abc"}"#, "system"),
            (r#"{"type":"assistant","message":{"content":[]}}"#, "assistant"),
            (r#"{"type":"user","message":{"content":[]}}"#, "user"),
            (r#"{"type":"result","is_error":false}"#, "result"),
            (r#"{"type":"stream_event","event":{}}"#, "stream_event"),
            (r#"{"no_type":true}"#, ""),
        ];
        for (line, kind) in lines {
            let parsed = parse_line(line).unwrap();
            assert_eq!(parsed.kind(), kind, "line: {}", line);
        }
    }

    #[test]
    fn test_system_init_fields() {
        let line = r#"{"type":"system","subtype":"init","session_id":"cli-1","model":"sonnet","tools":["Read","Bash"],"mcp_servers":[{"name":"gh"}]}"#;
        match parse_line(line).unwrap() {
            AgentMessage::System(sys) => {
                assert!(sys.is_init());
                assert_eq!(sys.session_id.as_deref(), Some("cli-1"));
                assert_eq!(sys.model.as_deref(), Some("sonnet"));
                assert_eq!(sys.tools.len(), 2);
                assert_eq!(sys.mcp_servers.len(), 1);
            }
            other => panic!("expected system, got {:?}", other),
        }
    }

    #[test]
    fn test_assistant_content_blocks() {
        let line = r#"{"type":"assistant","session_id":"s","message":{"content":[{"type":"text","text":"hello"},"junk",{"type":"tool_use","id":"tu_1","name":"Read","input":{"file_path":"/a"}},{"type":"thinking","thinking":"..."}]}}"#;
        match parse_line(line).unwrap() {
            AgentMessage::Assistant(msg) => {
                assert_eq!(msg.subtype(), Some("text"));
                assert_eq!(msg.content.len(), 3);
                assert_eq!(msg.content[0], ContentBlock::Text { text: "hello".into() });
                assert!(matches!(&msg.content[1], ContentBlock::ToolUse { name: Some(n), .. } if n == "Read"));
                assert_eq!(msg.content[2].block_type(), "thinking");
            }
            other => panic!("expected assistant, got {:?}", other),
        }
    }

    #[test]
    fn test_result_fields_and_aliases() {
        let line = r#"{"type":"result","subtype":"success","is_error":false,"total_cost_usd":0.25,"duration_ms":1200,"num_turns":3,"usage":{"input_tokens":10,"output_tokens":20,"cache_read_input_tokens":5}}"#;
        match parse_line(line).unwrap() {
            AgentMessage::Result(res) => {
                assert!(!res.is_error);
                assert_eq!(res.cost_usd, Some(0.25));
                assert_eq!(res.duration_ms, Some(1200));
                assert_eq!(res.num_turns, Some(3));
                assert_eq!(res.usage.input_tokens, Some(10));
                assert_eq!(res.usage.cache_read_tokens, Some(5));
                assert_eq!(res.usage.cache_write_tokens, None);
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn test_result_with_wrong_field_types_stays_result() {
        let line = r#"{"type":"result","is_error":"yes","cost_usd":"free","num_turns":-1}"#;
        match parse_line(line).unwrap() {
            AgentMessage::Result(res) => {
                assert!(!res.is_error);
                assert_eq!(res.cost_usd, None);
                assert_eq!(res.num_turns, None);
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_keeps_raw_payload() {
        let line = r#"{"type":"stream_event","session_id":"x","event":{"delta":"abc"}}"#;
        match parse_line(line).unwrap() {
            AgentMessage::Unknown { kind, raw } => {
                assert_eq!(kind, "stream_event");
                assert_eq!(raw["event"]["delta"], "abc");
            }
            other => panic!("expected unknown, got {:?}", other),
        }
    }
}
