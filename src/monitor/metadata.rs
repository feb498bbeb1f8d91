use serde_json::Value;
use crate::utils::truncate_chars;

/// Tool names whose invocation runs a nested agent.
pub const DELEGATION_TOOLS: &[&str] = &["Task", "Agent"];

pub fn is_delegation(tool_name: &str) -> bool {
    DELEGATION_TOOLS.contains(&tool_name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetadata {
    pub description: String,
    pub subagent_type: Option<String>,
    pub subagent_model: Option<String>,
}

/// Derive a readable description from a tool's JSON input. Sub-agent fields
/// are only filled for delegation tools.
pub fn extract_metadata(tool_name: &str, tool_input: Option<&str>) -> TaskMetadata {
    let mut meta = TaskMetadata {
        description: tool_name.to_string(),
        subagent_type: None,
        subagent_model: None,
    };

    let Some(parsed) = tool_input.and_then(|raw| serde_json::from_str::<Value>(raw).ok()) else {
        return meta;
    };
    let field = |key: &str| parsed.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());

    match tool_name {
        name if is_delegation(name) => {
            if let Some(text) = field("description").or_else(|| field("prompt")) {
                meta.description = truncate_chars(text, 200).to_string();
            }
            meta.subagent_type = field("subagent_type").map(String::from);
            meta.subagent_model = field("model").map(String::from);
        }
        "Read" | "Write" | "Edit" => {
            if let Some(path) = field("file_path") {
                meta.description = path.to_string();
            }
        }
        "Bash" => {
            if let Some(command) = field("command") {
                meta.description = truncate_chars(command, 100).to_string();
            }
        }
        "Glob" | "Grep" => {
            if let Some(pattern) = field("pattern") {
                meta.description = pattern.to_string();
            }
        }
        _ => {}
    }
    meta
}
