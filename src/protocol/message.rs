use serde_json::Value;

/// One line of the agent's structured stream, typed by its top-level `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    System(SystemMessage),
    Assistant(ConversationMessage),
    User(ConversationMessage),
    Result(ResultMessage),
    /// Any kind this crate does not interpret, kept verbatim.
    Unknown { kind: String, raw: Value },
}

impl AgentMessage {
    /// The `type` field of the source line.
    pub fn kind(&self) -> &str {
        match self {
            Self::System(_) => "system",
            Self::Assistant(_) => "assistant",
            Self::User(_) => "user",
            Self::Result(_) => "result",
            Self::Unknown { kind, .. } => kind,
        }
    }

    pub fn agent_session_id(&self) -> Option<&str> {
        match self {
            Self::System(m) => m.session_id.as_deref(),
            Self::Assistant(m) | Self::User(m) => m.session_id.as_deref(),
            Self::Result(m) => m.session_id.as_deref(),
            Self::Unknown { raw, .. } => raw.get("session_id").and_then(Value::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessage {
    pub subtype: Option<String>,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub tools: Vec<Value>,
    pub mcp_servers: Vec<Value>,
}

impl SystemMessage {
    pub fn is_init(&self) -> bool {
        self.subtype.as_deref() == Some("init")
    }

    pub(crate) fn from_value(data: &Value) -> Self {
        Self {
            subtype: str_field(data, "subtype"),
            session_id: str_field(data, "session_id"),
            model: str_field(data, "model"),
            tools: array_field(data, "tools"),
            mcp_servers: array_field(data, "mcp_servers"),
        }
    }
}

/// An `assistant` or `user` turn: the message's content blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub session_id: Option<String>,
    pub content: Vec<ContentBlock>,
}

impl ConversationMessage {
    pub(crate) fn from_value(data: &Value) -> Self {
        let content = data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
            .map(|blocks| blocks.iter().filter_map(ContentBlock::from_value).collect())
            .unwrap_or_default();
        Self {
            session_id: str_field(data, "session_id"),
            content,
        }
    }

    /// Type of the first content block, if any.
    pub fn subtype(&self) -> Option<&str> {
        self.content.first().map(ContentBlock::block_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: Option<String>,
        name: Option<String>,
        input: Value,
    },
    ToolResult {
        tool_use_id: Option<String>,
        content: Value,
        is_error: bool,
    },
    Other(Value),
}

impl ContentBlock {
    /// Non-object blocks are dropped.
    fn from_value(block: &Value) -> Option<Self> {
        let obj = block.as_object()?;
        let parsed = match obj.get("type").and_then(Value::as_str) {
            Some("text") => Self::Text {
                text: str_field(block, "text").unwrap_or_default(),
            },
            Some("tool_use") => Self::ToolUse {
                id: str_field(block, "id"),
                name: str_field(block, "name"),
                input: obj.get("input").cloned().unwrap_or_else(|| Value::Object(Default::default())),
            },
            Some("tool_result") => Self::ToolResult {
                tool_use_id: str_field(block, "tool_use_id"),
                content: obj.get("content").cloned().unwrap_or(Value::Null),
                is_error: obj.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            },
            _ => Self::Other(block.clone()),
        };
        Some(parsed)
    }

    pub fn block_type(&self) -> &str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::Other(v) => v.get("type").and_then(Value::as_str).unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_write_tokens: Option<u64>,
}

impl Usage {
    fn from_value(usage: Option<&Value>) -> Self {
        let Some(usage) = usage else {
            return Self::default();
        };
        Self {
            input_tokens: u64_field(usage, &["input_tokens"]),
            output_tokens: u64_field(usage, &["output_tokens"]),
            cache_read_tokens: u64_field(usage, &["cache_read_tokens", "cache_read_input_tokens"]),
            cache_write_tokens: u64_field(usage, &["cache_write_tokens", "cache_creation_input_tokens"]),
        }
    }
}

/// The final `result` line of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultMessage {
    pub subtype: Option<String>,
    pub session_id: Option<String>,
    pub is_error: bool,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u32>,
    pub model: Option<String>,
    pub error: Option<String>,
    pub result: Option<String>,
    pub usage: Usage,
}

impl ResultMessage {
    pub(crate) fn from_value(data: &Value) -> Self {
        let cost_usd = ["cost_usd", "total_cost_usd"]
            .iter()
            .find_map(|key| data.get(*key).and_then(Value::as_f64));
        Self {
            subtype: str_field(data, "subtype"),
            session_id: str_field(data, "session_id"),
            is_error: data.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            cost_usd,
            duration_ms: u64_field(data, &["duration_ms"]),
            duration_api_ms: u64_field(data, &["duration_api_ms"]),
            num_turns: u64_field(data, &["num_turns"]).and_then(|n| u32::try_from(n).ok()),
            model: str_field(data, "model"),
            error: str_field(data, "error"),
            result: str_field(data, "result"),
            usage: Usage::from_value(data.get("usage")),
        }
    }

    /// Error text for an errored run: explicit `error`, then the result text.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.result.clone().filter(|r| !r.is_empty()))
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

/// First key in `keys` holding a non-negative integer.
fn u64_field(data: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| data.get(*key).and_then(Value::as_u64))
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn array_field(data: &Value, key: &str) -> Vec<Value> {
    data.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
