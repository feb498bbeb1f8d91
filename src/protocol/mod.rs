pub mod converter;
pub mod events;
pub mod message;
pub mod parser;

pub use converter::{convert, MAX_TOOL_RESULT_LEN};
pub use events::{EventKind, ProtocolEvent};
pub use message::{AgentMessage, ContentBlock, ConversationMessage, ResultMessage, SystemMessage, Usage};
pub use parser::parse_line;
