pub mod command;
pub mod formatting;
pub mod paths;
pub mod truncation;

pub use command::{run_helper, HelperOutput};
pub use formatting::{format_cost, format_duration, now_rfc3339};
pub use paths::expand_home;
pub use truncation::{summarize, truncate_chars, truncate_with_marker, TRUNCATION_MARKER};
