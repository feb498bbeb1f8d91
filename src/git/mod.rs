pub mod diff;

pub use diff::{parse_diff_stat, GitHelper, MAX_DIFF_CHARS};
