pub mod commands;
pub mod context;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod run;
pub mod session;

pub use commands::{Cli, Commands};
pub use context::AppContext;
