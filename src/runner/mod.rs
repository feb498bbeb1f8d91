pub mod launcher;
pub mod process;
pub mod request;
#[cfg(test)]
pub(crate) mod scripted;

pub use launcher::{AgentLauncher, ProcessLauncher};
pub use process::{AgentRunner, RunState, EVENT_CHANNEL_CAPACITY};
pub use request::{RunRequest, RunnerSettings};
