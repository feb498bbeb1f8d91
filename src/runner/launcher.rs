use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::process::AgentRunner;
use super::request::{RunRequest, RunnerSettings};
use crate::protocol::ProtocolEvent;

/// Starts agent runs. The scheduler, the session service and the planner only
/// see this trait, so tests can substitute scripted event streams.
pub trait AgentLauncher: Send + Sync {
    /// Begin a run bound to `cancel`. The receiver must yield exactly one
    /// terminal event before closing.
    fn launch(&self, request: RunRequest, cancel: CancellationToken) -> mpsc::Receiver<ProtocolEvent>;
}

/// Launches the real agent binary, one `AgentRunner` per call.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    settings: RunnerSettings,
}

impl ProcessLauncher {
    pub fn new(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }
}

impl AgentLauncher for ProcessLauncher {
    fn launch(&self, request: RunRequest, cancel: CancellationToken) -> mpsc::Receiver<ProtocolEvent> {
        AgentRunner::new(request, self.settings.clone())
            .with_cancel_token(cancel)
            .run()
    }
}
