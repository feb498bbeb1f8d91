use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::Database;
use crate::errors::ConductorError;
use crate::git::GitHelper;
use crate::models::{DiffCapture, SessionOutcome, SessionStatus, Workspace};
use crate::monitor::TaskMonitor;
use crate::protocol::{EventKind, ProtocolEvent};
use crate::registry::RunRegistry;
use crate::runner::{AgentLauncher, RunRequest};
use crate::utils::expand_home;

/// One standalone agent run.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub workspace: Workspace,
    pub prompt: String,
    pub skill: Option<String>,
    pub agent: Option<String>,
    pub model: Option<String>,
}

impl SessionRequest {
    pub fn new(workspace: Workspace, prompt: impl Into<String>) -> Self {
        Self {
            workspace,
            prompt: prompt.into(),
            skill: None,
            agent: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub outcome: SessionOutcome,
    pub error: Option<String>,
    pub events: usize,
    pub tasks: usize,
    pub diff: Option<DiffCapture>,
}

impl SessionReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.status == SessionStatus::Completed
    }
}

/// Drives single sessions end to end: run, monitor, persist, measure.
#[derive(Clone)]
pub struct SessionService {
    db: Database,
    launcher: Arc<dyn AgentLauncher>,
    registry: RunRegistry,
    git: Option<GitHelper>,
}

impl SessionService {
    pub fn new(db: Database, launcher: Arc<dyn AgentLauncher>) -> Self {
        Self {
            db,
            launcher,
            registry: RunRegistry::new(),
            git: Some(GitHelper::default()),
        }
    }

    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Git helper used for diff capture; `None` disables it.
    pub fn with_git(mut self, git: Option<GitHelper>) -> Self {
        self.git = git;
        self
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Run one session to completion. Each event is forwarded to `events` as
    /// it arrives; the session row, its events, its monitor tasks and its diff
    /// are persisted before returning.
    pub async fn run_session(
        &self,
        request: SessionRequest,
        events: Option<mpsc::UnboundedSender<ProtocolEvent>>,
        cancel: CancellationToken,
    ) -> Result<SessionReport, ConductorError> {
        let workspace_path = Path::new(&request.workspace.path);
        let session_id = self.db.create_session(
            &request.workspace.id,
            &request.prompt,
            request.skill.as_deref(),
            request.agent.as_deref(),
            request.model.as_deref(),
        )?;
        let _guard = self.registry.register(session_id.clone(), cancel.clone());

        let head_before = match &self.git {
            Some(git) => git.capture_head_ref(workspace_path).await,
            None => None,
        };
        info!(
            session_id = %session_id,
            workspace = %request.workspace.path,
            head = head_before.as_deref().unwrap_or("-"),
            "Session started"
        );

        let run = RunRequest::new(
            session_id.clone(),
            request.prompt,
            workspace_path,
            expand_home(&request.workspace.config_dir),
        )
        .with_skill(request.skill)
        .with_agent(request.agent)
        .with_model(request.model);

        let mut rx = self.launcher.launch(run, cancel.clone());
        let mut monitor = TaskMonitor::new(session_id.clone());
        let mut buffered: Vec<ProtocolEvent> = Vec::new();
        let mut terminal: Option<ProtocolEvent> = None;

        while let Some(event) = rx.recv().await {
            if let Some(update) = monitor.process(&event) {
                if let Err(e) = update.persist(&self.db) {
                    warn!(session_id = %session_id, error = %e, "Failed to persist monitor task");
                }
            }
            if event.is_terminal() && terminal.is_none() {
                terminal = Some(event.clone());
            }
            if let Some(ref tx) = events {
                let _ = tx.send(event.clone());
            }
            buffered.push(event);
        }

        let outcome = match &terminal {
            Some(event) if cancel.is_cancelled() && event.kind != EventKind::RunFinished => {
                SessionOutcome {
                    status: SessionStatus::Cancelled,
                    ..SessionOutcome::from_terminal(event)
                }
            }
            Some(event) => SessionOutcome::from_terminal(event),
            None if cancel.is_cancelled() => SessionOutcome::status_only(SessionStatus::Cancelled),
            None => SessionOutcome::status_only(SessionStatus::Error),
        };
        self.db.finish_session(&session_id, &outcome)?;
        let stored = self.db.insert_session_events_batch(&session_id, &buffered)?;

        let diff = match &self.git {
            Some(git) => {
                let capture = git.compute_session_diff(workspace_path, head_before.as_deref()).await;
                if capture.is_empty() {
                    None
                } else {
                    if let Err(e) = self.db.upsert_session_diff(&session_id, &capture) {
                        warn!(session_id = %session_id, error = %e, "Failed to persist session diff");
                    }
                    Some(capture)
                }
            }
            None => None,
        };

        info!(
            session_id = %session_id,
            status = %outcome.status,
            events = stored,
            files_changed = diff.as_ref().map_or(0, |d| d.files_changed),
            "Session finished"
        );

        Ok(SessionReport {
            error: terminal.and_then(|t| t.error),
            session_id,
            outcome,
            events: stored,
            tasks: monitor.tasks().len(),
            diff,
        })
    }
}
