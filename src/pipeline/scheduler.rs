use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::graph::validate_step_graph;
use super::state::{PipelineSummary, SchedulerState, OUTPUT_SUMMARY_MAX};
use super::template::resolve_template;
use crate::db::Database;
use crate::errors::ConductorError;
use crate::models::{
    Pipeline, PipelineStatus, PipelineStep, SessionOutcome, SessionStatus, StepStatus, Workspace,
};
use crate::monitor::TaskMonitor;
use crate::protocol::{EventKind, ProtocolEvent};
use crate::registry::RunRegistry;
use crate::runner::{AgentLauncher, RunRequest};
use crate::utils::{expand_home, summarize, truncate_chars};

pub const DEFAULT_MAX_PARALLEL: usize = 3;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Stored session prompts are cut to this many characters.
const SESSION_PROMPT_MAX: usize = 500;
const STEP_ERROR_MAX: usize = 500;

#[derive(Debug)]
struct StepResult {
    step_id: String,
    success: bool,
    cost_usd: Option<f64>,
    output: String,
}

/// Runs the steps of one pipeline in dependency order, at most
/// `max_parallel` at a time. All scheduling state lives in the `run` loop.
pub struct PipelineScheduler {
    pipeline_id: String,
    max_parallel: usize,
    poll_interval: Duration,
    db: Database,
    launcher: Arc<dyn AgentLauncher>,
    registry: RunRegistry,
    cancel_token: CancellationToken,
    paused: Arc<AtomicBool>,
    event_tx: Option<mpsc::UnboundedSender<ProtocolEvent>>,
}

/// Control surface for a scheduler that is running elsewhere.
#[derive(Clone)]
pub struct SchedulerHandle {
    pipeline_id: String,
    db: Database,
    cancel_token: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Stop launching steps and cancel the ones in flight.
    pub fn cancel(&self) {
        info!(pipeline_id = %self.pipeline_id, "Pipeline cancel requested");
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Hold back new steps; running steps continue.
    pub fn pause(&self) -> Result<(), ConductorError> {
        self.paused.store(true, Ordering::SeqCst);
        info!(pipeline_id = %self.pipeline_id, "Pipeline paused");
        self.set_status_if_active(PipelineStatus::Paused)
    }

    pub fn resume(&self) -> Result<(), ConductorError> {
        self.paused.store(false, Ordering::SeqCst);
        info!(pipeline_id = %self.pipeline_id, "Pipeline resumed");
        self.set_status_if_active(PipelineStatus::Running)
    }

    fn set_status_if_active(&self, status: PipelineStatus) -> Result<(), ConductorError> {
        match self.db.get_pipeline(&self.pipeline_id)? {
            Some(p) if matches!(p.status, PipelineStatus::Running | PipelineStatus::Paused) => {
                self.db.update_pipeline_status(&self.pipeline_id, status)
            }
            Some(_) => Ok(()),
            None => Err(ConductorError::NotFound(format!("pipeline {}", self.pipeline_id))),
        }
    }
}

impl PipelineScheduler {
    pub fn new(pipeline_id: impl Into<String>, db: Database, launcher: Arc<dyn AgentLauncher>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            db,
            launcher,
            registry: RunRegistry::new(),
            cancel_token: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            event_tx: None,
        }
    }

    /// Concurrency bound; values below one are raised to one.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// How often a paused scheduler checks whether it was resumed.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Share a registry so step runs can be cancelled by session id.
    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Attach an event channel for pipeline and step events.
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<ProtocolEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            pipeline_id: self.pipeline_id.clone(),
            db: self.db.clone(),
            cancel_token: self.cancel_token.clone(),
            paused: self.paused.clone(),
        }
    }

    fn emit(&self, event: ProtocolEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn pipeline_event(&self, kind: EventKind, steps_total: usize) -> ProtocolEvent {
        ProtocolEvent {
            pipeline_id: Some(self.pipeline_id.clone()),
            steps_total: Some(steps_total),
            ..ProtocolEvent::now(kind, &self.pipeline_id)
        }
    }

    fn step_event(&self, kind: EventKind, step: &PipelineStep, session_id: &str) -> ProtocolEvent {
        ProtocolEvent {
            step_name: Some(step.name.clone()),
            step_position: Some(step.position),
            step_agent: step.agent.clone(),
            ..ProtocolEvent::now(kind, session_id).tagged(&self.pipeline_id, &step.id)
        }
    }

    /// Execute the pipeline to a terminal status.
    ///
    /// An invalid dependency graph fails the pipeline before any step starts
    /// and is returned as `InvalidPipeline`. Step failures and cancellation
    /// are not errors: they are reported through the summary status.
    pub async fn run(&self) -> Result<PipelineSummary, ConductorError> {
        let pipeline = self
            .db
            .get_pipeline(&self.pipeline_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("pipeline {}", self.pipeline_id)))?;
        let workspace = self
            .db
            .get_workspace(&pipeline.workspace_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("workspace {}", pipeline.workspace_id)))?;
        let steps = self.db.get_pipeline_steps(&self.pipeline_id)?;
        let steps_total = steps.len();

        if let Err(e) = validate_step_graph(&steps) {
            error!(pipeline_id = %self.pipeline_id, error = %e, "Pipeline graph rejected");
            self.db.finish_pipeline(&self.pipeline_id, PipelineStatus::Failed, 0.0, 0)?;
            self.emit(ProtocolEvent {
                error: Some(e.to_string()),
                steps_completed: Some(0),
                ..self.pipeline_event(EventKind::PipelineFailed, steps_total)
            });
            return Err(e);
        }

        // Steps left running by an interrupted run start over.
        for step in steps.iter().filter(|s| s.status == StepStatus::Running) {
            self.db.update_step_status(&step.id, StepStatus::Pending, None, None, None)?;
        }

        let started = Instant::now();
        let mut state = SchedulerState::from_steps(&steps);
        self.db.update_pipeline_status(&self.pipeline_id, PipelineStatus::Running)?;
        info!(
            pipeline_id = %self.pipeline_id,
            name = %pipeline.name,
            steps = steps_total,
            max_parallel = self.max_parallel,
            "Pipeline started"
        );
        self.emit(self.pipeline_event(EventKind::PipelineStarted, steps_total));

        let aborted = self.drive(&pipeline, &workspace, &mut state).await.err();
        if let Some(ref e) = aborted {
            error!(pipeline_id = %self.pipeline_id, error = %e, "Pipeline aborted");
        }

        let status = if state.cancelled || !state.failed.is_empty() {
            PipelineStatus::Failed
        } else {
            PipelineStatus::Completed
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        self.db
            .finish_pipeline(&self.pipeline_id, status, state.total_cost_usd, duration_ms)?;

        let summary = PipelineSummary {
            pipeline_id: self.pipeline_id.clone(),
            status,
            steps_total,
            steps_completed: state.completed.len(),
            steps_failed: state.failed.len(),
            steps_skipped: state.skipped.len(),
            total_cost_usd: state.total_cost_usd,
            total_duration_ms: duration_ms,
        };
        info!(
            pipeline_id = %self.pipeline_id,
            status = %status,
            completed = summary.steps_completed,
            failed = summary.steps_failed,
            skipped = summary.steps_skipped,
            cost_usd = summary.total_cost_usd,
            duration_ms,
            "Pipeline finished"
        );

        let kind = if summary.succeeded() {
            EventKind::PipelineCompleted
        } else {
            EventKind::PipelineFailed
        };
        self.emit(ProtocolEvent {
            steps_completed: Some(summary.steps_finished()),
            cost_usd: Some(summary.total_cost_usd),
            duration_ms: Some(duration_ms),
            error: aborted
                .map(|e| format!("pipeline aborted: {}", e))
                .or_else(|| state.cancelled.then(|| "pipeline cancelled".to_string())),
            ..self.pipeline_event(kind, steps_total)
        });
        Ok(summary)
    }

    /// Launch and collect steps until none can make progress. A store error
    /// cancels the in-flight steps and waits for them before it is returned,
    /// so no step is left `running`.
    async fn drive(
        &self,
        pipeline: &Pipeline,
        workspace: &Workspace,
        state: &mut SchedulerState,
    ) -> Result<(), ConductorError> {
        let mut running = FuturesUnordered::new();
        let mut failure: Option<ConductorError> = None;

        loop {
            if !state.cancelled && self.cancel_token.is_cancelled() {
                state.cancelled = true;
                warn!(pipeline_id = %self.pipeline_id, active = running.len(), "Pipeline cancelled");
            }
            let paused = self.paused.load(Ordering::SeqCst);

            if !state.cancelled && !paused {
                let ready = match self.collect_ready(state) {
                    Ok(ready) => ready,
                    Err(e) => {
                        error!(pipeline_id = %self.pipeline_id, error = %e, "Scheduling failed, stopping running steps");
                        self.cancel_token.cancel();
                        state.cancelled = true;
                        failure = Some(e);
                        Vec::new()
                    }
                };

                let slots = self.max_parallel.saturating_sub(running.len());
                for step in ready.into_iter().take(slots) {
                    let context = state.prompt_context(&step, pipeline.spec.as_deref());
                    let prompt = resolve_template(step.raw_prompt(), &context).into_owned();
                    state.launched.insert(step.id.clone());
                    running.push(self.execute_step(step, prompt, workspace));
                }
            }

            if running.is_empty() {
                if paused && !state.cancelled {
                    tokio::select! {
                        _ = self.cancel_token.cancelled() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    continue;
                }
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled(), if !state.cancelled => {}
                Some(result) = running.next() => self.record(state, result),
                _ = tokio::time::sleep(self.poll_interval), if paused => {}
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if !state.cancelled {
            for step in self.db.get_pipeline_steps(&self.pipeline_id)? {
                if step.status == StepStatus::Pending && !state.launched.contains(&step.id) {
                    self.skip_step(&step, "unreachable: dependencies never completed")?;
                    state.skipped.insert(step.id.clone());
                }
            }
        }
        Ok(())
    }

    /// Pending steps whose dependencies are met. Steps behind a failed or
    /// skipped dependency are marked skipped on the way.
    fn collect_ready(&self, state: &mut SchedulerState) -> Result<Vec<PipelineStep>, ConductorError> {
        let mut ready = Vec::new();
        for step in self.db.get_pipeline_steps(&self.pipeline_id)? {
            if step.status != StepStatus::Pending || state.launched.contains(&step.id) {
                continue;
            }
            if state.is_blocked(&step) {
                self.skip_step(&step, "dependency failed")?;
                state.skipped.insert(step.id.clone());
                continue;
            }
            if state.is_ready(&step) {
                ready.push(step);
            }
        }
        Ok(ready)
    }

    fn record(&self, state: &mut SchedulerState, result: StepResult) {
        state.total_cost_usd += result.cost_usd.unwrap_or(0.0);
        if !result.output.is_empty() {
            state.outputs.insert(result.step_id.clone(), result.output);
        }
        if result.success {
            state.completed.insert(result.step_id);
        } else {
            state.failed.insert(result.step_id);
        }
        debug!(
            pipeline_id = %self.pipeline_id,
            finished = state.finished_count(),
            "Step result recorded"
        );
    }

    fn skip_step(&self, step: &PipelineStep, reason: &str) -> Result<(), ConductorError> {
        info!(pipeline_id = %self.pipeline_id, step_id = %step.id, step = %step.name, reason, "Step skipped");
        self.db
            .update_step_status(&step.id, StepStatus::Skipped, None, None, Some(reason))
    }

    async fn execute_step(&self, step: PipelineStep, prompt: String, workspace: &Workspace) -> StepResult {
        match self.try_execute_step(&step, prompt, workspace).await {
            Ok(result) => result,
            Err(e) => {
                error!(pipeline_id = %self.pipeline_id, step_id = %step.id, error = %e, "Step execution error");
                let message = e.to_string();
                if let Err(db_err) =
                    self.db
                        .update_step_status(&step.id, StepStatus::Failed, None, None, Some(&message))
                {
                    warn!(step_id = %step.id, error = %db_err, "Failed to record step failure");
                }
                self.emit(ProtocolEvent {
                    error: Some(message),
                    ..self.step_event(EventKind::PipelineStepFailed, &step, &self.pipeline_id)
                });
                StepResult {
                    step_id: step.id,
                    success: false,
                    cost_usd: None,
                    output: String::new(),
                }
            }
        }
    }

    async fn try_execute_step(
        &self,
        step: &PipelineStep,
        prompt: String,
        workspace: &Workspace,
    ) -> Result<StepResult, ConductorError> {
        let session_id = self.db.create_session(
            &workspace.id,
            truncate_chars(&prompt, SESSION_PROMPT_MAX),
            step.skill.as_deref(),
            step.agent.as_deref(),
            step.model.as_deref(),
        )?;
        self.db
            .update_step_status(&step.id, StepStatus::Running, Some(&session_id), None, None)?;
        info!(
            pipeline_id = %self.pipeline_id,
            step_id = %step.id,
            step = %step.name,
            session_id = %session_id,
            agent = step.agent.as_deref().unwrap_or("-"),
            "Step started"
        );
        self.emit(self.step_event(EventKind::PipelineStepStarted, step, &session_id));

        let token = self.cancel_token.child_token();
        let _guard = self.registry.register(session_id.clone(), token.clone());
        let request = RunRequest::new(
            session_id.clone(),
            prompt,
            &workspace.path,
            expand_home(&workspace.config_dir),
        )
        .with_skill(step.skill.clone())
        .with_agent(step.agent.clone())
        .with_model(step.model.clone());

        let mut rx = self.launcher.launch(request, token.clone());
        let mut monitor = TaskMonitor::new(session_id.clone());
        let mut events: Vec<ProtocolEvent> = Vec::new();
        let mut output = String::new();
        let mut terminal: Option<ProtocolEvent> = None;

        while let Some(event) = rx.recv().await {
            if let Some(update) = monitor.process(&event) {
                if let Err(e) = update.persist(&self.db) {
                    warn!(session_id = %session_id, error = %e, "Failed to persist monitor task");
                }
            }
            if event.kind == EventKind::TextMessageContent {
                if let Some(text) = event.text.as_deref().filter(|t| !t.is_empty()) {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(text);
                }
            }
            if event.is_terminal() && terminal.is_none() {
                terminal = Some(event.clone());
            }
            self.emit(event.clone().tagged(&self.pipeline_id, &step.id));
            events.push(event);
        }

        if let Err(e) = self.db.insert_session_events_batch(&session_id, &events) {
            warn!(session_id = %session_id, error = %e, "Failed to persist session events");
        }
        let outcome = match &terminal {
            Some(event) if token.is_cancelled() && event.kind == EventKind::RunError => SessionOutcome {
                status: SessionStatus::Cancelled,
                ..SessionOutcome::from_terminal(event)
            },
            Some(event) => SessionOutcome::from_terminal(event),
            None => SessionOutcome::status_only(SessionStatus::Error),
        };
        self.db.finish_session(&session_id, &outcome)?;

        let success = terminal.as_ref().map_or(false, |t| t.kind == EventKind::RunFinished);
        let cost_usd = terminal.as_ref().and_then(|t| t.cost_usd);
        let summary = summarize(Some(&output), OUTPUT_SUMMARY_MAX);

        if success {
            self.db.update_step_status(
                &step.id,
                StepStatus::Completed,
                None,
                summary.as_deref(),
                None,
            )?;
            info!(pipeline_id = %self.pipeline_id, step_id = %step.id, cost_usd = cost_usd.unwrap_or(0.0), "Step completed");
            self.emit(ProtocolEvent {
                cost_usd,
                duration_ms: terminal.as_ref().and_then(|t| t.duration_ms),
                ..self.step_event(EventKind::PipelineStepCompleted, step, &session_id)
            });
        } else {
            let error = terminal
                .as_ref()
                .and_then(|t| t.error.clone())
                .filter(|e| !e.is_empty())
                .or_else(|| summarize(Some(&output), STEP_ERROR_MAX))
                .unwrap_or_else(|| "Step failed".to_string());
            self.db.update_step_status(
                &step.id,
                StepStatus::Failed,
                None,
                summary.as_deref(),
                Some(&error),
            )?;
            warn!(pipeline_id = %self.pipeline_id, step_id = %step.id, error = %error, "Step failed");
            self.emit(ProtocolEvent {
                error: Some(error),
                cost_usd,
                ..self.step_event(EventKind::PipelineStepFailed, step, &session_id)
            });
        }

        Ok(StepResult {
            step_id: step.id.clone(),
            success,
            cost_usd,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewStep;
    use crate::runner::scripted::{fail_with, succeed_with, ScriptedLauncher};

    fn setup(steps: &[NewStep]) -> (Database, String) {
        let db = Database::in_memory().unwrap();
        let ws = db.upsert_workspace("app", "/tmp", "/tmp/agent-config").unwrap();
        let id = db
            .create_pipeline(&ws.id, "demo", Some("the spec"), PipelineStatus::Ready, steps)
            .unwrap();
        (db, id)
    }

    fn echo_launcher() -> Arc<ScriptedLauncher> {
        Arc::new(ScriptedLauncher::new(|req| {
            succeed_with(&req.session_id, &format!("done: {}", req.prompt), 0.01)
        }))
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<ProtocolEvent>) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn position(events: &[ProtocolEvent], kind: EventKind, step_id: &str) -> usize {
        events
            .iter()
            .position(|e| e.kind == kind && e.step_id.as_deref() == Some(step_id))
            .unwrap_or_else(|| panic!("no {} for {}", kind, step_id))
    }

    #[tokio::test]
    async fn test_dependent_step_runs_after_its_dependency() {
        let (db, pid) = setup(&[
            NewStep::named("A").with_id("a"),
            NewStep::named("B")
                .with_id("b")
                .depends_on(&["a"])
                .with_prompt("Continue: {{prev_output}} for {{spec}}"),
        ]);
        let launcher = echo_launcher();
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PipelineScheduler::new(&pid, db.clone(), launcher.clone()).with_event_channel(tx);

        let summary = scheduler.run().await.unwrap();
        drop(scheduler);
        let events = drain(rx);

        assert_eq!(summary.status, PipelineStatus::Completed);
        assert_eq!(summary.steps_completed, 2);
        assert!(position(&events, EventKind::PipelineStepStarted, "a") < position(&events, EventKind::PipelineStepStarted, "b"));
        assert!(position(&events, EventKind::RunFinished, "a") < position(&events, EventKind::RunStarted, "b"));

        let requests = launcher.requests();
        assert_eq!(requests[1].prompt, "Continue: done: A for the spec");

        let steps = db.get_pipeline_steps(&pid).unwrap();
        assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(steps[0].output_summary.as_deref(), Some("done: A"));
        assert_eq!(db.get_pipeline(&pid).unwrap().unwrap().status, PipelineStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependent() {
        let (db, pid) = setup(&[
            NewStep::named("A").with_id("a"),
            NewStep::named("B").with_id("b").depends_on(&["a"]),
        ]);
        let launcher = Arc::new(ScriptedLauncher::new(|req| fail_with(&req.session_id, "agent crashed")));
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PipelineScheduler::new(&pid, db.clone(), launcher.clone()).with_event_channel(tx);

        let summary = scheduler.run().await.unwrap();
        drop(scheduler);
        let events = drain(rx);

        assert_eq!(summary.status, PipelineStatus::Failed);
        assert_eq!(summary.steps_failed, 1);
        assert_eq!(summary.steps_skipped, 1);
        assert_eq!(launcher.requests().len(), 1);
        assert!(!events
            .iter()
            .any(|e| e.kind == EventKind::PipelineStepStarted && e.step_id.as_deref() == Some("b")));

        let a = db.get_step("a").unwrap().unwrap();
        assert_eq!(a.status, StepStatus::Failed);
        assert_eq!(a.error.as_deref(), Some("agent crashed"));
        assert_eq!(db.get_step("b").unwrap().unwrap().status, StepStatus::Skipped);
        assert_eq!(db.get_pipeline(&pid).unwrap().unwrap().status, PipelineStatus::Failed);
        assert_eq!(events.last().unwrap().kind, EventKind::PipelineFailed);
    }

    #[tokio::test]
    async fn test_independent_steps_complete_with_one_final_event() {
        let (db, pid) = setup(&[NewStep::named("A"), NewStep::named("B"), NewStep::named("C")]);
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PipelineScheduler::new(&pid, db.clone(), echo_launcher())
            .with_max_parallel(3)
            .with_event_channel(tx);

        let summary = scheduler.run().await.unwrap();
        drop(scheduler);
        let events = drain(rx);

        assert_eq!(summary.steps_completed, 3);
        assert!((summary.total_cost_usd - 0.03).abs() < 1e-9);
        let finals: Vec<_> = events.iter().filter(|e| e.kind == EventKind::PipelineCompleted).collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].steps_total, Some(3));
        assert_eq!(finals[0].steps_completed, Some(3));
        assert!(!events.iter().any(|e| e.kind == EventKind::PipelineFailed));
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_concurrency() {
        let steps: Vec<NewStep> = (0..5).map(|i| NewStep::named(format!("S{}", i))).collect();
        let (db, pid) = setup(&steps);
        let launcher = Arc::new(
            ScriptedLauncher::new(|req| succeed_with(&req.session_id, "ok", 0.0))
                .with_delay(Duration::from_millis(50)),
        );
        let scheduler = PipelineScheduler::new(&pid, db, launcher.clone()).with_max_parallel(2);

        let summary = scheduler.run().await.unwrap();
        assert_eq!(summary.steps_completed, 5);
        assert!(launcher.peak_concurrency() <= 2);
        assert_eq!(launcher.requests().len(), 5);
    }

    #[tokio::test]
    async fn test_zero_max_parallel_is_raised_to_one() {
        let (db, pid) = setup(&[NewStep::named("A"), NewStep::named("B")]);
        let launcher = echo_launcher();
        let scheduler = PipelineScheduler::new(&pid, db, launcher.clone()).with_max_parallel(0);
        assert_eq!(scheduler.run().await.unwrap().steps_completed, 2);
        assert_eq!(launcher.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_cycle_fails_before_launch() {
        let (db, pid) = setup(&[
            NewStep::named("A").with_id("a").depends_on(&["b"]),
            NewStep::named("B").with_id("b").depends_on(&["a"]),
        ]);
        let launcher = echo_launcher();
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PipelineScheduler::new(&pid, db.clone(), launcher.clone()).with_event_channel(tx);

        let result = scheduler.run().await;
        drop(scheduler);
        assert!(matches!(result, Err(ConductorError::InvalidPipeline(_))));
        assert!(launcher.requests().is_empty());
        assert_eq!(db.get_pipeline(&pid).unwrap().unwrap().status, PipelineStatus::Failed);

        let events = drain(rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::PipelineFailed);
        assert!(events[0].error.as_deref().unwrap().contains("circular"));
    }

    #[tokio::test]
    async fn test_cancel_fails_pipeline_and_keeps_pending_steps() {
        let (db, pid) = setup(&[
            NewStep::named("A").with_id("a"),
            NewStep::named("B").with_id("b").depends_on(&["a"]),
        ]);
        let launcher = Arc::new(
            ScriptedLauncher::new(|req| succeed_with(&req.session_id, "ok", 0.0))
                .with_delay(Duration::from_secs(30)),
        );
        let scheduler = PipelineScheduler::new(&pid, db.clone(), launcher);
        let handle = scheduler.handle();

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.status, PipelineStatus::Failed);

        let a = db.get_step("a").unwrap().unwrap();
        assert_eq!(a.status, StepStatus::Failed);
        let session = db.get_session(a.session_id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(db.get_step("b").unwrap().unwrap().status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_pause_holds_new_steps_until_resume() {
        let (db, pid) = setup(&[NewStep::named("A")]);
        let launcher = echo_launcher();
        let scheduler = PipelineScheduler::new(&pid, db.clone(), launcher.clone())
            .with_poll_interval(Duration::from_millis(20));
        let handle = scheduler.handle();
        handle.pause().unwrap();

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(launcher.requests().is_empty());

        handle.resume().unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.status, PipelineStatus::Completed);
        assert_eq!(launcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_lets_running_step_finish() {
        let (db, pid) = setup(&[
            NewStep::named("A").with_id("a"),
            NewStep::named("B").with_id("b").depends_on(&["a"]),
        ]);
        let launcher = Arc::new(
            ScriptedLauncher::new(|req| succeed_with(&req.session_id, "ok", 0.0))
                .with_delay(Duration::from_millis(200)),
        );
        let scheduler = PipelineScheduler::new(&pid, db.clone(), launcher.clone())
            .with_poll_interval(Duration::from_millis(20));
        let handle = scheduler.handle();

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(launcher.requests().len(), 1);
        handle.pause().unwrap();
        assert_eq!(db.get_pipeline(&pid).unwrap().unwrap().status, PipelineStatus::Paused);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(db.get_step("a").unwrap().unwrap().status, StepStatus::Completed);
        assert_eq!(db.get_step("b").unwrap().unwrap().status, StepStatus::Pending);
        assert_eq!(launcher.requests().len(), 1);

        handle.resume().unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.status, PipelineStatus::Completed);
        assert_eq!(launcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_leaves_unrelated_runs_in_shared_registry() {
        let (db, pid) = setup(&[NewStep::named("A").with_id("a")]);
        let launcher = Arc::new(
            ScriptedLauncher::new(|req| succeed_with(&req.session_id, "ok", 0.0))
                .with_delay(Duration::from_secs(30)),
        );
        let registry = RunRegistry::new();
        let standalone = CancellationToken::new();
        let _guard = registry.register("standalone-session", standalone.clone());
        let scheduler = PipelineScheduler::new(&pid, db.clone(), launcher).with_registry(registry.clone());
        let handle = scheduler.handle();

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let step_session = db.get_step("a").unwrap().unwrap().session_id.unwrap();
        assert!(registry.contains(&step_session));
        handle.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.status, PipelineStatus::Failed);
        assert!(!standalone.is_cancelled());
        assert!(registry.contains("standalone-session"));
        assert!(!registry.contains(&step_session));
    }

    #[tokio::test]
    async fn test_store_error_stops_and_records_running_steps() {
        let (db, pid) = setup(&[
            NewStep::named("A").with_id("a").with_prompt("fast"),
            NewStep::named("B").with_id("b").depends_on(&["a"]),
            NewStep::named("C").with_id("c").with_prompt("slow"),
        ]);
        let launcher = Arc::new(
            ScriptedLauncher::new(|req| succeed_with(&req.session_id, "ok", 0.0)).with_delay_for(|req| {
                if req.prompt == "slow" {
                    Duration::from_secs(30)
                } else {
                    Duration::from_millis(200)
                }
            }),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PipelineScheduler::new(&pid, db.clone(), launcher)
            .with_max_parallel(2)
            .with_event_channel(tx);

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Breaks the next reload of the step list.
        db.lock()
            .unwrap()
            .execute("UPDATE pipeline_steps SET depends_on = 'not json' WHERE id = 'b'", [])
            .unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.status, PipelineStatus::Failed);
        assert_eq!(summary.steps_completed, 1);
        assert_eq!(summary.steps_failed, 1);

        let c = db.get_step("c").unwrap().unwrap();
        assert_eq!(c.status, StepStatus::Failed);
        let session = db.get_session(c.session_id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);

        let still_running: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM pipeline_steps WHERE status = 'running'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(still_running, 0);
        assert_eq!(db.get_pipeline(&pid).unwrap().unwrap().status, PipelineStatus::Failed);

        let events = drain(rx);
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::PipelineFailed);
        assert!(last.error.as_deref().unwrap().starts_with("pipeline aborted"));
    }

    #[tokio::test]
    async fn test_step_events_are_tagged_and_persisted() {
        let (db, pid) = setup(&[NewStep::named("A").with_id("a")]);
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PipelineScheduler::new(&pid, db.clone(), echo_launcher()).with_event_channel(tx);
        scheduler.run().await.unwrap();
        drop(scheduler);

        let events = drain(rx);
        let run_events: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::RunStarted | EventKind::TextMessageContent | EventKind::RunFinished))
            .collect();
        assert_eq!(run_events.len(), 3);
        assert!(run_events
            .iter()
            .all(|e| e.pipeline_id.as_deref() == Some(pid.as_str()) && e.step_id.as_deref() == Some("a")));

        let session_id = db.get_step("a").unwrap().unwrap().session_id.unwrap();
        assert_eq!(db.get_session_events(&session_id).unwrap().len(), 3);
        let session = db.get_session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.cost_usd, Some(0.01));
    }

    #[tokio::test]
    async fn test_resume_skips_completed_steps() {
        let (db, pid) = setup(&[
            NewStep::named("A").with_id("a"),
            NewStep::named("B").with_id("b").depends_on(&["a"]).with_prompt("{{prev_output}}"),
        ]);
        db.update_step_status("a", StepStatus::Completed, None, Some("earlier output"), None)
            .unwrap();
        let launcher = echo_launcher();
        let scheduler = PipelineScheduler::new(&pid, db, launcher.clone());
        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.status, PipelineStatus::Completed);
        let requests = launcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, "earlier output");
    }
}
