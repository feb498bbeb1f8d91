use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::request::{RunRequest, RunnerSettings, CONFIG_DIR_ENV, NESTED_SESSION_ENV};
use crate::errors::ConductorError;
use crate::protocol::{convert, parse_line, EventKind, ProtocolEvent};
use crate::utils::truncate_chars;

/// Bound on events buffered between the process reader and its consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Finished,
    Errored,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::Cancelled)
    }
}

/// How the output stream of the agent ended.
enum StreamEnd {
    Exited { code: Option<i32>, stderr: String },
    Cancelled,
    TimedOut(Duration),
}

/// Supervises one agent process and turns its stdout into protocol events.
pub struct AgentRunner {
    request: RunRequest,
    settings: RunnerSettings,
    cancel: CancellationToken,
    state_tx: watch::Sender<RunState>,
}

impl AgentRunner {
    pub fn new(request: RunRequest, settings: RunnerSettings) -> Self {
        let (state_tx, _) = watch::channel(RunState::NotStarted);
        Self {
            request,
            settings,
            cancel: CancellationToken::new(),
            state_tx,
        }
    }

    /// Use an externally owned token, e.g. one registered for cancel-by-id.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Observe state transitions after `run` has consumed the runner.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Start the agent on a background task. The receiver yields run-started
    /// first and exactly one terminal event last.
    pub fn run(self) -> mpsc::Receiver<ProtocolEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(self.drive(tx));
        rx
    }

    async fn drive(self, tx: mpsc::Sender<ProtocolEvent>) {
        let session_id = self.request.session_id.clone();
        let started = Instant::now();
        self.state_tx.send_replace(RunState::Running);

        let mut emitter = Emitter { tx: &tx, terminal: None };
        if !emitter.emit(ProtocolEvent::now(EventKind::RunStarted, &session_id)).await {
            self.state_tx.send_replace(RunState::Cancelled);
            return;
        }

        let outcome = self.stream(&mut emitter).await;

        let final_state = match outcome {
            Ok(StreamEnd::Exited { code, stderr }) => {
                if code != Some(0) && emitter.terminal.is_none() {
                    let code_text = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                    warn!(session_id = %session_id, exit_code = %code_text, "Agent exited without a result");
                    let message = format!("agent exited with code {}: {}", code_text, stderr);
                    emitter.emit(ProtocolEvent::run_error(&session_id, message)).await;
                }
                match emitter.terminal {
                    Some(EventKind::RunError) => RunState::Errored,
                    _ => RunState::Finished,
                }
            }
            Ok(StreamEnd::Cancelled) => {
                info!(session_id = %session_id, "Agent run cancelled");
                if emitter.terminal.is_none() {
                    emitter.emit(ProtocolEvent::run_error(&session_id, "run cancelled")).await;
                }
                RunState::Cancelled
            }
            Ok(StreamEnd::TimedOut(limit)) => {
                warn!(session_id = %session_id, timeout_secs = limit.as_secs(), "Agent run timed out");
                if emitter.terminal.is_none() {
                    let message = format!("run timed out after {}s", limit.as_secs());
                    emitter.emit(ProtocolEvent::run_error(&session_id, message)).await;
                }
                RunState::Errored
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Agent runner failed");
                if emitter.terminal.is_none() {
                    emitter.emit(ProtocolEvent::run_error(&session_id, e.to_string())).await;
                }
                RunState::Errored
            }
        };

        if emitter.terminal.is_none() {
            warn!(session_id = %session_id, "No result event from agent, emitting synthetic RunFinished");
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            emitter
                .emit(ProtocolEvent {
                    duration_ms: Some(elapsed),
                    ..ProtocolEvent::now(EventKind::RunFinished, &session_id)
                })
                .await;
        }

        self.state_tx.send_replace(final_state);
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        cmd.args(self.request.build_args())
            .current_dir(&self.request.workspace_path)
            .env(CONFIG_DIR_ENV, &self.request.config_dir)
            .env_remove(NESTED_SESSION_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn stream(&self, emitter: &mut Emitter<'_>) -> Result<StreamEnd, ConductorError> {
        if self.cancel.is_cancelled() {
            return Ok(StreamEnd::Cancelled);
        }

        let session_id = &self.request.session_id;
        info!(
            session_id = %session_id,
            binary = %self.settings.binary,
            cwd = %self.request.workspace_path.display(),
            "Starting agent process"
        );

        let mut child = self.build_command().spawn().map_err(|e| {
            ConductorError::Process(format!("failed to spawn {}: {}", self.settings.binary, e))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConductorError::Process("agent stdout was not captured".into()))?;
        let stderr_handle = tokio::spawn(collect_stderr(child.stderr.take(), self.settings.stderr_cap));

        let deadline = self.settings.run_timeout.map(|d| tokio::time::Instant::now() + d);
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    terminate(&mut child, self.settings.kill_grace).await;
                    stderr_handle.abort();
                    return Ok(StreamEnd::Cancelled);
                }
                () = wait_deadline(deadline) => {
                    terminate(&mut child, self.settings.kill_grace).await;
                    stderr_handle.abort();
                    return Ok(StreamEnd::TimedOut(self.settings.run_timeout.unwrap_or_default()));
                }
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            let Some(message) = parse_line(&line) else {
                continue;
            };
            for event in convert(&message, session_id) {
                if !emitter.emit(event).await {
                    debug!(session_id = %session_id, "Event consumer went away, stopping agent");
                    terminate(&mut child, self.settings.kill_grace).await;
                    stderr_handle.abort();
                    return Ok(StreamEnd::Cancelled);
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_handle.await.unwrap_or_default();
        debug!(session_id = %session_id, exit_code = ?status.code(), "Agent process exited");
        Ok(StreamEnd::Exited {
            code: status.code(),
            stderr,
        })
    }
}

/// Forwards events and guarantees at most one terminal event per run.
struct Emitter<'a> {
    tx: &'a mpsc::Sender<ProtocolEvent>,
    terminal: Option<EventKind>,
}

impl Emitter<'_> {
    /// Returns false once the receiver has been dropped.
    async fn emit(&mut self, event: ProtocolEvent) -> bool {
        if event.is_terminal() {
            if self.terminal.is_some() {
                debug!(session_id = %event.session_id, kind = %event.kind, "Dropping extra terminal event");
                return true;
            }
            self.terminal = Some(event.kind);
        }
        self.tx.send(event).await.is_ok()
    }
}

async fn wait_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn collect_stderr(pipe: Option<ChildStderr>, cap: usize) -> String {
    let mut bytes = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut bytes).await;
    }
    let text = String::from_utf8_lossy(&bytes);
    truncate_chars(text.trim(), cap).to_string()
}

/// Ask the process to stop, then force it after `grace`. A process that is
/// already gone is not an error.
async fn terminate(child: &mut Child, grace: Duration) {
    request_stop(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!(pid = ?child.id(), grace_secs = grace.as_secs(), "Agent ignored termination, killing");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Agent process already gone");
            }
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = child.id() else {
        return;
    };
    match i32::try_from(raw) {
        Ok(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM not delivered, process already exited");
            }
        }
        Err(_) => {
            warn!(pid = raw, "Pid out of range for signals, killing instead");
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.start_kill();
}
