use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::launcher::AgentLauncher;
use super::request::RunRequest;
use crate::protocol::{EventKind, ProtocolEvent};

type Script = dyn Fn(&RunRequest) -> Vec<ProtocolEvent> + Send + Sync;
type DelayFn = dyn Fn(&RunRequest) -> Duration + Send + Sync;

/// Launcher that replays scripted events instead of spawning a process.
pub(crate) struct ScriptedLauncher {
    script: Box<Script>,
    delay: Box<DelayFn>,
    requests: Mutex<Vec<RunRequest>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub(crate) fn new(script: impl Fn(&RunRequest) -> Vec<ProtocolEvent> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            delay: Box::new(|_| Duration::from_millis(20)),
            requests: Mutex::new(Vec::new()),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Box::new(move |_| delay);
        self
    }

    /// Per-request delay, e.g. keyed on the prompt.
    pub(crate) fn with_delay_for(mut self, delay: impl Fn(&RunRequest) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub(crate) fn requests(&self) -> Vec<RunRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl AgentLauncher for ScriptedLauncher {
    fn launch(&self, request: RunRequest, cancel: CancellationToken) -> mpsc::Receiver<ProtocolEvent> {
        let (tx, rx) = mpsc::channel(64);
        let events = (self.script)(&request);
        let delay = (self.delay)(&request);
        self.requests.lock().unwrap().push(request.clone());
        let running = self.running.clone();
        let peak = self.peak.clone();

        tokio::spawn(async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let sid = request.session_id.clone();
            let _ = tx.send(ProtocolEvent::now(EventKind::RunStarted, &sid)).await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tx.send(ProtocolEvent::run_error(&sid, "run cancelled")).await;
                }
                _ = tokio::time::sleep(delay) => {
                    for event in events {
                        let _ = tx.send(event).await;
                    }
                }
            }
            running.fetch_sub(1, Ordering::SeqCst);
        });
        rx
    }
}

/// Assistant text followed by a finished result.
pub(crate) fn succeed_with(session_id: &str, text: &str, cost: f64) -> Vec<ProtocolEvent> {
    vec![
        ProtocolEvent {
            text: Some(text.to_string()),
            message_id: Some("m1".into()),
            ..ProtocolEvent::now(EventKind::TextMessageContent, session_id)
        },
        ProtocolEvent {
            cost_usd: Some(cost),
            duration_ms: Some(10),
            num_turns: Some(1),
            ..ProtocolEvent::now(EventKind::RunFinished, session_id)
        },
    ]
}

pub(crate) fn fail_with(session_id: &str, error: &str) -> Vec<ProtocolEvent> {
    vec![ProtocolEvent::run_error(session_id, error)]
}
