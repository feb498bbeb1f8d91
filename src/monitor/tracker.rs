use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use super::metadata::{extract_metadata, is_delegation};
use crate::db::Database;
use crate::errors::ConductorError;
use crate::models::{MonitorTask, TaskStatus};
use crate::protocol::{EventKind, ProtocolEvent};
use crate::utils::{now_rfc3339, summarize};

/// Cap for stored input and output summaries, in characters.
pub const SUMMARY_MAX_LEN: usize = 500;

/// A change to the task tree produced by one event.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorUpdate {
    Created(MonitorTask),
    Updated {
        task_id: String,
        status: TaskStatus,
        output_summary: Option<String>,
        duration_ms: Option<u64>,
    },
}

impl MonitorUpdate {
    /// Write this change through to the store.
    pub fn persist(&self, db: &Database) -> Result<(), ConductorError> {
        match self {
            Self::Created(task) => db.insert_monitor_task(task),
            Self::Updated { task_id, status, output_summary, duration_ms } => {
                db.update_monitor_task(task_id, *status, output_summary.as_deref(), *duration_ms)
            }
        }
    }
}

/// Rebuilds the nested tool-call tree of one session from its events.
/// One instance per session; discard it when the session ends.
#[derive(Debug)]
pub struct TaskMonitor {
    session_id: String,
    stack: Vec<String>,
    tool_to_task: HashMap<String, String>,
    start_times: HashMap<String, Instant>,
    tasks: HashMap<String, MonitorTask>,
    order: Vec<String>,
}

impl TaskMonitor {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            stack: Vec::new(),
            tool_to_task: HashMap::new(),
            start_times: HashMap::new(),
            tasks: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn process(&mut self, event: &ProtocolEvent) -> Option<MonitorUpdate> {
        match event.kind {
            EventKind::ToolCallStart => self.on_tool_start(event),
            EventKind::ToolCallResult => self.on_tool_result(event),
            EventKind::ToolCallEnd => self.on_tool_end(event),
            _ => None,
        }
    }

    /// Tasks in creation order.
    pub fn tasks(&self) -> Vec<&MonitorTask> {
        self.order.iter().filter_map(|id| self.tasks.get(id)).collect()
    }

    pub fn task_for_tool_call(&self, tool_call_id: &str) -> Option<&MonitorTask> {
        self.tool_to_task.get(tool_call_id).and_then(|id| self.tasks.get(id))
    }

    /// Number of delegation tasks currently open.
    pub fn open_depth(&self) -> usize {
        self.stack.len()
    }

    fn on_tool_start(&mut self, event: &ProtocolEvent) -> Option<MonitorUpdate> {
        let tool_call_id = event.tool_call_id.as_deref()?;
        let tool_name = event.tool_name.as_deref()?;

        let parent_id = self.stack.last().cloned();
        let depth = self.stack.len();
        let meta = extract_metadata(tool_name, event.tool_input.as_deref());

        let task = MonitorTask {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            tool_call_id: tool_call_id.to_string(),
            parent_id,
            tool_name: tool_name.to_string(),
            description: meta.description,
            subagent_type: meta.subagent_type,
            subagent_model: meta.subagent_model,
            status: TaskStatus::Running,
            input_summary: summarize(event.tool_input.as_deref(), SUMMARY_MAX_LEN),
            output_summary: None,
            depth,
            duration_ms: None,
            started_at: event.timestamp.clone().unwrap_or_else(now_rfc3339),
            finished_at: None,
        };

        debug!(session_id = %self.session_id, task_id = %task.id, tool = %tool_name, depth, "Monitor task opened");
        self.tool_to_task.insert(tool_call_id.to_string(), task.id.clone());
        self.start_times.insert(task.id.clone(), Instant::now());
        if is_delegation(tool_name) {
            self.stack.push(task.id.clone());
        }
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task.clone());
        Some(MonitorUpdate::Created(task))
    }

    fn on_tool_result(&mut self, event: &ProtocolEvent) -> Option<MonitorUpdate> {
        let task_id = self.tool_to_task.get(event.tool_call_id.as_deref()?)?.clone();
        let status = if event.tool_is_error.unwrap_or(false) {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        let output_summary = summarize(event.tool_result.as_deref(), SUMMARY_MAX_LEN);
        Some(self.close(&task_id, status, output_summary))
    }

    /// Fallback close for calls whose result never arrived.
    fn on_tool_end(&mut self, event: &ProtocolEvent) -> Option<MonitorUpdate> {
        let task_id = self.tool_to_task.get(event.tool_call_id.as_deref()?)?.clone();
        if self.tasks.get(&task_id)?.status != TaskStatus::Running {
            return None;
        }
        Some(self.close(&task_id, TaskStatus::Completed, None))
    }

    fn close(&mut self, task_id: &str, status: TaskStatus, output_summary: Option<String>) -> MonitorUpdate {
        let duration_ms = self
            .start_times
            .get(task_id)
            .map(|start| u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX));

        if let Some(task) = self.tasks.get_mut(task_id) {
            task.status = status;
            task.duration_ms = duration_ms;
            task.finished_at = Some(now_rfc3339());
            if output_summary.is_some() {
                task.output_summary = output_summary.clone();
            }
        }
        self.stack.retain(|id| id != task_id);

        debug!(session_id = %self.session_id, task_id, status = %status, "Monitor task closed");
        MonitorUpdate::Updated {
            task_id: task_id.to_string(),
            status,
            output_summary,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(id: &str, tool: &str, input: &str) -> ProtocolEvent {
        ProtocolEvent {
            tool_call_id: Some(id.into()),
            tool_name: Some(tool.into()),
            tool_input: Some(input.into()),
            ..ProtocolEvent::new(EventKind::ToolCallStart, "s")
        }
    }

    fn result(id: &str, text: &str, is_error: bool) -> ProtocolEvent {
        ProtocolEvent {
            tool_call_id: Some(id.into()),
            tool_result: Some(text.into()),
            tool_is_error: Some(is_error),
            ..ProtocolEvent::new(EventKind::ToolCallResult, "s")
        }
    }

    fn end(id: &str) -> ProtocolEvent {
        ProtocolEvent {
            tool_call_id: Some(id.into()),
            ..ProtocolEvent::new(EventKind::ToolCallEnd, "s")
        }
    }

    fn created(update: Option<MonitorUpdate>) -> MonitorTask {
        match update {
            Some(MonitorUpdate::Created(task)) => task,
            other => panic!("expected a created task, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_delegation_sets_parent_and_depth() {
        let mut monitor = TaskMonitor::new("s");
        let outer = created(monitor.process(&start("t1", "Task", r#"{"description":"outer"}"#)));
        let inner = created(monitor.process(&start("t2", "Task", r#"{"description":"inner"}"#)));
        let leaf = created(monitor.process(&start("t3", "Read", r#"{"file_path":"a.rs"}"#)));

        assert_eq!(outer.depth, 0);
        assert!(outer.parent_id.is_none());
        assert_eq!(inner.depth, 1);
        assert_eq!(inner.parent_id.as_deref(), Some(outer.id.as_str()));
        assert_eq!(leaf.depth, 2);
        assert_eq!(leaf.parent_id.as_deref(), Some(inner.id.as_str()));
        assert_eq!(monitor.open_depth(), 2);

        monitor.process(&result("t3", "contents", false));
        monitor.process(&result("t2", "done", false));
        monitor.process(&result("t1", "done", false));
        assert_eq!(monitor.open_depth(), 0);

        let sibling = created(monitor.process(&start("t4", "Bash", r#"{"command":"ls"}"#)));
        assert_eq!(sibling.depth, 0);
        assert!(sibling.parent_id.is_none());
    }

    #[test]
    fn test_non_delegation_tools_do_not_nest() {
        let mut monitor = TaskMonitor::new("s");
        created(monitor.process(&start("a", "Bash", r#"{"command":"make"}"#)));
        let second = created(monitor.process(&start("b", "Read", r#"{"file_path":"x"}"#)));
        assert_eq!(second.depth, 0);
    }

    #[test]
    fn test_result_sets_status_and_summary() {
        let mut monitor = TaskMonitor::new("s");
        created(monitor.process(&start("a", "Bash", r#"{"command":"false"}"#)));
        let long = "e".repeat(800);
        match monitor.process(&result("a", &long, true)) {
            Some(MonitorUpdate::Updated { status, output_summary, duration_ms, .. }) => {
                assert_eq!(status, TaskStatus::Failed);
                assert_eq!(output_summary.unwrap().len(), SUMMARY_MAX_LEN);
                assert!(duration_ms.is_some());
            }
            other => panic!("unexpected update {:?}", other),
        }
        assert_eq!(monitor.task_for_tool_call("a").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn test_end_closes_only_running_tasks() {
        let mut monitor = TaskMonitor::new("s");
        created(monitor.process(&start("a", "Grep", r#"{"pattern":"x"}"#)));
        assert!(monitor.process(&end("a")).is_some());
        assert_eq!(monitor.task_for_tool_call("a").unwrap().status, TaskStatus::Completed);
        assert!(monitor.process(&end("a")).is_none());

        created(monitor.process(&start("b", "Grep", r#"{"pattern":"y"}"#)));
        monitor.process(&result("b", "boom", true));
        assert!(monitor.process(&end("b")).is_none());
        assert_eq!(monitor.task_for_tool_call("b").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn test_unknown_tool_call_ids_are_ignored() {
        let mut monitor = TaskMonitor::new("s");
        assert!(monitor.process(&result("ghost", "x", false)).is_none());
        assert!(monitor.process(&end("ghost")).is_none());
        assert!(monitor.tasks().is_empty());
    }

    #[test]
    fn test_start_without_name_is_ignored() {
        let mut monitor = TaskMonitor::new("s");
        let event = ProtocolEvent {
            tool_call_id: Some("a".into()),
            ..ProtocolEvent::new(EventKind::ToolCallStart, "s")
        };
        assert!(monitor.process(&event).is_none());
    }

    #[test]
    fn test_input_summary_truncated() {
        let mut monitor = TaskMonitor::new("s");
        let input = format!(r#"{{"command":"{}"}}"#, "c".repeat(900));
        let task = created(monitor.process(&start("a", "Bash", &input)));
        assert_eq!(task.input_summary.unwrap().chars().count(), SUMMARY_MAX_LEN);
    }
}
