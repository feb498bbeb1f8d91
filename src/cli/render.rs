use console::style;

use crate::models::{DiffCapture, MonitorTask, PipelineStatus, PipelineStep, Session, SessionStatus, StepStatus, TaskStatus};
use crate::protocol::{EventKind, ProtocolEvent};
use crate::utils::{format_cost, format_duration, truncate_chars};

const TOOL_INPUT_PREVIEW: usize = 80;
const RESULT_PREVIEW: usize = 120;

/// Render one session event as a styled terminal line. Events with nothing
/// worth showing (message boundaries, snapshots) return `None`.
pub fn render_event(event: &ProtocolEvent) -> Option<String> {
    match event.kind {
        EventKind::RunStarted => Some(format!(
            "{} Session {}",
            style("▶").green().bold(),
            style(&event.session_id).cyan(),
        )),
        EventKind::TextMessageContent => event.text.as_ref().map(|t| t.trim_end().to_string()),
        EventKind::ToolCallStart => {
            let input = event
                .tool_input
                .as_deref()
                .map(|i| format!(" {}", style(truncate_chars(i, TOOL_INPUT_PREVIEW)).dim()))
                .unwrap_or_default();
            Some(format!(
                "  {} {}{}",
                style("⚙").yellow(),
                style(event.tool_name.as_deref().unwrap_or("tool")).yellow(),
                input,
            ))
        }
        EventKind::ToolCallResult if event.tool_is_error == Some(true) => Some(format!(
            "    {} {}",
            style("✗").red(),
            style(truncate_chars(event.tool_result.as_deref().unwrap_or(""), RESULT_PREVIEW)).red(),
        )),
        EventKind::RunFinished => Some(format!(
            "{} Finished{}",
            style("✓").green(),
            run_metrics(event),
        )),
        EventKind::RunError => Some(format!(
            "{} {}",
            style("✗").red(),
            style(event.error.as_deref().unwrap_or("Unknown error")).red(),
        )),
        _ => None,
    }
}

/// Render a pipeline-level event; step runner events are shown only when
/// they describe a failure.
pub fn render_pipeline_event(event: &ProtocolEvent) -> Option<String> {
    let step = event.step_name.as_deref().unwrap_or("step");
    match event.kind {
        EventKind::PipelineStarted => Some(format!(
            "\n{} Pipeline {} ({} steps)",
            style("▶").green().bold(),
            style(event.pipeline_id.as_deref().unwrap_or(&event.session_id)).cyan(),
            event.steps_total.unwrap_or(0),
        )),
        EventKind::PipelineStepStarted => Some(format!(
            "  {} {}{}",
            style("⏳").yellow(),
            style(step).yellow(),
            event
                .step_agent
                .as_deref()
                .map(|a| format!(" [{}]", style(a).dim()))
                .unwrap_or_default(),
        )),
        EventKind::PipelineStepCompleted => Some(format!(
            "  {} {}{}",
            style("✓").green(),
            style(step).green(),
            run_metrics(event),
        )),
        EventKind::PipelineStepFailed => Some(format!(
            "  {} {} ({})",
            style("✗").red(),
            style(step).red(),
            event.error.as_deref().unwrap_or("failed"),
        )),
        EventKind::PipelineCompleted => Some(format!(
            "\n{} Pipeline completed: {}/{} steps{}",
            style("✓").green().bold(),
            event.steps_completed.unwrap_or(0),
            event.steps_total.unwrap_or(0),
            run_metrics(event),
        )),
        EventKind::PipelineFailed => Some(format!(
            "\n{} Pipeline failed: {}",
            style("✗").red().bold(),
            event.error.as_deref().unwrap_or("one or more steps failed"),
        )),
        _ => None,
    }
}

fn run_metrics(event: &ProtocolEvent) -> String {
    let mut parts = Vec::new();
    if let Some(ms) = event.duration_ms {
        parts.push(format_duration(ms));
    }
    if let Some(cost) = event.cost_usd {
        parts.push(format_cost(cost));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(" | "))
    }
}

pub fn pipeline_status_badge(status: PipelineStatus) -> String {
    let label = status.as_str();
    match status {
        PipelineStatus::Completed => style(label).green().to_string(),
        PipelineStatus::Failed => style(label).red().to_string(),
        PipelineStatus::Running => style(label).cyan().to_string(),
        PipelineStatus::Paused => style(label).yellow().to_string(),
        PipelineStatus::Draft | PipelineStatus::Ready => style(label).dim().to_string(),
    }
}

pub fn step_status_badge(status: StepStatus) -> String {
    match status {
        StepStatus::Completed => style("✓").green().to_string(),
        StepStatus::Failed => style("✗").red().to_string(),
        StepStatus::Skipped => style("-").dim().to_string(),
        StepStatus::Running => style("▶").cyan().to_string(),
        StepStatus::Pending => style("·").dim().to_string(),
    }
}

pub fn session_status_badge(status: SessionStatus) -> String {
    let label = status.as_str();
    match status {
        SessionStatus::Completed => style(label).green().to_string(),
        SessionStatus::Error => style(label).red().to_string(),
        SessionStatus::Cancelled => style(label).yellow().to_string(),
        SessionStatus::Running => style(label).cyan().to_string(),
    }
}

/// One line per step, in declared order, with dependencies by position.
pub fn render_steps(steps: &[PipelineStep]) -> Vec<String> {
    steps
        .iter()
        .map(|step| {
            let deps: Vec<String> = step
                .depends_on
                .iter()
                .filter_map(|d| steps.iter().find(|s| &s.id == d))
                .map(|s| format!("#{}", s.position + 1))
                .collect();
            let mut line = format!(
                "  {} {:>2}. {}",
                step_status_badge(step.status),
                step.position + 1,
                step.name,
            );
            if let Some(agent) = &step.agent {
                line.push_str(&format!(" [{}]", style(agent).dim()));
            }
            if !deps.is_empty() {
                line.push_str(&format!(" after {}", deps.join(", ")));
            }
            if let Some(error) = &step.error {
                line.push_str(&format!("\n       {}", style(error).red()));
            }
            line
        })
        .collect()
}

pub fn render_session(session: &Session) -> Vec<String> {
    let mut lines = vec![
        format!("{} {}", style("Session").bold(), style(&session.id).cyan()),
        format!("  status:   {}", session_status_badge(session.status)),
        format!("  prompt:   {}", truncate_chars(&session.prompt, RESULT_PREVIEW)),
    ];
    if let Some(model) = &session.model {
        lines.push(format!("  model:    {}", model));
    }
    if let Some(cost) = session.cost_usd {
        lines.push(format!("  cost:     {}", format_cost(cost)));
    }
    if let Some(ms) = session.duration_ms {
        lines.push(format!("  duration: {}", format_duration(ms)));
    }
    if session.input_tokens.is_some() || session.output_tokens.is_some() {
        lines.push(format!(
            "  tokens:   {} in / {} out",
            session.input_tokens.unwrap_or(0),
            session.output_tokens.unwrap_or(0),
        ));
    }
    if let Some(turns) = session.num_turns {
        lines.push(format!("  turns:    {}", turns));
    }
    lines
}

/// Indented call tree; tasks arrive in start order so children follow
/// their parent.
pub fn render_task_tree(tasks: &[MonitorTask]) -> Vec<String> {
    tasks
        .iter()
        .map(|task| {
            let marker = match task.status {
                TaskStatus::Completed => style("✓").green(),
                TaskStatus::Failed => style("✗").red(),
                TaskStatus::Running => style("▶").cyan(),
            };
            let mut line = format!(
                "{}{} {} {}",
                "  ".repeat(task.depth + 1),
                marker,
                style(&task.tool_name).bold(),
                task.description,
            );
            if let Some(agent) = &task.subagent_type {
                line.push_str(&format!(" [{}]", style(agent).magenta()));
            }
            if let Some(ms) = task.duration_ms {
                line.push_str(&format!(" {}", style(format_duration(ms)).dim()));
            }
            line
        })
        .collect()
}

pub fn render_diff_summary(diff: &DiffCapture) -> String {
    format!(
        "{} files changed, {} insertions(+), {} deletions(-)",
        style(diff.files_changed).bold(),
        style(diff.insertions).green(),
        style(diff.deletions).red(),
    )
}
