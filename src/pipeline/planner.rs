use std::sync::OnceLock;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::routing::{available_agents, enrich_steps_with_routing};
use crate::db::Database;
use crate::errors::ConductorError;
use crate::models::{PlannedStep, SessionOutcome, SessionStatus, Workspace};
use crate::protocol::{EventKind, ProtocolEvent};
use crate::runner::{AgentLauncher, RunRequest};
use crate::utils::{expand_home, truncate_chars};

/// Model the planner run uses unless the caller picks another.
pub const PLANNER_MODEL: &str = "sonnet";

const ISSUE_BODY_MAX_LEN: usize = 500;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)```").expect("static regex"))
}

fn step_format(agents: &[String], placeholders: &str) -> String {
    format!(
        "Each step should be a JSON object with these fields:\n\
         - \"name\": short descriptive name for the step\n\
         - \"description\": what the step should accomplish\n\
         - \"agent\": one of [{}] or null if unsure\n\
         - \"prompt_template\": the prompt to send to the agent (can use {})\n\
         - \"depends_on\": array of step indices (0-based) this step depends on, or empty array\n\
         \n\
         Return ONLY a JSON array of steps. No explanation, no markdown fences.",
        agents.join(", "),
        placeholders
    )
}

/// Prompt asking the planner to decompose a specification into steps.
pub fn build_planner_prompt_from_spec(spec: &str, agents: &[String]) -> String {
    format!(
        "You are a pipeline planner. Decompose the following specification into a sequence of steps.\n\n{}\n\nSpecification:\n{}",
        step_format(agents, "{{spec}} for original spec, {{prev_output}} for previous step output"),
        spec
    )
}

/// Prompt asking the planner to turn milestone issues into steps.
pub fn build_planner_prompt_from_issues(issues: &[Value], agents: &[String]) -> String {
    let issues_text = issues
        .iter()
        .map(|issue| {
            let number = match issue.get("number") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => "?".to_string(),
            };
            let title = issue.get("title").and_then(Value::as_str).unwrap_or("untitled");
            let body = issue
                .get("body")
                .and_then(Value::as_str)
                .filter(|b| !b.is_empty())
                .unwrap_or("No description");
            format!("- Issue #{}: {}\n  {}", number, title, truncate_chars(body, ISSUE_BODY_MAX_LEN))
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a pipeline planner. Create a pipeline plan from these GitHub issues.\n\n{}\n\nIssues:\n{}",
        step_format(agents, "{{issue_body}} for issue content, {{prev_output}} for previous step output"),
        issues_text
    )
}

fn parse_step_array(text: &str) -> Option<Vec<PlannedStep>> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match serde_json::from_value::<PlannedStep>(item) {
                    Ok(step) => Some(step),
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed planner step");
                        None
                    }
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Extract the step list from planner output: a bare JSON array, then a
/// fenced block, then the outermost bracket slice. Empty when nothing parses.
pub fn parse_planner_output(raw: &str) -> Vec<PlannedStep> {
    let text = raw.trim();

    if let Some(steps) = parse_step_array(text) {
        return steps;
    }

    if let Some(caps) = fence_re().captures(text) {
        if let Some(steps) = parse_step_array(caps[1].trim()) {
            return steps;
        }
    }

    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if end > start {
            if let Some(steps) = parse_step_array(&text[start..=end]) {
                return steps;
            }
        }
    }

    Vec::new()
}

/// What the planner works from.
#[derive(Debug, Clone)]
pub enum PlanSource {
    Spec(String),
    Milestone { number: u64, issues: Vec<Value> },
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub workspace: Workspace,
    pub name: String,
    pub source: PlanSource,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub pipeline_id: String,
    pub session_id: String,
    pub steps: Vec<PlannedStep>,
}

/// Run the planner agent, parse its answer and persist the pipeline as `ready`.
pub async fn plan_pipeline(
    launcher: &dyn AgentLauncher,
    db: &Database,
    request: PlanRequest,
    cancel: CancellationToken,
) -> Result<PlanOutcome, ConductorError> {
    let agents: Vec<String> = available_agents().into_iter().map(|a| a.name).collect();
    let (prompt, spec) = match &request.source {
        PlanSource::Spec(spec) => (build_planner_prompt_from_spec(spec, &agents), Some(spec.as_str())),
        PlanSource::Milestone { number, issues } => {
            if issues.is_empty() {
                return Err(ConductorError::Planner(format!("no issues found for milestone {}", number)));
            }
            (build_planner_prompt_from_issues(issues, &agents), None)
        }
    };

    let model = request.model.clone().unwrap_or_else(|| PLANNER_MODEL.to_string());
    let session_id = db.create_session(
        &request.workspace.id,
        &format!("{}...", truncate_chars(&prompt, 200)),
        None,
        None,
        Some(&model),
    )?;
    info!(session_id = %session_id, pipeline = %request.name, "Planner run started");

    let run = RunRequest::new(
        session_id.clone(),
        prompt,
        &request.workspace.path,
        expand_home(&request.workspace.config_dir),
    )
    .with_model(Some(model));

    let mut rx = launcher.launch(run, cancel.clone());
    let mut events: Vec<ProtocolEvent> = Vec::new();
    let mut output = String::new();
    let mut terminal: Option<ProtocolEvent> = None;
    while let Some(event) = rx.recv().await {
        if event.kind == EventKind::TextMessageContent {
            if let Some(text) = &event.text {
                output.push_str(text);
            }
        }
        if event.is_terminal() && terminal.is_none() {
            terminal = Some(event.clone());
        }
        events.push(event);
    }

    db.insert_session_events_batch(&session_id, &events)?;
    let outcome = match &terminal {
        _ if cancel.is_cancelled() => SessionOutcome::status_only(SessionStatus::Cancelled),
        Some(event) => SessionOutcome::from_terminal(event),
        None => SessionOutcome::status_only(SessionStatus::Error),
    };
    db.finish_session(&session_id, &outcome)?;

    if let Some(event) = terminal.as_ref().filter(|e| e.kind == EventKind::RunError) {
        let reason = event.error.clone().unwrap_or_else(|| "Unknown error".to_string());
        return Err(ConductorError::Planner(format!("planner run failed: {}", reason)));
    }

    let mut steps = parse_planner_output(&output);
    if steps.is_empty() {
        warn!(session_id = %session_id, output = %truncate_chars(&output, 200), "Planner produced no steps");
        return Err(ConductorError::Planner("planner failed to generate valid steps".to_string()));
    }
    enrich_steps_with_routing(&mut steps);

    let pipeline_id = db.create_pipeline_from_plan(&request.workspace.id, &request.name, spec, &steps)?;
    info!(pipeline_id = %pipeline_id, steps = steps.len(), "Pipeline planned");

    Ok(PlanOutcome {
        pipeline_id,
        session_id,
        steps,
    })
}
