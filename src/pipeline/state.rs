use std::collections::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::models::{PipelineStatus, PipelineStep, StepStatus};
use crate::utils::truncate_chars;

/// Cap for captured step output, both stored and fed to later prompts.
pub const OUTPUT_SUMMARY_MAX: usize = 2_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub pipeline_id: String,
    pub status: PipelineStatus,
    pub steps_total: usize,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
}

impl PipelineSummary {
    /// Steps that reached any terminal state.
    pub fn steps_finished(&self) -> usize {
        self.steps_completed + self.steps_failed + self.steps_skipped
    }

    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Completed
    }
}

/// Scheduler bookkeeping, owned by the run loop alone.
#[derive(Debug, Default)]
pub struct SchedulerState {
    pub completed: HashSet<String>,
    pub failed: HashSet<String>,
    pub skipped: HashSet<String>,
    pub launched: HashSet<String>,
    pub outputs: HashMap<String, String>,
    pub total_cost_usd: f64,
    pub cancelled: bool,
}

impl SchedulerState {
    /// Seed from stored step statuses so a resumed run keeps finished work.
    /// Completed steps also contribute their stored output.
    pub fn from_steps(steps: &[PipelineStep]) -> Self {
        let mut state = Self::default();
        for step in steps {
            match step.status {
                StepStatus::Completed => {
                    state.completed.insert(step.id.clone());
                    if let Some(output) = &step.output_summary {
                        state.outputs.insert(step.id.clone(), output.clone());
                    }
                }
                StepStatus::Failed => {
                    state.failed.insert(step.id.clone());
                }
                StepStatus::Skipped => {
                    state.skipped.insert(step.id.clone());
                }
                StepStatus::Pending | StepStatus::Running => {}
            }
        }
        state
    }

    /// Any dependency failed or was skipped.
    pub fn is_blocked(&self, step: &PipelineStep) -> bool {
        step.depends_on
            .iter()
            .any(|d| self.failed.contains(d) || self.skipped.contains(d))
    }

    pub fn is_ready(&self, step: &PipelineStep) -> bool {
        step.depends_on.iter().all(|d| self.completed.contains(d))
    }

    /// Placeholder values for one step's prompt: `spec`, `prev_output` from the
    /// first dependency and `step.<id>.output` for every captured output.
    pub fn prompt_context(&self, step: &PipelineStep, spec: Option<&str>) -> HashMap<String, String> {
        let mut context = HashMap::new();
        if let Some(spec) = spec.filter(|s| !s.is_empty()) {
            context.insert("spec".to_string(), spec.to_string());
        }
        if let Some(output) = step.depends_on.first().and_then(|d| self.outputs.get(d)) {
            context.insert("prev_output".to_string(), truncate_chars(output, OUTPUT_SUMMARY_MAX).to_string());
        }
        for (id, output) in &self.outputs {
            context.insert(format!("step.{}.output", id), truncate_chars(output, OUTPUT_SUMMARY_MAX).to_string());
        }
        context
    }

    pub fn finished_count(&self) -> usize {
        self.completed.len() + self.failed.len() + self.skipped.len()
    }
}
