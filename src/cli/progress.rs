use std::collections::HashMap;
use std::time::{Duration, Instant};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::render::render_pipeline_event;
use crate::protocol::{EventKind, ProtocolEvent};
use crate::utils::{format_cost, format_duration};

/// Multi-progress display for one pipeline run: an overall step bar, one
/// spinner per running step and a status line with elapsed time and cost.
pub struct PipelineProgress {
    multi: MultiProgress,
    steps_bar: Option<ProgressBar>,
    step_spinners: HashMap<String, ProgressBar>,
    status_bar: ProgressBar,
    cost_usd: f64,
    start_time: Instant,
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

impl PipelineProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(spinner_style("  {spinner:.cyan} {msg}"));
        status_bar.set_message("Starting pipeline...");
        status_bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            multi,
            steps_bar: None,
            step_spinners: HashMap::new(),
            status_bar,
            cost_usd: 0.0,
            start_time: Instant::now(),
        }
    }

    pub fn handle_event(&mut self, event: &ProtocolEvent) {
        match event.kind {
            EventKind::PipelineStarted => {
                let total = event.steps_total.unwrap_or(0) as u64;
                let bar = self.multi.insert_before(&self.status_bar, ProgressBar::new(total));
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("  {bar:30.cyan/dark_gray} {pos}/{len} steps | {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("█▓░"),
                );
                bar.set_message(event.pipeline_id.clone().unwrap_or_default());
                self.steps_bar = Some(bar);
            }
            EventKind::PipelineStepStarted => {
                let Some(step_id) = event.step_id.clone() else { return };
                let spinner = self.multi.insert_before(&self.status_bar, ProgressBar::new_spinner());
                spinner.set_style(spinner_style("    {spinner:.yellow} {msg}"));
                spinner.set_message(event.step_name.clone().unwrap_or_else(|| step_id.clone()));
                spinner.enable_steady_tick(Duration::from_millis(100));
                self.step_spinners.insert(step_id, spinner);
            }
            EventKind::ToolCallStart => {
                if let (Some(step_id), Some(tool)) = (&event.step_id, &event.tool_name) {
                    if let Some(spinner) = self.step_spinners.get(step_id) {
                        let name = spinner.message();
                        let base = name.split(" · ").next().unwrap_or_default().to_string();
                        spinner.set_message(format!("{} · {}", base, style(tool).dim()));
                    }
                }
            }
            EventKind::PipelineStepCompleted | EventKind::PipelineStepFailed => {
                if let Some(cost) = event.cost_usd {
                    self.cost_usd += cost;
                }
                if let Some(spinner) = event.step_id.as_ref().and_then(|id| self.step_spinners.remove(id)) {
                    spinner.finish_and_clear();
                }
                if let Some(bar) = &self.steps_bar {
                    bar.inc(1);
                }
                if let Some(line) = render_pipeline_event(event) {
                    self.multi.println(line).ok();
                }
            }
            EventKind::PipelineCompleted | EventKind::PipelineFailed => {
                for (_, spinner) in self.step_spinners.drain() {
                    spinner.finish_and_clear();
                }
                if let Some(bar) = &self.steps_bar {
                    bar.abandon();
                }
            }
            _ => {}
        }
        self.update_status();
    }

    fn update_status(&self) {
        let elapsed = self.start_time.elapsed().as_millis() as u64;
        self.status_bar.set_message(format!(
            "{} elapsed | {} | {} running",
            format_duration(elapsed),
            format_cost(self.cost_usd),
            self.step_spinners.len(),
        ));
    }

    pub fn finish_with_message(&self, message: String) {
        self.status_bar.finish_with_message(message);
    }
}

impl Default for PipelineProgress {
    fn default() -> Self {
        Self::new()
    }
}
