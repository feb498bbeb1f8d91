use console::style;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::commands::{ListArgs, PipelineCommand, PipelineCreateArgs, PipelinePlanArgs, PipelineRunArgs, ShowArgs};
use super::context::AppContext;
use super::progress::PipelineProgress;
use super::render::{pipeline_status_badge, render_pipeline_event, render_steps};
use super::run::{cancel_on_ctrl_c, spawn_printer};
use crate::errors::ConductorError;
use crate::models::{PipelinePlan, PipelineStatus};
use crate::protocol::{EventKind, ProtocolEvent};
use crate::pipeline::{
    available_agents, enrich_steps_with_routing, plan_pipeline, PipelineScheduler, PipelineSummary, PlanRequest,
    PlanSource,
};
use crate::utils::{format_cost, format_duration};

pub async fn handle_pipeline(command: PipelineCommand, ctx: &AppContext) -> Result<(), ConductorError> {
    match command {
        PipelineCommand::Create(args) => handle_create(args, ctx).await,
        PipelineCommand::Plan(args) => handle_plan(args, ctx).await,
        PipelineCommand::Run(args) => handle_run(args, ctx).await,
        PipelineCommand::List(args) => handle_list(args, ctx),
        PipelineCommand::Show(args) => handle_show(args, ctx),
        PipelineCommand::Agents => {
            for agent in available_agents() {
                println!("  {:<22} {}", style(&agent.name).cyan(), agent.keywords.join(", "));
            }
            Ok(())
        }
    }
}

/// Plans are JSON or YAML; YAML parsing accepts both.
pub fn parse_plan(content: &str) -> Result<PipelinePlan, ConductorError> {
    let plan: PipelinePlan = serde_yaml::from_str(content)?;
    if plan.steps.is_empty() {
        return Err(ConductorError::InvalidPipeline("plan has no steps".to_string()));
    }
    for (i, step) in plan.steps.iter().enumerate() {
        if let Some(&dep) = step.depends_on.iter().find(|&&d| d >= i) {
            return Err(ConductorError::InvalidPipeline(format!(
                "step {} ('{}') depends on step {}, which does not precede it",
                i, step.name, dep
            )));
        }
    }
    Ok(plan)
}

async fn handle_create(args: PipelineCreateArgs, ctx: &AppContext) -> Result<(), ConductorError> {
    let content = tokio::fs::read_to_string(&args.plan)
        .await
        .map_err(|e| ConductorError::NotFound(format!("plan file {}: {}", args.plan, e)))?;
    let mut plan = parse_plan(&content)?;
    enrich_steps_with_routing(&mut plan.steps);

    let workspace = ctx.workspace(&args.workspace)?;
    let name = args.name.unwrap_or(plan.name);
    let id = ctx
        .db
        .create_pipeline_from_plan(&workspace.id, &name, plan.spec.as_deref(), &plan.steps)?;
    info!(pipeline_id = %id, steps = plan.steps.len(), "Pipeline created");

    print_pipeline(&id, ctx)
}

async fn handle_plan(args: PipelinePlanArgs, ctx: &AppContext) -> Result<(), ConductorError> {
    let workspace = ctx.workspace(&args.workspace)?;
    let source = match (&args.spec_file, args.milestone) {
        (Some(path), _) => {
            let spec = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConductorError::NotFound(format!("spec file {}: {}", path, e)))?;
            PlanSource::Spec(spec)
        }
        (None, Some(number)) => {
            let repo = args.repo.as_deref().unwrap_or_default();
            let (owner, name) = repo
                .split_once('/')
                .filter(|(o, n)| !o.is_empty() && !n.is_empty())
                .ok_or_else(|| ConductorError::Config(format!("repository must be owner/name, got '{}'", repo)))?;
            let issues = ctx.settings.gh_client().milestone_issues(owner, name, number).await?;
            info!(milestone = number, issues = issues.len(), "Fetched milestone issues");
            PlanSource::Milestone { number, issues }
        }
        (None, None) => {
            return Err(ConductorError::Config("either --spec-file or --milestone is required".to_string()))
        }
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    println!("{} Planning {}...", style("▶").green().bold(), style(&args.name).cyan());
    let launcher = ctx.launcher();
    let outcome = plan_pipeline(
        launcher.as_ref(),
        &ctx.db,
        PlanRequest {
            workspace,
            name: args.name,
            source,
            model: args.model,
        },
        cancel,
    )
    .await?;

    print_pipeline(&outcome.pipeline_id, ctx)
}

fn check_runnable(status: PipelineStatus, resume: bool) -> Result<(), ConductorError> {
    match status {
        PipelineStatus::Draft | PipelineStatus::Ready | PipelineStatus::Failed => Ok(()),
        PipelineStatus::Running | PipelineStatus::Paused if resume => Ok(()),
        other => Err(ConductorError::Pipeline(format!(
            "cannot execute pipeline in '{}' status",
            other.as_str()
        ))),
    }
}

async fn handle_run(args: PipelineRunArgs, ctx: &AppContext) -> Result<(), ConductorError> {
    let pipeline = ctx
        .db
        .get_pipeline(&args.id)?
        .ok_or_else(|| ConductorError::NotFound(format!("pipeline {}", args.id)))?;
    check_runnable(pipeline.status, args.resume)?;

    if !args.resume {
        let reset = ctx.db.reset_pipeline_steps(&pipeline.id)?;
        if reset > 0 {
            info!(pipeline_id = %pipeline.id, steps = reset, "Reset steps from previous run");
        }
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = PipelineScheduler::new(pipeline.id.clone(), ctx.db.clone(), ctx.launcher())
        .with_max_parallel(args.max_parallel.unwrap_or(ctx.settings.max_parallel))
        .with_poll_interval(ctx.settings.poll_interval)
        .with_cancel_token(cancel)
        .with_event_channel(tx);

    let display = if args.json {
        spawn_printer(rx, true, render_pipeline_event)
    } else {
        spawn_progress(rx)
    };

    let result = scheduler.run().await;
    drop(scheduler);
    display.await.ok();
    let summary = result?;

    if !args.json {
        print_summary(&summary);
    }
    if summary.succeeded() {
        Ok(())
    } else {
        Err(ConductorError::Pipeline(format!(
            "pipeline {} failed: {} failed, {} skipped of {} steps",
            summary.pipeline_id, summary.steps_failed, summary.steps_skipped, summary.steps_total
        )))
    }
}

fn spawn_progress(mut rx: mpsc::UnboundedReceiver<ProtocolEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut progress = PipelineProgress::new();
        let mut last_error: Option<String> = None;
        while let Some(event) = rx.recv().await {
            if event.kind == EventKind::PipelineFailed {
                last_error = event.error.clone();
            }
            progress.handle_event(&event);
        }
        progress.finish_with_message(match last_error {
            Some(error) => format!("{} {}", style("✗").red(), error),
            None => format!("{} done", style("✓").green()),
        });
    })
}

fn print_summary(summary: &PipelineSummary) {
    println!();
    println!(
        "{} {}: {}/{} completed, {} failed, {} skipped | {} | {}",
        style("Pipeline").bold(),
        pipeline_status_badge(summary.status),
        summary.steps_completed,
        summary.steps_total,
        summary.steps_failed,
        summary.steps_skipped,
        format_duration(summary.total_duration_ms),
        format_cost(summary.total_cost_usd),
    );
}

fn print_pipeline(id: &str, ctx: &AppContext) -> Result<(), ConductorError> {
    let pipeline = ctx
        .db
        .get_pipeline(id)?
        .ok_or_else(|| ConductorError::NotFound(format!("pipeline {}", id)))?;
    let steps = ctx.db.get_pipeline_steps(id)?;
    println!(
        "{} {} {} ({})",
        style("Pipeline").bold(),
        style(&pipeline.id).cyan(),
        style(&pipeline.name).white().bold(),
        pipeline_status_badge(pipeline.status),
    );
    if pipeline.total_cost_usd > 0.0 || pipeline.total_duration_ms > 0 {
        println!(
            "  {} | {}",
            format_duration(pipeline.total_duration_ms),
            format_cost(pipeline.total_cost_usd)
        );
    }
    for line in render_steps(&steps) {
        println!("{}", line);
    }
    Ok(())
}

fn handle_list(args: ListArgs, ctx: &AppContext) -> Result<(), ConductorError> {
    let pipelines = ctx.db.list_pipelines(args.limit)?;
    if pipelines.is_empty() {
        println!("No pipelines.");
        return Ok(());
    }
    for p in pipelines {
        println!(
            "{}  {:<24} {:<10} {:>9}  {}",
            style(&p.id).cyan(),
            p.name,
            pipeline_status_badge(p.status),
            format_cost(p.total_cost_usd),
            style(&p.created_at).dim(),
        );
    }
    Ok(())
}

fn handle_show(args: ShowArgs, ctx: &AppContext) -> Result<(), ConductorError> {
    if !args.json {
        return print_pipeline(&args.id, ctx);
    }
    let pipeline = ctx
        .db
        .get_pipeline(&args.id)?
        .ok_or_else(|| ConductorError::NotFound(format!("pipeline {}", args.id)))?;
    let steps = ctx.db.get_pipeline_steps(&args.id)?;
    let value = json!({ "pipeline": pipeline, "steps": steps });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
