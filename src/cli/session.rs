use console::style;
use serde_json::json;

use super::commands::{ListArgs, SessionCommand, SessionShowArgs};
use super::context::AppContext;
use super::render::{render_diff_summary, render_event, render_session, render_task_tree, session_status_badge};
use crate::errors::ConductorError;
use crate::utils::{format_cost, truncate_chars};

pub async fn handle_session(command: SessionCommand, ctx: &AppContext) -> Result<(), ConductorError> {
    match command {
        SessionCommand::Show(args) => handle_show(args, ctx),
        SessionCommand::List(args) => handle_list(args, ctx),
    }
}

fn handle_show(args: SessionShowArgs, ctx: &AppContext) -> Result<(), ConductorError> {
    let session = ctx
        .db
        .get_session(&args.id)?
        .ok_or_else(|| ConductorError::NotFound(format!("session {}", args.id)))?;
    let tasks = ctx.db.get_monitor_tasks(&session.id)?;
    let diff = ctx.db.get_session_diff(&session.id)?;
    let events = if args.events { ctx.db.get_session_events(&session.id)? } else { Vec::new() };

    if args.json {
        let mut value = json!({ "session": session, "tasks": tasks, "diff": diff });
        if args.events {
            value["events"] = serde_json::to_value(&events)?;
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for line in render_session(&session) {
        println!("{}", line);
    }

    if !tasks.is_empty() {
        println!("\n{} ({})", style("Tasks").bold(), tasks.len());
        for line in render_task_tree(&tasks) {
            println!("{}", line);
        }
    }

    if let Some(diff) = &diff {
        println!("\n{} {}", style("Diff").bold(), render_diff_summary(diff));
        if args.diff {
            if let Some(content) = &diff.diff_content {
                println!("{}", content);
            } else if let Some(stat) = &diff.diff_stat {
                println!("{}", stat);
            }
        }
    }

    if args.events {
        println!("\n{} ({})", style("Events").bold(), events.len());
        for line in events.iter().filter_map(render_event) {
            println!("  {}", line);
        }
    }
    Ok(())
}

fn handle_list(args: ListArgs, ctx: &AppContext) -> Result<(), ConductorError> {
    let sessions = ctx.db.list_sessions(args.limit)?;
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    for s in sessions {
        println!(
            "{}  {:<10} {:>9}  {}  {}",
            style(&s.id).cyan(),
            session_status_badge(s.status),
            s.cost_usd.map(format_cost).unwrap_or_else(|| "-".to_string()),
            style(&s.started_at).dim(),
            truncate_chars(&s.prompt, 60).replace('\n', " "),
        );
    }
    Ok(())
}
