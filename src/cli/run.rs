use console::style;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::commands::RunArgs;
use super::context::AppContext;
use super::render::{render_diff_summary, render_event, session_status_badge};
use crate::errors::ConductorError;
use crate::protocol::ProtocolEvent;
use crate::session::{SessionRequest, SessionService};
use crate::utils::format_cost;

/// Print events as they stream in, styled or as JSON lines.
pub(crate) fn spawn_printer(
    mut rx: mpsc::UnboundedReceiver<ProtocolEvent>,
    json: bool,
    render: fn(&ProtocolEvent) -> Option<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if json {
                match event.to_json() {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                }
            } else if let Some(line) = render(&event) {
                println!("{}", line);
            }
        }
    })
}

/// Cancel `token` on the first Ctrl-C.
pub(crate) fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            token.cancel();
        }
    });
}

pub async fn handle_run(args: RunArgs, ctx: &AppContext) -> Result<(), ConductorError> {
    let workspace = ctx.workspace(&args.workspace)?;
    let git = if args.no_diff { None } else { Some(ctx.settings.git_helper()) };
    let service = SessionService::new(ctx.db.clone(), ctx.launcher()).with_git(git);

    let request = SessionRequest {
        skill: args.skill,
        agent: args.agent,
        model: args.model,
        ..SessionRequest::new(workspace, args.prompt)
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = spawn_printer(rx, args.json, render_event);
    let result = service.run_session(request, Some(tx), cancel).await;
    printer.await.ok();
    let report = result?;

    if !args.json {
        println!();
        println!(
            "{} {} {}",
            style("Session").bold(),
            style(&report.session_id).cyan(),
            session_status_badge(report.outcome.status),
        );
        if let Some(cost) = report.outcome.cost_usd {
            println!("  cost:  {}", format_cost(cost));
        }
        println!("  tasks: {}", report.tasks);
        if let Some(diff) = &report.diff {
            println!("  diff:  {}", render_diff_summary(diff));
        }
    }

    if report.succeeded() {
        Ok(())
    } else {
        Err(ConductorError::Process(format!(
            "session {} ended with status {}{}",
            report.session_id,
            report.outcome.status.as_str(),
            report.error.map(|e| format!(": {}", e)).unwrap_or_default(),
        )))
    }
}
