#![cfg(unix)]

mod common;

use tokio::sync::mpsc;

use conductor::cli::pipeline::parse_plan;
use conductor::db::Database;
use conductor::models::{NewStep, PipelineStatus, SessionStatus, StepStatus};
use conductor::pipeline::PipelineScheduler;
use conductor::protocol::{EventKind, ProtocolEvent};

/// Echoes the prompt back as assistant text and finishes with a fixed cost.
/// Prompts containing "explode" fail instead.
const ECHO_AGENT: &str = r#"for last; do :; done
case "$last" in
  *explode*) echo "step exploded" >&2; exit 2 ;;
esac
printf '{"type":"assistant","message":{"content":[{"type":"text","text":"done: %s"}]}}\n' "$last"
echo '{"type":"result","is_error":false,"cost_usd":0.01,"duration_ms":5,"num_turns":1}'"#;

fn drain(rx: &mut mpsc::UnboundedReceiver<ProtocolEvent>) -> Vec<ProtocolEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_pipeline_runs_real_processes_in_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let db = Database::in_memory().unwrap();
    let ws = common::workspace(&db, dir.path());
    let steps = vec![
        NewStep::named("a").with_id("a").with_prompt("build"),
        NewStep::named("b").with_id("b").depends_on(&["a"]).with_prompt("verify {{prev_output}}"),
        NewStep::named("c").with_id("c").with_prompt("document"),
    ];
    let id = db.create_pipeline(&ws.id, "release", None, PipelineStatus::Ready, &steps).unwrap();

    let script = common::fake_agent(bin.path(), ECHO_AGENT);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = PipelineScheduler::new(id.clone(), db.clone(), common::launcher_for(&script))
        .with_max_parallel(2)
        .with_event_channel(tx)
        .run()
        .await
        .unwrap();

    assert!(summary.succeeded());
    assert_eq!(summary.steps_completed, 3);
    assert!((summary.total_cost_usd - 0.03).abs() < 1e-9);

    let b = db.get_step("b").unwrap().unwrap();
    assert_eq!(b.status, StepStatus::Completed);
    assert_eq!(b.output_summary.as_deref(), Some("done: verify done: build"));

    let pipeline = db.get_pipeline(&id).unwrap().unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Completed);

    let events = drain(&mut rx);
    assert_eq!(events.first().map(|e| e.kind), Some(EventKind::PipelineStarted));
    assert_eq!(events.last().map(|e| e.kind), Some(EventKind::PipelineCompleted));
    let b_started = events
        .iter()
        .position(|e| e.kind == EventKind::PipelineStepStarted && e.step_id.as_deref() == Some("b"))
        .unwrap();
    let a_completed = events
        .iter()
        .position(|e| e.kind == EventKind::PipelineStepCompleted && e.step_id.as_deref() == Some("a"))
        .unwrap();
    assert!(a_completed < b_started);
    assert!(events
        .iter()
        .filter(|e| e.kind == EventKind::TextMessageContent)
        .all(|e| e.pipeline_id.as_deref() == Some(id.as_str()) && e.step_id.is_some()));
}

#[tokio::test]
async fn test_failed_process_skips_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let db = Database::in_memory().unwrap();
    let ws = common::workspace(&db, dir.path());
    let steps = vec![
        NewStep::named("a").with_id("a").with_prompt("explode now"),
        NewStep::named("b").with_id("b").depends_on(&["a"]),
        NewStep::named("c").with_id("c").with_prompt("independent"),
    ];
    let id = db.create_pipeline(&ws.id, "broken", None, PipelineStatus::Ready, &steps).unwrap();

    let script = common::fake_agent(bin.path(), ECHO_AGENT);
    let summary = PipelineScheduler::new(id.clone(), db.clone(), common::launcher_for(&script))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, PipelineStatus::Failed);
    assert_eq!(summary.steps_completed, 1);
    assert_eq!(summary.steps_failed, 1);
    assert_eq!(summary.steps_skipped, 1);

    let a = db.get_step("a").unwrap().unwrap();
    assert_eq!(a.status, StepStatus::Failed);
    assert!(a.error.unwrap().contains("step exploded"));
    let session = db.get_session(&a.session_id.unwrap()).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Error);

    assert_eq!(db.get_step("b").unwrap().unwrap().status, StepStatus::Skipped);
    assert_eq!(db.get_step("c").unwrap().unwrap().status, StepStatus::Completed);
}

#[tokio::test]
async fn test_plan_file_to_completed_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let db = Database::in_memory().unwrap();
    let ws = common::workspace(&db, dir.path());

    let plan = parse_plan(
        "name: planned\nspec: tiny app\nsteps:\n  - name: Implement core\n    prompt_template: \"write {{spec}}\"\n  - name: Write tests\n    depends_on: [0]\n",
    )
    .unwrap();
    let id = db
        .create_pipeline_from_plan(&ws.id, &plan.name, plan.spec.as_deref(), &plan.steps)
        .unwrap();

    let script = common::fake_agent(bin.path(), ECHO_AGENT);
    let summary = PipelineScheduler::new(id.clone(), db.clone(), common::launcher_for(&script))
        .run()
        .await
        .unwrap();
    assert!(summary.succeeded());

    let steps = db.get_pipeline_steps(&id).unwrap();
    assert_eq!(steps[0].output_summary.as_deref(), Some("done: write tiny app"));
    assert_eq!(steps[1].depends_on, vec![steps[0].id.clone()]);
    assert_eq!(steps[1].output_summary.as_deref(), Some("done: Write tests"));
}
