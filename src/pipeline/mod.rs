pub mod graph;
pub mod planner;
pub mod routing;
pub mod scheduler;
pub mod state;
pub mod template;

pub use graph::validate_step_graph;
pub use planner::{
    build_planner_prompt_from_issues, build_planner_prompt_from_spec, parse_planner_output, plan_pipeline,
    PlanOutcome, PlanRequest, PlanSource, PLANNER_MODEL,
};
pub use routing::{available_agents, enrich_steps_with_routing, suggest_agent, AgentInfo};
pub use scheduler::{PipelineScheduler, SchedulerHandle, DEFAULT_MAX_PARALLEL, DEFAULT_POLL_INTERVAL};
pub use state::{PipelineSummary, OUTPUT_SUMMARY_MAX};
pub use template::{resolve_template, unresolved_keys};
