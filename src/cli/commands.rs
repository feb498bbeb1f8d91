use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "conductor",
    version = env!("CONDUCTOR_LONG_VERSION"),
    about = "Run agent CLI sessions and multi-step agent pipelines"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// SQLite database path (overrides the configuration)
    #[arg(long, global = true)]
    pub db: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single agent session in a workspace
    Run(RunArgs),
    /// Create, plan, execute and inspect pipelines
    #[command(subcommand)]
    Pipeline(PipelineCommand),
    /// Inspect recorded sessions
    #[command(subcommand)]
    Session(SessionCommand),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

/// Where a run executes and which agent configuration it uses.
#[derive(Args, Clone, Debug)]
pub struct WorkspaceArgs {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    pub workspace: String,

    /// Agent configuration directory for this workspace
    #[arg(long)]
    pub config_dir: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Prompt sent to the agent
    pub prompt: String,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Skill to invoke (prefixes the prompt)
    #[arg(long)]
    pub skill: Option<String>,

    /// Agent hint recorded with the session
    #[arg(long)]
    pub agent: Option<String>,

    /// Model passed to the agent
    #[arg(short, long)]
    pub model: Option<String>,

    /// Print events as JSON lines instead of styled output
    #[arg(long)]
    pub json: bool,

    /// Skip git diff capture
    #[arg(long)]
    pub no_diff: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum PipelineCommand {
    /// Create a pipeline from a JSON or YAML plan file
    Create(PipelineCreateArgs),
    /// Plan a pipeline with the planner agent
    Plan(PipelinePlanArgs),
    /// Execute a pipeline
    Run(PipelineRunArgs),
    /// List pipelines
    List(ListArgs),
    /// Show a pipeline and its steps
    Show(ShowArgs),
    /// List routable agents and their keywords
    Agents,
}

#[derive(Args, Clone, Debug)]
pub struct PipelineCreateArgs {
    /// Plan file (JSON or YAML)
    pub plan: String,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Pipeline name (overrides the plan's name)
    #[arg(short, long)]
    pub name: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct PipelinePlanArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Pipeline name
    #[arg(short, long)]
    pub name: String,

    /// Specification file to plan from
    #[arg(long, conflicts_with = "milestone", required_unless_present = "milestone")]
    pub spec_file: Option<String>,

    /// GitHub milestone number to plan from
    #[arg(long, requires = "repo")]
    pub milestone: Option<u64>,

    /// GitHub repository as owner/name
    #[arg(long)]
    pub repo: Option<String>,

    /// Model for the planner session
    #[arg(short, long)]
    pub model: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct PipelineRunArgs {
    /// Pipeline ID
    pub id: String,

    /// Maximum concurrently running steps
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Keep completed steps from a previous run
    #[arg(long)]
    pub resume: bool,

    /// Print events as JSON lines instead of progress bars
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    /// Maximum rows to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args, Clone, Debug)]
pub struct ShowArgs {
    /// Record ID
    pub id: String,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum SessionCommand {
    /// Show session metrics, task tree and diff
    Show(SessionShowArgs),
    /// List recent sessions
    List(ListArgs),
}

#[derive(Args, Clone, Debug)]
pub struct SessionShowArgs {
    /// Session ID
    pub id: String,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,

    /// Include the full diff content
    #[arg(long)]
    pub diff: bool,

    /// Include the recorded event stream
    #[arg(long)]
    pub events: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Configuration file to validate
    pub config: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_pipeline_run() {
        let cli = Cli::parse_from(["conductor", "-vv", "pipeline", "run", "abc", "--max-parallel", "2", "--resume"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Pipeline(PipelineCommand::Run(args)) => {
                assert_eq!(args.id, "abc");
                assert_eq!(args.max_parallel, Some(2));
                assert!(args.resume);
            }
            _ => panic!("expected pipeline run"),
        }
    }

    #[test]
    fn test_plan_requires_a_source() {
        assert!(Cli::try_parse_from(["conductor", "pipeline", "plan", "--name", "x"]).is_err());
        assert!(Cli::try_parse_from(["conductor", "pipeline", "plan", "--name", "x", "--milestone", "3"]).is_err());
        assert!(Cli::try_parse_from([
            "conductor", "pipeline", "plan", "--name", "x", "--milestone", "3", "--repo", "o/r"
        ])
        .is_ok());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["conductor", "run", "hello", "--db", "/tmp/c.db", "--no-color"]);
        assert_eq!(cli.db.as_deref(), Some("/tmp/c.db"));
        assert!(cli.no_color);
    }
}
