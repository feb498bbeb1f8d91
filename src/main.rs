use clap::Parser;
use tracing_subscriber::EnvFilter;

use conductor::cli::{self, AppContext, Cli, Commands};
use conductor::config;
use conductor::errors::ConductorError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.with_ansi(!cli.no_color).init();
    }
    if cli.no_color {
        console::set_colors_enabled(false);
    }

    if let Err(e) = dispatch(cli).await {
        let class = e.classify();
        tracing::debug!(error_type = class.error_type, "Command failed");
        eprintln!("Error: {}", e);
        std::process::exit(class.exit_code);
    }
}

async fn dispatch(cli: Cli) -> Result<(), ConductorError> {
    if let Commands::Validate(args) = &cli.command {
        return handle_validate(&args.config).await;
    }

    let ctx = AppContext::load(cli.config.as_deref(), cli.db.as_deref()).await?;
    match cli.command {
        Commands::Run(args) => cli::run::handle_run(args, &ctx).await,
        Commands::Pipeline(command) => cli::pipeline::handle_pipeline(command, &ctx).await,
        Commands::Session(command) => cli::session::handle_session(command, &ctx).await,
        Commands::Validate(_) => Ok(()),
    }
}

async fn handle_validate(path: &str) -> Result<(), ConductorError> {
    let path = std::path::PathBuf::from(path);
    let config = config::parse_config(&path).await?;
    let settings = config::Settings::from_config(&config);
    println!("Configuration is valid: {}", path.display());
    println!("  agent binary:  {}", settings.agent_binary);
    println!("  max parallel:  {}", settings.max_parallel);
    println!("  database:      {}", settings.database_path.display());
    Ok(())
}
