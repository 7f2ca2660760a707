use clap::{Parser, Subcommand};
use gridcast::cli::run::RunArgs;
use gridcast::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gridcast")]
#[command(about = "Rate-limited, resumable dispatch of grid writes", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session from a JSON file of operations
    Run {
        ops: PathBuf,
        /// Resource to write to, overriding remote.resource
        #[arg(long)]
        resource: Option<String>,
        /// Answer yes to every confirmation
        #[arg(long, short)]
        yes: bool,
        /// Send to an in-memory grid instead of the remote
        #[arg(long)]
        dry_run: bool,
    },
    /// Continue the checkpointed session
    Resume {
        /// Rebuild the queue from remote state before sending
        #[arg(long)]
        validate: bool,
    },
    /// Check the last session against remote state and queue what is missing
    Validate {
        /// Send the queued corrections right away
        #[arg(long)]
        send: bool,
    },
    /// Show the checkpointed session
    Status,
    /// Discard the checkpointed session
    Clear {
        #[arg(long, short)]
        yes: bool,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridcast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Commands::Run {
            ops,
            resource,
            yes,
            dry_run,
        } => {
            let args = RunArgs {
                ops,
                resource,
                yes,
                dry_run,
            };
            gridcast::cli::run::run(config_path, args).await?;
        }
        Commands::Resume { validate } => gridcast::cli::run::resume(config_path, validate).await?,
        Commands::Validate { send } => gridcast::cli::run::validate(config_path, send).await?,
        Commands::Status => gridcast::cli::run::status(config_path).await?,
        Commands::Clear { yes } => gridcast::cli::run::clear(config_path, yes).await?,
        Commands::Config { action } => match action {
            ConfigAction::Init { stdout } => gridcast::cli::config::init(stdout)?,
            ConfigAction::Validate => gridcast::cli::config::validate(config_path)?,
        },
    }

    Ok(())
}
