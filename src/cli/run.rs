use crate::cli::context::{checkpoint_store, Runtime};
use crate::cli::ops_file::{read_operations, OpsFileError};
use crate::config::{load_config, Config, ConfigError};
use crate::dispatch::{DispatchError, Dispatcher, RunReport, StopReason};
use crate::model::ResourceId;
use crate::session::{ResumeMode, SessionError};
use console::style;
use dialoguer::Confirm;
use std::path::PathBuf;
use thiserror::Error;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "config not found (searched ~/.config/gridcast/config.yml and /etc/gridcast/config.yml); \
         use --config <path> or run 'gridcast config init'"
    )]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    OpsFile(#[from] OpsFileError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("aborted")]
    Aborted,
}

/// Arguments of `gridcast run`.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub ops: PathBuf,
    pub resource: Option<String>,
    pub yes: bool,
    pub dry_run: bool,
}

fn load(config_path: Option<PathBuf>) -> Result<Config, RunError> {
    let path = config_path.ok_or(RunError::ConfigNotFound)?;
    info!(config_path = %path.display(), "Loading configuration");
    Ok(load_config(&path)?)
}

fn confirm(assume_yes: bool, prompt: &str) -> Result<bool, RunError> {
    if assume_yes {
        return Ok(true);
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

/// Start a new session from an operations file and drain it.
pub async fn run(config_path: Option<PathBuf>, args: RunArgs) -> Result<(), RunError> {
    let config = load(config_path)?;
    let operations = read_operations(&args.ops)?;
    if operations.is_empty() {
        println!("Nothing to dispatch: {} holds no operations", args.ops.display());
        return Ok(());
    }

    let resource = ResourceId::new(args.resource.unwrap_or_else(|| config.remote.resource.clone()));
    let runtime = Runtime::new(&config, resource, args.dry_run)?;
    if args.dry_run {
        println!(
            "{} dry run, writes go to an in-memory grid and no checkpoint is kept",
            style("note:").yellow().bold()
        );
    }

    if let Some(summary) = runtime.dispatcher.store().peek().await {
        if !summary.expired && summary.remaining > 0 {
            println!(
                "Session {} still has {} of {} operations outstanding.",
                summary.session_id, summary.remaining, summary.original
            );
            if !confirm(args.yes, "Discard it and start a new session?")? {
                println!("Run 'gridcast resume' to continue the existing session.");
                return Err(RunError::Aborted);
            }
        }
    }

    let preflight = runtime.manager.preflight(operations.len()).await;
    if let (true, Some(balance), Some(deficit)) = (preflight.has_deficit(), preflight.balance, preflight.deficit) {
        println!(
            "{} balance of {} is {} short of the {} operations in this batch",
            style("warning:").yellow().bold(),
            balance,
            deficit,
            preflight.required
        );
        if !confirm(args.yes, "Start anyway? The session will pause when the balance runs out")? {
            return Err(RunError::Aborted);
        }
    }

    let session_id = runtime
        .dispatcher
        .start_session(operations, runtime.resource.clone())
        .await?;
    println!("Dispatching session {} to {}", style(session_id).bold(), runtime.resource);

    let report = drive(&runtime.dispatcher).await?;
    print_report(&report);
    Ok(())
}

/// Continue the checkpointed session, optionally rebuilding its queue from remote state first.
pub async fn resume(config_path: Option<PathBuf>, validate: bool) -> Result<(), RunError> {
    let config = load(config_path)?;
    let Some(summary) = checkpoint_store(&config, false).peek().await else {
        println!("No resumable session.");
        return Ok(());
    };

    let runtime = Runtime::new(&config, summary.resource, false)?;
    let mode = if validate {
        ResumeMode::Validate
    } else {
        ResumeMode::Continue
    };

    match runtime.manager.rehydrate(mode).await? {
        None => println!("No resumable session."),
        Some(session_id) => {
            let remaining = runtime.dispatcher.status().await.queue_depth;
            println!(
                "Resuming session {} with {} operations remaining",
                style(session_id).bold(),
                remaining
            );
            let report = drive(&runtime.dispatcher).await?;
            print_report(&report);
        }
    }
    Ok(())
}

/// Compare the last session against remote state and queue whatever is missing.
pub async fn validate(config_path: Option<PathBuf>, send: bool) -> Result<(), RunError> {
    let config = load(config_path)?;
    let store = checkpoint_store(&config, false);
    let resource = match store.peek().await {
        Some(summary) => summary.resource,
        None => store
            .load_archived()
            .await
            .map(|session| session.resource)
            .unwrap_or_else(|| ResourceId::new(config.remote.resource.clone())),
    };

    let runtime = Runtime::new(&config, resource, false)?;
    let queued = match runtime.manager.validate_completed().await {
        Ok(queued) => queued,
        Err(SessionError::NothingToValidate) => {
            println!("No session to validate.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if queued == 0 {
        println!("{} remote state matches every operation", style("✓").green());
    } else {
        println!(
            "{} {} operations are not reflected remotely and were queued",
            style("!").yellow().bold(),
            queued
        );
        if !send {
            println!("Run 'gridcast resume' to send them.");
            return Ok(());
        }
    }

    // An empty correction pass completes at once and clears the checkpoint.
    let report = drive(&runtime.dispatcher).await?;
    if queued > 0 {
        print_report(&report);
    }
    Ok(())
}

pub async fn status(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config = load(config_path)?;
    let store = checkpoint_store(&config, false);

    match store.peek().await {
        None => println!("No checkpointed session."),
        Some(summary) => {
            let state = if summary.expired {
                style("expired").red()
            } else {
                style("resumable").green()
            };
            println!("Session    {} ({})", style(summary.session_id).bold(), state);
            println!("Resource   {}", summary.resource);
            println!("Saved      {}", summary.timestamp.to_rfc3339());
            println!("Completed  {} / {}", summary.completed, summary.original);
            println!("Remaining  {}", summary.remaining);
            println!("Errors     {}", summary.errors);
        }
    }

    if let Some(archived) = store.load_archived().await {
        println!(
            "Last completed session {} ({} operations, {} errors)",
            archived.session_id,
            archived.original_operations.len(),
            archived.error_count
        );
    }
    Ok(())
}

pub async fn clear(config_path: Option<PathBuf>, yes: bool) -> Result<(), RunError> {
    let config = load(config_path)?;
    let store = checkpoint_store(&config, false);

    let Some(summary) = store.peek().await else {
        println!("No checkpointed session.");
        return Ok(());
    };
    let prompt = format!(
        "Discard session {} with {} operations remaining?",
        summary.session_id, summary.remaining
    );
    if !confirm(yes, &prompt)? {
        return Err(RunError::Aborted);
    }
    store.clear().await;
    println!("Checkpoint cleared.");
    Ok(())
}

/// Run the loop until it stops on its own or Ctrl-C asks it to.
async fn drive(dispatcher: &Dispatcher) -> Result<RunReport, RunError> {
    let mut progress = dispatcher.subscribe();
    let run = dispatcher.run();
    tokio::pin!(run);

    loop {
        tokio::select! {
            result = &mut run => return Ok(result?),
            _ = signal::ctrl_c() => {
                warn!("Shutdown signal received, stopping after the in-flight send");
                dispatcher.stop().await;
                return Ok(run.await?);
            }
            Ok(()) = progress.changed() => {
                let update = progress.borrow_and_update().clone();
                if let Some(update) = update {
                    eprintln!(
                        "{} {}/{} sent, {} errors, {} remaining",
                        style("progress").cyan(),
                        update.completed,
                        update.original,
                        update.errors,
                        update.remaining
                    );
                }
            }
        }
    }
}

fn print_report(report: &RunReport) {
    let elapsed = format!("{:.1}s", report.elapsed.as_secs_f64());
    match report.outcome {
        StopReason::Completed => println!(
            "{} session {} complete: {} confirmed, {} errors, {} dropped in {}",
            style("✓").green(),
            report.session_id,
            report.completed,
            report.errors,
            report.dropped,
            elapsed
        ),
        StopReason::Cancelled => println!(
            "{} stopped with {} operations remaining; run 'gridcast resume' to continue",
            style("■").yellow(),
            report.remaining
        ),
        StopReason::InsufficientResource => println!(
            "{} out of resource with {} operations remaining; run 'gridcast resume' once replenished",
            style("✗").red(),
            report.remaining
        ),
    }
    if report.is_complete() && report.dropped > 0 {
        println!(
            "{} operations were dropped after failing; 'gridcast validate' will find any that did not land",
            report.dropped
        );
    }
}
