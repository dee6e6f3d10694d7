//! Mend CLI
//!
//! Automated GitHub issue fixing: analyze, patch, build, test, submit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mend::config::Config;
use mend::observe::TracingMonitor;
use mend::orchestrator::handlers::{create_issue_coordinator, RuntimeOptions};
use mend::orchestrator::scheduler::{OrchestratorFactory, SchedulerOptions};
use mend::orchestrator::workflow::WorkflowOptions;
use mend::orchestrator::{QueueStore, TaskScheduler, WorkflowInput, WorkflowOrchestrator};
use mend::{Error, Result};

#[derive(Parser)]
#[command(name = "mend")]
#[command(author, version, about = "Automated GitHub issue fixing")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fix workflow for a single issue
    Issue {
        /// Repository slug in the form owner/repo
        #[arg(long)]
        repo: String,

        /// Issue number
        #[arg(long)]
        issue: u64,

        /// Run without writing changes or executing commands
        #[arg(long)]
        dry_run: bool,

        /// Open a pull request after a successful run
        #[arg(long)]
        auto_pr: bool,

        /// Branch name to work on (default: fix/<owner>-<repo>-<issue>)
        #[arg(long)]
        branch: Option<String>,
    },

    /// Manage the persistent task queue
    Queue {
        #[command(subcommand)]
        action: QueueCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Enqueue an issue for later processing
    Add {
        /// Repository slug in the form owner/repo
        #[arg(long)]
        repo: String,

        /// Issue number
        #[arg(long)]
        issue: u64,

        /// Priority 1-10, higher runs first
        #[arg(long, default_value = "5")]
        priority: u8,
    },

    /// Process queued tasks until the queue drains
    Work {
        /// Run without writing changes or executing commands
        #[arg(long)]
        dry_run: bool,
    },

    /// Show queue contents
    Status,

    /// Drop all tasks and delete the snapshot
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load config
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Issue {
            repo,
            issue,
            dry_run,
            auto_pr,
            branch,
        } => {
            let (owner, repo) = parse_repo_slug(&repo)?;
            let branch = match branch {
                Some(name) => validate_branch_name(name)?,
                None => format!("fix/{owner}-{repo}-{issue}"),
            };
            let input = WorkflowInput {
                owner,
                repo,
                issue_number: issue,
            };
            run_issue(&config, input, &branch, RuntimeOptions { dry_run, auto_pr }).await?;
        }

        Commands::Queue { action } => match action {
            QueueCommands::Add {
                repo,
                issue,
                priority,
            } => {
                let (owner, repo) = parse_repo_slug(&repo)?;
                let scheduler = build_scheduler(&config, RuntimeOptions::default())?;
                let id = scheduler
                    .add(
                        WorkflowInput {
                            owner,
                            repo,
                            issue_number: issue,
                        },
                        priority,
                    )
                    .await?;
                println!("queued task {id}");
            }

            QueueCommands::Work { dry_run } => {
                let runtime = RuntimeOptions {
                    dry_run,
                    auto_pr: false,
                };
                run_queue(&config, runtime).await?;
            }

            QueueCommands::Status => {
                let store = QueueStore::new(config.queue.path.clone());
                let tasks = store.load().await?;
                if tasks.is_empty() {
                    println!("queue is empty");
                } else {
                    for task in tasks {
                        println!(
                            "{}  p{}  {:?}  {}/{}#{}",
                            task.id,
                            task.priority,
                            task.status,
                            task.workflow_input.owner,
                            task.workflow_input.repo,
                            task.workflow_input.issue_number,
                        );
                    }
                }
            }

            QueueCommands::Clear => {
                QueueStore::new(config.queue.path.clone()).clear().await?;
                println!("queue cleared");
            }
        },
    }

    Ok(())
}

/// Run one issue to completion in the foreground. Ctrl+C requests
/// cooperative cancellation; the in-flight stage settles first.
async fn run_issue(
    config: &Config,
    input: WorkflowInput,
    branch: &str,
    runtime: RuntimeOptions,
) -> Result<()> {
    info!(
        "starting issue workflow for {}/{}#{} on branch {branch}",
        input.owner, input.repo, input.issue_number
    );
    info!("dry_run: {}, auto_pr: {}", runtime.dry_run, runtime.auto_pr);

    let coordinator = create_issue_coordinator(config, runtime)?;
    let mut orchestrator = WorkflowOrchestrator::new(
        uuid::Uuid::new_v4().to_string(),
        coordinator,
        WorkflowOptions {
            max_iterations: config.workflow.max_iterations,
        },
        Arc::new(TracingMonitor),
    )?;

    let handle = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling workflow");
            handle.cancel();
        }
    });

    let result = orchestrator.run(input).await?;

    println!("run:       {}", result.run_id);
    println!("status:    {:?}", result.status);
    println!("state:     {}", result.final_state);
    println!("attempts:  {}", result.attempt);
    println!("duration:  {}ms", result.duration_ms);
    if let Some(submission) = &result.data.submission {
        println!("commit:    {}", submission.commit_message);
    }
    if let Some(error) = &result.error {
        println!("error:     [{}] {}", error.code, error.message);
        std::process::exit(1);
    }
    Ok(())
}

/// Start the scheduler and process tasks until the queue drains or the
/// user interrupts.
async fn run_queue(config: &Config, runtime: RuntimeOptions) -> Result<()> {
    let scheduler = build_scheduler(config, runtime)?;
    scheduler.start().await?;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let stats = scheduler.stats().await;
                if stats.pending == 0 && stats.running == 0 {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, cancelling running workflows");
                scheduler.pause();
                scheduler.cancel_all();
                break;
            }
        }
    }

    scheduler.stop().await?;

    let stats = scheduler.stats().await;
    println!(
        "done: {} completed, {} failed, {} pending",
        stats.completed, stats.failed, stats.pending
    );
    if stats.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn build_scheduler(config: &Config, runtime: RuntimeOptions) -> Result<TaskScheduler> {
    let store = QueueStore::new(config.queue.path.clone());
    let workflow = config.workflow.clone();

    let factory_config = config.clone();
    let factory: OrchestratorFactory = Box::new(move |task_id, _input| {
        let coordinator = create_issue_coordinator(&factory_config, runtime)?;
        WorkflowOrchestrator::new(
            task_id,
            coordinator,
            WorkflowOptions {
                max_iterations: factory_config.workflow.max_iterations,
            },
            Arc::new(TracingMonitor),
        )
    });

    Ok(TaskScheduler::new(
        store,
        factory,
        SchedulerOptions {
            max_concurrent: workflow.max_concurrent,
            poll_interval: Duration::from_millis(workflow.poll_interval_ms),
        },
        Arc::new(TracingMonitor),
    ))
}

fn validate_branch_name(name: String) -> Result<String> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'));
    if valid {
        Ok(name)
    } else {
        Err(Error::Config(format!("invalid branch name {name:?}")))
    }
}

fn parse_repo_slug(slug: &str) -> Result<(String, String)> {
    match slug.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(Error::Config(format!(
            "invalid repo slug {slug:?}, expected owner/repo"
        ))),
    }
}
