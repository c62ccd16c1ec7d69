//! CLI parser and command dispatch.

mod init;
mod queue_cmd;
mod submit;
mod watchdog_cmd;
mod worker_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "newsmill")]
#[command(about = "Content ingestion and summarization pipeline")]
#[command(version)]
pub struct Cli {
    /// Target directory or database file (overrides config file).
    #[arg(long, short = 't', global = true)]
    target: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Run the sequential task worker until SIGTERM
    Worker {
        /// Queue partition to pull from (content, transcribe, onboarding, chat)
        #[arg(short, long)]
        queue: Option<String>,
        /// Only process one task type
        #[arg(long)]
        task_type: Option<String>,
        /// Process N tasks then exit
        #[arg(long)]
        max_tasks: Option<u64>,
        /// Worker id (default: hostname-pid)
        #[arg(long)]
        worker_id: Option<String>,
    },

    /// Recover stale queue state, one-shot or as a daemon
    Watchdog {
        /// Run continuously with a sleep between cycles
        #[arg(long)]
        r#loop: bool,
        /// Loop interval in seconds (min 30)
        #[arg(long, default_value = "300")]
        interval_seconds: u64,
        /// Preview only; no writes
        #[arg(long)]
        dry_run: bool,
        /// Cap rows touched per action
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Inspect and manage task queue state
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Submit a URL for ingestion
    Submit {
        url: String,
        /// Subscribe to the page's feed instead of processing it
        #[arg(long)]
        subscribe_feed: bool,
        /// Analysis instruction for link extraction
        #[arg(long)]
        instruction: Option<String>,
        /// Create content rows for links the instruction extracts
        #[arg(long)]
        crawl_links: bool,
    },

    /// Enqueue a scrape task for the given sources (default: all)
    Scrape {
        sources: Vec<String>,
    },

    /// Delete old completed tasks
    Cleanup {
        /// Age threshold in days
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show queue counts and stale samples
    Status,
    /// Delete pending tasks
    Clear {
        /// Restrict to one queue partition
        #[arg(long)]
        queue: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Requeue stale processing tasks now
    RequeueStale {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Move misqueued transcribe tasks back to their queue
    MoveTranscribe {
        #[arg(long)]
        dry_run: bool,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref(), cli.target.as_deref())?;

    match cli.command {
        Commands::Init => init::cmd_init(settings),
        Commands::Worker {
            queue,
            task_type,
            max_tasks,
            worker_id,
        } => worker_cmd::cmd_worker(settings, queue, task_type, max_tasks, worker_id).await,
        Commands::Watchdog {
            r#loop: loop_mode,
            interval_seconds,
            dry_run,
            limit,
        } => watchdog_cmd::cmd_watchdog(settings, loop_mode, interval_seconds, dry_run, limit).await,
        Commands::Queue { command } => match command {
            QueueCommands::Status => queue_cmd::cmd_status(settings),
            QueueCommands::Clear { queue, yes } => queue_cmd::cmd_clear(settings, queue, yes),
            QueueCommands::RequeueStale { dry_run, limit } => {
                queue_cmd::cmd_requeue_stale(settings, dry_run, limit).await
            }
            QueueCommands::MoveTranscribe { dry_run } => {
                queue_cmd::cmd_move_transcribe(settings, dry_run).await
            }
        },
        Commands::Submit {
            url,
            subscribe_feed,
            instruction,
            crawl_links,
        } => submit::cmd_submit(settings, url, subscribe_feed, instruction, crawl_links),
        Commands::Scrape { sources } => submit::cmd_scrape(settings, sources),
        Commands::Cleanup { days } => queue_cmd::cmd_cleanup(settings, days),
    }
}
