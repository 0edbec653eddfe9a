//! Command-line utility for operating a Bulkmail queue
//!
//! Works directly against the configured store, so it can be run alongside
//! the daemon:
//! - Enqueue a campaign from a RON file
//! - Run a single dispatch cycle or cleanup sweep
//! - Inspect and cancel jobs
//! - Query the send log

#![allow(clippy::items_after_statements, clippy::single_match_else)]

use std::path::PathBuf;

use anyhow::Context;
use bulkmail::{config, controller::Bulkmail};
use bulkmail_common::{audit, logging};
use bulkmail_dispatch::{Campaign, Dispatcher};
use bulkmail_queue::{JobFilter, JobId, JobStatus, QueueJob, SendLogEntry, SendLogFilter, SendOutcome};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use ron::ser::PrettyConfig;

/// Command-line utility for operating a Bulkmail queue
#[derive(Parser, Debug)]
#[command(name = "bulkmailctl")]
#[command(about = "Operate the Bulkmail dispatch queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (defaults to the daemon's search order)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enqueue a campaign described in a RON file
    Enqueue {
        /// Campaign file
        campaign: PathBuf,
    },
    /// Run one dispatch cycle now
    Dispatch,
    /// Purge old terminal jobs and send log entries
    Sweep,
    /// Cancel a pending job
    Cancel {
        /// Job ID to cancel
        job_id: String,
    },
    /// List jobs in the queue
    Jobs {
        /// Filter by status
        #[arg(long)]
        status: Option<JobStatus>,

        /// Filter by campaign type
        #[arg(long)]
        campaign: Option<String>,

        /// Maximum number of jobs to show
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Query the send log
    Log {
        /// Entries recorded at or after this time (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Entries recorded before this time (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        #[arg(long)]
        outcome: Option<SendOutcome>,

        /// Only entries for this job
        #[arg(long)]
        job: Option<String>,

        #[arg(long)]
        campaign: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Show job counts per status
    Stats,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Ron,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => config::find_config_file()?,
    };
    let bulkmail: Bulkmail = config::load(&path)?;

    if matches!(cli.command, Commands::Dispatch | Commands::Sweep) {
        logging::init();
    }
    audit::init(bulkmail.audit.clone());

    let dispatcher = bulkmail.dispatcher()?;

    match cli.command {
        Commands::Enqueue { campaign } => cmd_enqueue(&dispatcher, &campaign).await?,
        Commands::Dispatch => {
            let summary = dispatcher.run_dispatch_cycle().await?;
            println!("Sent: {}", summary.sent_count);
            println!("Failed: {}", summary.failed_count);
            println!("Retried: {}", summary.retried_count);
            println!("Remaining: {}", summary.remaining_count);
            println!("Reclaimed: {}", summary.reclaimed);
            println!("Released: {}", summary.released);
            println!("Stopped: {} after {} batch(es)", summary.stopped, summary.batches);
        }
        Commands::Sweep => {
            let summary = dispatcher.sweep().await?;
            println!("Jobs purged: {}", summary.jobs_purged);
            println!("Log entries purged: {}", summary.log_entries_purged);
        }
        Commands::Cancel { job_id } => {
            let id = parse_job_id(&job_id)?;
            if dispatcher.cancel_job(&id).await? {
                println!("Cancelled {id}");
            } else {
                anyhow::bail!("Job {id} is not pending and was left unchanged");
            }
        }
        Commands::Jobs {
            status,
            campaign,
            limit,
            format,
        } => {
            let filter = JobFilter {
                status,
                campaign_type: campaign,
                limit,
            };
            print_jobs(&dispatcher.jobs(&filter).await?, format)?;
        }
        Commands::Log {
            since,
            until,
            outcome,
            job,
            campaign,
            limit,
            format,
        } => {
            let filter = SendLogFilter {
                since,
                until,
                outcome,
                job_id: job.as_deref().map(parse_job_id).transpose()?,
                campaign_type: campaign,
                limit,
            };
            print_log(&dispatcher.get_send_log(&filter).await?, format)?;
        }
        Commands::Stats => {
            let stats = dispatcher.stats().await?;
            println!("Pending:    {}", stats.pending);
            println!("Processing: {}", stats.processing);
            println!("Sent:       {}", stats.sent);
            println!("Failed:     {}", stats.failed);
            println!("Cancelled:  {}", stats.cancelled);
            println!("{}", "-".repeat(20));
            println!("Total:      {}", stats.total());
        }
    }

    Ok(())
}

async fn cmd_enqueue(dispatcher: &Dispatcher, path: &std::path::Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read campaign from {}", path.display()))?;
    let campaign: Campaign = ron::from_str(&content)
        .with_context(|| format!("Invalid campaign in {}", path.display()))?;

    let ids = dispatcher.enqueue_campaign(campaign).await?;
    for id in &ids {
        println!("{id}");
    }
    println!("\nEnqueued {} job(s)", ids.len());

    Ok(())
}

fn parse_job_id(id: &str) -> anyhow::Result<JobId> {
    id.parse()
        .map_err(|e| anyhow::anyhow!("Invalid job ID '{id}': {e}"))
}

fn print_jobs(jobs: &[QueueJob], format: Format) -> anyhow::Result<()> {
    match format {
        Format::Ron => println!("{}", ron::ser::to_string_pretty(jobs, PrettyConfig::default())?),
        Format::Text => {
            println!(
                "{:<28} {:<11} {:<8} {:<20} {:<30}",
                "JOB ID", "STATUS", "ATTEMPTS", "SCHEDULED", "RECIPIENT"
            );
            println!("{}", "-".repeat(100));

            for job in jobs {
                println!(
                    "{:<28} {:<11} {:<8} {:<20} {:<30}",
                    job.id.to_string(),
                    job.status.as_str(),
                    format!("{}/{}", job.attempts, job.max_attempts),
                    job.scheduled_for.format("%Y-%m-%d %H:%M:%S"),
                    job.recipient_email
                );
                if let Some(ref error) = job.error_message {
                    println!("{:<28} Error: {error}", "");
                }
            }

            println!("\nTotal: {} job(s)", jobs.len());
        }
    }

    Ok(())
}

fn print_log(entries: &[SendLogEntry], format: Format) -> anyhow::Result<()> {
    match format {
        Format::Ron => println!(
            "{}",
            ron::ser::to_string_pretty(entries, PrettyConfig::default())?
        ),
        Format::Text => {
            println!(
                "{:<20} {:<28} {:<7} {:<30}",
                "RECORDED", "JOB ID", "OUTCOME", "RECIPIENT"
            );
            println!("{}", "-".repeat(90));

            for entry in entries {
                println!(
                    "{:<20} {:<28} {:<7} {:<30}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.job_id.to_string(),
                    entry.outcome.as_str(),
                    entry.recipient_email
                );
                if let Some(ref error) = entry.error {
                    println!("{:<20} Error: {error}", "");
                }
            }

            println!("\nTotal: {} entries", entries.len());
        }
    }

    Ok(())
}
