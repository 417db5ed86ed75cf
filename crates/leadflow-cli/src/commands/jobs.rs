//! The `jobs` command: inspect and requeue jobs.

use clap::{Args, Subcommand};
use leadflow_core::types::{JobId, JobStatus, TenantId};
use leadflow_core::Config;
use leadflow_engine::JobQueue;
use leadflow_store::Store;

/// Arguments for `leadflow jobs`.
#[derive(Debug, Args)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsCommand,
}

#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// List jobs, newest first.
    List {
        /// Limit to one tenant.
        #[arg(long)]
        tenant: Option<String>,

        /// Limit to one status (pending, running, succeeded, failed,
        /// dead_lettered).
        #[arg(long)]
        status: Option<String>,

        /// Maximum rows.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Requeue a dead-lettered job with a fresh attempt budget.
    Retry {
        /// Job ID.
        job_id: String,
    },
}

/// Execute `leadflow jobs`.
pub async fn run(config: Config, args: JobsArgs) -> anyhow::Result<()> {
    let store = Store::connect(&config.database.url).await?;
    let queue = JobQueue::new(store, config.queue.clone());

    match args.command {
        JobsCommand::List {
            tenant,
            status,
            limit,
        } => {
            let tenant = tenant.map(TenantId::new);
            let status = match status.as_deref() {
                None => None,
                Some(raw) => Some(
                    JobStatus::parse(raw)
                        .ok_or_else(|| anyhow::anyhow!("unknown status '{raw}'"))?,
                ),
            };

            let jobs = queue.list_jobs(tenant.as_ref(), status, limit).await?;
            if jobs.is_empty() {
                println!("no jobs");
                return Ok(());
            }
            for job in jobs {
                println!(
                    "{}  {:<13} {:<12} attempt {}/{} tenant {}  {}",
                    job.id,
                    job.status.as_str(),
                    job.kind.as_str(),
                    job.attempt,
                    job.max_attempts,
                    job.tenant_id,
                    job.last_error.as_deref().unwrap_or("-"),
                );
            }
        }
        JobsCommand::Retry { job_id } => {
            let job_id = JobId::from_string(job_id);
            if queue.requeue_dead_letter(&job_id).await? {
                println!("requeued {job_id}");
            } else {
                anyhow::bail!("job {job_id} is not dead-lettered");
            }
        }
    }

    Ok(())
}
