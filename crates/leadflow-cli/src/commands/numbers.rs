//! The `numbers` command: inspect and reset sending numbers.

use clap::{Args, Subcommand};
use leadflow_core::types::{PhoneNumber, TenantId};
use leadflow_core::Config;
use leadflow_engine::RateGovernor;
use leadflow_store::Store;

/// Arguments for `leadflow numbers`.
#[derive(Debug, Args)]
pub struct NumbersArgs {
    #[command(subcommand)]
    pub command: NumbersCommand,
}

#[derive(Debug, Subcommand)]
pub enum NumbersCommand {
    /// Show warm-up state and remaining allowance for a tenant's numbers.
    List {
        /// Tenant ID.
        tenant: String,
    },

    /// Reset a (typically suspended) number to a fresh warm-up.
    Reset {
        /// Tenant ID.
        tenant: String,

        /// Sending number.
        from_number: String,
    },
}

/// Execute `leadflow numbers`.
pub async fn run(config: Config, args: NumbersArgs) -> anyhow::Result<()> {
    let store = Store::connect(&config.database.url).await?;
    let governor = RateGovernor::new(store, config.warmup.clone());

    match args.command {
        NumbersCommand::List { tenant } => {
            let tenant = TenantId::new(tenant);
            let numbers = governor.number_status(&tenant).await?;
            if numbers.is_empty() {
                println!("no sending numbers for tenant {tenant}");
                return Ok(());
            }
            for number in numbers {
                println!(
                    "{}  {:<11} {}/{} sent today ({} remaining), {} failures, {} strikes",
                    number.from_number,
                    number.warmup_state.as_str(),
                    number.sent_today,
                    number.daily_limit,
                    number.remaining_today(),
                    number.failures_today,
                    number.throttle_strikes,
                );
            }
        }
        NumbersCommand::Reset {
            tenant,
            from_number,
        } => {
            let tenant = TenantId::new(tenant);
            let from_number = PhoneNumber::new(from_number);
            if governor.reset_number(&tenant, &from_number).await? {
                println!("reset {from_number} to warming_up");
            } else {
                anyhow::bail!("unknown number {from_number} for tenant {tenant}");
            }
        }
    }

    Ok(())
}
