//! `rollup verify-config` - is there an active configuration for a prefix?

use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use rollup::operations::format_status_report;
use rollup::AggregationError;

use super::error::HelpfulError;
use super::{as_of_or_today, Context};

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Prefix search term, e.g. PROMO
    #[arg(long)]
    pub prefix: String,

    /// Date to check (YYYY-MM-DD), default today
    #[arg(long)]
    pub as_of: Option<NaiveDate>,
}

pub fn run(ctx: &Context, args: VerifyArgs) -> Result<()> {
    let as_of = as_of_or_today(args.as_of);
    let rt = ctx.runtime()?;

    let resolved = rt.block_on(async {
        let db = ctx.open_db().await?;
        anyhow::Ok(ctx.resolver().resolve(&db, &args.prefix, as_of).await)
    })?;

    match resolved {
        Ok(resolved) => {
            let config = &resolved.config;
            println!(
                "{} (id {}) is active on {}",
                config.file_name_prefix, config.aggregation_configuration_id, as_of
            );
            println!(
                "  window: {} .. {}",
                config.start_date,
                config
                    .end_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "open".to_string())
            );
            println!(
                "  delimiter: {:?}, quoted: {}",
                resolved.format.delimiter(),
                resolved.format.quote_all()
            );
            if !config.group_key_columns.is_empty() {
                println!("  group key: {}", config.group_key_columns.join(", "));
            }
            Ok(())
        }
        Err(AggregationError::ConfigNotFound { report, .. }) => {
            println!("{}", format_status_report(&report));
            Err(HelpfulError::new(format!(
                "No active configuration matches {:?} on {}",
                args.prefix, as_of
            ))
            .with_context(format!(
                "Allow-listed prefixes: {}",
                ctx.settings.resolver.allowed_prefixes.join(", ")
            ))
            .into())
        }
        Err(err) => Err(HelpfulError::new("Configuration check failed")
            .with_context(err.to_string())
            .into()),
    }
}
