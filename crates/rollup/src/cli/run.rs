//! `rollup run` and `rollup resume`.
//!
//! ```bash
//! rollup run                        # every current configuration
//! rollup run --category PROMO       # one configuration
//! rollup resume --aggregation-id 5f0c...
//! ```

use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use rollup::{AggregationError, ResumeReport, ResumedGroup, RunOutcome};
use rollup_ids::AggregationId;

use super::error::HelpfulError;
use super::{as_of_or_today, Context};
use rollup::operations::format_status_report;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Prefix search term; omit to run every current configuration
    #[arg(long)]
    pub category: Option<String>,

    /// Run date (YYYY-MM-DD), default today
    #[arg(long)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Args)]
pub struct ResumeArgs {
    /// Resume one group instead of all stalled work
    #[arg(long)]
    pub aggregation_id: Option<AggregationId>,
}

pub fn run(ctx: &Context, args: RunArgs) -> Result<()> {
    let as_of = as_of_or_today(args.as_of);
    let rt = ctx.runtime()?;

    let report = rt.block_on(async {
        let db = ctx.open_db().await?;
        let pipeline = ctx.pipeline(db)?;
        anyhow::Ok(pipeline.execute(args.category.as_deref(), as_of).await?)
    })?;

    print_resume(&report.resume);
    if report.outcomes.is_empty() {
        println!("No current configurations on {}", as_of);
    }
    for outcome in &report.outcomes {
        println!("{}", outcome);
        if let RunOutcome::Aborted {
            cause: AggregationError::ConfigNotFound { report, .. },
            ..
        } = outcome
        {
            println!("{}", format_status_report(report));
        }
    }

    if report.has_failures() {
        let failed: Vec<String> = report
            .outcomes
            .iter()
            .filter(|o| o.is_failure())
            .map(|o| o.to_string())
            .collect();
        return Err(HelpfulError::new("Run did not complete")
            .with_context(if failed.is_empty() {
                "stalled work could not be resumed".to_string()
            } else {
                failed.join("; ")
            })
            .with_suggestion("TRY: rollup resume   # retry stalled uploads")
            .with_suggestion("TRY: rollup verify-config --prefix <term>")
            .into());
    }
    Ok(())
}

pub fn resume(ctx: &Context, args: ResumeArgs) -> Result<()> {
    let rt = ctx.runtime()?;

    rt.block_on(async {
        let db = ctx.open_db().await?;
        let pipeline = ctx.pipeline(db)?;

        match args.aggregation_id {
            Some(id) => match pipeline.resume_group(&id).await? {
                ResumedGroup::Filed(detail) => {
                    println!("{}: uploaded", detail.generated_file_name)
                }
                ResumedGroup::AlreadyFiled(detail) => {
                    println!("{}: already uploaded", detail.generated_file_name)
                }
                ResumedGroup::Dissolved => println!("{}: no members left, group removed", id),
            },
            None => {
                let report = pipeline.resume_stalled().await?;
                print_resume(&report);
                if !report.is_clean() {
                    return Err(anyhow::Error::from(
                        HelpfulError::new("Some stalled work is still pending")
                            .with_context(report.failures.join("; ")),
                    ));
                }
            }
        }
        anyhow::Ok(())
    })
}

fn print_resume(report: &ResumeReport) {
    if report.groups_filed + report.groups_dissolved + report.control_files_uploaded == 0
        && report.is_clean()
    {
        return;
    }
    println!(
        "Resumed: {} group(s) filed, {} dissolved, {} control file(s) uploaded",
        report.groups_filed, report.groups_dissolved, report.control_files_uploaded
    );
    for failure in &report.failures {
        println!("  still stalled: {}", failure);
    }
}
