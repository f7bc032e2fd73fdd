//! `rollup validate` - did these lines make it into an uploaded file?

use anyhow::Result;
use clap::Args;
use rollup::operations::validation_report;

use super::error::HelpfulError;
use super::{parse_ids, Context};

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Comma-separated transaction line ids
    #[arg(long)]
    pub lines: String,

    /// Substring of the generated file name to look for
    #[arg(long, default_value = "PROMO")]
    pub file_pattern: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &Context, args: ValidateArgs) -> Result<()> {
    let line_ids = parse_ids(&args.lines)?;
    if line_ids.is_empty() {
        return Err(HelpfulError::new("No line ids given")
            .with_suggestion("TRY: rollup validate --lines 101,102")
            .into());
    }

    let rt = ctx.runtime()?;
    let report = rt.block_on(async {
        let db = ctx.open_db().await?;
        anyhow::Ok(validation_report(&db, &line_ids, &args.file_pattern).await?)
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if report.memberships.is_empty() {
            println!("No aggregation relations for lines {:?}", line_ids);
        }
        for membership in &report.memberships {
            println!(
                "aggregation {}: {} line(s)",
                membership.aggregation_id, membership.line_count
            );
        }
        match &report.latest_file {
            Some(file) => println!(
                "latest file {} ({}): uploaded={}",
                file.generated_file_name, file.kind, file.is_uploaded_to_s3
            ),
            None => println!("No generated file matches {:?}", args.file_pattern),
        }
    }

    if !report.is_complete() {
        return Err(HelpfulError::new("Validation failed")
            .with_context("lines are not aggregated or the latest file is not uploaded")
            .with_suggestion("TRY: rollup run --category <term>")
            .with_suggestion("TRY: rollup resume")
            .into());
    }
    Ok(())
}
