//! `rollup cleanup` - remove load-test data.
//!
//! Transactions are only deleted when their source reference id matches
//! `--source-pattern`; generated file details are only deleted when
//! `--files-pattern` is given.

use anyhow::Result;
use clap::Args;
use rollup::operations::cleanup;

use super::error::HelpfulError;
use super::{parse_ids, Context};

#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// Comma-separated transaction ids
    #[arg(long)]
    pub transactions: String,

    /// SQL LIKE pattern the source reference id must match, e.g. 'LOADTEST%'
    #[arg(long)]
    pub source_pattern: String,

    /// Also delete generated file details whose name contains this
    #[arg(long)]
    pub files_pattern: Option<String>,
}

pub fn run(ctx: &Context, args: CleanupArgs) -> Result<()> {
    let ids = parse_ids(&args.transactions)?;
    if ids.is_empty() && args.files_pattern.is_none() {
        return Err(HelpfulError::new("Nothing to clean up")
            .with_suggestion("TRY: rollup cleanup --transactions 1,2 --source-pattern 'LOADTEST%'")
            .into());
    }

    let rt = ctx.runtime()?;
    let report = rt.block_on(async {
        let db = ctx.open_db().await?;
        anyhow::Ok(cleanup(&db, &ids, &args.source_pattern, args.files_pattern.as_deref()).await?)
    })?;

    println!(
        "Deleted {} transaction(s), {} line(s), {} type-specific line(s), {} relation(s), {} file detail(s)",
        report.deleted.transactions,
        report.deleted.lines,
        report.deleted.type_specific_lines,
        report.deleted.relations,
        report.files_deleted
    );
    if report.deleted.transactions < ids.len() as u64 {
        println!(
            "{} id(s) skipped: missing or not matching {:?}",
            ids.len() as u64 - report.deleted.transactions,
            args.source_pattern
        );
    }
    Ok(())
}
