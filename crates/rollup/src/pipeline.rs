//! Aggregation pipeline: resolve → select → claim → emit → upload.
//!
//! Nothing durable happens before a group is claimed. After the claim, a group is
//! either filed (data file uploaded) or reported as stalled; [`Pipeline::resume_stalled`]
//! finishes stalled groups from their stored rows without selecting again.

use chrono::NaiveDate;
use rollup_db::{
    AggregationGroup, DbError, FileKind, GeneratedFileDetail, GroupMember, NewSequencedFile,
    RollupDb,
};
use rollup_ids::AggregationId;
use rollup_sinks::{control_file_name, control_name_prefix, DelimitedFormat, ObjectStore};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::emitter::{ControlEntry, FileEmitter};
use crate::engine::{ControlSummary, QueryEngine};
use crate::error::{AggregationError, Result};
use crate::lineage::LineageRecorder;
use crate::metrics::METRICS;
use crate::resolver::{ConfigurationResolver, ResolvedConfiguration};
use crate::upload::UploadTracker;

const DEFAULT_MAX_CLAIM_ATTEMPTS: u32 = 3;

/// What one configuration's run ended with.
#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        prefix: String,
        groups: usize,
        files: Vec<String>,
    },
    NoEligibleData {
        prefix: String,
    },
    /// Nothing was claimed, or claiming could not finish.
    Aborted {
        search: String,
        cause: AggregationError,
    },
    /// Groups were claimed but at least one file is not uploaded yet.
    Stalled {
        prefix: String,
        aggregation_ids: Vec<AggregationId>,
        cause: AggregationError,
    },
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Stalled { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::NoEligibleData { .. } => "completed_no_data",
            Self::Aborted { .. } => "aborted",
            Self::Stalled { .. } => "stalled",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed {
                prefix,
                groups,
                files,
            } => write!(
                f,
                "{}: completed with {} group(s), {} file(s)",
                prefix,
                groups,
                files.len()
            ),
            Self::NoEligibleData { prefix } => {
                write!(f, "{}: completed, zero eligible data", prefix)
            }
            Self::Aborted { search, cause } => {
                write!(f, "{}: aborted ({}): {}", search, cause.kind(), cause)
            }
            Self::Stalled {
                prefix,
                aggregation_ids,
                cause,
            } => write!(
                f,
                "{}: stalled awaiting resumption, {} group(s) unfiled: {}",
                prefix,
                aggregation_ids.len(),
                cause
            ),
        }
    }
}

/// What resuming one group did.
#[derive(Debug)]
pub enum ResumedGroup {
    Filed(GeneratedFileDetail),
    AlreadyFiled(GeneratedFileDetail),
    /// Every member was deleted; the group is gone.
    Dissolved,
}

#[derive(Debug, Default)]
pub struct ResumeReport {
    pub groups_filed: usize,
    pub groups_dissolved: usize,
    pub control_files_uploaded: usize,
    /// `file name: error` for everything still stalled.
    pub failures: Vec<String>,
}

impl ResumeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resume report plus one outcome per configuration run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub resume: ResumeReport,
    pub outcomes: Vec<RunOutcome>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.resume.is_clean() || self.outcomes.iter().any(RunOutcome::is_failure)
    }
}

#[derive(Clone)]
pub struct Pipeline {
    db: RollupDb,
    store: Arc<dyn ObjectStore>,
    resolver: ConfigurationResolver,
    max_claim_attempts: u32,
}

impl Pipeline {
    pub fn new(db: RollupDb, store: Arc<dyn ObjectStore>, resolver: ConfigurationResolver) -> Self {
        Self {
            db,
            store,
            resolver,
            max_claim_attempts: DEFAULT_MAX_CLAIM_ATTEMPTS,
        }
    }

    pub fn with_max_claim_attempts(mut self, attempts: u32) -> Self {
        self.max_claim_attempts = attempts.max(1);
        self
    }

    pub fn db(&self) -> &RollupDb {
        &self.db
    }

    pub fn resolver(&self) -> &ConfigurationResolver {
        &self.resolver
    }

    /// Resume stalled work, then run one configuration (`category`) or all current ones.
    pub async fn execute(&self, category: Option<&str>, as_of: NaiveDate) -> Result<RunReport> {
        let resume = self.resume_stalled().await?;
        let outcomes = match category {
            Some(search) => vec![self.run(search, as_of).await],
            None => self.run_all(as_of).await?,
        };
        Ok(RunReport { resume, outcomes })
    }

    /// Run the configuration that `search` resolves to.
    pub async fn run(&self, search: &str, as_of: NaiveDate) -> RunOutcome {
        match self.resolver.resolve(&self.db, search, as_of).await {
            Ok(resolved) => self.run_resolved(search, &resolved, as_of).await,
            Err(cause) => aborted(search, cause),
        }
    }

    /// Run every allow-listed prefix with an active configuration, each as its own task.
    pub async fn run_all(&self, as_of: NaiveDate) -> Result<Vec<RunOutcome>> {
        let prefixes = self.resolver.active_prefixes(&self.db, as_of).await?;
        if prefixes.is_empty() {
            warn!(%as_of, "No active allow-listed configurations");
            return Ok(Vec::new());
        }
        info!(%as_of, count = prefixes.len(), "Running current configurations");

        let mut handles = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            let pipeline = self.clone();
            handles.push(tokio::spawn(async move {
                pipeline.run_prefix(&prefix, as_of).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(error = %err, "Configuration run task failed"),
            }
        }
        Ok(outcomes)
    }

    /// Resolve among configurations with exactly this prefix.
    async fn run_prefix(&self, prefix: &str, as_of: NaiveDate) -> RunOutcome {
        let configs = match self.db.list_configurations().await {
            Ok(configs) => configs,
            Err(err) => return aborted(prefix, err.into()),
        };
        let exact: Vec<_> = configs
            .into_iter()
            .filter(|c| c.file_name_prefix == prefix)
            .collect();
        match self.resolver.select(&exact, prefix, as_of) {
            Ok(resolved) => self.run_resolved(prefix, &resolved, as_of).await,
            Err(cause) => aborted(prefix, cause),
        }
    }

    async fn run_resolved(
        &self,
        search: &str,
        resolved: &ResolvedConfiguration,
        run_date: NaiveDate,
    ) -> RunOutcome {
        METRICS.inc_configurations_processed();
        let prefix = resolved.prefix().to_string();
        let engine = QueryEngine::new(&self.db);
        let recorder = LineageRecorder::new(&self.db);

        let mut claimed: Vec<(AggregationGroup, Vec<GroupMember>)> = Vec::new();
        let mut control: Option<ControlSummary> = None;
        let mut claim_failure: Option<AggregationError> = None;

        for attempt in 1..=self.max_claim_attempts {
            let plan = match engine.plan(&resolved.config).await {
                Ok(plan) => plan,
                Err(cause) => {
                    claim_failure = Some(cause);
                    break;
                }
            };
            if control.is_none() {
                control = plan.control.clone();
            }

            claim_failure = None;
            for group in &plan.groups {
                match recorder.record(resolved, run_date, &plan.columns, group).await {
                    Ok(stored) => claimed.push((stored, group.members.clone())),
                    Err(cause) => {
                        claim_failure = Some(cause);
                        break;
                    }
                }
            }

            match &claim_failure {
                Some(AggregationError::DuplicateAggregationClaim { .. })
                    if attempt < self.max_claim_attempts =>
                {
                    info!(prefix = %prefix, attempt, "Selecting again after losing a claim");
                }
                _ => break,
            }
        }

        if claimed.is_empty() {
            return match claim_failure {
                Some(cause) => aborted(search, cause),
                None => {
                    info!(prefix = %prefix, "Completed, zero eligible data");
                    RunOutcome::NoEligibleData { prefix }
                }
            };
        }

        // Claimed groups are filed even if a later attempt failed.
        let emitter = FileEmitter::new(resolved.format);
        let tracker = UploadTracker::new(&self.db, self.store.as_ref());
        let config_id = resolved.config.aggregation_configuration_id;

        let mut files = Vec::with_capacity(claimed.len() + 1);
        let mut entries = Vec::with_capacity(claimed.len());
        let mut stalled = Vec::new();
        let mut stall_cause: Option<AggregationError> = None;

        for (group, members) in &claimed {
            entries.push(ControlEntry {
                file_name: group.file_name.clone(),
                row_count: members.len(),
            });
            match self.file_group(&emitter, &tracker, config_id, group, members).await {
                Ok(detail) => files.push(detail.generated_file_name),
                Err(cause) => {
                    error!(
                        prefix = %prefix,
                        aggregation_id = %group.aggregation_id,
                        file_name = %group.file_name,
                        error = %cause,
                        "Group stalled"
                    );
                    stalled.push(group.aggregation_id.clone());
                    stall_cause.get_or_insert(cause);
                }
            }
        }

        if let Some(summary) = control.filter(|_| has_control_query(resolved)) {
            let upload_now = stalled.is_empty();
            match self
                .emit_control(
                    &emitter,
                    &tracker,
                    &prefix,
                    config_id,
                    run_date,
                    &entries,
                    &summary,
                    upload_now,
                )
                .await
            {
                Ok(Some(name)) => files.push(name),
                Ok(None) => {}
                Err(cause) => {
                    error!(prefix = %prefix, error = %cause, "Control file stalled");
                    stall_cause.get_or_insert(cause);
                }
            }
        }

        if let Some(cause) = stall_cause {
            return RunOutcome::Stalled {
                prefix,
                aggregation_ids: stalled,
                cause,
            };
        }
        if let Some(cause) = claim_failure {
            warn!(
                prefix = %prefix,
                groups = claimed.len(),
                "Claimed groups filed, but claiming did not finish"
            );
            return aborted(search, cause);
        }

        info!(prefix = %prefix, groups = claimed.len(), files = files.len(), "Run completed");
        RunOutcome::Completed {
            prefix,
            groups: claimed.len(),
            files,
        }
    }

    async fn file_group(
        &self,
        emitter: &FileEmitter,
        tracker: &UploadTracker<'_>,
        config_id: i64,
        group: &AggregationGroup,
        members: &[GroupMember],
    ) -> Result<GeneratedFileDetail> {
        let emitted = emitter.emit_group(group, members)?;
        METRICS.inc_files_generated();
        tracker.track(config_id, &emitted).await
    }

    /// Record the control file; upload it only once every data file is uploaded.
    ///
    /// The detail is recorded before any upload, so a failed put leaves it pending for
    /// [`Pipeline::resume_stalled`].
    #[allow(clippy::too_many_arguments)]
    async fn emit_control(
        &self,
        emitter: &FileEmitter,
        tracker: &UploadTracker<'_>,
        prefix: &str,
        config_id: i64,
        run_date: NaiveDate,
        entries: &[ControlEntry],
        summary: &ControlSummary,
        upload_now: bool,
    ) -> Result<Option<String>> {
        let name_prefix = control_name_prefix(prefix, run_date);
        let emitted = emitter.emit_control(&name_prefix, entries, summary)?;
        METRICS.inc_control_files_generated();

        let detail = self
            .db
            .record_sequenced_file(
                &NewSequencedFile {
                    aggregation_configuration_id: config_id,
                    name_prefix,
                    kind: FileKind::Control,
                    content: emitted.bytes,
                    content_hash: emitted.content_hash,
                },
                |sequence| control_file_name(prefix, run_date, sequence),
            )
            .await?;
        let file_name = detail.generated_file_name.clone();

        if !upload_now {
            info!(file_name = %file_name, "Control file held until data files are uploaded");
            return Ok(None);
        }
        tracker.upload_pending(detail).await?;
        Ok(Some(file_name))
    }

    /// Finish every stalled group, then upload held control files.
    pub async fn resume_stalled(&self) -> Result<ResumeReport> {
        let mut report = ResumeReport::default();
        let mut blocked_configs = HashSet::new();

        let groups = self.db.list_unfiled_groups().await?;
        if !groups.is_empty() {
            info!(count = groups.len(), "Resuming stalled groups");
        }
        for group in groups {
            match self.resume_group(&group.aggregation_id).await {
                Ok(ResumedGroup::Filed(_)) => report.groups_filed += 1,
                Ok(ResumedGroup::AlreadyFiled(_)) => {}
                Ok(ResumedGroup::Dissolved) => report.groups_dissolved += 1,
                Err(err) => {
                    blocked_configs.insert(group.aggregation_configuration_id);
                    report.failures.push(format!("{}: {}", group.file_name, err));
                }
            }
        }

        let tracker = UploadTracker::new(&self.db, self.store.as_ref());
        for detail in self.db.list_files_pending_upload().await? {
            if detail.kind != FileKind::Control
                || blocked_configs.contains(&detail.aggregation_configuration_id)
            {
                continue;
            }
            let name = detail.generated_file_name.clone();
            match tracker.upload_pending(detail).await {
                Ok(_) => report.control_files_uploaded += 1,
                Err(err) => report.failures.push(format!("{}: {}", name, err)),
            }
        }

        if report.groups_filed + report.groups_dissolved + report.control_files_uploaded > 0
            || !report.failures.is_empty()
        {
            info!(
                groups_filed = report.groups_filed,
                groups_dissolved = report.groups_dissolved,
                control_files = report.control_files_uploaded,
                failures = report.failures.len(),
                "Resume finished"
            );
        }
        Ok(report)
    }

    /// Emit and upload one claimed group from its stored rows.
    ///
    /// Uses the recorded file bytes when a detail already exists, so a retry uploads
    /// exactly what was produced the first time.
    pub async fn resume_group(&self, aggregation_id: &AggregationId) -> Result<ResumedGroup> {
        let group = self
            .db
            .get_group(aggregation_id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("aggregation group {}", aggregation_id)))?;
        let tracker = UploadTracker::new(&self.db, self.store.as_ref());

        if let Some(detail) = self.db.file_for_group(aggregation_id).await? {
            if detail.is_uploaded_to_s3 {
                return Ok(ResumedGroup::AlreadyFiled(detail));
            }
            return tracker.upload_pending(detail).await.map(ResumedGroup::Filed);
        }

        let members = self.db.group_members(aggregation_id).await?;
        if members.is_empty() {
            self.db.dissolve_empty_group(aggregation_id).await?;
            warn!(
                aggregation_id = %aggregation_id,
                file_name = %group.file_name,
                "Dissolved group with no members"
            );
            return Ok(ResumedGroup::Dissolved);
        }

        let config = self
            .db
            .get_configuration(group.aggregation_configuration_id)
            .await?
            .ok_or_else(|| {
                DbError::not_found(format!(
                    "aggregation configuration {}",
                    group.aggregation_configuration_id
                ))
            })?;
        let format = DelimitedFormat::new(&config.file_delimiter, config.is_data_quotes_surrounded)
            .map_err(|e| {
                AggregationError::config_invalid(format!("{}: {}", config.file_name_prefix, e))
            })?;

        let detail = self
            .file_group(
                &FileEmitter::new(format),
                &tracker,
                config.aggregation_configuration_id,
                &group,
                &members,
            )
            .await?;
        Ok(ResumedGroup::Filed(detail))
    }
}

fn has_control_query(resolved: &ResolvedConfiguration) -> bool {
    resolved
        .config
        .data_control_query
        .as_deref()
        .is_some_and(|q| !q.trim().is_empty())
}

fn aborted(search: &str, cause: AggregationError) -> RunOutcome {
    warn!(search, kind = cause.kind(), error = %cause, "Run aborted");
    RunOutcome::Aborted {
        search: search.to_string(),
        cause,
    }
}
