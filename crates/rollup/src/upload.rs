//! Upload tracker.
//!
//! `PENDING` (detail row recorded, flag false) → `UPLOADED` (flag true). The flag is
//! only set after the store reports success, and a failed put leaves the row pending
//! so the same bytes can be uploaded again later.

use rollup_db::{GeneratedFileDetail, NewGeneratedFile, RollupDb};
use rollup_sinks::{content_hash, ObjectStore};
use std::time::Instant;
use tracing::{info, warn};

use crate::emitter::EmittedFile;
use crate::error::{AggregationError, Result};
use crate::metrics::METRICS;

pub struct UploadTracker<'a> {
    db: &'a RollupDb,
    store: &'a dyn ObjectStore,
}

impl<'a> UploadTracker<'a> {
    pub fn new(db: &'a RollupDb, store: &'a dyn ObjectStore) -> Self {
        Self { db, store }
    }

    /// Record the file as pending, upload it, then flip its flag.
    ///
    /// Tracking a file that is already recorded with the same content reuses the
    /// existing row; if that row is already uploaded nothing is sent again.
    pub async fn track(
        &self,
        configuration_id: i64,
        file: &EmittedFile,
    ) -> Result<GeneratedFileDetail> {
        let detail = self
            .db
            .record_pending_file(&NewGeneratedFile {
                aggregation_configuration_id: configuration_id,
                aggregation_id: file.aggregation_id.clone(),
                file_name: file.file_name.clone(),
                kind: file.kind,
                content: file.bytes.clone(),
                content_hash: file.content_hash.clone(),
            })
            .await?;

        if detail.is_uploaded_to_s3 {
            info!(file_name = %detail.generated_file_name, "Already uploaded");
            return Ok(detail);
        }
        self.upload_pending(detail).await
    }

    /// Upload a pending detail's stored content and mark it uploaded.
    pub async fn upload_pending(
        &self,
        mut detail: GeneratedFileDetail,
    ) -> Result<GeneratedFileDetail> {
        let file_name = detail.generated_file_name.clone();

        if content_hash(&detail.file_content) != detail.content_hash {
            return Err(AggregationError::Database(rollup_db::DbError::invalid_state(
                format!("stored content of {} does not match its hash", file_name),
            )));
        }

        let start = Instant::now();
        let put = self.store.put(&file_name, &detail.file_content).await;
        METRICS.record_upload_time(start);

        if let Err(source) = put {
            METRICS.inc_upload_failures();
            warn!(
                file_name = %file_name,
                location = %self.store.location(),
                error = %source,
                "Upload failed; file left pending"
            );
            return Err(AggregationError::Upload { file_name, source });
        }

        self.db.mark_file_uploaded(&file_name).await?;
        METRICS.inc_files_uploaded();
        info!(
            file_name = %file_name,
            kind = detail.kind.as_str(),
            bytes = detail.file_content.len(),
            "File uploaded"
        );

        detail.is_uploaded_to_s3 = true;
        Ok(detail)
    }
}
