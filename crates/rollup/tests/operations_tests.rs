//! Operational checks: configuration lookup, validation and cleanup.

mod common;

use common::*;
use rollup::operations::{
    cleanup, format_status_report, has_active_configuration, is_line_filed, validation_report,
};
use rollup::{AggregationError, ConfigurationResolver, RunOutcome};

#[tokio::test]
async fn active_configuration_ignores_test_lookalike() {
    let h = setup().await;
    let resolver = ConfigurationResolver::default();
    h.db.insert_configuration(&config("JWN_SALES_PROMO_Integration_Test", PROMO_QUERY))
        .await
        .unwrap();

    assert!(!has_active_configuration(&h.db, &resolver, "PROMO", run_date())
        .await
        .unwrap());

    h.db.insert_configuration(&promo_config()).await.unwrap();
    assert!(has_active_configuration(&h.db, &resolver, "PROMO", run_date())
        .await
        .unwrap());

    let resolved = resolver.resolve(&h.db, "promo", run_date()).await.unwrap();
    assert_eq!(resolved.prefix(), "JWN_SALES_PROMO");
}

#[tokio::test]
async fn ended_configuration_is_reported_inactive() {
    let h = setup().await;
    let id = h.db.insert_configuration(&promo_config()).await.unwrap();
    h.db.end_configuration(id, run_date().pred_opt().unwrap())
        .await
        .unwrap();

    let err = ConfigurationResolver::default()
        .resolve(&h.db, "PROMO", run_date())
        .await
        .unwrap_err();
    let AggregationError::ConfigNotFound { report, .. } = err else {
        panic!("unexpected error: {err}");
    };
    let text = format_status_report(&report);
    assert!(text.contains("JWN_SALES_PROMO"));
    assert!(text.contains("INACTIVE"));
}

#[tokio::test]
async fn validation_report_tracks_upload_state() {
    let h = setup().await;
    h.db.insert_configuration(&promo_config()).await.unwrap();
    let lines =
        insert_promo_lines(&h.db, "LOADTEST_validate", &[("0001", 100), ("0001", 200)]).await;

    let before = validation_report(&h.db, &lines, "PROMO").await.unwrap();
    assert!(before.memberships.is_empty());
    assert!(!before.is_complete());

    h.store.fail_next_puts(1);
    assert!(matches!(
        h.pipeline.run("PROMO", run_date()).await,
        RunOutcome::Stalled { .. }
    ));
    let stalled = validation_report(&h.db, &lines, "PROMO").await.unwrap();
    assert_eq!(stalled.memberships.len(), 1);
    assert_eq!(stalled.memberships[0].line_count, 2);
    assert!(!stalled.is_complete());
    assert!(!is_line_filed(&h.db, lines[0]).await.unwrap());

    let resumed = h.pipeline.resume_stalled().await.unwrap();
    assert_eq!(resumed.groups_filed, 1);

    let after = validation_report(&h.db, &lines, "promo").await.unwrap();
    assert!(after.is_complete());
    assert_eq!(
        after.latest_file.unwrap().generated_file_name,
        "JWN_SALES_PROMO_2026_06_01_0001.csv"
    );
    assert!(is_line_filed(&h.db, lines[1]).await.unwrap());
}

#[tokio::test]
async fn cleanup_requires_matching_provenance() {
    let h = setup().await;
    let config_id = h.db.insert_configuration(&promo_config()).await.unwrap();
    let lines =
        insert_promo_lines(&h.db, "LOADTEST_cleanup", &[("0001", 100), ("0002", 200)]).await;
    assert!(matches!(
        h.pipeline.run("PROMO", run_date()).await,
        RunOutcome::Completed { .. }
    ));
    let transaction_id = transaction_of(&h.db, lines[0]).await;

    // Wrong provenance: nothing is touched.
    let skipped = cleanup(&h.db, &[transaction_id], "PROD%", None).await.unwrap();
    assert_eq!(skipped.deleted.transactions, 0);
    assert_eq!(h.db.count_relations().await.unwrap(), 2);

    let report = cleanup(&h.db, &[transaction_id], "LOADTEST%", Some("JWN_SALES_PROMO"))
        .await
        .unwrap();
    assert_eq!(report.deleted.transactions, 1);
    assert_eq!(report.deleted.lines, 2);
    assert_eq!(report.deleted.type_specific_lines, 2);
    assert_eq!(report.deleted.relations, 2);
    assert_eq!(report.files_deleted, 1);

    assert!(h.db.get_transaction(transaction_id).await.unwrap().is_none());
    assert!(h.db.list_files_for_configuration(config_id).await.unwrap().is_empty());

    // The emptied group is dissolved on the next resume.
    let resumed = h.pipeline.resume_stalled().await.unwrap();
    assert_eq!(resumed.groups_dissolved, 1);
    assert!(h.db.list_unfiled_groups().await.unwrap().is_empty());
}

#[tokio::test]
async fn cleanup_rejects_wildcard_only_pattern() {
    let h = setup().await;
    let lines = insert_promo_lines(&h.db, "LOADTEST_wild", &[("0001", 100)]).await;
    let transaction_id = transaction_of(&h.db, lines[0]).await;

    assert!(cleanup(&h.db, &[transaction_id], "%", None).await.is_err());
    assert!(h.db.get_transaction(transaction_id).await.unwrap().is_some());
}

/// Owning transaction of a line.
async fn transaction_of(db: &rollup_db::RollupDb, line_id: i64) -> i64 {
    let rows = db
        .query_read_only(&format!(
            "SELECT transaction_id FROM transaction_line WHERE transaction_line_id = {}",
            line_id
        ))
        .await
        .unwrap();
    rows.rows[0][0].as_deref().unwrap().parse().unwrap()
}
