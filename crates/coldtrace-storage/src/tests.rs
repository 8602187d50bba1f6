use crate::store::{AlertFilter, ContactInput, FacilityStore};
use chrono::{Duration, Utc};
use coldtrace_common::types::{
    Alert, AlertStatus, AlertType, Channel, DeliveryLogEntry, DeliveryOutcome, JobStatus,
    NotificationJob, Severity,
};
use coldtrace_rules::{PartialAlertRuleConfig, RuleConfigSource, ScopeType};
use tempfile::TempDir;

async fn test_store() -> (TempDir, FacilityStore) {
    let dir = TempDir::new().unwrap();
    let db_url = format!("sqlite://{}/test.db?mode=rwc", dir.path().display());
    let store = FacilityStore::new(&db_url, dir.path()).await.unwrap();
    (dir, store)
}

fn make_alert(unit_id: &str, alert_type: AlertType, severity: Severity) -> Alert {
    let now = Utc::now();
    Alert {
        id: coldtrace_common::id::next_id(),
        unit_id: unit_id.to_string(),
        organization_id: "org-1".to_string(),
        alert_type,
        severity,
        status: AlertStatus::Active,
        opened_at: now,
        acknowledged_at: None,
        acknowledged_by: None,
        notes: None,
        resolved_at: None,
        resolution: None,
        corrective_action: None,
        last_escalation_level: 0,
        created_at: now,
        updated_at: now,
    }
}

fn make_job(alert_id: &str, key: &str, recipient: &str) -> NotificationJob {
    let now = Utc::now();
    NotificationJob {
        id: key.to_string(),
        alert_id: alert_id.to_string(),
        alert_type: AlertType::Temperature,
        channel: Channel::Sms,
        recipient: recipient.to_string(),
        payload: r#"{"subject":"t","body":"b"}"#.to_string(),
        attempts: 0,
        max_attempts: 5,
        scheduled_at: now - Duration::seconds(1),
        status: JobStatus::Waiting,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn unit_upsert_and_scope_lookup() {
    let (_dir, store) = test_store().await;

    store
        .upsert_unit("unit-1", "site-1", "org-1", Some("Walk-in freezer"))
        .await
        .unwrap();
    // Re-report with a new site; scope must follow.
    store
        .upsert_unit("unit-1", "site-2", "org-1", None)
        .await
        .unwrap();

    let scope = store.unit_scope("unit-1").await.unwrap().unwrap();
    assert_eq!(scope.site_id, "site-2");
    assert_eq!(scope.organization_id, "org-1");
    assert!(store.unit_scope("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn rule_config_layer_roundtrip() {
    let (_dir, store) = test_store().await;

    let mut layer = PartialAlertRuleConfig {
        temp_range_min: Some(2.0),
        temp_range_max: Some(8.0),
        consecutive_breaches: Some(3),
        ..Default::default()
    };
    let mut overrides = std::collections::HashMap::new();
    overrides.insert(AlertType::Offline, Severity::Critical);
    layer.severity_overrides = Some(overrides);

    store
        .upsert_rule_config(ScopeType::Site, "site-1", &layer)
        .await
        .unwrap();

    let stored = store
        .layer(ScopeType::Site, "site-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.temp_range_max, Some(8.0));
    assert_eq!(stored.consecutive_breaches, Some(3));
    assert_eq!(
        stored.severity_overrides.unwrap().get(&AlertType::Offline),
        Some(&Severity::Critical)
    );
    assert!(stored.offline_trigger_ms.is_none());

    // Replacing the layer clears previously set fields.
    store
        .upsert_rule_config(ScopeType::Site, "site-1", &Default::default())
        .await
        .unwrap();
    let replaced = store
        .layer(ScopeType::Site, "site-1")
        .await
        .unwrap()
        .unwrap();
    assert!(replaced.temp_range_max.is_none());
}

#[tokio::test]
async fn alert_transitions_are_conditional() {
    let (_dir, store) = test_store().await;
    let alert = store
        .insert_alert(&make_alert("unit-1", AlertType::Temperature, Severity::Warning))
        .await
        .unwrap();

    let acked = store
        .acknowledge_alert(&alert.id, "tech-7", Some("on my way"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("tech-7"));

    // Second acknowledge hits a non-active row and is rejected.
    assert!(store
        .acknowledge_alert(&alert.id, "tech-8", None)
        .await
        .unwrap()
        .is_none());

    let resolved = store
        .resolve_alert(&alert.id, "compressor repaired", Some("replaced relay"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    // Resolved is terminal.
    assert!(store
        .resolve_alert(&alert.id, "again", None)
        .await
        .unwrap()
        .is_none());
    assert!(!store
        .upgrade_alert_severity(&alert.id, Severity::Critical)
        .await
        .unwrap());
}

#[tokio::test]
async fn find_open_alert_sees_acknowledged() {
    let (_dir, store) = test_store().await;
    let alert = store
        .insert_alert(&make_alert("unit-1", AlertType::Offline, Severity::Warning))
        .await
        .unwrap();
    store
        .acknowledge_alert(&alert.id, "tech-7", None)
        .await
        .unwrap();

    let open = store
        .find_open_alert("unit-1", AlertType::Offline)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(open.id, alert.id);

    store.resolve_alert(&alert.id, "auto-cleared", None).await.unwrap();
    assert!(store
        .find_open_alert("unit-1", AlertType::Offline)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn list_alerts_filters_by_site() {
    let (_dir, store) = test_store().await;
    store
        .upsert_unit("unit-a", "site-1", "org-1", None)
        .await
        .unwrap();
    store
        .upsert_unit("unit-b", "site-2", "org-1", None)
        .await
        .unwrap();
    store
        .insert_alert(&make_alert("unit-a", AlertType::Temperature, Severity::Warning))
        .await
        .unwrap();
    store
        .insert_alert(&make_alert("unit-b", AlertType::Temperature, Severity::Warning))
        .await
        .unwrap();

    let filter = AlertFilter {
        site_id_eq: Some("site-1".to_string()),
        ..Default::default()
    };
    let rows = store.list_alerts(&filter, 50, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].unit_id, "unit-a");
    assert_eq!(store.count_alerts(&filter).await.unwrap(), 1);
}

#[tokio::test]
async fn job_enqueue_is_idempotent() {
    let (_dir, store) = test_store().await;
    let job = make_job("alert-1", "key-1", "+15550100");

    assert!(store.insert_job_if_absent(&job).await.unwrap());
    assert!(!store.insert_job_if_absent(&job).await.unwrap());

    let stored = store.get_job_by_id("key-1").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Waiting);
}

#[tokio::test]
async fn claim_marks_active_and_counts_attempt() {
    let (_dir, store) = test_store().await;
    store
        .insert_job_if_absent(&make_job("alert-1", "key-1", "+15550100"))
        .await
        .unwrap();

    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status, JobStatus::Active);
    assert_eq!(claimed[0].attempts, 1);

    // Already active: a second pass claims nothing.
    assert!(store.claim_due_jobs(Utc::now(), 10).await.unwrap().is_empty());

    // Future jobs are not due.
    let mut future = make_job("alert-1", "key-2", "+15550100");
    future.scheduled_at = Utc::now() + Duration::minutes(5);
    store.insert_job_if_absent(&future).await.unwrap();
    assert!(store.claim_due_jobs(Utc::now(), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn requeue_uncounted_rolls_back_the_attempt() {
    let (_dir, store) = test_store().await;
    store
        .insert_job_if_absent(&make_job("alert-1", "key-1", "+15550100"))
        .await
        .unwrap();
    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    assert_eq!(claimed[0].attempts, 1);

    store
        .requeue_job_uncounted("key-1", Utc::now() + Duration::seconds(60), "429")
        .await
        .unwrap();
    let job = store.get_job_by_id("key-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.last_error.as_deref(), Some("429"));
}

#[tokio::test]
async fn recent_job_count_scopes_by_recipient_and_type() {
    let (_dir, store) = test_store().await;
    store
        .insert_job_if_absent(&make_job("alert-1", "key-1", "+15550100"))
        .await
        .unwrap();
    store
        .insert_job_if_absent(&make_job("alert-1", "key-2", "+15550199"))
        .await
        .unwrap();

    let since = Utc::now() - Duration::minutes(15);
    assert_eq!(
        store
            .count_recent_jobs("+15550100", AlertType::Temperature, since)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .count_recent_jobs("+15550100", AlertType::Offline, since)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn recent_job_count_ignores_suppression_markers_and_digests() {
    let (_dir, store) = test_store().await;
    let since = Utc::now() - Duration::minutes(15);

    // Suppression marker: terminal failed row that never went to a provider.
    let mut marker = make_job("alert-1", "key-1", "+15550100");
    marker.status = JobStatus::Failed;
    marker.last_error = Some(DeliveryOutcome::RateLimited.to_string());
    store.insert_job_if_absent(&marker).await.unwrap();
    assert_eq!(
        store
            .count_recent_jobs("+15550100", AlertType::Temperature, since)
            .await
            .unwrap(),
        0
    );

    // A delivery that genuinely failed still counts.
    let mut failed = make_job("alert-2", "key-2", "+15550100");
    failed.status = JobStatus::Failed;
    failed.last_error = Some("retries exhausted: timeout".to_string());
    store.insert_job_if_absent(&failed).await.unwrap();
    assert_eq!(
        store
            .count_recent_jobs("+15550100", AlertType::Temperature, since)
            .await
            .unwrap(),
        1
    );

    // Digest summaries never gate per-alert notifications.
    let mut digest = make_job("digest-2025-06-01", "key-3", "ops@example.com");
    digest.alert_type = AlertType::Manual;
    store.insert_job_if_absent(&digest).await.unwrap();
    assert_eq!(
        store
            .count_recent_jobs("ops@example.com", AlertType::Manual, since)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn stale_claims_go_back_to_the_queue() {
    let (_dir, store) = test_store().await;
    store
        .insert_job_if_absent(&make_job("alert-1", "key-1", "+15550100"))
        .await
        .unwrap();
    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);

    // A fresh claim is left alone.
    let recovered = store
        .requeue_stale_jobs(Utc::now() - Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(recovered, 0);

    // Past the visibility timeout the claim is abandoned and requeued,
    // with the claim-time attempt still counted.
    let recovered = store
        .requeue_stale_jobs(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(recovered, 1);
    let job = store.get_job_by_id("key-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.attempts, 1);
    assert!(store.claim_due_jobs(Utc::now(), 10).await.unwrap().len() == 1);
}

#[tokio::test]
async fn delivery_logs_roll_up_by_alert() {
    let (_dir, store) = test_store().await;
    store
        .insert_job_if_absent(&make_job("alert-1", "key-1", "+15550100"))
        .await
        .unwrap();
    store
        .insert_job_if_absent(&make_job("alert-1", "key-2", "ops@example.com"))
        .await
        .unwrap();

    for (job_id, outcome) in [
        ("key-1", DeliveryOutcome::RetryableError),
        ("key-1", DeliveryOutcome::Sent),
        ("key-2", DeliveryOutcome::Sent),
    ] {
        store
            .insert_delivery_log(&DeliveryLogEntry {
                id: coldtrace_common::id::next_id(),
                job_id: job_id.to_string(),
                attempt_number: 1,
                outcome,
                provider_error_code: None,
                provider_message_id: Some("msg-1".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    assert_eq!(
        store.list_delivery_logs_by_job("key-1").await.unwrap().len(),
        2
    );
    assert_eq!(
        store
            .list_delivery_logs_by_alert("alert-1")
            .await
            .unwrap()
            .len(),
        3
    );
}

#[tokio::test]
async fn contacts_replace_and_query_by_level() {
    let (_dir, store) = test_store().await;
    store
        .set_unit_contacts(
            "unit-1",
            &[
                ContactInput {
                    level: 0,
                    channel: Channel::Sms,
                    address: "+15550100".to_string(),
                },
                ContactInput {
                    level: 1,
                    channel: Channel::Email,
                    address: "manager@example.com".to_string(),
                },
            ],
        )
        .await
        .unwrap();

    let level0 = store.list_contacts_at_level("unit-1", 0).await.unwrap();
    assert_eq!(level0.len(), 1);
    assert_eq!(level0[0].channel, Channel::Sms);
    assert!(store
        .list_contacts_at_level("unit-1", 2)
        .await
        .unwrap()
        .is_empty());

    // Replacing drops the old chain.
    store.set_unit_contacts("unit-1", &[]).await.unwrap();
    assert!(store.list_unit_contacts("unit-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn reminders_cancel_and_complete_conditionally() {
    let (_dir, store) = test_store().await;
    let due = Utc::now() - Duration::seconds(1);
    let r1 = store.insert_reminder("alert-1", 1, due).await.unwrap();
    store.insert_reminder("alert-2", 1, due).await.unwrap();

    assert_eq!(store.cancel_reminders_for_alert("alert-1").await.unwrap(), 1);
    assert!(!store.mark_reminder_done(&r1.id).await.unwrap());

    let remaining = store.due_reminders(Utc::now(), 10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].alert_id, "alert-2");
    assert!(store.mark_reminder_done(&remaining[0].id).await.unwrap());
    assert!(store.due_reminders(Utc::now(), 10).await.unwrap().is_empty());
}
