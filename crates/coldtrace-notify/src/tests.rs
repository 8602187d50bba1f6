use crate::backoff::retry_delay;
use crate::dispatcher::NotificationDispatcher;
use crate::error::SendError;
use crate::escalation::EscalationScheduler;
use crate::worker::DeliveryWorker;
use crate::{ChannelMap, MessagePayload, NotificationChannel, ProviderReceipt};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use coldtrace_common::types::{
    Alert, AlertStatus, AlertType, Channel, DeliveryOutcome, JobStatus, Severity,
};
use coldtrace_rules::resolver::RuleResolver;
use coldtrace_storage::{ContactInput, FacilityStore};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

async fn test_store() -> (TempDir, Arc<FacilityStore>) {
    let dir = TempDir::new().unwrap();
    let db_url = format!("sqlite://{}/test.db?mode=rwc", dir.path().display());
    let store = FacilityStore::new(&db_url, dir.path()).await.unwrap();
    (dir, Arc::new(store))
}

fn test_dispatcher(store: Arc<FacilityStore>) -> Arc<NotificationDispatcher> {
    Arc::new(NotificationDispatcher::new(
        store,
        ChronoDuration::minutes(15),
        5,
    ))
}

async fn make_active_alert(store: &FacilityStore, unit_id: &str) -> Alert {
    let now = Utc::now();
    store
        .insert_alert(&Alert {
            id: coldtrace_common::id::next_id(),
            unit_id: unit_id.to_string(),
            organization_id: "org-1".to_string(),
            alert_type: AlertType::Temperature,
            severity: Severity::Warning,
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
        })
        .await
        .unwrap()
}

/// Channel that replays a scripted sequence of send results.
struct ScriptedChannel {
    results: Mutex<VecDeque<Result<ProviderReceipt, SendError>>>,
}

impl ScriptedChannel {
    fn new(results: Vec<Result<ProviderReceipt, SendError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
        })
    }
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    fn channel_name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        _recipient: &str,
        _payload: &MessagePayload,
    ) -> Result<ProviderReceipt, SendError> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ProviderReceipt::default()))
    }
}

fn worker_with(
    store: Arc<FacilityStore>,
    channel: Arc<dyn NotificationChannel>,
) -> DeliveryWorker {
    let mut channels: ChannelMap = Default::default();
    channels.insert(Channel::Sms, channel);
    DeliveryWorker::new(
        store,
        channels,
        4,
        Duration::from_millis(100),
        Duration::from_secs(60),
        Duration::from_secs(300),
        20,
    )
}

#[tokio::test]
async fn dispatch_enqueues_one_job_per_contact() {
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
                    level: 0,
                    channel: Channel::Email,
                    address: "tech@example.com".to_string(),
                },
            ],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    let dispatcher = test_dispatcher(store.clone());

    dispatcher.dispatch(&alert, 0).await.unwrap();
    let jobs = store.list_jobs_by_alert(&alert.id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Waiting));

    // Re-dispatching the same step hits the idempotency keys and is silent.
    dispatcher.dispatch(&alert, 0).await.unwrap();
    assert_eq!(store.list_jobs_by_alert(&alert.id).await.unwrap().len(), 2);
    assert!(store
        .list_delivery_logs_by_alert(&alert.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn rate_limit_suppresses_repeat_sends_with_audit() {
    let (_dir, store) = test_store().await;
    // Same person at two tiers of the chain.
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
                    channel: Channel::Sms,
                    address: "+15550100".to_string(),
                },
            ],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    let dispatcher = test_dispatcher(store.clone());

    dispatcher.dispatch(&alert, 0).await.unwrap();
    dispatcher.dispatch(&alert, 1).await.unwrap();

    let jobs = store.list_jobs_by_alert(&alert.id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    let suppressed: Vec<_> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .collect();
    assert_eq!(suppressed.len(), 1);
    assert_eq!(suppressed[0].last_error.as_deref(), Some("rate_limited"));

    let logs = store.list_delivery_logs_by_alert(&alert.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, DeliveryOutcome::RateLimited);
}

#[tokio::test]
async fn suppression_markers_do_not_refresh_the_rate_limit_window() {
    let (_dir, store) = test_store().await;
    store
        .set_unit_contacts(
            "unit-1",
            &[ContactInput {
                level: 0,
                channel: Channel::Sms,
                address: "+15550100".to_string(),
            }],
        )
        .await
        .unwrap();
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        ChronoDuration::seconds(2),
        5,
    ));

    let first = make_active_alert(&store, "unit-1").await;
    dispatcher.dispatch(&first, 0).await.unwrap();

    // A second condition inside the window is suppressed.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let second = make_active_alert(&store, "unit-1").await;
    dispatcher.dispatch(&second, 0).await.unwrap();
    let jobs = store.list_jobs_by_alert(&second.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Failed);

    // By now the real notification is outside the window. Only the
    // suppression marker is inside it, and it must not count, or a
    // recipient hit at sub-window intervals never hears anything again.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let third = make_active_alert(&store, "unit-1").await;
    dispatcher.dispatch(&third, 0).await.unwrap();
    let jobs = store.list_jobs_by_alert(&third.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Waiting);
}

#[tokio::test]
async fn dispatch_with_empty_tier_is_a_warning_not_an_error() {
    let (_dir, store) = test_store().await;
    let alert = make_active_alert(&store, "unit-1").await;
    let dispatcher = test_dispatcher(store.clone());

    dispatcher.dispatch(&alert, 2).await.unwrap();
    assert!(store.list_jobs_by_alert(&alert.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn worker_records_success_with_provider_message_id() {
    let (_dir, store) = test_store().await;
    store
        .set_unit_contacts(
            "unit-1",
            &[ContactInput {
                level: 0,
                channel: Channel::Sms,
                address: "+15550100".to_string(),
            }],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    test_dispatcher(store.clone()).dispatch(&alert, 0).await.unwrap();

    let channel = ScriptedChannel::new(vec![Ok(ProviderReceipt {
        message_id: Some("prov-42".to_string()),
    })]);
    let worker = worker_with(store.clone(), channel);

    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    worker.process_job(claimed[0].clone()).await;

    let job = store.get_job_by_id(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let logs = store.list_delivery_logs_by_job(&job.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, DeliveryOutcome::Sent);
    assert_eq!(logs[0].provider_message_id.as_deref(), Some("prov-42"));
    assert_eq!(logs[0].attempt_number, 1);
}

#[tokio::test]
async fn worker_requeues_retryable_with_backoff() {
    let (_dir, store) = test_store().await;
    store
        .set_unit_contacts(
            "unit-1",
            &[ContactInput {
                level: 0,
                channel: Channel::Sms,
                address: "+15550100".to_string(),
            }],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    test_dispatcher(store.clone()).dispatch(&alert, 0).await.unwrap();

    let channel = ScriptedChannel::new(vec![Err(SendError::Retryable {
        code: Some("503".to_string()),
        message: "gateway unavailable".to_string(),
    })]);
    let worker = worker_with(store.clone(), channel);

    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    worker.process_job(claimed[0].clone()).await;

    let job = store.get_job_by_id(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.attempts, 1);
    assert!(job.scheduled_at > Utc::now());

    let logs = store.list_delivery_logs_by_job(&job.id).await.unwrap();
    assert_eq!(logs[0].outcome, DeliveryOutcome::RetryableError);
    assert_eq!(logs[0].provider_error_code.as_deref(), Some("503"));
}

#[tokio::test]
async fn worker_fails_fatal_immediately() {
    let (_dir, store) = test_store().await;
    store
        .set_unit_contacts(
            "unit-1",
            &[ContactInput {
                level: 0,
                channel: Channel::Sms,
                address: "not-a-number".to_string(),
            }],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    test_dispatcher(store.clone()).dispatch(&alert, 0).await.unwrap();

    let channel = ScriptedChannel::new(vec![Err(SendError::Fatal {
        code: Some("400".to_string()),
        message: "invalid recipient".to_string(),
    })]);
    let worker = worker_with(store.clone(), channel);

    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    worker.process_job(claimed[0].clone()).await;

    let job = store.get_job_by_id(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn worker_requeues_throttled_without_counting_attempt() {
    let (_dir, store) = test_store().await;
    store
        .set_unit_contacts(
            "unit-1",
            &[ContactInput {
                level: 0,
                channel: Channel::Sms,
                address: "+15550100".to_string(),
            }],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    test_dispatcher(store.clone()).dispatch(&alert, 0).await.unwrap();

    let channel = ScriptedChannel::new(vec![Err(SendError::RateLimited {
        code: Some("429".to_string()),
    })]);
    let worker = worker_with(store.clone(), channel);

    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    assert_eq!(claimed[0].attempts, 1);
    worker.process_job(claimed[0].clone()).await;

    let job = store.get_job_by_id(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.attempts, 0);
    assert!(job.scheduled_at > Utc::now() + ChronoDuration::seconds(30));
}

#[tokio::test]
async fn worker_abandons_after_max_attempts() {
    let (_dir, store) = test_store().await;
    store
        .set_unit_contacts(
            "unit-1",
            &[ContactInput {
                level: 0,
                channel: Channel::Sms,
                address: "+15550100".to_string(),
            }],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    // max_attempts = 1: the first failed attempt is also the last.
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        ChronoDuration::minutes(15),
        1,
    ));
    dispatcher.dispatch(&alert, 0).await.unwrap();

    let channel = ScriptedChannel::new(vec![Err(SendError::Retryable {
        code: None,
        message: "timeout".to_string(),
    })]);
    let worker = worker_with(store.clone(), channel);

    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    worker.process_job(claimed[0].clone()).await;

    let job = store.get_job_by_id(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.unwrap().starts_with("retries exhausted"));
}

#[tokio::test]
async fn stale_claim_is_recovered_and_redelivered() {
    let (_dir, store) = test_store().await;
    store
        .set_unit_contacts(
            "unit-1",
            &[ContactInput {
                level: 0,
                channel: Channel::Sms,
                address: "+15550100".to_string(),
            }],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    test_dispatcher(store.clone()).dispatch(&alert, 0).await.unwrap();

    // A worker claims the job and dies before recording any outcome.
    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);

    let channel = ScriptedChannel::new(vec![Ok(ProviderReceipt::default())]);
    let mut channels: ChannelMap = Default::default();
    channels.insert(Channel::Sms, channel);
    let worker = Arc::new(DeliveryWorker::new(
        store.clone(),
        channels,
        4,
        Duration::from_millis(100),
        Duration::from_secs(60),
        Duration::ZERO,
        20,
    ));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let picked = worker.tick().await.unwrap();
    assert_eq!(picked, 1);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let job = store.get_job_by_id(&claimed[0].id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    // The abandoned claim consumed an attempt, the redelivery another.
    assert_eq!(job.attempts, 2);
}

fn test_scheduler(
    store: Arc<FacilityStore>,
    digest_recipients: Vec<(Channel, String)>,
) -> EscalationScheduler {
    let resolver = Arc::new(RuleResolver::new(
        store.clone(),
        Duration::from_secs(60),
    ));
    EscalationScheduler::new(
        store.clone(),
        test_dispatcher(store),
        resolver,
        digest_recipients,
    )
}

#[tokio::test]
async fn reminder_escalates_active_alert_and_chains() {
    let (_dir, store) = test_store().await;
    store
        .upsert_unit("unit-1", "site-1", "org-1", None)
        .await
        .unwrap();
    store
        .set_unit_contacts(
            "unit-1",
            &[ContactInput {
                level: 1,
                channel: Channel::Email,
                address: "manager@example.com".to_string(),
            }],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    let scheduler = test_scheduler(store.clone(), Vec::new());

    let now = Utc::now();
    store
        .insert_reminder(&alert.id, 1, now - ChronoDuration::seconds(1))
        .await
        .unwrap();
    scheduler.tick(now).await.unwrap();

    let jobs = store.list_jobs_by_alert(&alert.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].recipient, "manager@example.com");

    let updated = store.get_alert_by_id(&alert.id).await.unwrap().unwrap();
    assert_eq!(updated.last_escalation_level, 1);

    // Next tier is chained (level 2 of a default max of 3).
    let next = store
        .due_reminders(now + ChronoDuration::hours(1), 10)
        .await
        .unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].escalation_level, 2);
}

#[tokio::test]
async fn reminder_for_handled_alert_is_dropped_at_fire_time() {
    let (_dir, store) = test_store().await;
    store
        .upsert_unit("unit-1", "site-1", "org-1", None)
        .await
        .unwrap();
    store
        .set_unit_contacts(
            "unit-1",
            &[ContactInput {
                level: 1,
                channel: Channel::Sms,
                address: "+15550100".to_string(),
            }],
        )
        .await
        .unwrap();
    let alert = make_active_alert(&store, "unit-1").await;
    store
        .acknowledge_alert(&alert.id, "tech-7", None)
        .await
        .unwrap();

    let scheduler = test_scheduler(store.clone(), Vec::new());
    let now = Utc::now();
    store
        .insert_reminder(&alert.id, 1, now - ChronoDuration::seconds(1))
        .await
        .unwrap();
    scheduler.tick(now).await.unwrap();

    assert!(store.list_jobs_by_alert(&alert.id).await.unwrap().is_empty());
    // No further reminders chained either.
    assert!(store
        .due_reminders(now + ChronoDuration::hours(1), 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn daily_digest_is_idempotent_per_day() {
    let (_dir, store) = test_store().await;
    make_active_alert(&store, "unit-1").await;
    let scheduler = test_scheduler(
        store.clone(),
        vec![(Channel::Email, "ops@example.com".to_string())],
    );

    let now = Utc::now();
    scheduler.run_digest(now).await.unwrap();
    scheduler.run_digest(now).await.unwrap();

    let claimed = store.claim_due_jobs(Utc::now(), 10).await.unwrap();
    let digest_jobs: Vec<_> = claimed
        .iter()
        .filter(|j| j.recipient == "ops@example.com")
        .collect();
    assert_eq!(digest_jobs.len(), 1);
}

#[test]
fn retry_delay_stays_within_jitter_bounds() {
    let base = Duration::from_millis(100);
    for _ in 0..50 {
        let d = retry_delay(base, 3);
        assert!(d >= Duration::from_millis(200), "too short: {d:?}");
        assert!(d <= Duration::from_millis(600), "too long: {d:?}");
    }
}
