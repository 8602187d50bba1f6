use crate::error::AlertError;
use crate::machine::AlertStateMachine;
use chrono::{Duration as ChronoDuration, Utc};
use coldtrace_common::types::{
    AcknowledgeRequest, AlertCondition, AlertStatus, AlertType, Channel, JobStatus, ResolveRequest,
    Severity,
};
use coldtrace_notify::dispatcher::NotificationDispatcher;
use coldtrace_notify::escalation::EscalationScheduler;
use coldtrace_rules::resolver::RuleResolver;
use coldtrace_rules::AlertRuleConfig;
use coldtrace_storage::{AlertFilter, ContactInput, FacilityStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn test_machine() -> (TempDir, Arc<FacilityStore>, AlertStateMachine) {
    let dir = TempDir::new().unwrap();
    let db_url = format!("sqlite://{}/test.db?mode=rwc", dir.path().display());
    let store = Arc::new(FacilityStore::new(&db_url, dir.path()).await.unwrap());

    store
        .upsert_unit("unit-1", "site-1", "org-1", None)
        .await
        .unwrap();
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
        ChronoDuration::minutes(15),
        5,
    ));
    let resolver = Arc::new(RuleResolver::new(
        store.clone(),
        Duration::from_secs(60),
    ));
    let escalation = Arc::new(EscalationScheduler::new(
        store.clone(),
        dispatcher.clone(),
        resolver,
        Vec::new(),
    ));
    let machine = AlertStateMachine::new(store.clone(), dispatcher, escalation);
    (dir, store, machine)
}

fn condition(alert_type: AlertType, severity: Severity) -> AlertCondition {
    AlertCondition {
        alert_type,
        severity,
        triggered_at: Utc::now() - ChronoDuration::minutes(1),
    }
}

#[tokio::test]
async fn reconcile_opens_alert_once() {
    let (_dir, store, machine) = test_machine().await;
    let rules = AlertRuleConfig::default();
    let conditions = vec![condition(AlertType::Temperature, Severity::Warning)];

    let now = Utc::now();
    machine
        .reconcile("unit-1", "org-1", &conditions, &rules, now)
        .await
        .unwrap();
    // Same snapshot again: no second alert.
    machine
        .reconcile("unit-1", "org-1", &conditions, &rules, now)
        .await
        .unwrap();

    let open = store
        .find_open_alert("unit-1", AlertType::Temperature)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(open.status, AlertStatus::Active);
    assert_eq!(open.severity, Severity::Warning);

    // A first reminder is queued for tier 1.
    let reminders = store
        .due_reminders(now + ChronoDuration::hours(1), 10)
        .await
        .unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].escalation_level, 1);

    // Fire-and-forget dispatch lands shortly after.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let jobs = store.list_jobs_by_alert(&open.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Waiting);
}

#[tokio::test]
async fn reconcile_upgrades_but_never_downgrades() {
    let (_dir, store, machine) = test_machine().await;
    let rules = AlertRuleConfig::default();
    let now = Utc::now();

    machine
        .reconcile(
            "unit-1",
            "org-1",
            &[condition(AlertType::Offline, Severity::Warning)],
            &rules,
            now,
        )
        .await
        .unwrap();
    machine
        .reconcile(
            "unit-1",
            "org-1",
            &[condition(AlertType::Offline, Severity::Critical)],
            &rules,
            now,
        )
        .await
        .unwrap();

    let open = store
        .find_open_alert("unit-1", AlertType::Offline)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(open.severity, Severity::Critical);

    // Condition calming down does not lower the stored severity.
    machine
        .reconcile(
            "unit-1",
            "org-1",
            &[condition(AlertType::Offline, Severity::Warning)],
            &rules,
            now,
        )
        .await
        .unwrap();
    let open = store
        .find_open_alert("unit-1", AlertType::Offline)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(open.severity, Severity::Critical);
}

#[tokio::test]
async fn reconcile_auto_resolves_cleared_condition() {
    let (_dir, store, machine) = test_machine().await;
    let rules = AlertRuleConfig::default();
    let now = Utc::now();

    machine
        .reconcile(
            "unit-1",
            "org-1",
            &[condition(AlertType::Temperature, Severity::Warning)],
            &rules,
            now,
        )
        .await
        .unwrap();
    let open = store
        .find_open_alert("unit-1", AlertType::Temperature)
        .await
        .unwrap()
        .unwrap();

    machine
        .reconcile("unit-1", "org-1", &[], &rules, now)
        .await
        .unwrap();

    let resolved = store.get_alert_by_id(&open.id).await.unwrap().unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.resolution.as_deref(), Some("auto-cleared"));

    // The tier-1 reminder was cancelled with it.
    assert!(store
        .due_reminders(now + ChronoDuration::hours(1), 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn auto_resolved_condition_reopens_fresh() {
    let (_dir, store, machine) = test_machine().await;
    let rules = AlertRuleConfig::default();
    let now = Utc::now();
    let cond = [condition(AlertType::Temperature, Severity::Warning)];

    machine
        .reconcile("unit-1", "org-1", &cond, &rules, now)
        .await
        .unwrap();
    let first = store
        .find_open_alert("unit-1", AlertType::Temperature)
        .await
        .unwrap()
        .unwrap();
    machine
        .reconcile("unit-1", "org-1", &[], &rules, now)
        .await
        .unwrap();
    machine
        .reconcile("unit-1", "org-1", &cond, &rules, now)
        .await
        .unwrap();

    let second = store
        .find_open_alert("unit-1", AlertType::Temperature)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.status, AlertStatus::Active);
}

#[tokio::test]
async fn acknowledge_then_resolve_lifecycle() {
    let (_dir, store, machine) = test_machine().await;
    let rules = AlertRuleConfig::default();
    let now = Utc::now();
    machine
        .reconcile(
            "unit-1",
            "org-1",
            &[condition(AlertType::Manual, Severity::Warning)],
            &rules,
            now,
        )
        .await
        .unwrap();
    let alert = store
        .find_open_alert("unit-1", AlertType::Manual)
        .await
        .unwrap()
        .unwrap();

    let acked = machine
        .acknowledge(
            &alert.id,
            &AcknowledgeRequest {
                acknowledged_by: "tech-7".to_string(),
                notes: Some("checking the compressor".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);

    // Acknowledging cancels pending escalation.
    assert!(store
        .due_reminders(now + ChronoDuration::hours(1), 10)
        .await
        .unwrap()
        .is_empty());

    // Acknowledge is not re-entrant.
    let err = machine
        .acknowledge(
            &alert.id,
            &AcknowledgeRequest {
                acknowledged_by: "tech-8".to_string(),
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AlertError::InvalidTransition {
            status: AlertStatus::Acknowledged,
            ..
        }
    ));

    let resolved = machine
        .resolve(
            &alert.id,
            &ResolveRequest {
                resolved_by: "tech-7".to_string(),
                resolution: "compressor repaired".to_string(),
                corrective_action: Some("replaced start relay".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);

    // Resolved is terminal for both actions.
    let err = machine
        .resolve(
            &alert.id,
            &ResolveRequest {
                resolved_by: "tech-7".to_string(),
                resolution: "again".to_string(),
                corrective_action: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AlertError::InvalidTransition {
            status: AlertStatus::Resolved,
            ..
        }
    ));
}

#[tokio::test]
async fn active_alert_can_resolve_directly() {
    let (_dir, store, machine) = test_machine().await;
    let rules = AlertRuleConfig::default();
    machine
        .reconcile(
            "unit-1",
            "org-1",
            &[condition(AlertType::Offline, Severity::Warning)],
            &rules,
            Utc::now(),
        )
        .await
        .unwrap();
    let alert = store
        .find_open_alert("unit-1", AlertType::Offline)
        .await
        .unwrap()
        .unwrap();

    let resolved = machine
        .resolve(
            &alert.id,
            &ResolveRequest {
                resolved_by: "tech-7".to_string(),
                resolution: "power restored".to_string(),
                corrective_action: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert!(resolved.acknowledged_at.is_none());
}

#[tokio::test]
async fn unknown_alert_is_not_found() {
    let (_dir, _store, machine) = test_machine().await;
    let err = machine
        .acknowledge(
            "missing",
            &AcknowledgeRequest {
                acknowledged_by: "tech-7".to_string(),
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AlertError::NotFound(_)));
}

#[tokio::test]
async fn random_condition_sequences_keep_at_most_one_open_per_type() {
    use rand::Rng;

    let (_dir, store, machine) = test_machine().await;
    let rules = AlertRuleConfig::default();
    let mut rng = rand::thread_rng();
    let filter = AlertFilter {
        unit_id_eq: Some("unit-1".to_string()),
        ..Default::default()
    };

    // Random open/clear/upgrade churn across all types; the per-(unit,
    // type) invariant must hold after every pass.
    for _ in 0..40 {
        let mut conditions = Vec::new();
        for alert_type in AlertType::ALL {
            if rng.gen_bool(0.5) {
                let severity = if rng.gen_bool(0.5) {
                    Severity::Warning
                } else {
                    Severity::Critical
                };
                conditions.push(condition(alert_type, severity));
            }
        }
        machine
            .reconcile("unit-1", "org-1", &conditions, &rules, Utc::now())
            .await
            .unwrap();

        let alerts = store.list_alerts(&filter, 1000, 0).await.unwrap();
        for alert_type in AlertType::ALL {
            let open = alerts
                .iter()
                .filter(|a| a.alert_type == alert_type && a.status != AlertStatus::Resolved)
                .count();
            assert!(open <= 1, "{open} open alerts for type {alert_type}");
        }
    }
}

#[tokio::test]
async fn independent_types_coexist_per_unit() {
    let (_dir, store, machine) = test_machine().await;
    let rules = AlertRuleConfig::default();
    machine
        .reconcile(
            "unit-1",
            "org-1",
            &[
                condition(AlertType::Temperature, Severity::Critical),
                condition(AlertType::Offline, Severity::Warning),
            ],
            &rules,
            Utc::now(),
        )
        .await
        .unwrap();

    assert!(store
        .find_open_alert("unit-1", AlertType::Temperature)
        .await
        .unwrap()
        .is_some());
    assert!(store
        .find_open_alert("unit-1", AlertType::Offline)
        .await
        .unwrap()
        .is_some());
    assert!(store
        .find_open_alert("unit-1", AlertType::MissedCheckin)
        .await
        .unwrap()
        .is_none());
}
