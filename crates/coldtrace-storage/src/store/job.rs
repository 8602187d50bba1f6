use anyhow::Result;
use chrono::{DateTime, Utc};
use coldtrace_common::types::{AlertType, DeliveryOutcome, JobStatus, NotificationJob};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr,
};

use crate::entities::notification_job::{self, Column, Entity};
use crate::error;
use crate::store::FacilityStore;

fn to_job(m: notification_job::Model) -> error::Result<NotificationJob> {
    Ok(NotificationJob {
        alert_type: error::decode("alert_type", &m.alert_type)?,
        channel: error::decode("channel", &m.channel)?,
        status: error::decode("status", &m.status)?,
        id: m.id,
        alert_id: m.alert_id,
        recipient: m.recipient,
        payload: m.payload,
        attempts: m.attempts,
        max_attempts: m.max_attempts,
        scheduled_at: m.scheduled_at.with_timezone(&Utc),
        last_error: m.last_error,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl FacilityStore {
    /// Enqueues a job unless one with the same idempotency key (the job ID)
    /// already exists. Returns true if the row was inserted. A concurrent
    /// duplicate surfaces as a key conflict and is treated as "absent".
    pub async fn insert_job_if_absent(&self, job: &NotificationJob) -> Result<bool> {
        if Entity::find_by_id(&job.id).one(self.db()).await?.is_some() {
            return Ok(false);
        }
        let now = Utc::now().fixed_offset();
        let am = notification_job::ActiveModel {
            id: Set(job.id.clone()),
            alert_id: Set(job.alert_id.clone()),
            alert_type: Set(job.alert_type.to_string()),
            channel: Set(job.channel.to_string()),
            recipient: Set(job.recipient.clone()),
            payload: Set(job.payload.clone()),
            attempts: Set(job.attempts),
            max_attempts: Set(job.max_attempts),
            scheduled_at: Set(job.scheduled_at.fixed_offset()),
            status: Set(job.status.to_string()),
            last_error: Set(job.last_error.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        match am.insert(self.db()).await {
            Ok(_) => Ok(true),
            Err(e) => match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => Ok(false),
                _ => Err(e.into()),
            },
        }
    }

    pub async fn get_job_by_id(&self, id: &str) -> Result<Option<NotificationJob>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_job).transpose()?)
    }

    /// Claims up to `limit` due jobs for this worker pass. Each claim is a
    /// conditional `waiting → active` UPDATE that also counts the attempt,
    /// so two concurrent workers can never both run the same job.
    pub async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NotificationJob>> {
        let due = Entity::find()
            .filter(Column::Status.eq(JobStatus::Waiting.to_string()))
            .filter(Column::ScheduledAt.lte(now.fixed_offset()))
            .order_by(Column::ScheduledAt, Order::Asc)
            .limit(limit as u64)
            .all(self.db())
            .await?;

        let mut claimed = Vec::with_capacity(due.len());
        for candidate in due {
            let res = Entity::update_many()
                .col_expr(Column::Status, Expr::value(JobStatus::Active.to_string()))
                .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
                .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
                .filter(Column::Id.eq(candidate.id.as_str()))
                .filter(Column::Status.eq(JobStatus::Waiting.to_string()))
                .exec(self.db())
                .await?;
            if res.rows_affected == 0 {
                continue; // another worker got it
            }
            if let Some(model) = Entity::find_by_id(&candidate.id).one(self.db()).await? {
                claimed.push(to_job(model)?);
            }
        }
        Ok(claimed)
    }

    pub async fn complete_job(&self, id: &str) -> Result<()> {
        self.set_job_status(id, JobStatus::Completed, None).await
    }

    pub async fn fail_job(&self, id: &str, last_error: &str) -> Result<()> {
        self.set_job_status(id, JobStatus::Failed, Some(last_error))
            .await
    }

    /// Puts a claimed job back in the queue for a later retry.
    pub async fn requeue_job(
        &self,
        id: &str,
        next_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Waiting.to_string()))
            .col_expr(Column::ScheduledAt, Expr::value(next_at.fixed_offset()))
            .col_expr(Column::LastError, Expr::value(Some(last_error.to_owned())))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    /// Requeue without consuming an attempt: provider throttling is not the
    /// job's fault, so the claim-time increment is rolled back.
    pub async fn requeue_job_uncounted(
        &self,
        id: &str,
        next_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Waiting.to_string()))
            .col_expr(Column::ScheduledAt, Expr::value(next_at.fixed_offset()))
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).sub(1))
            .col_expr(Column::LastError, Expr::value(Some(last_error.to_owned())))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    /// Returns claims whose worker disappeared to the queue. An `active`
    /// row untouched since `cutoff` means the outcome was never recorded
    /// (crash or storage failure mid-flight); the claim-time attempt stays
    /// counted. Returns the number of jobs recovered.
    pub async fn requeue_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let now = Utc::now().fixed_offset();
        let res = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Waiting.to_string()))
            .col_expr(Column::ScheduledAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Status.eq(JobStatus::Active.to_string()))
            .filter(Column::UpdatedAt.lt(cutoff.fixed_offset()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn list_jobs_by_alert(&self, alert_id: &str) -> Result<Vec<NotificationJob>> {
        let rows = Entity::find()
            .filter(Column::AlertId.eq(alert_id))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter()
            .map(|m| to_job(m).map_err(Into::into))
            .collect()
    }

    /// Jobs enqueued for delivery to one (recipient, alert type) since
    /// `since`. Drives the dispatch rate limit. Suppression markers are
    /// excluded: a suppressed dispatch must not refresh the window, or
    /// back-to-back conditions starve the recipient indefinitely.
    pub async fn count_recent_jobs(
        &self,
        recipient: &str,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(Entity::find()
            .filter(Column::Recipient.eq(recipient))
            .filter(Column::AlertType.eq(alert_type.to_string()))
            .filter(Column::CreatedAt.gte(since.fixed_offset()))
            // Daily digests are summaries, not per-alert notifications.
            .filter(Column::AlertId.not_like("digest-%"))
            .filter(
                Condition::any()
                    .add(Column::Status.ne(JobStatus::Failed.to_string()))
                    .add(Column::LastError.is_null())
                    .add(Column::LastError.ne(DeliveryOutcome::RateLimited.to_string())),
            )
            .count(self.db())
            .await?)
    }

    async fn set_job_status(
        &self,
        id: &str,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().fixed_offset();
        let mut upd = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(now));
        if let Some(err) = last_error {
            upd = upd.col_expr(Column::LastError, Expr::value(Some(err.to_owned())));
        }
        upd.filter(Column::Id.eq(id)).exec(self.db()).await?;
        Ok(())
    }
}
