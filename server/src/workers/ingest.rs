//! Stage 3: suggestion creation.
//!
//! Each ingest job becomes at most one suggestion row. Detections that match
//! an existing active subscription with unchanged terms are auto-merged
//! instead of surfacing for review.

use std::sync::Arc;

use chrono::{Months, NaiveDate, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db_core::prelude::*;
use crate::error::{AppError, AppResult};
use crate::model::scan_history::ScanHistoryCtrl;
use crate::model::subscription::SubscriptionCtrl;
use crate::model::suggestion::{NewSuggestion, SuggestionCtrl};
use crate::queue::{generate_worker_id, JobQueue};

/// Price changes at or below a cent are treated as unchanged.
const PRICE_EPSILON: f64 = 0.01;

pub struct IngestWorker {
    conn: Arc<DatabaseConnection>,
    queue: JobQueue<queue_ingest::Entity>,
    batch_size: u64,
}

impl IngestWorker {
    pub fn new(conn: Arc<DatabaseConnection>, batch_size: u64) -> Self {
        IngestWorker {
            queue: JobQueue::new(conn.clone()),
            conn,
            batch_size,
        }
    }

    pub async fn tick(&self) {
        loop {
            match self.run_once().await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) => {
                    error!("ingest tick aborted: {err}");
                    break;
                }
            }
        }
    }

    pub async fn run_once(&self) -> AppResult<usize> {
        let worker_id = generate_worker_id("ingest");
        let jobs = self.queue.claim(&worker_id, self.batch_size).await?;
        if jobs.is_empty() {
            return Ok(0);
        }

        info!(%worker_id, count = jobs.len(), "claimed ingest batch");

        for job in &jobs {
            if let Err(err) = self.process(job).await {
                error!(job_id = job.id, "ingest job left in processing: {err}");
            }
        }

        Ok(jobs.len())
    }

    async fn process(&self, job: &queue_ingest::Model) -> AppResult<()> {
        if SuggestionCtrl::find_by_user_and_email(&self.conn, job.user_id, &job.email_id)
            .await?
            .is_some()
        {
            self.queue
                .mark_duplicate(job.id, "Duplicate suggestion already exists")
                .await?;
            return Ok(());
        }

        let existing =
            SubscriptionCtrl::find_active_matching(&self.conn, job.user_id, &job.service_name)
                .await?;
        let (status, subscription_id) =
            merge_decision(existing.as_ref(), job.price, &job.billing_cycle);

        let suggestion = SuggestionCtrl::insert(
            &self.conn,
            NewSuggestion {
                user_id: job.user_id,
                email_id: &job.email_id,
                email_subject: &job.email_subject,
                email_snippet: &job.email_snippet,
                email_from: &job.email_from,
                email_date: job.email_date,
                service_name: &job.service_name,
                price: job.price,
                currency: &job.currency,
                billing_cycle: job.billing_cycle.clone(),
                next_payment_date: next_payment_date(&job.billing_cycle, Utc::now().date_naive()),
                confidence_score: job.confidence,
                status,
                subscription_id,
            },
        )
        .await;

        match suggestion {
            Ok(created) => {
                self.bump_scan_history(job).await;
                self.queue.complete_with_suggestion(job.id, created.id).await?;
                info!(job_id = job.id, suggestion_id = %created.id, "suggestion created");
                Ok(())
            }
            // lost the insert race against a sibling worker
            Err(AppError::Conflict(_)) => {
                self.queue
                    .mark_duplicate(job.id, "Duplicate suggestion already exists")
                    .await?;
                Ok(())
            }
            Err(err) => {
                self.queue.fail(job.id, &err.to_string()).await?;
                Ok(())
            }
        }
    }

    async fn bump_scan_history(&self, job: &queue_ingest::Model) {
        let parse_job = match QueueParse::find_by_id(job.parse_job_id).one(&*self.conn).await {
            Ok(Some(parse_job)) => parse_job,
            Ok(None) => return,
            Err(err) => {
                warn!(job_id = job.id, "could not load parse job for history: {err}");
                return;
            }
        };
        if let Err(err) =
            ScanHistoryCtrl::increment_suggestions(&self.conn, parse_job.scan_job_id).await
        {
            warn!(job_id = job.id, "could not bump scan history: {err}");
        }
    }
}

/// Pending for new or changed detections; auto-merged, linked to the
/// existing subscription, when nothing changed.
pub fn merge_decision(
    existing: Option<&subscription::Model>,
    price: f64,
    billing_cycle: &BillingCycle,
) -> (SuggestionStatus, Option<Uuid>) {
    match existing {
        None => (SuggestionStatus::Pending, None),
        Some(sub) => {
            let price_changed = (sub.price - price).abs() > PRICE_EPSILON;
            let cycle_changed = sub.billing_cycle != *billing_cycle;
            if price_changed || cycle_changed {
                (SuggestionStatus::Pending, None)
            } else {
                (SuggestionStatus::AutoMerged, Some(sub.id))
            }
        }
    }
}

/// Next charge date projected from today. Month and year steps use calendar
/// arithmetic, clamping to the last day of shorter months.
pub fn next_payment_date(billing_cycle: &BillingCycle, today: NaiveDate) -> NaiveDate {
    match billing_cycle {
        BillingCycle::Weekly => today + chrono::Duration::days(7),
        BillingCycle::Monthly => today + Months::new(1),
        BillingCycle::Yearly => today + Months::new(12),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    use super::*;

    fn subscription(price: f64, cycle: BillingCycle) -> subscription::Model {
        subscription::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Spotify".to_string(),
            price,
            currency: "USD".to_string(),
            billing_cycle: cycle,
            status: "active".to_string(),
            next_payment_date: None,
            created_at: chrono::Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap().into(),
        }
    }

    #[test]
    fn unchanged_terms_auto_merge_onto_the_existing_subscription() {
        let sub = subscription(9.99, BillingCycle::Monthly);
        let (status, linked) = merge_decision(Some(&sub), 9.99, &BillingCycle::Monthly);
        assert_eq!(status, SuggestionStatus::AutoMerged);
        assert_eq!(linked, Some(sub.id));
    }

    #[test]
    fn sub_epsilon_price_drift_still_auto_merges() {
        let sub = subscription(9.99, BillingCycle::Monthly);
        let (status, _) = merge_decision(Some(&sub), 9.995, &BillingCycle::Monthly);
        assert_eq!(status, SuggestionStatus::AutoMerged);
    }

    #[test]
    fn price_change_surfaces_as_pending() {
        let sub = subscription(9.99, BillingCycle::Monthly);
        let (status, linked) = merge_decision(Some(&sub), 12.99, &BillingCycle::Monthly);
        assert_eq!(status, SuggestionStatus::Pending);
        assert_eq!(linked, None);
    }

    #[test]
    fn cycle_change_surfaces_as_pending() {
        let sub = subscription(99.0, BillingCycle::Monthly);
        let (status, linked) = merge_decision(Some(&sub), 99.0, &BillingCycle::Yearly);
        assert_eq!(status, SuggestionStatus::Pending);
        assert_eq!(linked, None);
    }

    #[test]
    fn no_existing_subscription_is_pending() {
        let (status, linked) = merge_decision(None, 5.0, &BillingCycle::Weekly);
        assert_eq!(status, SuggestionStatus::Pending);
        assert_eq!(linked, None);
    }

    #[test]
    fn next_payment_dates_step_by_cycle() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert_eq!(
            next_payment_date(&BillingCycle::Weekly, today),
            NaiveDate::from_ymd_opt(2025, 3, 17).unwrap()
        );
        assert_eq!(
            next_payment_date(&BillingCycle::Monthly, today),
            NaiveDate::from_ymd_opt(2025, 4, 10).unwrap()
        );
        assert_eq!(
            next_payment_date(&BillingCycle::Yearly, today),
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
        );
    }

    #[tokio::test]
    async fn repeat_email_for_user_marks_the_job_duplicate() {
        let user_id = Uuid::new_v4();
        let now = chrono::Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let existing = subscription_suggestion::Model {
            id: Uuid::new_v4(),
            user_id,
            email_id: "18f2a".to_string(),
            email_subject: "Netflix receipt".to_string(),
            email_snippet: "You were charged".to_string(),
            email_from: "info@netflix.com".to_string(),
            email_date: now.into(),
            service_name: "Netflix".to_string(),
            price: 15.99,
            currency: "USD".to_string(),
            billing_cycle: BillingCycle::Monthly,
            next_payment_date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            confidence_score: 0.9,
            status: SuggestionStatus::Pending,
            subscription_id: None,
            created_at: now.into(),
        };
        let job = queue_ingest::Model {
            id: 11,
            user_id,
            parse_job_id: 3,
            service_name: "Netflix".to_string(),
            price: 15.99,
            currency: "USD".to_string(),
            billing_cycle: BillingCycle::Monthly,
            confidence: 0.9,
            email_id: "18f2a".to_string(),
            email_subject: "Netflix receipt".to_string(),
            email_snippet: "You were charged".to_string(),
            email_from: "info@netflix.com".to_string(),
            email_date: now.into(),
            suggestion_id: None,
            status: JobStatus::Processing,
            worker_id: Some("ingest-worker-ab12cd34".to_string()),
            error_message: None,
            created_at: now.into(),
            started_at: Some(now.into()),
            completed_at: None,
        };

        // one lookup hit, one terminal update; any attempt to insert a
        // second suggestion would run out of mock results and error
        let conn = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![existing]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let worker = IngestWorker::new(conn, 50);
        worker.process(&job).await.unwrap();
    }

    #[test]
    fn month_step_clamps_to_shorter_months() {
        let jan31 = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(
            next_payment_date(&BillingCycle::Monthly, jan31),
            NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
        );
    }
}
