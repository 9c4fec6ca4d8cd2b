//! Postgres-backed job queues shared by every pipeline stage.
//!
//! A claim is a single `UPDATE .. WHERE id IN (SELECT .. FOR UPDATE SKIP
//! LOCKED) RETURNING *` statement, so two workers polling the same table can
//! never receive the same row. Terminal transitions are guarded on
//! `status = 'processing'` and report whether they took effect, which makes
//! them safe to retry.

use std::marker::PhantomData;
use std::sync::Arc;

use sea_orm::{ActiveEnum, ConnectionTrait};
use uuid::Uuid;

use crate::db_core::prelude::*;
use crate::error::AppResult;

/// Scan jobs are long-running, so each worker holds at most one.
pub const SCAN_CLAIM_BATCH: u64 = 1;

pub fn generate_worker_id(stage: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stage}-worker-{}", &suffix[..8])
}

#[derive(Debug, Clone)]
pub struct JobQueue<E: EntityTrait> {
    conn: Arc<DatabaseConnection>,
    entity: PhantomData<E>,
}

impl<E> JobQueue<E>
where
    E: EntityTrait,
    E::Model: FromQueryResult,
{
    pub fn new(conn: Arc<DatabaseConnection>) -> Self {
        JobQueue {
            conn,
            entity: PhantomData,
        }
    }

    fn table() -> String {
        E::default().table_name().to_owned()
    }

    /// Atomically moves up to `batch_size` pending jobs to `processing` under
    /// `worker_id` and returns them, oldest first.
    pub async fn claim(&self, worker_id: &str, batch_size: u64) -> AppResult<Vec<E::Model>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            claim_sql(&Self::table(), batch_size),
            [worker_id.into()],
        );
        let jobs = E::find().from_raw_sql(stmt).all(&*self.conn).await?;
        Ok(jobs)
    }

    pub async fn complete(&self, job_id: i64) -> AppResult<bool> {
        self.finish(job_id, JobStatus::Completed, None).await
    }

    pub async fn fail(&self, job_id: i64, reason: &str) -> AppResult<bool> {
        self.finish(job_id, JobStatus::Failed, Some(reason)).await
    }

    pub async fn skip(&self, job_id: i64, reason: &str) -> AppResult<bool> {
        self.finish(job_id, JobStatus::Skipped, Some(reason)).await
    }

    pub async fn mark_duplicate(&self, job_id: i64, reason: &str) -> AppResult<bool> {
        self.finish(job_id, JobStatus::Duplicate, Some(reason)).await
    }

    /// Returns false when the job was no longer in `processing`, in which
    /// case nothing was written.
    async fn finish(&self, job_id: i64, status: JobStatus, message: Option<&str>) -> AppResult<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            finish_sql(&Self::table()),
            [status.to_value().into(), message.into(), job_id.into()],
        );
        let result = self.conn.execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns jobs stuck in `processing` past the visibility timeout to
    /// `pending`. Covers workers that crashed mid-job.
    pub async fn release_stale(&self, visibility_timeout_secs: i64) -> AppResult<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            release_stale_sql(&Self::table()),
            [visibility_timeout_secs.into()],
        );
        let result = self.conn.execute(stmt).await?;
        Ok(result.rows_affected())
    }
}

impl JobQueue<queue_ingest::Entity> {
    /// Ingest completion also records which suggestion the job produced.
    pub async fn complete_with_suggestion(
        &self,
        job_id: i64,
        suggestion_id: Uuid,
    ) -> AppResult<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE \"queue_ingest\" \
             SET status = (CAST('completed' AS job_status)), \
                 suggestion_id = $1, \
                 completed_at = NOW() \
             WHERE id = $2 AND status = (CAST('processing' AS job_status))",
            [suggestion_id.into(), job_id.into()],
        );
        let result = self.conn.execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }
}

fn claim_sql(table: &str, batch_size: u64) -> String {
    // UPDATE .. RETURNING does not promise row order, so the claimed rows
    // go through an ordering CTE before they reach the worker.
    format!(
        "WITH claimed AS (\
             UPDATE \"{table}\" \
             SET status = (CAST('processing' AS job_status)), \
                 worker_id = $1, \
                 started_at = NOW() \
             WHERE id IN (\
                 SELECT id FROM \"{table}\" \
                 WHERE status = (CAST('pending' AS job_status)) \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT {batch_size} \
                 FOR UPDATE SKIP LOCKED\
             ) \
             RETURNING *\
         ) \
         SELECT * FROM claimed ORDER BY created_at ASC, id ASC"
    )
}

fn finish_sql(table: &str) -> String {
    format!(
        "UPDATE \"{table}\" \
         SET status = (CAST($1 AS job_status)), \
             error_message = $2, \
             completed_at = NOW() \
         WHERE id = $3 AND status = (CAST('processing' AS job_status))"
    )
}

fn release_stale_sql(table: &str) -> String {
    format!(
        "UPDATE \"{table}\" \
         SET status = (CAST('pending' AS job_status)), \
             worker_id = NULL, \
             started_at = NULL \
         WHERE status = (CAST('processing' AS job_status)) \
           AND started_at < NOW() - ($1 * INTERVAL '1 second')"
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    use super::*;

    #[test]
    fn claim_is_a_single_guarded_statement() {
        let sql = claim_sql("queue_parse", 50);
        assert!(sql.starts_with("WITH claimed AS (UPDATE \"queue_parse\""));
        assert!(sql.contains("FOR UPDATE SKIP LOCKED"));
        assert!(sql.contains("LIMIT 50"));
        assert!(sql.contains("RETURNING *"));
        // one statement, no separate select-then-update window
        assert!(!sql.contains(';'));
    }

    #[test]
    fn claimed_batch_is_returned_oldest_first() {
        // the outer select re-orders, since UPDATE .. RETURNING may not
        let sql = claim_sql("queue_parse", 50);
        assert!(sql.ends_with("SELECT * FROM claimed ORDER BY created_at ASC, id ASC"));
    }

    #[test]
    fn finish_only_touches_processing_rows() {
        let sql = finish_sql("queue_scan");
        assert!(sql.contains("WHERE id = $3 AND status = (CAST('processing' AS job_status))"));
    }

    #[test]
    fn stale_release_clears_claim_columns() {
        let sql = release_stale_sql("queue_ingest");
        assert!(sql.contains("worker_id = NULL"));
        assert!(sql.contains("started_at = NULL"));
        assert!(sql.contains("INTERVAL '1 second'"));
    }

    #[tokio::test]
    async fn claim_returns_rows_and_binds_worker_id() {
        let job = queue_scan::Model {
            id: 7,
            user_id: Uuid::new_v4(),
            scan_type: ScanType::Manual,
            priority: 1,
            status: JobStatus::Processing,
            worker_id: Some("scanning-worker-ab12cd34".to_string()),
            error_message: None,
            created_at: Utc::now().into(),
            started_at: Some(Utc::now().into()),
            completed_at: None,
        };
        let conn = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![job.clone()]])
                .into_connection(),
        );

        let queue = JobQueue::<queue_scan::Entity>::new(conn);
        let claimed = queue
            .claim("scanning-worker-ab12cd34", SCAN_CLAIM_BATCH)
            .await
            .unwrap();

        assert_eq!(claimed, vec![job]);
    }

    #[tokio::test]
    async fn finish_reports_lost_guard_as_noop() {
        let conn = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                ])
                .into_connection(),
        );

        let queue = JobQueue::<queue_parse::Entity>::new(conn);
        assert!(queue.complete(1).await.unwrap());
        // second transition finds the row already terminal
        assert!(!queue.fail(1, "late failure").await.unwrap());
    }

    #[test]
    fn worker_ids_carry_stage_prefix() {
        let id = generate_worker_id("ingest");
        assert!(id.starts_with("ingest-worker-"));
        assert_eq!(id.len(), "ingest-worker-".len() + 8);
    }
}
