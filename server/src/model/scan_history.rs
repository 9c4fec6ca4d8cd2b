use chrono::Utc;
use sea_orm::ConnectionTrait;
use uuid::Uuid;

use crate::db_core::prelude::*;
use crate::error::AppResult;

/// Scan history rows are informational. Callers treat every write here as
/// best-effort and log failures instead of propagating them.
pub struct ScanHistoryCtrl;

impl ScanHistoryCtrl {
    pub async fn insert_running(
        conn: &DatabaseConnection,
        user_id: Uuid,
        scan_job_id: i64,
        scan_type: ScanType,
    ) -> AppResult<()> {
        let row = scan_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            scan_job_id: Set(scan_job_id),
            scan_type: Set(scan_type),
            status: Set("running".to_string()),
            emails_scanned: Set(0),
            suggestions_created: Set(0),
            scan_completed_at: Set(None),
            created_at: Set(Utc::now().into()),
        };
        ScanHistory::insert(row).exec(conn).await?;
        Ok(())
    }

    pub async fn mark_completed(
        conn: &DatabaseConnection,
        scan_job_id: i64,
        emails_scanned: i32,
    ) -> AppResult<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE \"scan_history\" \
             SET status = 'completed', emails_scanned = $1, scan_completed_at = NOW() \
             WHERE scan_job_id = $2",
            [emails_scanned.into(), scan_job_id.into()],
        );
        conn.execute(stmt).await?;
        Ok(())
    }

    pub async fn mark_failed(conn: &DatabaseConnection, scan_job_id: i64) -> AppResult<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE \"scan_history\" \
             SET status = 'failed', scan_completed_at = NOW() \
             WHERE scan_job_id = $1",
            [scan_job_id.into()],
        );
        conn.execute(stmt).await?;
        Ok(())
    }

    pub async fn increment_suggestions(
        conn: &DatabaseConnection,
        scan_job_id: i64,
    ) -> AppResult<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE \"scan_history\" \
             SET suggestions_created = suggestions_created + 1 \
             WHERE scan_job_id = $1",
            [scan_job_id.into()],
        );
        conn.execute(stmt).await?;
        Ok(())
    }
}
