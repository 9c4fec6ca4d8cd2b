use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::JobStatus;

/// Stage 2 queue: one row per candidate message found by a scan.
/// email_id is unique per user within the parse jobs spawned by one scan.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_parse")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: Uuid,
    pub scan_job_id: i64,
    pub email_id: String,
    pub email_subject: String,
    pub email_snippet: String,
    pub email_from: String,
    pub email_date: DateTimeWithTimeZone,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::queue_scan::Entity",
        from = "Column::ScanJobId",
        to = "super::queue_scan::Column::Id"
    )]
    QueueScan,
}

impl Related<super::queue_scan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QueueScan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
