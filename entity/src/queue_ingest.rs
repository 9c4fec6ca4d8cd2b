use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::{BillingCycle, JobStatus};

/// Stage 3 queue: one row per accepted extraction, carrying the fields the
/// parse stage pulled out of the message.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_ingest")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: Uuid,
    pub parse_job_id: i64,
    pub service_name: String,
    #[sea_orm(column_type = "Double")]
    pub price: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    #[sea_orm(column_type = "Float")]
    pub confidence: f32,
    pub email_id: String,
    pub email_subject: String,
    pub email_snippet: String,
    pub email_from: String,
    pub email_date: DateTimeWithTimeZone,
    /// Set on completion to the created suggestion row.
    pub suggestion_id: Option<Uuid>,
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
        belongs_to = "super::queue_parse::Entity",
        from = "Column::ParseJobId",
        to = "super::queue_parse::Column::Id"
    )]
    QueueParse,
}

impl Related<super::queue_parse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QueueParse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
