use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::{JobStatus, ScanType};

/// Stage 1 queue: one row per requested inbox scan.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_scan")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: Uuid,
    pub scan_type: ScanType,
    pub priority: i32,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::queue_parse::Entity")]
    QueueParse,
}

impl Related<super::queue_parse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QueueParse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
