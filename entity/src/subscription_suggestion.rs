use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::{BillingCycle, SuggestionStatus};

/// A candidate subscription awaiting user approval. Unique on
/// (user_id, email_id); the ingest worker checks before inserting.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscription_suggestion")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub email_id: String,
    pub email_subject: String,
    pub email_snippet: String,
    pub email_from: String,
    pub email_date: DateTimeWithTimeZone,
    pub service_name: String,
    #[sea_orm(column_type = "Double")]
    pub price: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub next_payment_date: Date,
    #[sea_orm(column_type = "Float")]
    pub confidence_score: f32,
    pub status: SuggestionStatus,
    /// Set when an unchanged detection was auto-merged into an existing
    /// subscription.
    pub subscription_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::subscription::Entity",
        from = "Column::SubscriptionId",
        to = "super::subscription::Column::Id"
    )]
    Subscription,
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
