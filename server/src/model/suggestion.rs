use chrono::{NaiveDate, Utc};
use sea_orm::PaginatorTrait;
use uuid::Uuid;

use crate::db_core::prelude::*;
use crate::error::{is_unique_violation, AppError, AppResult};

pub struct NewSuggestion<'a> {
    pub user_id: Uuid,
    pub email_id: &'a str,
    pub email_subject: &'a str,
    pub email_snippet: &'a str,
    pub email_from: &'a str,
    pub email_date: DateTimeWithTimeZone,
    pub service_name: &'a str,
    pub price: f64,
    pub currency: &'a str,
    pub billing_cycle: BillingCycle,
    pub next_payment_date: NaiveDate,
    pub confidence_score: f32,
    pub status: SuggestionStatus,
    pub subscription_id: Option<Uuid>,
}

pub struct SuggestionCtrl;

impl SuggestionCtrl {
    pub async fn find_by_user_and_email(
        conn: &DatabaseConnection,
        user_id: Uuid,
        email_id: &str,
    ) -> AppResult<Option<subscription_suggestion::Model>> {
        let suggestion = SubscriptionSuggestion::find()
            .filter(subscription_suggestion::Column::UserId.eq(user_id))
            .filter(subscription_suggestion::Column::EmailId.eq(email_id))
            .one(conn)
            .await?;
        Ok(suggestion)
    }

    /// Inserts one suggestion row. A lost race on the (user_id, email_id)
    /// unique index comes back as `AppError::Conflict`.
    pub async fn insert(
        conn: &DatabaseConnection,
        new: NewSuggestion<'_>,
    ) -> AppResult<subscription_suggestion::Model> {
        let suggestion = subscription_suggestion::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new.user_id),
            email_id: Set(new.email_id.to_string()),
            email_subject: Set(new.email_subject.to_string()),
            email_snippet: Set(new.email_snippet.to_string()),
            email_from: Set(new.email_from.to_string()),
            email_date: Set(new.email_date),
            service_name: Set(new.service_name.to_string()),
            price: Set(new.price),
            currency: Set(new.currency.to_string()),
            billing_cycle: Set(new.billing_cycle),
            next_payment_date: Set(new.next_payment_date),
            confidence_score: Set(new.confidence_score),
            status: Set(new.status),
            subscription_id: Set(new.subscription_id),
            created_at: Set(Utc::now().into()),
        };

        match suggestion.insert(conn).await {
            Ok(model) => Ok(model),
            Err(err) if is_unique_violation(&err) => Err(AppError::Conflict(format!(
                "suggestion already exists for user {} email {}",
                new.user_id, new.email_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn count_pending(conn: &DatabaseConnection, user_id: Uuid) -> AppResult<u64> {
        let count = SubscriptionSuggestion::find()
            .filter(subscription_suggestion::Column::UserId.eq(user_id))
            .filter(subscription_suggestion::Column::Status.eq(SuggestionStatus::Pending))
            .count(conn)
            .await?;
        Ok(count)
    }
}
