use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::Expr;
use uuid::Uuid;

use crate::db_core::prelude::*;
use crate::error::AppResult;

pub struct SubscriptionCtrl;

impl SubscriptionCtrl {
    /// Fuzzy-matches the user's active subscriptions by name,
    /// case-insensitively. Returns the first hit.
    pub async fn find_active_matching(
        conn: &DatabaseConnection,
        user_id: Uuid,
        service_name: &str,
    ) -> AppResult<Option<subscription::Model>> {
        let pattern = format!("%{}%", escape_like(service_name));
        let matched = Subscription::find()
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::Status.eq("active"))
            .filter(Expr::col(subscription::Column::Name).ilike(pattern))
            .one(conn)
            .await?;
        Ok(matched)
    }
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase};

    use super::*;

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("100% Music_Club"), "100\\% Music\\_Club");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }

    #[tokio::test]
    async fn name_match_returns_the_first_active_hit() {
        let sub = subscription::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Netflix".to_string(),
            price: 15.99,
            currency: "USD".to_string(),
            billing_cycle: BillingCycle::Monthly,
            status: "active".to_string(),
            next_payment_date: None,
            created_at: chrono::Utc
                .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
                .unwrap()
                .into(),
        };
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![sub.clone()]])
            .into_connection();

        let matched = SubscriptionCtrl::find_active_matching(&conn, sub.user_id, "netflix")
            .await
            .unwrap();
        assert_eq!(matched, Some(sub));
    }
}
