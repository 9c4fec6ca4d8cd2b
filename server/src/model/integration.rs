use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::db_core::prelude::*;
use crate::error::{AppError, AppResult};

pub const GOOGLE_PROVIDER: &str = "google";

pub struct IntegrationCtrl;

impl IntegrationCtrl {
    pub async fn get_active(
        conn: &DatabaseConnection,
        user_id: Uuid,
        provider: &str,
    ) -> AppResult<Option<user_integration::Model>> {
        let integration = UserIntegration::find()
            .filter(user_integration::Column::UserId.eq(user_id))
            .filter(user_integration::Column::Provider.eq(provider))
            .filter(user_integration::Column::Status.eq(IntegrationStatus::Active))
            .one(conn)
            .await?;
        Ok(integration)
    }

    pub async fn all_active(
        conn: &DatabaseConnection,
        provider: &str,
    ) -> AppResult<Vec<user_integration::Model>> {
        let integrations = UserIntegration::find()
            .filter(user_integration::Column::Provider.eq(provider))
            .filter(user_integration::Column::Status.eq(IntegrationStatus::Active))
            .all(conn)
            .await?;
        Ok(integrations)
    }

    pub async fn by_id(conn: &DatabaseConnection, id: Uuid) -> AppResult<user_integration::Model> {
        UserIntegration::find_by_id(id)
            .one(conn)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Looks an integration up by either of its stored tokens. Used by the
    /// revocation webhook, which only knows the token Google reported.
    pub async fn by_token(
        conn: &DatabaseConnection,
        token: &str,
    ) -> AppResult<Option<user_integration::Model>> {
        let integration = UserIntegration::find()
            .filter(
                Condition::any()
                    .add(user_integration::Column::AccessToken.eq(token))
                    .add(user_integration::Column::RefreshToken.eq(token)),
            )
            .one(conn)
            .await?;
        Ok(integration)
    }

    /// Creates or replaces the user's integration row for `provider`.
    /// Reconnecting overwrites tokens and clears any previous error state.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_connected(
        conn: &DatabaseConnection,
        user_id: Uuid,
        provider: &str,
        provider_user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in_secs: i64,
        scopes: &[String],
    ) -> AppResult<()> {
        let now = Utc::now();
        let integration = user_integration::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider: Set(provider.to_string()),
            provider_user_id: Set(provider_user_id.to_string()),
            access_token: Set(Some(access_token.to_string())),
            refresh_token: Set(refresh_token.map(str::to_string)),
            token_expires_at: Set((now + Duration::seconds(expires_in_secs)).into()),
            scopes: Set(serde_json::json!(scopes)),
            status: Set(IntegrationStatus::Active),
            last_scan_at: Set(None),
            last_error: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        UserIntegration::insert(integration)
            .on_conflict(
                OnConflict::columns([
                    user_integration::Column::UserId,
                    user_integration::Column::Provider,
                ])
                .update_columns([
                    user_integration::Column::ProviderUserId,
                    user_integration::Column::AccessToken,
                    user_integration::Column::RefreshToken,
                    user_integration::Column::TokenExpiresAt,
                    user_integration::Column::Scopes,
                    user_integration::Column::Status,
                    user_integration::Column::LastError,
                    user_integration::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec(conn)
            .await?;

        Ok(())
    }

    pub async fn record_refreshed(
        conn: &DatabaseConnection,
        id: Uuid,
        access_token: &str,
        expires_in_secs: i64,
    ) -> AppResult<()> {
        let now = Utc::now();
        let update = user_integration::ActiveModel {
            id: Set(id),
            access_token: Set(Some(access_token.to_string())),
            token_expires_at: Set((now + Duration::seconds(expires_in_secs)).into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        UserIntegration::update(update).exec(conn).await?;
        Ok(())
    }

    /// Drops the integration into `revoked` and wipes both tokens.
    pub async fn mark_revoked(conn: &DatabaseConnection, id: Uuid, reason: &str) -> AppResult<()> {
        let update = user_integration::ActiveModel {
            id: Set(id),
            status: Set(IntegrationStatus::Revoked),
            access_token: Set(None),
            refresh_token: Set(None),
            last_error: Set(Some(reason.to_string())),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        UserIntegration::update(update).exec(conn).await?;
        Ok(())
    }

    pub async fn touch_last_scan(conn: &DatabaseConnection, id: Uuid) -> AppResult<()> {
        let now = Utc::now();
        let update = user_integration::ActiveModel {
            id: Set(id),
            last_scan_at: Set(Some(now.into())),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        UserIntegration::update(update).exec(conn).await?;
        Ok(())
    }
}
