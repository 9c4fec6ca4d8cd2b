//! Inbound webhooks: Google token revocation and database
//! suggestion-created events.

use axum::body::Bytes;
use axum::extract::State;
use http::{header, HeaderMap, StatusCode};
use axum::Json;
use sea_orm::ConnectionTrait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db_core::prelude::*;
use crate::error::{AppError, AppResult};
use crate::model::integration::IntegrationCtrl;
use crate::workers::notify::NotificationWorker;
use crate::ServerState;

const REVOCATION_REASON: &str = "User revoked access";
const REVOKED_JOB_REASON: &str = "User revoked Gmail access";

/// Google cross-account protection sends the revoked token either as a form
/// post or as JSON, so both are accepted.
pub async fn revocation(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let Some(token) = parse_revocation_token(content_type, &body) else {
        return Err(AppError::BadRequest("no token in revocation payload".to_string()));
    };

    let Some(integration) = IntegrationCtrl::by_token(&state.conn, &token).await? else {
        // already gone, nothing to revoke
        return Ok((
            StatusCode::OK,
            Json(json!({ "message": "Integration not found" })),
        ));
    };

    IntegrationCtrl::mark_revoked(&state.conn, integration.id, REVOCATION_REASON).await?;
    cancel_open_scan_jobs(&state.conn, integration.user_id).await;

    info!(user_id = %integration.user_id, "integration revoked via webhook");
    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}

/// Pulls the token out of either supported payload shape.
fn parse_revocation_token(content_type: &str, body: &[u8]) -> Option<String> {
    if content_type.starts_with("application/x-www-form-urlencoded") {
        return url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned());
    }

    #[derive(Deserialize)]
    struct JsonPayload {
        token: Option<String>,
        refresh_token: Option<String>,
    }
    let payload: JsonPayload = serde_json::from_slice(body).ok()?;
    payload.token.or(payload.refresh_token)
}

/// Fails any scan job for the user that has not reached a terminal state.
/// Best-effort; the revocation itself has already been recorded.
async fn cancel_open_scan_jobs(conn: &DatabaseConnection, user_id: Uuid) {
    let stmt = Statement::from_sql_and_values(
        DbBackend::Postgres,
        "UPDATE \"queue_scan\" \
         SET status = (CAST('failed' AS job_status)), \
             error_message = $1, \
             completed_at = NOW() \
         WHERE user_id = $2 \
           AND status IN ((CAST('pending' AS job_status)), (CAST('processing' AS job_status)))",
        [REVOKED_JOB_REASON.into(), user_id.into()],
    );
    match conn.execute(stmt).await {
        Ok(result) => {
            if result.rows_affected() > 0 {
                info!(%user_id, cancelled = result.rows_affected(), "open scan jobs cancelled");
            }
        }
        Err(err) => warn!(%user_id, "could not cancel open scan jobs: {err}"),
    }
}

#[derive(Debug, Deserialize)]
pub struct SuggestionCreatedPayload {
    pub record: Option<SuggestionRecord>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionRecord {
    pub user_id: Uuid,
}

/// Database trigger endpoint. Arms a delayed notification batch for the
/// affected user and returns immediately.
pub async fn suggestion_created(
    State(state): State<ServerState>,
    Json(payload): Json<SuggestionCreatedPayload>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let Some(record) = payload.record else {
        return Ok((
            StatusCode::OK,
            Json(json!({ "message": "No record in payload" })),
        ));
    };

    let worker = NotificationWorker::new(
        state.conn.clone(),
        state.http_client.clone(),
        state.config.clone(),
    );
    let user_id = record.user_id;
    tokio::spawn(async move {
        if let Err(err) = worker.handle_suggestion_created(user_id).await {
            error!(%user_id, "notification batch failed: {err}");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_payload_yields_token() {
        let body = b"token=ya29.abc123&other=x";
        assert_eq!(
            parse_revocation_token("application/x-www-form-urlencoded", body),
            Some("ya29.abc123".to_string())
        );
    }

    #[test]
    fn json_payload_prefers_token_over_refresh_token() {
        let body = br#"{"token":"a","refresh_token":"b"}"#;
        assert_eq!(
            parse_revocation_token("application/json", body),
            Some("a".to_string())
        );
        let body = br#"{"refresh_token":"b"}"#;
        assert_eq!(
            parse_revocation_token("application/json", body),
            Some("b".to_string())
        );
    }

    #[test]
    fn unusable_payloads_yield_none() {
        assert_eq!(parse_revocation_token("application/json", b"{}"), None);
        assert_eq!(parse_revocation_token("text/plain", b"hello"), None);
        assert_eq!(
            parse_revocation_token("application/x-www-form-urlencoded", b"other=x"),
            None
        );
    }
}
