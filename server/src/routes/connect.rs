//! Gmail connect flow and manual rescans.
//!
//! Two entry points end up in the same place: the app POSTs an authorization
//! code directly, or Google redirects the browser to the callback with the
//! user id smuggled through the `state` parameter. Both exchange the code,
//! store the integration and enqueue an initial scan.

use axum::extract::{Query, State};
use axum::response::Html;
use axum::Json;
use indoc::formatdoc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::jwt::Claims;
use crate::auth::oauth;
use crate::db_core::prelude::*;
use crate::error::{AppError, AppJsonResult, AppResult};
use crate::model::integration::{IntegrationCtrl, GOOGLE_PROVIDER};
use crate::workers::scan::{enqueue_scan, PRIORITY_MANUAL};
use crate::ServerState;

#[derive(Debug, Deserialize)]
pub struct ConnectPayload {
    pub code: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scan_type: Option<ScanType>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub success: bool,
    pub email: String,
    pub scan_job_id: i64,
    pub scan_type: ScanType,
    pub estimated_time: &'static str,
}

pub async fn connect_google(
    claims: Claims,
    State(state): State<ServerState>,
    Json(payload): Json<ConnectPayload>,
) -> AppJsonResult<ConnectResponse> {
    let scan_type = payload.scan_type.unwrap_or(ScanType::Deep365Day);
    let outcome = run_connect_flow(
        &state,
        claims.sub,
        &payload.code,
        &payload.redirect_uri,
        scan_type,
    )
    .await?;

    Ok(Json(ConnectResponse {
        success: true,
        estimated_time: estimated_time(&outcome.scan_type),
        email: outcome.email,
        scan_job_id: outcome.scan_job_id,
        scan_type: outcome.scan_type,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    /// Carries the connecting user's id across the redirect.
    pub state: Option<Uuid>,
    pub error: Option<String>,
}

pub async fn oauth_callback(
    State(state): State<ServerState>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Html<String>> {
    if let Some(error) = query.error {
        return Ok(result_page("Connection failed", &format!("Google reported: {error}")));
    }
    let (Some(code), Some(user_id)) = (query.code, query.state) else {
        return Err(AppError::BadRequest(
            "callback is missing code or state".to_string(),
        ));
    };

    let redirect_uri = state.config.google.callback_uri.clone();
    let outcome =
        run_connect_flow(&state, user_id, &code, &redirect_uri, ScanType::Manual).await?;

    Ok(result_page(
        "Gmail connected",
        &format!(
            "Connected {}. Your inbox scan has started and should finish in {}. \
             You can close this window.",
            outcome.email,
            estimated_time(&outcome.scan_type)
        ),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RescanPayload {
    #[serde(default)]
    pub scan_type: Option<ScanType>,
}

#[derive(Debug, Serialize)]
pub struct RescanResponse {
    pub success: bool,
    pub scan_job_id: i64,
    pub scan_type: ScanType,
    pub estimated_time: &'static str,
}

/// Queues a manual scan for an already-connected user.
pub async fn request_rescan(
    claims: Claims,
    State(state): State<ServerState>,
    Json(payload): Json<RescanPayload>,
) -> AppJsonResult<RescanResponse> {
    if IntegrationCtrl::get_active(&state.conn, claims.sub, GOOGLE_PROVIDER)
        .await?
        .is_none()
    {
        return Err(AppError::BadRequest(
            "no active Gmail connection for this account".to_string(),
        ));
    }

    let scan_type = payload.scan_type.unwrap_or(ScanType::Manual);
    let scan_job_id = enqueue_scan(&state.conn, claims.sub, scan_type.clone(), PRIORITY_MANUAL).await?;

    Ok(Json(RescanResponse {
        success: true,
        scan_job_id,
        estimated_time: estimated_time(&scan_type),
        scan_type,
    }))
}

struct ConnectOutcome {
    email: String,
    scan_job_id: i64,
    scan_type: ScanType,
}

async fn run_connect_flow(
    state: &ServerState,
    user_id: Uuid,
    code: &str,
    redirect_uri: &str,
    scan_type: ScanType,
) -> AppResult<ConnectOutcome> {
    let tokens =
        oauth::exchange_code(&state.http_client, &state.config.google, code, redirect_uri).await?;
    let userinfo =
        oauth::fetch_userinfo(&state.http_client, &state.config.google, &tokens.access_token)
            .await?;

    let scopes: Vec<String> = tokens.scope.split_whitespace().map(str::to_string).collect();
    IntegrationCtrl::upsert_connected(
        &state.conn,
        user_id,
        GOOGLE_PROVIDER,
        &userinfo.id,
        &tokens.access_token,
        tokens.refresh_token.as_deref(),
        tokens.expires_in,
        &scopes,
    )
    .await?;

    let scan_job_id = enqueue_scan(&state.conn, user_id, scan_type.clone(), PRIORITY_MANUAL).await?;

    info!(%user_id, email = %userinfo.email, scan_job_id, "gmail connected");

    Ok(ConnectOutcome {
        email: userinfo.email,
        scan_job_id,
        scan_type,
    })
}

fn estimated_time(scan_type: &ScanType) -> &'static str {
    match scan_type {
        ScanType::Deep365Day | ScanType::Manual => "5-10 minutes",
        ScanType::Daily2Day => "1-2 minutes",
    }
}

fn result_page(title: &str, message: &str) -> Html<String> {
    Html(formatdoc! {r#"
        <!DOCTYPE html>
        <html>
          <head>
            <meta charset="utf-8">
            <title>{title}</title>
            <style>
              body {{ font-family: sans-serif; max-width: 32rem; margin: 4rem auto; }}
            </style>
          </head>
          <body>
            <h1>{title}</h1>
            <p>{message}</p>
          </body>
        </html>
    "#})
}
