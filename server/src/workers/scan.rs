//! Stage 1: mailbox scanning.
//!
//! Claims one scan job at a time, searches the user's Gmail with the
//! subscription query, fetches metadata for each hit and enqueues parse
//! jobs. The access token is refreshed in place when expired.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use reqwest::Client as HttpClient;
use tracing::{error, info, warn};

use crate::auth::oauth;
use crate::db_core::prelude::*;
use crate::error::{AppError, AppResult};
use crate::gmail::client::GmailClient;
use crate::gmail::query::build_search_query;
use crate::model::integration::{IntegrationCtrl, GOOGLE_PROVIDER};
use crate::model::scan_history::ScanHistoryCtrl;
use crate::queue::{generate_worker_id, JobQueue, SCAN_CLAIM_BATCH};
use crate::server_config::ServerConfig;

pub const PRIORITY_MANUAL: i32 = 1;
pub const PRIORITY_SCHEDULED: i32 = 5;

/// Inserts a pending scan job and its history row.
pub async fn enqueue_scan(
    conn: &DatabaseConnection,
    user_id: uuid::Uuid,
    scan_type: ScanType,
    priority: i32,
) -> AppResult<i64> {
    let job = queue_scan::ActiveModel {
        user_id: Set(user_id),
        scan_type: Set(scan_type.clone()),
        priority: Set(priority),
        status: Set(JobStatus::Pending),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    };
    let result = QueueScan::insert(job).exec(conn).await?;
    let scan_job_id = result.last_insert_id;

    if let Err(err) = ScanHistoryCtrl::insert_running(conn, user_id, scan_job_id, scan_type).await {
        warn!(scan_job_id, "could not insert scan history: {err}");
    }

    Ok(scan_job_id)
}

/// Queues an incremental scan for every user with an active integration.
/// Runs once a day from the scheduler.
pub async fn enqueue_daily_scans(conn: &DatabaseConnection) -> AppResult<usize> {
    let integrations = IntegrationCtrl::all_active(conn, GOOGLE_PROVIDER).await?;
    let mut queued = 0;
    for integration in integrations {
        enqueue_scan(
            conn,
            integration.user_id,
            ScanType::Daily2Day,
            PRIORITY_SCHEDULED,
        )
        .await?;
        queued += 1;
    }
    info!(queued, "daily scans enqueued");
    Ok(queued)
}

pub struct ScanWorker {
    conn: Arc<DatabaseConnection>,
    http_client: HttpClient,
    config: Arc<ServerConfig>,
    queue: JobQueue<queue_scan::Entity>,
}

impl ScanWorker {
    pub fn new(
        conn: Arc<DatabaseConnection>,
        http_client: HttpClient,
        config: Arc<ServerConfig>,
    ) -> Self {
        ScanWorker {
            queue: JobQueue::new(conn.clone()),
            conn,
            http_client,
            config,
        }
    }

    /// Drains the scan queue. Called from the scheduler.
    pub async fn tick(&self) {
        loop {
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    error!("scan tick aborted: {err}");
                    break;
                }
            }
        }
    }

    /// Claims and processes at most one job under a fresh worker id.
    /// Returns false when the queue was empty.
    pub async fn run_once(&self) -> AppResult<bool> {
        let worker_id = generate_worker_id("scanning");
        let mut claimed = self.queue.claim(&worker_id, SCAN_CLAIM_BATCH).await?;
        let Some(job) = claimed.pop() else {
            return Ok(false);
        };

        info!(
            %worker_id,
            job_id = job.id,
            user_id = %job.user_id,
            scan_type = ?job.scan_type,
            "claimed scan job"
        );

        if let Err(err) = self.process(&job).await {
            let reason = match &err {
                AppError::Oauth2(token_err) => format!("Token refresh failed: {token_err}"),
                other => other.to_string(),
            };
            warn!(job_id = job.id, "scan job failed: {reason}");
            self.queue.fail(job.id, &reason).await?;
            if let Err(history_err) = ScanHistoryCtrl::mark_failed(&self.conn, job.id).await {
                warn!(job_id = job.id, "could not mark scan history failed: {history_err}");
            }
        }

        Ok(true)
    }

    async fn process(&self, job: &queue_scan::Model) -> AppResult<()> {
        let Some(integration) =
            IntegrationCtrl::get_active(&self.conn, job.user_id, GOOGLE_PROVIDER).await?
        else {
            // terminal without user action, so fail rather than retry
            self.queue.fail(job.id, "No active Google integration").await?;
            if let Err(err) = ScanHistoryCtrl::mark_failed(&self.conn, job.id).await {
                warn!(job_id = job.id, "could not mark scan history failed: {err}");
            }
            return Ok(());
        };

        let access_token = self.ensure_fresh_token(&integration).await?;
        let gmail = GmailClient::new(self.http_client.clone(), access_token);

        let query = build_search_query(&job.scan_type, Utc::now(), &self.config.scan);
        let message_ids = gmail
            .list_message_ids(
                &query,
                self.config.scan.page_size,
                self.config.scan.max_messages,
            )
            .await?;

        info!(job_id = job.id, count = message_ids.len(), "search finished");

        let fetched = self.enqueue_parse_jobs(&gmail, job, &message_ids).await?;

        if let Err(err) = ScanHistoryCtrl::mark_completed(&self.conn, job.id, fetched as i32).await {
            warn!(job_id = job.id, "could not update scan history: {err}");
        }

        self.queue.complete(job.id).await?;
        if let Err(err) = IntegrationCtrl::touch_last_scan(&self.conn, integration.id).await {
            warn!(job_id = job.id, "could not update last_scan_at: {err}");
        }

        info!(job_id = job.id, fetched, "scan job completed");
        Ok(())
    }

    /// Fetches metadata in batches with a small delay between them, skipping
    /// messages that fail individually, and bulk-inserts the parse jobs.
    async fn enqueue_parse_jobs(
        &self,
        gmail: &GmailClient,
        job: &queue_scan::Model,
        message_ids: &[String],
    ) -> AppResult<usize> {
        let mut seen = HashSet::new();
        let mut parse_jobs = Vec::new();

        for chunk in message_ids.chunks(self.config.scan.fetch_batch_size) {
            for message_id in chunk {
                if !seen.insert(message_id.clone()) {
                    continue;
                }
                let meta = match gmail.get_message_metadata(message_id).await {
                    Ok(meta) => meta,
                    Err(err) => {
                        warn!(job_id = job.id, %message_id, "metadata fetch failed: {err}");
                        continue;
                    }
                };

                parse_jobs.push(queue_parse::ActiveModel {
                    user_id: Set(job.user_id),
                    scan_job_id: Set(job.id),
                    email_id: Set(meta.id.clone()),
                    email_subject: Set(meta.header("Subject").unwrap_or_default().to_string()),
                    email_snippet: Set(meta.snippet.clone()),
                    email_from: Set(meta.header("From").unwrap_or_default().to_string()),
                    email_date: Set(meta.received_at().into()),
                    status: Set(JobStatus::Pending),
                    created_at: Set(Utc::now().into()),
                    ..Default::default()
                });
            }
            tokio::time::sleep(Duration::from_millis(self.config.scan.fetch_delay_ms)).await;
        }

        let fetched = parse_jobs.len();
        if fetched > 0 {
            if let Err(err) = QueueParse::insert_many(parse_jobs).exec(&*self.conn).await {
                // the scan itself succeeded; losing the batch is logged, not fatal
                error!(job_id = job.id, "parse job insert failed: {err}");
            }
        }
        Ok(fetched)
    }

    /// Returns a usable access token, refreshing when the stored one has
    /// expired. If the refresh loses a race with a concurrent scan, the
    /// token the winner persisted is used instead.
    async fn ensure_fresh_token(
        &self,
        integration: &user_integration::Model,
    ) -> AppResult<String> {
        let now = Utc::now();
        if integration.token_expires_at > now {
            if let Some(token) = &integration.access_token {
                return Ok(token.clone());
            }
        }

        let Some(refresh_token) = &integration.refresh_token else {
            return Err(AppError::Internal(anyhow!(
                "integration {} has no refresh token",
                integration.id
            )));
        };

        match oauth::exchange_refresh_token(&self.http_client, &self.config.google, refresh_token)
            .await
        {
            Ok(refreshed) => {
                IntegrationCtrl::record_refreshed(
                    &self.conn,
                    integration.id,
                    &refreshed.access_token,
                    refreshed.expires_in,
                )
                .await?;
                Ok(refreshed.access_token)
            }
            Err(err) => {
                let current = IntegrationCtrl::by_id(&self.conn, integration.id).await?;
                if current.token_expires_at > Utc::now() {
                    if let Some(token) = current.access_token {
                        info!(
                            integration_id = %integration.id,
                            "refresh lost a race, reusing concurrently refreshed token"
                        );
                        return Ok(token);
                    }
                }
                Err(err.into())
            }
        }
    }
}
