//! Stage 4: push notification batching.
//!
//! Each suggestion-created event arms a fixed delay. When it fires, one
//! notification summarizes every suggestion still pending for the user, so
//! a burst of detections from one scan collapses into a handful of pushes
//! instead of one per suggestion.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sea_orm::DatabaseConnection;

use crate::error::AppResult;
use crate::model::device::DeviceCtrl;
use crate::model::suggestion::SuggestionCtrl;
use crate::push::fcm;
use crate::server_config::ServerConfig;

const NOTIFICATION_TITLE: &str = "🎉 New Subscriptions Found!";

pub struct NotificationWorker {
    conn: Arc<DatabaseConnection>,
    http_client: HttpClient,
    config: Arc<ServerConfig>,
}

impl NotificationWorker {
    pub fn new(
        conn: Arc<DatabaseConnection>,
        http_client: HttpClient,
        config: Arc<ServerConfig>,
    ) -> Self {
        NotificationWorker {
            conn,
            http_client,
            config,
        }
    }

    /// Sleeps out the batching delay, then notifies every logged-in device.
    /// Intended to run on its own task per event.
    pub async fn handle_suggestion_created(&self, user_id: Uuid) -> AppResult<()> {
        tokio::time::sleep(Duration::from_secs(self.config.notify.batch_delay_secs)).await;
        self.flush(user_id).await
    }

    /// One delivery pass over the user's pending suggestions. Sends nothing
    /// when none are left by the time the delay elapses.
    async fn flush(&self, user_id: Uuid) -> AppResult<()> {
        let pending = SuggestionCtrl::count_pending(&self.conn, user_id).await?;
        if pending == 0 {
            debug!(%user_id, "no pending suggestions left, skipping notification");
            return Ok(());
        }

        let tokens = DeviceCtrl::logged_in_tokens(&self.conn, user_id).await?;
        if tokens.is_empty() {
            debug!(%user_id, "no logged-in devices, skipping notification");
            return Ok(());
        }

        let access_token =
            fcm::fetch_access_token(&self.http_client, &self.config.service_account).await?;

        let body = notification_body(pending);
        let data = json!({
            "type": "suggestions",
            "count": pending.to_string(),
        });

        let mut sent = 0;
        let mut failed = 0;
        for token in &tokens {
            match fcm::send_notification(
                &self.http_client,
                &access_token,
                &self.config.service_account.project_id,
                token,
                NOTIFICATION_TITLE,
                &body,
                &data,
            )
            .await
            {
                Ok(()) => sent += 1,
                Err(err) => {
                    failed += 1;
                    warn!(%user_id, "push delivery failed: {err}");
                }
            }
        }

        info!(%user_id, pending, sent, failed, "notification batch flushed");
        Ok(())
    }
}

pub fn notification_body(count: u64) -> String {
    let plural = if count == 1 { "" } else { "s" };
    format!("We found {count} subscription{plural} for you to review")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use sea_orm::{DatabaseBackend, MockDatabase, Value};

    use crate::server_config::{
        GoogleConfig, IngestConfig, ModelConfig, NotifyConfig, ParseConfig, ParseStrategy,
        QueueConfig, ScanConfig,
    };

    use super::*;

    #[test]
    fn body_pluralizes_on_count() {
        assert_eq!(
            notification_body(1),
            "We found 1 subscription for you to review"
        );
        assert_eq!(
            notification_body(4),
            "We found 4 subscriptions for you to review"
        );
    }

    fn config_fixture() -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            scan: ScanConfig {
                max_messages: 500,
                page_size: 100,
                fetch_batch_size: 50,
                fetch_delay_ms: 0,
                deep_lookback_days: 365,
                incremental_lookback_days: 2,
            },
            parse: ParseConfig {
                strategy: ParseStrategy::Heuristic,
                batch_size: 50,
                heuristic_min_confidence: 0.6,
                model_min_confidence: 0.7,
                model: ModelConfig {
                    endpoint: String::new(),
                    id: String::new(),
                    temperature: 0.0,
                    max_tokens: 1,
                },
            },
            ingest: IngestConfig { batch_size: 50 },
            notify: NotifyConfig { batch_delay_secs: 0 },
            queue: QueueConfig {
                visibility_timeout_secs: 900,
                reaper_interval_secs: 60,
            },
            google: GoogleConfig {
                client_id: String::new(),
                client_secret: String::new(),
                token_uri: String::new(),
                userinfo_uri: String::new(),
                callback_uri: String::new(),
                scopes: Vec::new(),
            },
            service_account: fcm::ServiceAccount {
                project_id: "test-project".to_string(),
                client_email: "svc@test-project.iam.gserviceaccount.com".to_string(),
                private_key: String::new(),
                token_uri: String::new(),
            },
            model_api_key: None,
        })
    }

    #[tokio::test]
    async fn no_pending_suggestions_sends_nothing() {
        // one count query; device lookup and the FCM exchange would run out
        // of mock results, so reaching them fails the test
        let count_row = BTreeMap::from([("num_items", Value::BigInt(Some(0)))]);
        let conn = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![count_row]])
                .into_connection(),
        );

        let worker = NotificationWorker::new(conn, HttpClient::new(), config_fixture());
        worker.flush(Uuid::new_v4()).await.unwrap();
    }
}
