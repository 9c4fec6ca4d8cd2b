use std::env;
use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

use crate::push::fcm::ServiceAccount;

/// Runtime configuration, assembled once at startup and passed explicitly to
/// workers and handlers. File-backed settings come from `config/config.toml`
/// (overridable per-key with `CFG_`-prefixed environment variables); secrets
/// come from the environment only.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub scan: ScanConfig,
    pub parse: ParseConfig,
    pub ingest: IngestConfig,
    pub notify: NotifyConfig,
    pub queue: QueueConfig,
    pub google: GoogleConfig,
    pub service_account: ServiceAccount,
    pub model_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    pub max_messages: usize,
    pub page_size: u32,
    pub fetch_batch_size: usize,
    pub fetch_delay_ms: u64,
    pub deep_lookback_days: i64,
    pub incremental_lookback_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStrategy {
    Heuristic,
    Model,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParseConfig {
    pub strategy: ParseStrategy,
    pub batch_size: u64,
    pub heuristic_min_confidence: f32,
    pub model_min_confidence: f32,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub endpoint: String,
    pub id: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub batch_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub batch_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub visibility_timeout_secs: i64,
    pub reaper_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleFileConfig {
    pub token_uri: String,
    pub userinfo_uri: String,
    /// Redirect URI registered for the browser callback flow.
    pub callback_uri: String,
    pub scopes: Vec<String>,
}

/// `GoogleFileConfig` joined with the client credentials from the
/// environment.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
    pub userinfo_uri: String,
    pub callback_uri: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    scan: ScanConfig,
    parse: ParseConfig,
    ingest: IngestConfig,
    notify: NotifyConfig,
    queue: QueueConfig,
    google: GoogleFileConfig,
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<ServerConfig> {
        let config_dir = match env::var("APP_DIR") {
            Ok(dir) => PathBuf::from(dir).join("config"),
            Err(_) => PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .parent()
                .context("server crate has no parent directory")?
                .join("config"),
        };
        let config_path = config_dir.join("config.toml");

        let file: ConfigFile = config::Config::builder()
            .add_source(config::File::from(config_path.as_path()))
            .add_source(config::Environment::with_prefix("CFG").separator("__"))
            .build()
            .with_context(|| format!("failed to read config from {}", config_path.display()))?
            .try_deserialize()
            .context("config file did not match the expected shape")?;

        let google = GoogleConfig {
            client_id: require_env("GOOGLE_CLIENT_ID")?,
            client_secret: require_env("GOOGLE_CLIENT_SECRET")?,
            token_uri: file.google.token_uri,
            userinfo_uri: file.google.userinfo_uri,
            callback_uri: file.google.callback_uri,
            scopes: file.google.scopes,
        };

        let service_account: ServiceAccount =
            serde_json::from_str(&require_env("GOOGLE_SERVICE_ACCOUNT_JSON")?)
                .context("GOOGLE_SERVICE_ACCOUNT_JSON is not valid service account JSON")?;

        let model_api_key = env::var("MODEL_API_KEY").ok();
        if file.parse.strategy == ParseStrategy::Model && model_api_key.is_none() {
            anyhow::bail!("parse.strategy is \"model\" but MODEL_API_KEY is not set");
        }

        Ok(ServerConfig {
            scan: file.scan,
            parse: file.parse,
            ingest: file.ingest,
            notify: file.notify,
            queue: file.queue,
            google,
            service_account,
            model_api_key,
        })
    }
}

fn require_env(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("missing required environment variable {name}"))
}
