mod auth;
mod classify;
mod db_core;
mod error;
mod gmail;
mod model;
mod push;
mod queue;
mod routes;
mod server_config;
mod workers;

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use axum::extract::FromRef;
use axum::Router;
use mimalloc::MiMalloc;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::{signal, task::JoinHandle};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::classify::Classifier;
use crate::queue::JobQueue;
use crate::routes::app_router::AppRouter;
use crate::server_config::ServerConfig;
use crate::workers::ingest::IngestWorker;
use crate::workers::parse::ParseWorker;
use crate::workers::scan::{self, ScanWorker};
use db_core::prelude::*;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

const SCAN_POLL_SECS: u64 = 30;
const PARSE_POLL_SECS: u64 = 15;
const INGEST_POLL_SECS: u64 = 10;
const DAILY_SCAN_SCHEDULE: &str = "0 0 6 * * *";

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub http_client: HttpClient,
    pub conn: Arc<DatabaseConnection>,
    pub config: Arc<ServerConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let config = Arc::new(ServerConfig::load()?);

    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL is not set in .env file");
    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);
    let conn = Arc::new(
        Database::connect(db_options)
            .await
            .expect("Database connection failed"),
    );

    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .timeout(Duration::from_secs(30))
        .build()?;

    let state = ServerState {
        http_client: http_client.clone(),
        conn: conn.clone(),
        config: config.clone(),
    };

    let classifier = Arc::new(Classifier::from_config(
        &config.parse,
        http_client.clone(),
        config.model_api_key.clone(),
    )?);

    let scan_worker = Arc::new(ScanWorker::new(
        conn.clone(),
        http_client.clone(),
        config.clone(),
    ));
    let parse_worker = Arc::new(ParseWorker::new(
        conn.clone(),
        classifier,
        config.parse.batch_size,
    ));
    let ingest_worker = Arc::new(IngestWorker::new(conn.clone(), config.ingest.batch_size));

    let mut scheduler = JobScheduler::new()
        .await
        .expect("Failed to create scheduler");

    {
        let worker = scan_worker.clone();
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(SCAN_POLL_SECS),
                move |_uuid, _l| {
                    let worker = worker.clone();
                    Box::pin(async move { worker.tick().await })
                },
            )?)
            .await?;

        let worker = parse_worker.clone();
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(PARSE_POLL_SECS),
                move |_uuid, _l| {
                    let worker = worker.clone();
                    Box::pin(async move { worker.tick().await })
                },
            )?)
            .await?;

        let worker = ingest_worker.clone();
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(INGEST_POLL_SECS),
                move |_uuid, _l| {
                    let worker = worker.clone();
                    Box::pin(async move { worker.tick().await })
                },
            )?)
            .await?;

        let conn_clone = conn.clone();
        let queue_cfg = config.queue.clone();
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(config.queue.reaper_interval_secs),
                move |_uuid, _l| {
                    let conn = conn_clone.clone();
                    let timeout = queue_cfg.visibility_timeout_secs;
                    Box::pin(async move { release_stale_jobs(conn, timeout).await })
                },
            )?)
            .await?;

        let conn_clone = conn.clone();
        scheduler
            .add(Job::new_async(DAILY_SCAN_SCHEDULE, move |_uuid, _l| {
                let conn = conn_clone.clone();
                Box::pin(async move {
                    if let Err(err) = scan::enqueue_daily_scans(&conn).await {
                        tracing::error!("daily scan enqueue failed: {err}");
                    }
                })
            })?)
            .await?;
    }

    match scheduler.start().await {
        Ok(_) => tracing::info!("scheduler started"),
        Err(e) => tracing::error!("Failed to start scheduler: {e:?}"),
    }

    let router = AppRouter::create(state);
    run_server(router, scheduler).await?;

    Ok(())
}

/// Returns timed-out processing jobs in every queue to pending.
async fn release_stale_jobs(conn: Arc<DatabaseConnection>, visibility_timeout_secs: i64) {
    let scan_queue = JobQueue::<queue_scan::Entity>::new(conn.clone());
    let parse_queue = JobQueue::<queue_parse::Entity>::new(conn.clone());
    let ingest_queue = JobQueue::<queue_ingest::Entity>::new(conn);
    let released = futures::join!(
        scan_queue.release_stale(visibility_timeout_secs),
        parse_queue.release_stale(visibility_timeout_secs),
        ingest_queue.release_stale(visibility_timeout_secs),
    );

    let mut total = 0;
    for result in [released.0, released.1, released.2] {
        match result {
            Ok(count) => total += count,
            Err(err) => tracing::error!("stale job release failed: {err}"),
        }
    }
    if total > 0 {
        tracing::warn!(total, "released stale jobs back to pending");
    }
}

fn run_server(router: Router, scheduler: JobScheduler) -> JoinHandle<()> {
    tokio::spawn(async {
        let port = env::var("PORT").unwrap_or("5006".to_string());
        tracing::info!("Subscription pipeline server running on http://0.0.0.0:{port}");

        let addr = SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>().unwrap()));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(scheduler))
            .await
            .unwrap();
    })
}

async fn shutdown_signal(mut scheduler: JobScheduler) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    if let Err(err) = scheduler.shutdown().await {
        tracing::error!("scheduler shutdown failed: {err:?}");
    }
    tracing::info!("shutting down");
}
