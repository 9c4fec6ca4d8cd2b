//! Stage 2: classification.
//!
//! Claims parse jobs in batches, runs the configured classifier over the
//! stored metadata and either enqueues an ingest job or skips with a
//! recorded reason. Jobs in one batch are independent; one failure never
//! poisons the rest.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::classify::{acceptance_gate, AcceptedExtraction, CandidateMessage, Classifier};
use crate::db_core::prelude::*;
use crate::error::AppResult;
use crate::queue::{generate_worker_id, JobQueue};

pub struct ParseWorker {
    conn: Arc<DatabaseConnection>,
    queue: JobQueue<queue_parse::Entity>,
    classifier: Arc<Classifier>,
    batch_size: u64,
}

impl ParseWorker {
    pub fn new(conn: Arc<DatabaseConnection>, classifier: Arc<Classifier>, batch_size: u64) -> Self {
        ParseWorker {
            queue: JobQueue::new(conn.clone()),
            conn,
            classifier,
            batch_size,
        }
    }

    pub async fn tick(&self) {
        loop {
            match self.run_once().await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) => {
                    error!("parse tick aborted: {err}");
                    break;
                }
            }
        }
    }

    /// Claims and processes one batch under a fresh worker id. Returns the
    /// number of jobs claimed.
    pub async fn run_once(&self) -> AppResult<usize> {
        let worker_id = generate_worker_id("parsing");
        let jobs = self.queue.claim(&worker_id, self.batch_size).await?;
        if jobs.is_empty() {
            return Ok(0);
        }

        info!(%worker_id, count = jobs.len(), "claimed parse batch");

        for job in &jobs {
            if let Err(err) = self.process(job).await {
                error!(job_id = job.id, "parse job left in processing: {err}");
            }
        }

        Ok(jobs.len())
    }

    async fn process(&self, job: &queue_parse::Model) -> AppResult<()> {
        let msg = CandidateMessage {
            subject: &job.email_subject,
            snippet: &job.email_snippet,
            sender: &job.email_from,
        };

        let classification = match self.classifier.classify(&msg).await {
            Ok(c) => c,
            Err(err) => {
                self.queue.fail(job.id, &err.to_string()).await?;
                return Ok(());
            }
        };

        let extraction = match acceptance_gate(&classification, self.classifier.min_confidence()) {
            Ok(extraction) => extraction,
            Err(reason) => {
                debug!(job_id = job.id, "skipping: {reason}");
                self.queue.skip(job.id, &reason.to_string()).await?;
                return Ok(());
            }
        };

        if let Err(err) = self.enqueue_ingest_job(job, &extraction).await {
            self.queue
                .fail(job.id, &format!("Failed to create ingest job: {err}"))
                .await?;
            return Ok(());
        }

        self.queue.complete(job.id).await?;
        Ok(())
    }

    async fn enqueue_ingest_job(
        &self,
        job: &queue_parse::Model,
        extraction: &AcceptedExtraction,
    ) -> AppResult<()> {
        let ingest_job = queue_ingest::ActiveModel {
            user_id: Set(job.user_id),
            parse_job_id: Set(job.id),
            service_name: Set(extraction.service_name.clone()),
            price: Set(extraction.price),
            currency: Set(extraction.currency.clone()),
            billing_cycle: Set(extraction.billing_cycle.clone()),
            confidence: Set(extraction.confidence),
            email_id: Set(job.email_id.clone()),
            email_subject: Set(job.email_subject.clone()),
            email_snippet: Set(job.email_snippet.clone()),
            email_from: Set(job.email_from.clone()),
            email_date: Set(job.email_date),
            status: Set(JobStatus::Pending),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        };
        QueueIngest::insert(ingest_job).exec(&*self.conn).await?;
        Ok(())
    }
}
