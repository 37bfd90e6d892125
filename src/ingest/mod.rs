// =============================================================================
// ingest/mod.rs — MISSION CONTROL
// =============================================================================
//
// Quarters run one after another, in the configured order. Inside a quarter:
//
//   master index  →  minus what the store already has  →  worker pool
//
// Nothing below this point is allowed to stop the run. A quarter whose index
// or checkpoint lookup fails is logged and skipped; a filing that fails is
// logged and skipped by its worker. Run it again tomorrow and it picks up
// exactly where it left off.
// =============================================================================

pub mod filing;
pub mod worker_pool;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use crate::config::Config;
use crate::http_client::{RetryingHttpClient, Transport};
use crate::index_fetcher;
use crate::metrics::IngestMetrics;
use crate::models::{IndexEntry, Quarter};
use crate::store::Store;

use self::filing::FilingPipeline;
use self::worker_pool::{run_pool, PoolReport};

/// One quarter's worth of bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarterReport {
    pub quarter: Quarter,
    pub listed: usize,
    pub already_ingested: usize,
    pub pending: usize,
    pub pool: PoolReport,
}

pub struct Orchestrator<T: Transport> {
    client: Arc<RetryingHttpClient<T>>,
    pipeline: Arc<FilingPipeline<T>>,
    store: Store,
    config: Arc<Config>,
    metrics: Arc<IngestMetrics>,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(transport: T, store: Store, config: Arc<Config>, metrics: Arc<IngestMetrics>) -> Self {
        let client = Arc::new(RetryingHttpClient::new(
            transport,
            config.retry.clone(),
            Arc::clone(&metrics),
        ));
        let pipeline = Arc::new(FilingPipeline::new(
            Arc::clone(&client),
            store.clone(),
            Arc::clone(&config),
        ));
        Self {
            client,
            pipeline,
            store,
            config,
            metrics,
        }
    }

    /// Every configured quarter, in order. Quarters that could not be
    /// started are missing from the result.
    pub async fn run(&self) -> Vec<QuarterReport> {
        let mut reports = Vec::with_capacity(self.config.quarters.len());

        for &quarter in &self.config.quarters {
            match self.run_quarter(quarter).await {
                Ok(report) => {
                    info!(
                        quarter = %quarter,
                        listed = report.listed,
                        already_ingested = report.already_ingested,
                        ingested = report.pool.ingested,
                        skipped = report.pool.skipped,
                        failed = report.pool.failed,
                        holdings = report.pool.holdings,
                        "quarter complete"
                    );
                    reports.push(report);
                }
                Err(e) => error!(quarter = %quarter, error = ?e, "quarter skipped"),
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            completed = self.metrics.completed(),
            ingested = snapshot.filings_ingested,
            skipped = snapshot.filings_skipped,
            failed = snapshot.filings_failed,
            holdings = snapshot.holdings_written,
            http_requests = snapshot.http_requests,
            rate_limited = snapshot.rate_limited_responses,
            "ingest run finished"
        );
        reports
    }

    pub async fn run_quarter(&self, quarter: Quarter) -> anyhow::Result<QuarterReport> {
        let entries = index_fetcher::fetch_index(&*self.client, &self.config, quarter)
            .await
            .with_context(|| format!("fetching master index for {}", quarter))?;
        let claimed = self
            .store
            .already_ingested(quarter)
            .await
            .with_context(|| format!("reading checkpoint for {}", quarter))?;

        let listed = entries.len();
        let pending: Vec<IndexEntry> = entries
            .into_iter()
            .filter(|entry| !claimed.contains(&entry.accession_number()))
            .collect();

        info!(
            quarter = %quarter,
            already_ingested = claimed.len(),
            pending = pending.len(),
            "{} new filings to ingest",
            pending.len()
        );

        let pending_count = pending.len();
        let pool = run_pool(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.metrics),
            quarter,
            pending,
            self.config.concurrency,
        )
        .await;

        Ok(QuarterReport {
            quarter,
            listed,
            already_ingested: claimed.len(),
            pending: pending_count,
            pool,
        })
    }
}
