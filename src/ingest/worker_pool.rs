// =============================================================================
// ingest/worker_pool.rs — THE LOADING DOCK
// =============================================================================
//
// A fixed crew of workers and one queue. Every pending filing goes into a
// crossbeam channel up front; each worker pulls one, runs the whole filing
// pipeline on it, and only then reaches for the next. Slow filings hold up
// one worker, never the crew.
//
// A failed filing is logged and counted; the worker moves on.
// =============================================================================

use std::sync::Arc;

use crossbeam_channel::Receiver;
use futures::future::join_all;
use portable_atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

use crate::http_client::Transport;
use crate::ingest::filing::{FilingOutcome, FilingPipeline};
use crate::metrics::IngestMetrics;
use crate::models::{IndexEntry, Quarter};

const PROGRESS_EVERY: u64 = 20;

/// What one pool run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub ingested: u64,
    pub skipped: u64,
    pub failed: u64,
    pub holdings: u64,
}

/// Pool-wide completion counter. Each completion gets its own number, so
/// every progress milestone is reported by exactly one worker.
#[derive(Debug)]
struct Progress {
    completed: AtomicU64,
    every: u64,
}

impl Progress {
    fn new(every: u64) -> Self {
        Self {
            completed: AtomicU64::new(0),
            every: every.max(1),
        }
    }

    /// Count one completion; `Some(n)` when `n` is a milestone.
    fn tick(&self) -> Option<u64> {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        (done % self.every == 0).then_some(done)
    }
}

impl PoolReport {
    fn merge(&mut self, other: PoolReport) {
        self.ingested += other.ingested;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.holdings += other.holdings;
    }
}

/// Run `entries` through `concurrency` workers and wait for all of them.
pub async fn run_pool<T: Transport>(
    pipeline: Arc<FilingPipeline<T>>,
    metrics: Arc<IngestMetrics>,
    quarter: Quarter,
    entries: Vec<IndexEntry>,
    concurrency: usize,
) -> PoolReport {
    let total = entries.len() as u64;
    if total == 0 {
        return PoolReport::default();
    }

    let (tx, queue) = crossbeam_channel::bounded(entries.len());
    for entry in entries {
        tx.send(entry).ok();
    }
    drop(tx);

    let workers = concurrency.clamp(1, total as usize);
    let progress = Arc::new(Progress::new(PROGRESS_EVERY));
    info!(quarter = %quarter, filings = total, workers = workers, "worker pool starting");

    let handles: Vec<_> = (0..workers)
        .map(|worker_id| {
            let pipeline = Arc::clone(&pipeline);
            let metrics = Arc::clone(&metrics);
            let queue = queue.clone();
            let progress = Arc::clone(&progress);
            tokio::spawn(async move {
                work(worker_id, pipeline, metrics, queue, quarter, progress, total).await
            })
        })
        .collect();

    let mut report = PoolReport::default();
    for result in join_all(handles).await {
        match result {
            Ok(tally) => report.merge(tally),
            Err(e) => error!(quarter = %quarter, error = %e, "ingest worker died"),
        }
    }
    report
}

async fn work<T: Transport>(
    worker_id: usize,
    pipeline: Arc<FilingPipeline<T>>,
    metrics: Arc<IngestMetrics>,
    queue: Receiver<IndexEntry>,
    quarter: Quarter,
    progress: Arc<Progress>,
    total: u64,
) -> PoolReport {
    let mut tally = PoolReport::default();

    // Everything was queued before the workers started, so an empty queue
    // means the quarter is done.
    while let Ok(entry) = queue.try_recv() {
        match pipeline.process(&entry, quarter).await {
            Ok(FilingOutcome::Ingested { holdings, unit }) => {
                tally.ingested += 1;
                tally.holdings += holdings;
                metrics.increment_ingested(holdings);
                info!(
                    worker = worker_id,
                    accession = %entry.accession_number(),
                    fund = %entry.name,
                    holdings = holdings,
                    unit = ?unit,
                    "filing ingested"
                );
            }
            Ok(outcome) => {
                tally.skipped += 1;
                metrics.increment_skipped();
                info!(
                    worker = worker_id,
                    accession = %entry.accession_number(),
                    fund = %entry.name,
                    outcome = ?outcome,
                    "filing skipped"
                );
            }
            Err(e) => {
                tally.failed += 1;
                metrics.increment_failed();
                warn!(
                    worker = worker_id,
                    accession = %entry.accession_number(),
                    fund = %entry.name,
                    error = %e,
                    "filing failed — moving on"
                );
            }
        }

        if let Some(done) = progress.tick() {
            info!(quarter = %quarter, "progress: {}/{}", done, total);
        }
    }

    tally
}
