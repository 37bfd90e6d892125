// ██╗  ██╗ ██████╗ ██╗     ██████╗ ██╗███╗   ██╗ ██████╗ ███████╗
// ██║  ██║██╔═══██╗██║     ██╔══██╗██║████╗  ██║██╔════╝ ██╔════╝
// ███████║██║   ██║██║     ██║  ██║██║██╔██╗ ██║██║  ███╗███████╗
// ██╔══██║██║   ██║██║     ██║  ██║██║██║╚██╗██║██║   ██║╚════██║
// ██║  ██║╚██████╔╝███████╗██████╔╝██║██║ ╚████║╚██████╔╝███████║
// ╚═╝  ╚═╝ ╚═════╝ ╚══════╝╚═════╝ ╚═╝╚═╝  ╚═══╝ ╚═════╝ ╚══════╝
//
// I N G E S T   E N G I N E
//
// Every 13F-HR on EDGAR, one quarter at a time, into one SQLite file.
// Tokio + Crossbeam + quick-xml + sqlx, all to find out who owns Apple.

mod config;
mod http_client;
mod index_fetcher;
mod ingest;
mod metrics;
mod models;
mod normalizer;
mod store;
mod xml_extractor;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::http_client::ReqwestTransport;
use crate::ingest::Orchestrator;
use crate::metrics::IngestMetrics;
use crate::store::Store;

fn print_banner() {
    let banner = r#"

    ╔══════════════════════════════════════════════════════════════════╗
    ║                                                                  ║
    ║        📈 13F HOLDINGS INGEST ENGINE 📈                          ║
    ║                                                                  ║
    ║   Source:   SEC EDGAR full-index + filing folders                ║
    ║   Parsing:  quick-xml, any namespace, wrapped or bare tables     ║
    ║   Units:    dollars vs thousands, decided per filing             ║
    ║   Store:    append-only SQLite, resumable by accession number    ║
    ║                                                                  ║
    ║   "Somebody has to read all of them."                            ║
    ║                                                                  ║
    ╚══════════════════════════════════════════════════════════════════╝

    "#;
    println!("{}", banner);
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    print_banner();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("❌ configuration error: {}", e);
            return Err(e.into());
        }
    };
    info!(
        archives = %config.archives_url,
        quarters = ?config.quarters.iter().map(ToString::to_string).collect::<Vec<_>>(),
        concurrency = config.concurrency,
        "✅ configuration loaded"
    );

    let metrics = Arc::new(IngestMetrics::new());
    let transport = ReqwestTransport::new(&config.user_agent, config.http_timeout)
        .context("building HTTP client")?;

    let store = Store::connect(&config.database_url, config.holding_batch_size)
        .await
        .context("connecting to holdings store")?;
    store.migrate().await.context("creating holdings schema")?;

    let orchestrator = Orchestrator::new(
        transport,
        store.clone(),
        Arc::clone(&config),
        Arc::clone(&metrics),
    );
    orchestrator.run().await;

    report(&store).await;
    match serde_json::to_string(&metrics.snapshot()) {
        Ok(json) => info!("📊 final metrics: {}", json),
        Err(e) => warn!("could not serialize metrics: {}", e),
    }

    store.close().await;
    info!("💤 ingest engine: done");
    Ok(())
}

/// `HOLDINGS_LOG_FORMAT=json` for log shippers; human-readable otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    match std::env::var("HOLDINGS_LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}

/// What the store holds now, across every run so far.
async fn report(store: &Store) {
    match store.quarter_summary().await {
        Ok(summary) => {
            for row in summary {
                info!(quarter = %row.quarter, filings = row.filings, "stored filings");
            }
        }
        Err(e) => warn!("could not summarize filings: {}", e),
    }

    match store.holding_count().await {
        Ok(count) => info!(holdings = count, "stored holdings"),
        Err(e) => warn!("could not count holdings: {}", e),
    }
}
