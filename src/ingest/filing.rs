// =============================================================================
// ingest/filing.rs — ONE FILING, START TO FINISH
// =============================================================================
//
// What a worker does with a single index entry:
//
//   1. sleep a beat (SEC's informal ~10 req/s etiquette)
//   2. read the filing folder's index.json
//   3. walk its .xml documents until one has an information table
//   4. decide dollars vs thousands for the whole table
//   5. claim the fund + filing, then append the holdings
//
// A filing with no holdings is left unclaimed so a later run can try again.
// =============================================================================

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::http_client::{FetchError, Fetched, RetryingHttpClient, Transport};
use crate::models::{DirectoryListing, Filing, IndexEntry, Quarter, RawHolding};
use crate::normalizer::{self, ReportedUnit};
use crate::store::{Store, StoreError};
use crate::xml_extractor::{self, ExtractError};

#[derive(Debug, Error)]
pub enum FilingError {
    #[error("directory listing lookup failed: {0}")]
    Listing(#[source] FetchError),

    #[error("fetching {document} failed: {source}")]
    Document {
        document: String,
        #[source]
        source: FetchError,
    },

    #[error("no readable information table: {0}")]
    Parse(#[from] ExtractError),

    #[error("persisting filing failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilingOutcome {
    Ingested { holdings: u64, unit: ReportedUnit },
    /// The filing folder has no index.json.
    NoListing,
    /// Every XML document was readable and none had holdings.
    NoHoldings,
    AlreadyClaimed,
}

pub struct FilingPipeline<T: Transport> {
    client: Arc<RetryingHttpClient<T>>,
    store: Store,
    config: Arc<Config>,
}

impl<T: Transport> FilingPipeline<T> {
    pub fn new(client: Arc<RetryingHttpClient<T>>, store: Store, config: Arc<Config>) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub async fn process(
        &self,
        entry: &IndexEntry,
        quarter: Quarter,
    ) -> Result<FilingOutcome, FilingError> {
        let accession = entry.accession_number();
        let folder = self
            .config
            .filing_folder_url(&entry.cik_path_segment(), &accession);

        tokio::time::sleep(self.config.per_request_delay).await;

        let listing = match self
            .client
            .fetch_json::<DirectoryListing>(&format!("{}/index.json", folder))
            .await
            .map_err(FilingError::Listing)?
        {
            Fetched::Body(listing) => listing,
            Fetched::Absent => return Ok(FilingOutcome::NoListing),
        };

        let raw = self.find_holdings(&folder, &listing).await?;
        if raw.is_empty() {
            return Ok(FilingOutcome::NoHoldings);
        }

        let (unit, holdings) = normalizer::normalize(raw);
        let (fund, filing) = Filing::from_entry(entry, quarter);

        if !self.store.claim(&fund, &filing).await? {
            // Two index rows sharing an accession number; the other one won.
            warn!(accession = %accession, "filing already claimed — not appending twice");
            return Ok(FilingOutcome::AlreadyClaimed);
        }
        let written = self.store.append_holdings(&accession, &holdings).await?;

        Ok(FilingOutcome::Ingested {
            holdings: written,
            unit,
        })
    }

    /// First non-empty holdings list among the folder's XML documents.
    async fn find_holdings(
        &self,
        folder: &str,
        listing: &DirectoryListing,
    ) -> Result<Vec<RawHolding>, FilingError> {
        let mut last_parse_error = None;

        for document in listing.xml_documents() {
            let url = format!("{}/{}", folder, document);
            let xml = match self.client.fetch(&url).await {
                Ok(Fetched::Body(xml)) => xml,
                Ok(Fetched::Absent) => continue,
                Err(source) => {
                    return Err(FilingError::Document {
                        document: document.to_string(),
                        source,
                    })
                }
            };

            match xml_extractor::extract_holdings(&xml) {
                Ok(rows) if !rows.is_empty() => {
                    debug!(document = document, rows = rows.len(), "information table found");
                    return Ok(rows);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(document = document, error = %e, "unparseable XML document");
                    last_parse_error = Some(e);
                }
            }
        }

        match last_parse_error {
            Some(e) => Err(FilingError::Parse(e)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::testing::RoutedTransport;
    use crate::metrics::IngestMetrics;
    use crate::store::testing::temp_store;
    use std::collections::HashMap;

    const FOLDER: &str = "https://edgar.test/Archives/edgar/data/1067983/000095012325008343";

    const LISTING: &str = r#"{"directory":{"item":[
        {"name":"broken.xml"},
        {"name":"form13fInfoTable.xml"}
    ]}}"#;

    // Dollars already: roughly $230 and $95 a share.
    const TABLE: &str = r#"<ns1:informationTable xmlns:ns1="http://www.sec.gov/edgar/document/thirteenf/informationtable">
  <ns1:infoTable>
    <ns1:nameOfIssuer>Apple Inc</ns1:nameOfIssuer>
    <ns1:cusip>037833100</ns1:cusip>
    <ns1:value>2300000</ns1:value>
    <ns1:shrsOrPrnAmt><ns1:sshPrnamt>10000</ns1:sshPrnamt></ns1:shrsOrPrnAmt>
  </ns1:infoTable>
  <ns1:infoTable>
    <ns1:nameOfIssuer>Coca Cola Co</ns1:nameOfIssuer>
    <ns1:cusip>191216100</ns1:cusip>
    <ns1:value>950000</ns1:value>
    <ns1:shrsOrPrnAmt><ns1:sshPrnamt>10000</ns1:sshPrnamt></ns1:shrsOrPrnAmt>
  </ns1:infoTable>
</ns1:informationTable>"#;

    fn entry() -> IndexEntry {
        IndexEntry {
            cik: "1067983".to_string(),
            name: "BERKSHIRE HATHAWAY INC".to_string(),
            date: "2025-08-14".to_string(),
            filename: "edgar/data/1067983/0000950123-25-008343.txt".to_string(),
        }
    }

    fn q3() -> Quarter {
        Quarter::new(2025, 3).unwrap()
    }

    async fn pipeline(transport: RoutedTransport) -> (FilingPipeline<RoutedTransport>, Store, tempfile::TempDir) {
        let pairs: HashMap<&str, &str> = HashMap::from([
            ("HOLDINGS_DATABASE_URL", "sqlite::memory:"),
            ("HOLDINGS_USER_AGENT", "HoldingsIngest tests@example.com"),
            ("HOLDINGS_ARCHIVES_URL", "https://edgar.test/Archives"),
            ("HOLDINGS_REQUEST_DELAY_MS", "0"),
            ("HOLDINGS_TRANSIENT_RETRY_DELAY_MS", "0"),
        ]);
        let config = Arc::new(Config::from_lookup(|key| pairs.get(key).map(|v| v.to_string())).unwrap());
        let client = Arc::new(RetryingHttpClient::new(
            transport,
            config.retry.clone(),
            Arc::new(IngestMetrics::new()),
        ));
        let (store, dir) = temp_store(50).await;
        (FilingPipeline::new(client, store.clone(), config), store, dir)
    }

    #[tokio::test]
    async fn test_malformed_candidate_falls_through_to_the_next_document() {
        let transport = RoutedTransport::default()
            .route(format!("{}/index.json", FOLDER), LISTING)
            .route(format!("{}/broken.xml", FOLDER), "<informationTable><infoTable>")
            .route(format!("{}/form13fInfoTable.xml", FOLDER), TABLE);
        let (pipeline, store, _dir) = pipeline(transport).await;

        let outcome = pipeline.process(&entry(), q3()).await.unwrap();
        assert_eq!(
            outcome,
            FilingOutcome::Ingested {
                holdings: 2,
                unit: ReportedUnit::Dollars { median_price: 230.0 }
            }
        );
        assert!(store.already_ingested(q3()).await.unwrap().contains("0000950123-25-008343"));

        let values: Vec<f64> = sqlx::query_scalar("SELECT value FROM holdings ORDER BY id")
            .fetch_all(store.pool())
            .await
            .unwrap();
        assert_eq!(values, vec![2_300_000.0, 950_000.0]);
    }

    #[tokio::test]
    async fn test_only_malformed_documents_fail_without_claiming() {
        let transport = RoutedTransport::default()
            .route(format!("{}/index.json", FOLDER), LISTING)
            .route(format!("{}/broken.xml", FOLDER), "<informationTable><infoTable>");
        let (pipeline, store, _dir) = pipeline(transport).await;

        let err = pipeline.process(&entry(), q3()).await.unwrap_err();
        assert!(matches!(err, FilingError::Parse(_)));
        assert!(store.already_ingested(q3()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_folder_is_skipped() {
        let (pipeline, store, _dir) = pipeline(RoutedTransport::default()).await;

        let outcome = pipeline.process(&entry(), q3()).await.unwrap();
        assert_eq!(outcome, FilingOutcome::NoListing);
        assert_eq!(store.holding_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_claim_appends_nothing() {
        let transport = RoutedTransport::default()
            .route(format!("{}/index.json", FOLDER), LISTING)
            .route(format!("{}/form13fInfoTable.xml", FOLDER), TABLE);
        let (pipeline, store, _dir) = pipeline(transport).await;

        pipeline.process(&entry(), q3()).await.unwrap();
        let again = pipeline.process(&entry(), q3()).await.unwrap();
        assert_eq!(again, FilingOutcome::AlreadyClaimed);
        assert_eq!(store.holding_count().await.unwrap(), 2);
    }
}
