// =============================================================================
// index_fetcher.rs — THE MASTER INDEX READER
// =============================================================================
//
// EDGAR publishes one `master.idx` per quarter listing every single filing
// submitted in that window. It looks like this:
//
//   Description:           Master Index of EDGAR Dissemination Feed
//   ...
//   CIK|Company Name|Form Type|Date Filed|Filename
//   --------------------------------------------------------------------------------
//   1067983|BERKSHIRE HATHAWAY INC|13F-HR|2025-08-14|edgar/data/1067983/0000950123-25-008343.txt
//
// Everything above the dashed line is preamble. Everything below is data,
// except when it isn't (blank trailing lines, the occasional short row).
// =============================================================================

use tracing::{info, warn};

use crate::config::Config;
use crate::http_client::{FetchError, Fetched, RetryingHttpClient, Transport};
use crate::models::{IndexEntry, Quarter};

/// Download the quarter's master index and keep the rows for `config.form_type`.
/// An index that doesn't exist (yet) is an empty quarter, not an error.
pub async fn fetch_index<T: Transport>(
    client: &RetryingHttpClient<T>,
    config: &Config,
    quarter: Quarter,
) -> Result<Vec<IndexEntry>, FetchError> {
    let url = config.master_index_url(quarter);
    info!(quarter = %quarter, url = %url, "downloading master index");

    match client.fetch(&url).await? {
        Fetched::Body(content) => {
            let entries = parse_master_index(&content, &config.form_type);
            info!(
                quarter = %quarter,
                form_type = %config.form_type,
                entries = entries.len(),
                "found {} {} filings",
                entries.len(),
                config.form_type
            );
            Ok(entries)
        }
        Fetched::Absent => {
            warn!(quarter = %quarter, url = %url, "master index not published — nothing to ingest");
            Ok(Vec::new())
        }
    }
}

/// Parse the pipe-delimited index body, keeping only `form_type` rows in
/// file order.
pub fn parse_master_index(content: &str, form_type: &str) -> Vec<IndexEntry> {
    content
        .lines()
        .skip_while(|line| !line.starts_with("-----------"))
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() < 5 || parts[2] != form_type {
                return None;
            }
            Some(IndexEntry {
                cik: parts[0].to_string(),
                name: parts[1].to_string(),
                date: parts[3].to_string(),
                filename: parts[4].trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "\
Description:           Master Index of EDGAR Dissemination Feed
Last Data Received:    September 30, 2025
Comments:              webmaster@sec.gov
Anonymous FTP:         ftp://ftp.sec.gov/edgar/
CIK|Company Name|Form Type|Date Filed|Filename
1|13F-HR|13F-HR|2025-07-01|edgar/data/1/not-data-yet.txt
--------------------------------------------------------------------------------
1000045|NICHOLAS FINANCIAL INC|10-Q|2025-08-12|edgar/data/1000045/0000950170-25-104501.txt
1067983|BERKSHIRE HATHAWAY INC|13F-HR|2025-08-14|edgar/data/1067983/0000950123-25-008343.txt
1100000|SHORT ROW|13F-HR
1166559|GATES FOUNDATION TRUST|13F-HR/A|2025-08-20|edgar/data/1166559/0001104659-25-081000.txt
102909|VANGUARD GROUP INC|13F-HR|2025-07-29|edgar/data/102909/0000102909-25-000412.txt\r
1037389|RENAISSANCE TECHNOLOGIES LLC|SC 13G|2025-07-30|edgar/data/1037389/0001037389-25-000001.txt

";

    #[test]
    fn test_keeps_target_form_rows_in_order() {
        let entries = parse_master_index(FIXTURE, "13F-HR");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "BERKSHIRE HATHAWAY INC");
        assert_eq!(entries[0].cik, "1067983");
        assert_eq!(entries[0].date, "2025-08-14");
        assert_eq!(entries[1].name, "VANGUARD GROUP INC");
        assert_eq!(
            entries[1].filename,
            "edgar/data/102909/0000102909-25-000412.txt"
        );
    }

    #[test]
    fn test_preamble_and_amendments_are_ignored() {
        let entries = parse_master_index(FIXTURE, "13F-HR");
        assert!(entries.iter().all(|e| e.cik != "1"));
        assert!(entries.iter().all(|e| !e.name.contains("GATES")));
    }

    #[test]
    fn test_other_form_types_can_be_selected() {
        let entries = parse_master_index(FIXTURE, "13F-HR/A");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].accession_number(), "0001104659-25-081000");
    }

    #[test]
    fn test_no_separator_means_no_rows() {
        assert!(parse_master_index("1|A|13F-HR|2025-01-01|x.txt", "13F-HR").is_empty());
    }
}
