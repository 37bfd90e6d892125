// =============================================================================
// models.rs — THE SACRED DATA STRUCTURES OF QUARTERLY DISCLOSURE
// =============================================================================
//
// Everything the engine passes around between the index, the XML extractor,
// the normalizer and the store. A 13F filing boils down to three things:
// who filed (Fund), which submission it was (Filing), and what they held
// (Holding). Everything else is plumbing.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar quarter, the unit EDGAR buckets its full index by and the
/// unit we checkpoint ingestion by. Rendered as `YYYY-Qn` everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quarter {
    pub year: u16,
    pub number: u8,
}

impl Quarter {
    pub fn new(year: u16, number: u8) -> Option<Self> {
        if (1..=4).contains(&number) {
            Some(Self { year, number })
        } else {
            None
        }
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-Q{}", self.year, self.number)
    }
}

/// Accepts `2025-Q3`, `2025Q3` and `2025-q3`.
impl FromStr for Quarter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let (year, number) = upper
            .split_once('Q')
            .ok_or_else(|| format!("'{}' is not a quarter (expected YYYY-Qn)", s))?;
        let year: u16 = year
            .trim_end_matches('-')
            .parse()
            .map_err(|_| format!("'{}' has an invalid year", s))?;
        let number: u8 = number
            .parse()
            .map_err(|_| format!("'{}' has an invalid quarter number", s))?;
        Quarter::new(year, number).ok_or_else(|| format!("'{}': quarter must be 1-4", s))
    }
}

/// One data row from the quarterly master index.
/// `CIK|Company Name|Form Type|Date Filed|Filename`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub cik: String,
    pub name: String,
    pub date: String,
    pub filename: String,
}

impl IndexEntry {
    /// `edgar/data/1067983/0000950123-25-008343.txt` -> `0000950123-25-008343`
    pub fn accession_number(&self) -> String {
        let last = self.filename.rsplit('/').next().unwrap_or(&self.filename);
        last.trim_end_matches(".txt").to_string()
    }

    /// The CIK as EDGAR uses it in archive paths: no leading zeros.
    pub fn cik_path_segment(&self) -> String {
        let trimmed = self.cik.trim().trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Filing date as `YYYY-MM-DD`. Old indexes wrote `YYYYMMDD`; anything
    /// unrecognised is kept verbatim.
    pub fn filing_date(&self) -> String {
        let raw = self.date.trim();
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| raw.to_string())
    }

    /// The CIK as we store it: zero-padded to ten digits.
    pub fn padded_cik(&self) -> String {
        format!("{:0>10}", self.cik.trim())
    }
}

/// A filer. Written once, the first time we see them, never touched again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fund {
    pub cik: String,
    pub name: String,
    pub ticker: Option<String>,
}

/// A single 13F submission. Its row in the store is the ingestion checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filing {
    pub accession_number: String,
    pub cik: String,
    pub filing_date: String,
    pub quarter: Quarter,
}

impl Filing {
    pub fn from_entry(entry: &IndexEntry, quarter: Quarter) -> (Fund, Filing) {
        let cik = entry.padded_cik();
        let fund = Fund {
            cik: cik.clone(),
            name: entry.name.trim().to_string(),
            ticker: None,
        };
        let filing = Filing {
            accession_number: entry.accession_number(),
            cik,
            filing_date: entry.filing_date(),
            quarter,
        };
        (fund, filing)
    }
}

/// A holding as reported in the information table, units unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHolding {
    pub issuer: String,
    pub cusip: Option<String>,
    pub value: f64,
    pub shares: f64,
}

/// A holding after unit normalization. `value` is always in dollars.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub issuer: String,
    pub cusip: Option<String>,
    pub value: f64,
    pub shares: f64,
}

/// The `index.json` EDGAR serves for each filing folder.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryListing {
    pub directory: Directory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub item: Vec<DirectoryItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryItem {
    #[serde(default)]
    pub name: String,
}

impl DirectoryListing {
    /// Every `.xml` document in the folder, in listing order.
    pub fn xml_documents(&self) -> Vec<&str> {
        self.directory
            .item
            .iter()
            .map(|item| item.name.as_str())
            .filter(|name| name.to_ascii_lowercase().ends_with(".xml"))
            .collect()
    }
}
