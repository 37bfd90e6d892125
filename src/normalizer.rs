// =============================================================================
// normalizer.rs — DOLLARS OR THOUSANDS OF DOLLARS? NOBODY KNOWS.
// =============================================================================
//
// The 13F <value> column is supposed to be in dollars (it used to be in
// thousands, before 2023). Filers did not all get the memo, and nothing in
// the row says which unit was used. So we look at the whole filing at once:
// value / shares is a price per share, and real share prices almost never
// sit below ~$4. If the median implied price of a filing is at or below 4,
// the filer reported thousands and we scale everything up by 1000.
//
// One decision per filing, applied to every row. Individual prices are far
// too noisy to classify one holding at a time.
// =============================================================================

use tracing::debug;

use crate::models::{Holding, RawHolding};

/// Median implied price per share above which values are already dollars.
pub const DOLLARS_MEDIAN_THRESHOLD: f64 = 4.0;

const THOUSANDS_MULTIPLIER: f64 = 1000.0;

/// The unit a filing's values were reported in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportedUnit {
    Dollars { median_price: f64 },
    /// Also chosen when no holding has a usable ratio (median taken as 0).
    Thousands { median_price: f64 },
}

impl ReportedUnit {
    fn multiplier(&self) -> f64 {
        match self {
            ReportedUnit::Thousands { .. } => THOUSANDS_MULTIPLIER,
            ReportedUnit::Dollars { .. } => 1.0,
        }
    }
}

/// Median of the positive value/shares ratios. The upper median for even
/// counts (index n/2 of the sorted list).
pub fn median_price(holdings: &[RawHolding]) -> Option<f64> {
    let mut ratios: Vec<f64> = holdings
        .iter()
        .filter(|h| h.shares > 0.0)
        .map(|h| h.value / h.shares)
        .filter(|r| *r > 0.0 && r.is_finite())
        .collect();
    if ratios.is_empty() {
        return None;
    }
    ratios.sort_by(f64::total_cmp);
    Some(ratios[ratios.len() / 2])
}

pub fn detect_unit(holdings: &[RawHolding]) -> ReportedUnit {
    let median = median_price(holdings).unwrap_or(0.0);
    if median > DOLLARS_MEDIAN_THRESHOLD {
        ReportedUnit::Dollars { median_price: median }
    } else {
        ReportedUnit::Thousands { median_price: median }
    }
}

/// Decide the filing's unit and rescale every holding to dollars.
pub fn normalize(raw: Vec<RawHolding>) -> (ReportedUnit, Vec<Holding>) {
    let unit = detect_unit(&raw);
    let multiplier = unit.multiplier();
    debug!(unit = ?unit, holdings = raw.len(), "unit decision");

    let holdings = raw
        .into_iter()
        .map(|h| Holding {
            issuer: h.issuer,
            cusip: h.cusip,
            value: h.value * multiplier,
            shares: h.shares,
        })
        .collect();
    (unit, holdings)
}
