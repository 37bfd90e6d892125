// =============================================================================
// xml_extractor.rs — THE INFORMATION TABLE WHISPERER
// =============================================================================
//
// A 13F information table is "standardized" XML in the way that every filer
// agent has its own opinion about it:
//
//   <informationTable xmlns="http://www.sec.gov/edgar/document/thirteenf/informationtable">
//     <infoTable>...</infoTable>
//   </informationTable>
//
//   <ns1:informationTable xmlns:ns1="..."><ns1:infoTable>...</ns1:infoTable></ns1:informationTable>
//
//   <n1:edgarSubmission ...><n1:infoTable>...</n1:infoTable></n1:edgarSubmission>
//
// Prefixes come and go, sometimes undeclared. Casing drifts. The table is
// sometimes wrapped, sometimes not. So we do two things:
//
// 1. Read the document into a dumb tree keyed by prefix-free, lower-cased tag
//    names, with every child slot being a list (repeated elements and single
//    elements look the same).
// 2. Resolve the tree into one of the table layouts we recognize, and read
//    the rows out of whichever one matched.
// =============================================================================

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::models::RawHolding;

const WRAPPER_TAG: &str = "informationtable";
const ROW_TAG: &str = "infotable";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("malformed XML: {0}")]
    Malformed(String),
}

/// One element: its own text plus children grouped by tag name.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct XmlNode {
    pub text: String,
    pub children: BTreeMap<String, Vec<XmlNode>>,
}

impl XmlNode {
    pub fn children(&self, tag: &str) -> &[XmlNode] {
        self.children.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, tag: &str) -> Option<&XmlNode> {
        self.children(tag).first()
    }

    /// Trimmed text of the first `tag` child, if it has any.
    pub fn text_of(&self, tag: &str) -> Option<&str> {
        self.first(tag)
            .map(|node| node.text.trim())
            .filter(|text| !text.is_empty())
    }

    fn push_child(&mut self, tag: String, node: XmlNode) {
        self.children.entry(tag).or_default().push(node);
    }
}

/// The table layouts we know how to read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TableLayout<'a> {
    /// `<informationTable>` wrapping `<infoTable>` rows, either as the
    /// document root or one level beneath some other root element.
    Wrapped(&'a [XmlNode]),
    /// `<infoTable>` rows sitting at the top level with no wrapper.
    Bare(&'a [XmlNode]),
}

impl<'a> TableLayout<'a> {
    pub fn rows(&self) -> &'a [XmlNode] {
        match self {
            TableLayout::Wrapped(rows) | TableLayout::Bare(rows) => rows,
        }
    }
}

/// Parse XML into a tree hanging off a synthetic document node. Tags lose
/// their namespace prefix and are lower-cased; attributes are dropped.
pub fn parse_document(xml: &str) -> Result<XmlNode, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // The bottom of the stack is the document itself.
    let mut stack: Vec<(String, XmlNode)> = vec![(String::new(), XmlNode::default())];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push((normalize_tag(e.local_name().as_ref()), XmlNode::default()));
            }
            Ok(Event::Empty(e)) => {
                let tag = normalize_tag(e.local_name().as_ref());
                if let Some((_, parent)) = stack.last_mut() {
                    parent.push_child(tag, XmlNode::default());
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(ExtractError::Malformed("unbalanced closing tag".to_string()));
                }
                if let Some((tag, node)) = stack.pop() {
                    if let Some((_, parent)) = stack.last_mut() {
                        parent.push_child(tag, node);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractError::Malformed(e.to_string()))?;
                if let Some((_, node)) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, node)) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::Malformed(format!(
                    "at byte {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(ExtractError::Malformed(format!(
            "document ended inside <{}>",
            stack.last().map(|(tag, _)| tag.as_str()).unwrap_or_default()
        )));
    }
    let (_, document) = stack.remove(0);
    if document.children.is_empty() {
        return Err(ExtractError::Malformed("no root element".to_string()));
    }
    Ok(document)
}

fn normalize_tag(local_name: &[u8]) -> String {
    String::from_utf8_lossy(local_name).to_ascii_lowercase()
}

/// Find the holdings table. The wrapped layout wins over the bare one.
pub fn resolve_layout(document: &XmlNode) -> Option<TableLayout<'_>> {
    // The document node itself, then whatever the root element is.
    let scopes: Vec<&XmlNode> = std::iter::once(document)
        .chain(document.children.values().flatten())
        .collect();

    let wrapped = scopes.iter().copied().find_map(|scope| {
        scope
            .children(WRAPPER_TAG)
            .iter()
            .map(|table| table.children(ROW_TAG))
            .find(|rows| !rows.is_empty())
    });
    if let Some(rows) = wrapped {
        return Some(TableLayout::Wrapped(rows));
    }

    scopes
        .iter()
        .copied()
        .map(|scope| scope.children(ROW_TAG))
        .find(|rows| !rows.is_empty())
        .map(TableLayout::Bare)
}

/// Pull raw holdings out of one XML document. A well-formed document
/// without a holdings table (the cover page, say) yields an empty list.
pub fn extract_holdings(xml: &str) -> Result<Vec<RawHolding>, ExtractError> {
    let document = parse_document(xml)?;
    Ok(match resolve_layout(&document) {
        Some(layout) => layout.rows().iter().filter_map(holding_from_row).collect(),
        None => Vec::new(),
    })
}

/// A row without a positive value is noise, not an error.
fn holding_from_row(row: &XmlNode) -> Option<RawHolding> {
    let value = row.text_of("value").and_then(parse_number)?;
    if value <= 0.0 {
        return None;
    }

    let shares = row
        .first("shrsorprnamt")
        .and_then(|amount| amount.text_of("sshprnamt"))
        .or_else(|| row.text_of("sshprnamt"))
        .and_then(parse_number)
        .unwrap_or(0.0);

    Some(RawHolding {
        issuer: row
            .text_of("nameofissuer")
            .map(str::to_uppercase)
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        cusip: row.text_of("cusip").map(str::to_string),
        value,
        shares,
    })
}

fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_NAMESPACE_WRAPPED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<informationTable xmlns="http://www.sec.gov/edgar/document/thirteenf/informationtable" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <infoTable>
    <nameOfIssuer>Apple Inc</nameOfIssuer>
    <titleOfClass>COM</titleOfClass>
    <cusip>037833100</cusip>
    <value>69900000000</value>
    <shrsOrPrnAmt>
      <sshPrnamt>300000000</sshPrnamt>
      <sshPrnamtType>SH</sshPrnamtType>
    </shrsOrPrnAmt>
  </infoTable>
  <infoTable>
    <nameOfIssuer>Coca-Cola Co &amp; Subs</nameOfIssuer>
    <cusip>191216100</cusip>
    <value>28,640,000,000</value>
    <shrsOrPrnAmt>
      <sshPrnamt>400000000</sshPrnamt>
    </shrsOrPrnAmt>
  </infoTable>
</informationTable>"#;

    const PREFIXED_BARE: &str = r#"<?xml version="1.0"?>
<ns1:edgarSubmission xmlns:ns1="http://www.sec.gov/edgar/thirteenffiler">
  <ns1:infoTable>
    <ns1:NAMEOFISSUER>APPLE INC</ns1:NAMEOFISSUER>
    <ns1:CUSIP>037833100</ns1:CUSIP>
    <ns1:VALUE> 69900000000 </ns1:VALUE>
    <ns1:SHRSORPRNAMT><ns1:SSHPRNAMT>300000000</ns1:SSHPRNAMT></ns1:SHRSORPRNAMT>
  </ns1:infoTable>
  <ns1:infoTable>
    <ns1:nameOfIssuer>Coca-Cola Co &amp; Subs</ns1:nameOfIssuer>
    <ns1:cusip>191216100</ns1:cusip>
    <ns1:value>28640000000</ns1:value>
    <ns1:shrsOrPrnAmt><ns1:sshPrnamt>400000000</ns1:sshPrnamt></ns1:shrsOrPrnAmt>
  </ns1:infoTable>
</ns1:edgarSubmission>"#;

    #[test]
    fn test_layouts_and_prefixes_yield_identical_holdings() {
        let a = extract_holdings(DEFAULT_NAMESPACE_WRAPPED).unwrap();
        let b = extract_holdings(PREFIXED_BARE).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a, b);
        assert_eq!(a[0].issuer, "APPLE INC");
        assert_eq!(a[0].cusip.as_deref(), Some("037833100"));
        assert_eq!(a[0].value, 69_900_000_000.0);
        assert_eq!(a[0].shares, 300_000_000.0);
        assert_eq!(a[1].issuer, "COCA-COLA CO & SUBS");
    }

    #[test]
    fn test_layout_resolution() {
        let wrapped = parse_document(DEFAULT_NAMESPACE_WRAPPED).unwrap();
        assert!(matches!(resolve_layout(&wrapped), Some(TableLayout::Wrapped(rows)) if rows.len() == 2));

        let bare = parse_document(PREFIXED_BARE).unwrap();
        assert!(matches!(resolve_layout(&bare), Some(TableLayout::Bare(rows)) if rows.len() == 2));

        let nested = parse_document(
            "<root><x:informationTable><x:infoTable><value>1</value></x:infoTable></x:informationTable></root>",
        )
        .unwrap();
        assert!(matches!(resolve_layout(&nested), Some(TableLayout::Wrapped(_))));
    }

    #[test]
    fn test_cover_page_has_no_table() {
        let cover = r#"<edgarSubmission><headerData><submissionType>13F-HR</submissionType></headerData>
            <formData><coverPage><reportCalendarOrQuarter>06-30-2025</reportCalendarOrQuarter></coverPage></formData>
            </edgarSubmission>"#;
        assert!(extract_holdings(cover).unwrap().is_empty());
    }

    #[test]
    fn test_noise_rows_are_dropped_silently() {
        let xml = r#"<informationTable>
            <infoTable><nameOfIssuer>NO VALUE CORP</nameOfIssuer></infoTable>
            <infoTable><nameOfIssuer>ZERO CORP</nameOfIssuer><value>0</value></infoTable>
            <infoTable><nameOfIssuer>NEGATIVE CORP</nameOfIssuer><value>-5</value></infoTable>
            <infoTable><nameOfIssuer>GARBAGE CORP</nameOfIssuer><value>n/a</value></infoTable>
            <infoTable><value>10</value></infoTable>
        </informationTable>"#;
        let rows = extract_holdings(xml).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].issuer, "UNKNOWN");
        assert_eq!(rows[0].cusip, None);
        assert_eq!(rows[0].shares, 0.0);
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(matches!(
            extract_holdings("<informationTable><infoTable></informationTable>"),
            Err(ExtractError::Malformed(_))
        ));
        assert!(matches!(
            extract_holdings("<informationTable><infoTable>"),
            Err(ExtractError::Malformed(_))
        ));
        assert!(matches!(extract_holdings("   "), Err(ExtractError::Malformed(_))));
    }
}
