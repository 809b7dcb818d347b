// Record Normalizer - wide-format support table → flat support records
//
// Input layout (one row per year+month, one column per institution):
//
//   연도,월,주택도시기금1)(억원),국민은행(억원),우리은행(억원),...
//   2005,1,1019,846,82,...

use crate::error::{FinanceError, Result};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Header token for the year column (column 0)
pub const YEAR_HEADER: &str = "연도";

/// Header token for the month column (column 1)
pub const MONTH_HEADER: &str = "월";

/// Institution columns start after year and month
const FIRST_INSTITUTION_COLUMN: usize = 2;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One normalized fact, still keyed by institution name
///
/// Identity is bound later by the institution catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub institution: String,
    pub year: String,
    pub month: String,
    pub amount: Decimal,
}

/// Output of `RecordNormalizer::normalize`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTable {
    /// Institution names in header order, deduplicated
    pub institutions: Vec<String>,

    /// Exact duplicates collapse (set semantics)
    pub records: BTreeSet<NormalizedRecord>,
}

// ============================================================================
// PAYLOAD DECODING
// ============================================================================

/// Decode an uploaded EUC-KR CSV payload into rows of trimmed cells
///
/// `None` means no file was uploaded at all and is reported as `NoInput`
/// before any parsing happens.
pub fn decode_payload(payload: Option<&[u8]>) -> Result<Vec<Vec<String>>> {
    let bytes = payload.ok_or(FinanceError::NoInput)?;

    // No BOM sniffing: uploads are always EUC-KR
    let (text, had_errors) = encoding_rs::EUC_KR.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(FinanceError::malformed("payload is not valid EUC-KR text"));
    }

    read_table(&text)
}

/// Split CSV text into rows (standard quoting, ragged rows allowed)
pub fn read_table(text: &str) -> Result<Vec<Vec<String>>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            FinanceError::malformed(format!("failed to parse CSV line {}: {}", line_num + 1, e))
        })?;

        rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
    }

    Ok(rows)
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Remove a trailing unit annotation such as "(억원)" plus stray parentheses
///
/// "국민은행(억원)" → "국민은행", "주택도시기금1)(억원)" → "주택도시기금1"
pub fn strip_unit_suffix(header: &str) -> String {
    let trimmed = header.trim();

    let base = match trimmed.rfind('(') {
        Some(open) if trimmed.ends_with(')') => &trimmed[..open],
        _ => trimmed,
    };

    base.chars()
        .filter(|c| *c != '(' && *c != ')')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whole currency units with optional thousands separators ("1,019")
fn parse_amount(cell: &str) -> Option<Decimal> {
    let digits: String = cell.chars().filter(|c| *c != ',').collect();
    digits.trim().parse::<i64>().ok().map(Decimal::from)
}

pub struct RecordNormalizer;

impl RecordNormalizer {
    pub fn new() -> Self {
        RecordNormalizer
    }

    /// Parse one wide-format table into institution names + records
    ///
    /// Fails with `MalformedInput` when the header is not `연도,월,...`, an
    /// amount cell is not a whole number, or a row is shorter than the
    /// discovered institution columns. Empty amount cells produce no record.
    pub fn normalize(&self, table: &[Vec<String>]) -> Result<NormalizedTable> {
        let header = table
            .first()
            .ok_or_else(|| FinanceError::malformed("missing header row"))?;

        self.validate_header(header)?;
        let columns = self.discover_columns(header)?;

        let mut normalized = NormalizedTable::default();
        for (_, name) in &columns {
            if !normalized.institutions.contains(name) {
                normalized.institutions.push(name.clone());
            }
        }

        for (row_index, row) in table.iter().enumerate().skip(1) {
            let line = row_index + 1;
            let year = row.first().map(String::as_str).unwrap_or("");
            let month = row.get(1).map(String::as_str).unwrap_or("");

            if row.iter().all(|cell| cell.is_empty()) {
                warn!(line, "skipping blank row");
                continue;
            }
            if year.is_empty() || month.is_empty() {
                return Err(FinanceError::malformed(format!(
                    "line {}: year and month are both required",
                    line
                )));
            }

            for (column, name) in &columns {
                let cell = row.get(*column).ok_or_else(|| {
                    FinanceError::malformed(format!(
                        "line {}: missing amount for {} (column {})",
                        line,
                        name,
                        column + 1
                    ))
                })?;

                if cell.is_empty() {
                    continue;
                }

                let amount = parse_amount(cell).ok_or_else(|| {
                    FinanceError::malformed(format!(
                        "line {}: amount '{}' for {} is not a whole number",
                        line, cell, name
                    ))
                })?;

                normalized.records.insert(NormalizedRecord {
                    institution: name.clone(),
                    year: year.to_string(),
                    month: month.to_string(),
                    amount,
                });
            }
        }

        info!(
            institutions = normalized.institutions.len(),
            records = normalized.records.len(),
            "normalized support table"
        );

        Ok(normalized)
    }

    fn validate_header(&self, header: &[String]) -> Result<()> {
        let year = header.first().map(String::as_str);
        let month = header.get(1).map(String::as_str);

        if year != Some(YEAR_HEADER) || month != Some(MONTH_HEADER) {
            return Err(FinanceError::malformed(format!(
                "header must start with '{},{}'",
                YEAR_HEADER, MONTH_HEADER
            )));
        }

        Ok(())
    }

    /// Institution columns up to the first blank header cell
    fn discover_columns(&self, header: &[String]) -> Result<Vec<(usize, String)>> {
        let mut columns = Vec::new();

        for (index, cell) in header.iter().enumerate().skip(FIRST_INSTITUTION_COLUMN) {
            if cell.is_empty() {
                debug!(column = index + 1, "blank header cell ends institution columns");
                break;
            }

            let name = strip_unit_suffix(cell);
            if name.is_empty() {
                return Err(FinanceError::malformed(format!(
                    "header column {} ('{}') has no institution name",
                    index + 1,
                    cell
                )));
            }

            debug!(column = index + 1, institution = %name, "discovered institution column");
            columns.push((index, name));
        }

        Ok(columns)
    }
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "연도,월,주택도시기금1)(억원),국민은행(억원),우리은행(억원),신한은행(억원),한국시티은행(억원),하나은행(억원),농협은행/수협은행(억원),외환은행(억원),기타은행(억원)";

    fn normalize_text(text: &str) -> Result<NormalizedTable> {
        RecordNormalizer::new().normalize(&read_table(text)?)
    }

    fn amount_of(table: &NormalizedTable, institution: &str, year: &str, month: &str) -> Option<Decimal> {
        table
            .records
            .iter()
            .find(|r| r.institution == institution && r.year == year && r.month == month)
            .map(|r| r.amount)
    }

    #[test]
    fn test_strip_unit_suffix() {
        assert_eq!(strip_unit_suffix("국민은행(억원)"), "국민은행");
        assert_eq!(strip_unit_suffix("주택도시기금1)(억원)"), "주택도시기금1");
        assert_eq!(strip_unit_suffix("농협은행/수협은행(억원)"), "농협은행/수협은행");
        assert_eq!(strip_unit_suffix("기타은행"), "기타은행");
    }

    #[test]
    fn test_normalize_full_row() {
        let text = format!("{}\n2005,1,1019,846,82,95,30,157,57,80,99", HEADER);
        let table = normalize_text(&text).unwrap();

        assert_eq!(table.institutions.len(), 9);
        assert_eq!(table.institutions[0], "주택도시기금1");
        assert_eq!(table.institutions[1], "국민은행");
        assert_eq!(table.institutions[8], "기타은행");
        assert_eq!(table.records.len(), 9);
        assert_eq!(amount_of(&table, "국민은행", "2005", "1"), Some(Decimal::from(846)));
        assert_eq!(amount_of(&table, "외환은행", "2005", "1"), Some(Decimal::from(80)));
    }

    #[test]
    fn test_header_validation_fails_regardless_of_content() {
        let missing_year = "주택도시기금1)(억원),국민은행(억원)\n2005,1";
        let swapped = "월,연도,국민은행(억원)\n1,2005,846";

        for text in [missing_year, swapped] {
            match normalize_text(text) {
                Err(FinanceError::MalformedInput { .. }) => {}
                other => panic!("expected MalformedInput, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_empty_table_is_malformed() {
        let result = RecordNormalizer::new().normalize(&[]);
        assert!(matches!(result, Err(FinanceError::MalformedInput { .. })));
    }

    #[test]
    fn test_blank_header_cell_ends_discovery() {
        let text = "연도,월,국민은행(억원),,비고\n2005,1,846,,ignored";
        let table = normalize_text(text).unwrap();

        assert_eq!(table.institutions, vec!["국민은행".to_string()]);
        assert_eq!(table.records.len(), 1);
    }

    #[test]
    fn test_thousands_separators_are_stripped() {
        let text = "연도,월,국민은행(억원)\n2005,1,\"1,019\"\n2005,2,-3";
        let table = normalize_text(text).unwrap();

        assert_eq!(amount_of(&table, "국민은행", "2005", "1"), Some(Decimal::from(1019)));
        assert_eq!(amount_of(&table, "국민은행", "2005", "2"), Some(Decimal::from(-3)));
    }

    #[test]
    fn test_non_numeric_amount_is_malformed() {
        let text = "연도,월,국민은행(억원)\n2005,1,abc";
        assert!(matches!(
            normalize_text(text),
            Err(FinanceError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_short_row_is_malformed() {
        let text = "연도,월,국민은행(억원),우리은행(억원)\n2005,1,846";
        assert!(matches!(
            normalize_text(text),
            Err(FinanceError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_empty_amount_and_blank_rows_are_skipped() {
        let text = "연도,월,국민은행(억원),우리은행(억원)\n2005,1,846,\n,,,\n2005,2,10,20";
        let table = normalize_text(text).unwrap();

        assert_eq!(table.records.len(), 3);
        assert_eq!(amount_of(&table, "우리은행", "2005", "1"), None);
    }

    #[test]
    fn test_amounts_without_year_and_month_are_malformed() {
        let text = "연도,월,국민은행(억원)\n2005,1,846\n,,999\n";
        assert!(matches!(
            normalize_text(text),
            Err(FinanceError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_duplicate_rows_collapse() {
        let text = "연도,월,국민은행(억원)\n2005,1,846\n2005,1,846";
        let table = normalize_text(text).unwrap();

        assert_eq!(table.records.len(), 1);
    }

    #[test]
    fn test_year_and_month_are_kept_verbatim() {
        let text = "연도,월,국민은행(억원)\n2005,01,846";
        let table = normalize_text(text).unwrap();

        assert_eq!(amount_of(&table, "국민은행", "2005", "01"), Some(Decimal::from(846)));
        assert_eq!(amount_of(&table, "국민은행", "2005", "1"), None);
    }

    #[test]
    fn test_decode_payload_without_file() {
        assert!(matches!(decode_payload(None), Err(FinanceError::NoInput)));
    }

    #[test]
    fn test_decode_payload_euc_kr() {
        let text = format!("{}\n2005,1,1019,846,82,95,30,157,57,80,99", HEADER);
        let (bytes, _, _) = encoding_rs::EUC_KR.encode(&text);

        let rows = decode_payload(Some(&bytes[..])).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], YEAR_HEADER);
        assert_eq!(rows[0][3], "국민은행(억원)");
    }

    #[test]
    fn test_decode_payload_rejects_invalid_euc_kr() {
        let bytes = [0xC7, 0xFF, b',', 0xFF, b'\n'];
        assert!(matches!(
            decode_payload(Some(&bytes[..])),
            Err(FinanceError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_decode_payload_ignores_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("연도,월,국민은행(억원)\n2005,1,846\n".as_bytes());

        match decode_payload(Some(&bytes[..])) {
            Err(FinanceError::MalformedInput { .. }) => {}
            Ok(rows) => assert_ne!(rows[0][0], YEAR_HEADER),
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
}
