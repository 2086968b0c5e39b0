use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use settlerec_io::Cell;

use crate::config::Side;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One uploaded file, fully in memory.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw table
// ---------------------------------------------------------------------------

/// Literal parse of one file below its detected header row.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub source: String,
    pub format: String,
    pub encoding: Option<&'static str>,
    /// 0-based index of the header row in the file.
    pub header_row: usize,
    pub labels: Vec<String>,
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based row number in the source file.
    pub line: usize,
    pub cells: Vec<Cell>,
}

impl RawTable {
    pub fn get<'a>(&self, row: &'a RawRow, label: &str) -> Option<&'a Cell> {
        let col = self.labels.iter().position(|l| l == label)?;
        row.cells.get(col)
    }
}

// ---------------------------------------------------------------------------
// Canonical values
// ---------------------------------------------------------------------------

/// Typed canonical value. Decimal equality and hashing ignore scale, so
/// `100.0` and `100.00` are the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Decimal(Decimal),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Text(s) => s.clone(),
            Self::Decimal(d) => d.normalize().to_string(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

static NULL: Value = Value::Null;

/// One normalized row. Holds every field of its type; fields the file did
/// not provide are `Null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    /// 1-based source row number (first covered row for aggregates).
    pub row: usize,
    /// Source rows folded into this record by an aggregation step.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub covers: Vec<usize>,
    pub values: BTreeMap<String, Value>,
}

impl CanonicalRecord {
    pub fn get(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&NULL)
    }
}

// ---------------------------------------------------------------------------
// Canonical table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ColumnAssignment {
    pub field: String,
    pub column: usize,
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub field: String,
    pub value: String,
    pub reason: String,
    /// The row was dropped because of this issue.
    pub excluded: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableMeta {
    pub slot: String,
    pub file: String,
    pub side: Option<Side>,
    pub format: String,
    pub encoding: Option<String>,
    /// 1-based header row number.
    pub header_row: usize,
    pub mapping: Vec<ColumnAssignment>,
    pub unmapped: Vec<String>,
    pub data_rows: usize,
    pub blank_rows: usize,
    pub filtered_rows: usize,
    pub excluded_rows: usize,
    pub null_values: usize,
    pub issues: Vec<RowIssue>,
    /// Set when an aggregation step replaced the source records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated_from: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalTable {
    pub meta: TableMeta,
    pub records: Vec<CanonicalRecord>,
}

impl CanonicalTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    MatchedWithDiscrepancy,
    UnmatchedLeft,
    UnmatchedRight,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Matched => write!(f, "matched"),
            Self::MatchedWithDiscrepancy => write!(f, "matched_with_discrepancy"),
            Self::UnmatchedLeft => write!(f, "unmatched_left"),
            Self::UnmatchedRight => write!(f, "unmatched_right"),
        }
    }
}

/// Signed difference `left - right` for one compared field. `None` when a
/// side is null or the field is text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDelta {
    pub field: String,
    pub delta: Option<Decimal>,
    pub within_tolerance: bool,
}

/// Indices refer to the matched tables' record vectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchResult {
    Matched {
        left: usize,
        right: usize,
        deltas: Vec<FieldDelta>,
    },
    MatchedWithDiscrepancy {
        left: usize,
        right: usize,
        deltas: Vec<FieldDelta>,
    },
    UnmatchedLeft {
        left: usize,
    },
    UnmatchedRight {
        right: usize,
    },
}

impl MatchResult {
    pub fn status(&self) -> MatchStatus {
        match self {
            Self::Matched { .. } => MatchStatus::Matched,
            Self::MatchedWithDiscrepancy { .. } => MatchStatus::MatchedWithDiscrepancy,
            Self::UnmatchedLeft { .. } => MatchStatus::UnmatchedLeft,
            Self::UnmatchedRight { .. } => MatchStatus::UnmatchedRight,
        }
    }

    pub fn left(&self) -> Option<usize> {
        match self {
            Self::Matched { left, .. }
            | Self::MatchedWithDiscrepancy { left, .. }
            | Self::UnmatchedLeft { left } => Some(*left),
            Self::UnmatchedRight { .. } => None,
        }
    }

    pub fn right(&self) -> Option<usize> {
        match self {
            Self::Matched { right, .. }
            | Self::MatchedWithDiscrepancy { right, .. }
            | Self::UnmatchedRight { right } => Some(*right),
            Self::UnmatchedLeft { .. } => None,
        }
    }

    pub fn deltas(&self) -> &[FieldDelta] {
        match self {
            Self::Matched { deltas, .. } | Self::MatchedWithDiscrepancy { deltas, .. } => deltas,
            _ => &[],
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Self::Matched { .. } | Self::MatchedWithDiscrepancy { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_values_ignore_scale() {
        let a = Value::Decimal(Decimal::new(1000, 1));
        let b = Value::Decimal(Decimal::new(10000, 2));
        assert_eq!(a, b);
        assert_eq!(a.display(), "100");
    }

    #[test]
    fn raw_row_lookup_by_label() {
        let table = RawTable {
            source: "bank.csv".into(),
            format: "csv".into(),
            encoding: None,
            header_row: 0,
            labels: vec!["Section".into(), "Net".into()],
            rows: vec![RawRow {
                line: 2,
                cells: vec![Cell::text("Interchange")],
            }],
        };
        let row = &table.rows[0];
        assert_eq!(table.get(row, "Section"), Some(&Cell::text("Interchange")));
        // Short row: label exists but the cell does not.
        assert_eq!(table.get(row, "Net"), None);
        assert_eq!(table.get(row, "Fee"), None);
    }

    #[test]
    fn missing_field_reads_null() {
        let record = CanonicalRecord {
            row: 2,
            covers: Vec::new(),
            values: BTreeMap::new(),
        };
        assert!(record.get("amount").is_null());
    }

    #[test]
    fn result_accessors() {
        let r = MatchResult::UnmatchedRight { right: 3 };
        assert_eq!(r.status(), MatchStatus::UnmatchedRight);
        assert_eq!(r.left(), None);
        assert_eq!(r.right(), Some(3));
        assert!(r.deltas().is_empty());
        assert!(!r.is_pair());
    }

    #[test]
    fn result_serializes_with_status_tag() {
        let r = MatchResult::UnmatchedLeft { left: 0 };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "unmatched_left");
        assert_eq!(json["left"], 0);
    }
}
