// Raw cell grid produced by every reader, before any header or schema logic.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One raw cell as read from a file. Delimited text only ever yields
/// `Text`/`Empty`; spreadsheets keep their native typing.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// True for cells that read as a number (typed numbers, or text such as
    /// `1,250.00` / `(12.5)` / `300.00CR`).
    pub fn looks_numeric(&self) -> bool {
        match self {
            Cell::Number(_) => true,
            Cell::Text(s) => crate::amount::parse_amount(s).is_some(),
            _ => false,
        }
    }

    /// Display form used for header labels and text fields.
    pub fn display(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => format_number(*n),
            Cell::Bool(b) => if *b { "TRUE".into() } else { "FALSE".into() },
            Cell::DateTime(dt) => {
                if dt.time() == chrono::NaiveTime::MIN {
                    dt.date().format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
        }
    }
}

/// Integers without decimals; everything else in shortest round-trip form.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Format requested by a file slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Spreadsheet by extension or magic bytes, delimited text otherwise.
    #[default]
    Auto,
    Delimited,
    Spreadsheet,
    SettlementText,
}

/// Format the reader actually used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridFormat {
    Delimited { delimiter: char },
    Spreadsheet { sheet: String },
    SettlementText,
}

impl fmt::Display for GridFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delimited { delimiter } => match delimiter {
                '\t' => write!(f, "delimited (tab)"),
                d => write!(f, "delimited ('{d}')"),
            },
            Self::Spreadsheet { sheet } => write!(f, "spreadsheet (sheet '{sheet}')"),
            Self::SettlementText => write!(f, "settlement text"),
        }
    }
}

/// A file read into rows of cells. Row 0 is the first physical row/line.
#[derive(Debug, Clone)]
pub struct Grid {
    pub source: String,
    pub format: GridFormat,
    /// Text encoding used, `None` for binary spreadsheets.
    pub encoding: Option<&'static str>,
    pub rows: Vec<Vec<Cell>>,
}

impl Grid {
    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&Cell::Empty)
    }
}
