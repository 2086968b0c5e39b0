//! Ingestion: one uploaded file of unknown shape in, one canonical table out.
//!
//! Steps, in order:
//!
//! 1. read the bytes into a cell grid (`settlerec_io::read_grid`)
//! 2. find the header row within the first `header_scan_rows` rows
//! 3. map column labels to canonical fields by scored alias similarity
//! 4. coerce each data row, then apply the slot's filter and transform

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use settlerec_io::amount::{decimal_from_f64, parse_amount};
use settlerec_io::xlsx::serial_to_datetime;
use settlerec_io::{read_grid, Cell, Grid};

use crate::config::{FieldConfig, FieldKind, IngestConfig, ReconTypeConfig, RowFilter, SlotConfig};
use crate::error::ReconError;
use crate::model::{
    CanonicalRecord, CanonicalTable, ColumnAssignment, InputFile, RawRow, RawTable, RowIssue,
    TableMeta, Value,
};

/// Tried after a field's own `date_formats`. Day-first wins for ambiguous
/// slash dates.
const DEFAULT_DATE_FORMATS: [&str; 12] = [
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y/%m/%d",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d-%b-%y",
    "%d%b%y",
    "%d%b%Y",
    "%b %d, %Y",
];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"];

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Normalize one file for `slot` of `config`.
pub fn normalize_file(
    config: &ReconTypeConfig,
    slot: &SlotConfig,
    input: &InputFile,
) -> Result<CanonicalTable, ReconError> {
    let grid = read_grid(&input.name, &input.bytes, slot.format, slot.sheet.as_deref())
        .map_err(|e| ReconError::unreadable(&slot.name, &input.name, &e))?;
    log::debug!(
        "{}: {} rows, format {}, encoding {}",
        input.name,
        grid.rows.len(),
        grid.format,
        grid.encoding.unwrap_or("n/a")
    );

    let fields: Vec<&FieldConfig> = config
        .fields
        .iter()
        .filter(|f| f.applies_to(slot.side))
        .collect();

    let raw = detect_header(&grid, &fields, &config.ingest).ok_or_else(|| {
        ReconError::NoHeaderFound {
            slot: slot.name.clone(),
            file: input.name.clone(),
            scanned: config.ingest.header_scan_rows.min(grid.rows.len()),
        }
    })?;
    log::debug!("{}: header at row {}", input.name, raw.header_row + 1);

    let mapping = map_columns(&raw.labels, &fields, config.ingest.similarity_threshold);
    for a in &mapping.assigned {
        log::debug!(
            "{}: '{}' -> {} (score {:.2})",
            input.name,
            a.label,
            a.field,
            a.score
        );
    }

    for name in &mapping.unmapped {
        let mandatory = fields.iter().any(|f| &f.name == name && f.mandatory);
        if mandatory {
            return Err(ReconError::MissingRequiredField {
                slot: slot.name.clone(),
                file: input.name.clone(),
                field: name.clone(),
            });
        }
        log::warn!("{}: no column for field '{name}', values will be null", input.name);
    }

    let mut meta = TableMeta {
        slot: slot.name.clone(),
        file: input.name.clone(),
        side: Some(slot.side),
        format: raw.format.clone(),
        encoding: raw.encoding.map(str::to_string),
        header_row: raw.header_row + 1,
        mapping: mapping.assigned.clone(),
        unmapped: mapping.unmapped.clone(),
        ..TableMeta::default()
    };

    let records = coerce_rows(config, slot, &raw, &mapping.assigned, &mut meta);

    if meta.excluded_rows > 0 {
        log::warn!(
            "{}: {} row(s) excluded for invalid mandatory values",
            input.name,
            meta.excluded_rows
        );
    }
    log::debug!(
        "{}: {} records ({} blank, {} filtered, {} excluded)",
        input.name,
        records.len(),
        meta.blank_rows,
        meta.filtered_rows,
        meta.excluded_rows
    );

    Ok(CanonicalTable { meta, records })
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Lower-case letters and digits only.
pub fn normalize_label(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn tokens(s: &str) -> Vec<String> {
    let mut out: Vec<String> = s
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Similarity of a column label to an alias, in [0, 1]: the better of the
/// normalized Levenshtein similarity and the Dice overlap of word tokens.
pub fn similarity(label: &str, alias: &str) -> f64 {
    let a = normalize_label(label);
    let b = normalize_label(alias);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let lev = strsim::normalized_levenshtein(&a, &b);

    let ta = tokens(label);
    let tb = tokens(alias);
    let shared = ta.iter().filter(|t| tb.contains(t)).count();
    let dice = if ta.is_empty() && tb.is_empty() {
        0.0
    } else {
        (2 * shared) as f64 / (ta.len() + tb.len()) as f64
    };

    lev.max(dice)
}

/// Best score of `label` against the field's name and aliases.
pub fn field_score(label: &str, field: &FieldConfig) -> f64 {
    std::iter::once(field.name.as_str())
        .chain(field.aliases.iter().map(String::as_str))
        .map(|alias| similarity(label, alias))
        .fold(0.0, f64::max)
}

// ---------------------------------------------------------------------------
// Header detection
// ---------------------------------------------------------------------------

/// Pick the header row: most alias matches, then the higher share of
/// non-empty, non-numeric cells, then the earliest row.
pub fn detect_header(grid: &Grid, fields: &[&FieldConfig], ingest: &IngestConfig) -> Option<RawTable> {
    let needed = ingest.min_header_matches.min(fields.len()).max(1);
    let threshold = ingest.similarity_threshold;

    let mut best: Option<(usize, usize, f64)> = None;
    for (idx, row) in grid.rows.iter().take(ingest.header_scan_rows).enumerate() {
        let matches = row
            .iter()
            .filter(|cell| matches!(cell, Cell::Text(_)))
            .filter(|cell| {
                let label = cell.display();
                fields.iter().any(|f| field_score(&label, f) >= threshold)
            })
            .count();
        if matches < needed {
            continue;
        }

        let textual = row.iter().filter(|c| !c.is_empty() && !c.looks_numeric()).count();
        let ratio = textual as f64 / row.len().max(1) as f64;

        let better = match best {
            None => true,
            Some((_, m, r)) => matches > m || (matches == m && ratio > r),
        };
        if better {
            best = Some((idx, matches, ratio));
        }
    }

    let (header_row, _, _) = best?;
    let labels: Vec<String> = grid.rows[header_row].iter().map(Cell::display).collect();
    let rows = grid
        .rows
        .iter()
        .enumerate()
        .skip(header_row + 1)
        .map(|(idx, cells)| RawRow {
            line: idx + 1,
            cells: cells.clone(),
        })
        .collect();

    Some(RawTable {
        source: grid.source.clone(),
        format: grid.format.to_string(),
        encoding: grid.encoding,
        header_row,
        labels,
        rows,
    })
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Mapping {
    /// In field declaration order.
    pub assigned: Vec<ColumnAssignment>,
    pub unmapped: Vec<String>,
}

/// One-to-one greedy assignment of columns to fields. Candidates at or above
/// `threshold` are taken by score (descending), then column (leftmost), then
/// field declaration order.
pub fn map_columns(labels: &[String], fields: &[&FieldConfig], threshold: f64) -> Mapping {
    let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
    for (fi, field) in fields.iter().enumerate() {
        for (col, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                continue;
            }
            let score = field_score(label, field);
            if score >= threshold {
                candidates.push((score, col, fi));
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut field_col: Vec<Option<(usize, f64)>> = vec![None; fields.len()];
    let mut col_taken = vec![false; labels.len()];
    for (score, col, fi) in candidates {
        if field_col[fi].is_some() || col_taken[col] {
            continue;
        }
        field_col[fi] = Some((col, score));
        col_taken[col] = true;
    }

    let mut mapping = Mapping::default();
    for (fi, field) in fields.iter().enumerate() {
        match field_col[fi] {
            Some((col, score)) => mapping.assigned.push(ColumnAssignment {
                field: field.name.clone(),
                column: col,
                label: labels[col].clone(),
                score,
            }),
            None => mapping.unmapped.push(field.name.clone()),
        }
    }
    mapping
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Canonical key for `value_map` lookups and filter comparisons.
fn fold_key(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

fn mapped_text(text: String, field: &FieldConfig) -> Value {
    match field.value_map.get(&fold_key(&text)) {
        Some(mapped) => Value::Text(mapped.clone()),
        None => Value::Text(text),
    }
}

/// Coerce one raw cell to `field`'s type. Empty cells are `Ok(Null)` unless
/// the field names an `empty_as` text.
pub fn coerce_cell(cell: &Cell, field: &FieldConfig) -> Result<Value, String> {
    if cell.is_empty() {
        return Ok(match field.empty_as {
            Some(ref text) => mapped_text(text.clone(), field),
            None => Value::Null,
        });
    }
    match field.kind {
        FieldKind::Text => Ok(mapped_text(cell.display(), field)),
        FieldKind::Decimal => match cell {
            Cell::Number(n) => decimal_from_f64(*n)
                .map(Value::Decimal)
                .ok_or_else(|| format!("number {n} is out of range")),
            Cell::Text(s) => parse_amount(s)
                .map(Value::Decimal)
                .ok_or_else(|| "not a decimal amount".to_string()),
            _ => Err("not a decimal amount".to_string()),
        },
        FieldKind::Date => match cell {
            Cell::DateTime(dt) => Ok(Value::Date(dt.date())),
            Cell::Number(n) => serial_to_datetime(*n)
                .map(|dt| Value::Date(dt.date()))
                .ok_or_else(|| format!("number {n} is not a spreadsheet date")),
            Cell::Text(s) => parse_date(s.trim(), &field.date_formats)
                .map(Value::Date)
                .ok_or_else(|| "not a recognised date".to_string()),
            _ => Err("not a recognised date".to_string()),
        },
    }
}

/// Try the given formats, then the defaults, then common date-time forms.
pub fn parse_date(s: &str, formats: &[String]) -> Option<NaiveDate> {
    formats
        .iter()
        .map(String::as_str)
        .chain(DEFAULT_DATE_FORMATS)
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

pub(crate) fn passes_filter(filter: &RowFilter, value: &Value) -> bool {
    if filter.numeric {
        let numeric = match value {
            Value::Decimal(_) => true,
            Value::Text(s) => parse_amount(s).is_some(),
            _ => false,
        };
        if !numeric {
            return false;
        }
    }
    if filter.values.is_empty() {
        return true;
    }
    let key = fold_key(&value.display());
    filter.values.iter().any(|v| fold_key(v) == key)
}

fn coerce_rows(
    config: &ReconTypeConfig,
    slot: &SlotConfig,
    raw: &RawTable,
    assigned: &[ColumnAssignment],
    meta: &mut TableMeta,
) -> Vec<CanonicalRecord> {
    let columns: BTreeMap<&str, usize> = assigned
        .iter()
        .map(|a| (a.field.as_str(), a.column))
        .collect();

    let mut records = Vec::new();

    for row in &raw.rows {
        if row.cells.iter().all(Cell::is_empty) {
            meta.blank_rows += 1;
            continue;
        }
        meta.data_rows += 1;

        // Coerce every mapped field first; issues are only recorded for rows
        // that survive the filter.
        let mut values: BTreeMap<String, Value> = BTreeMap::new();
        let mut problems: Vec<(&FieldConfig, String, String)> = Vec::new();
        for field in &config.fields {
            let value = match columns.get(field.name.as_str()) {
                Some(&col) => {
                    let cell = row.cells.get(col).unwrap_or(&Cell::Empty);
                    match coerce_cell(cell, field) {
                        Ok(v) => v,
                        Err(reason) => {
                            problems.push((field, cell.display(), reason));
                            Value::Null
                        }
                    }
                }
                None => Value::Null,
            };
            values.insert(field.name.clone(), value);
        }

        if let Some(ref filter) = slot.filter {
            let keep = values
                .get(&filter.field)
                .is_some_and(|value| passes_filter(filter, value));
            if !keep {
                meta.filtered_rows += 1;
                continue;
            }
        }

        // Mandatory fields must be present and valid.
        let mut excluded = false;
        for field in config.fields.iter().filter(|f| f.mandatory && f.applies_to(slot.side)) {
            let invalid = problems.iter().find(|(f, _, _)| f.name == field.name);
            let empty = values.get(&field.name).map_or(true, Value::is_null);
            if let Some((_, raw_value, reason)) = invalid {
                meta.issues.push(RowIssue {
                    row: row.line,
                    field: field.name.clone(),
                    value: raw_value.clone(),
                    reason: reason.clone(),
                    excluded: true,
                });
                excluded = true;
            } else if empty {
                meta.issues.push(RowIssue {
                    row: row.line,
                    field: field.name.clone(),
                    value: String::new(),
                    reason: "required value is empty".into(),
                    excluded: true,
                });
                excluded = true;
            }
        }
        if excluded {
            meta.excluded_rows += 1;
            continue;
        }

        for (field, raw_value, reason) in problems {
            meta.null_values += 1;
            meta.issues.push(RowIssue {
                row: row.line,
                field: field.name.clone(),
                value: raw_value,
                reason,
                excluded: false,
            });
        }

        if let Some(ref xf) = slot.transform {
            let applies = match xf.when_field {
                Some(ref when) => {
                    let key = fold_key(&values.get(when).map(Value::display).unwrap_or_default());
                    xf.when_values.iter().any(|v| fold_key(v) == key)
                }
                None => true,
            };
            if applies {
                if let Some(value) = values.get_mut(&xf.field) {
                    if let Value::Decimal(d) = *value {
                        match d.checked_mul(xf.multiply) {
                            Some(product) => *value = Value::Decimal(product),
                            None => {
                                *value = Value::Null;
                                meta.null_values += 1;
                                meta.issues.push(RowIssue {
                                    row: row.line,
                                    field: xf.field.clone(),
                                    value: d.to_string(),
                                    reason: format!("times {} is out of range", xf.multiply),
                                    excluded: false,
                                });
                            }
                        }
                    }
                }
            }
        }

        records.push(CanonicalRecord {
            row: row.line,
            covers: Vec::new(),
            values,
        });
    }

    records
}

/// Sum of `field` over a table, skipping nulls. `None` when the sum leaves
/// the decimal range.
pub fn column_total(table: &CanonicalTable, field: &str) -> Option<Decimal> {
    table
        .records
        .iter()
        .filter_map(|r| r.get(field).as_decimal())
        .try_fold(Decimal::ZERO, Decimal::checked_add)
}
