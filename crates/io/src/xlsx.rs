// Excel file import (xlsx, xls, xlsb, ods) and report export (xlsx only)
//
// Import: the first sheet with data (or a named sheet) becomes a cell grid.
//         Cell positions are preserved, so row numbers match the workbook.
// Export: one worksheet, bold frozen header row, decimals written as numbers.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};

use crate::error::IoError;
use crate::export::{ExportCell, ExportTable};
use crate::grid::{Cell, Grid, GridFormat};

/// Maximum number of rows read from one sheet.
const MAX_ROWS: usize = 1_048_576;

/// Maximum columns read from one sheet.
const MAX_COLS: usize = 16_384;

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xls", "xlsb", "ods"];

/// True when the file name or content says "spreadsheet".
pub fn is_spreadsheet(file_name: &str, bytes: &[u8]) -> bool {
    let by_extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SPREADSHEET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    // Zip container (xlsx/xlsm/ods/xlsb) or OLE compound file (xls).
    by_extension
        || bytes.starts_with(b"PK\x03\x04")
        || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1])
}

/// Read one sheet of a workbook held in memory. Without `sheet`, the first
/// sheet containing at least one non-empty cell is used.
pub fn read_spreadsheet(source: &str, bytes: &[u8], sheet: Option<&str>) -> Result<Grid, IoError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| IoError::Spreadsheet(e.to_string()))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(IoError::NoSheets);
    }

    let (name, range) = match sheet {
        Some(wanted) => {
            let name = sheet_names
                .iter()
                .find(|n| n.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| IoError::SheetNotFound(wanted.to_string()))?
                .clone();
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| IoError::Spreadsheet(format!("sheet '{name}': {e}")))?;
            (name, range)
        }
        None => {
            let mut found = None;
            for name in &sheet_names {
                let range = workbook
                    .worksheet_range(name)
                    .map_err(|e| IoError::Spreadsheet(format!("sheet '{name}': {e}")))?;
                if has_data(&range) {
                    found = Some((name.clone(), range));
                    break;
                }
                log::debug!("{source}: skipping empty sheet '{name}'");
            }
            found.ok_or(IoError::NoSheets)?
        }
    };

    log::debug!("{source}: reading sheet '{name}'");

    Ok(Grid {
        source: source.to_string(),
        format: GridFormat::Spreadsheet { sheet: name },
        encoding: None,
        rows: range_to_rows(&range),
    })
}

fn has_data(range: &Range<Data>) -> bool {
    range.rows().any(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
}

fn range_to_rows(range: &Range<Data>) -> Vec<Vec<Cell>> {
    // Range start offset (data may not begin at A1)
    let (start_row, start_col) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); start_row.min(MAX_ROWS)];

    for row in range.rows() {
        if rows.len() >= MAX_ROWS {
            break;
        }
        let mut cells = vec![Cell::Empty; start_col.min(MAX_COLS)];
        for cell in row.iter() {
            if cells.len() >= MAX_COLS {
                break;
            }
            cells.push(convert_cell(cell));
        }
        while matches!(cells.last(), Some(Cell::Empty)) {
            cells.pop();
        }
        rows.push(cells);
    }

    rows
}

fn convert_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::text(s.clone()),
        Data::Float(n) => Cell::Number(*n),
        Data::Int(n) => Cell::Number(*n as f64),
        Data::Bool(b) => Cell::Bool(*b),
        // Error cells carry no usable value.
        Data::Error(_) => Cell::Empty,
        Data::DateTime(dt) => match serial_to_datetime(dt.as_f64()) {
            Some(value) => Cell::DateTime(value),
            None => Cell::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => Cell::text(s.clone()),
        Data::DurationIso(s) => Cell::text(s.clone()),
    }
}

/// Excel 1900-system serial to a date-time. Serials before 1900-03-01 are
/// off by one because of Excel's phantom 1900-02-29; exports never use them.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 1.0 || serial > 2_958_465.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.floor();
    let seconds = ((serial - days) * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::days(days as i64) + Duration::seconds(seconds))
}

/// Build the report workbook.
fn build_workbook(table: &ExportTable, sheet_name: &str) -> Result<XlsxWorkbook, IoError> {
    let mut workbook = XlsxWorkbook::new();
    let header_format = Format::new().set_bold();

    let worksheet = workbook.add_worksheet().set_name(sheet_name)?;

    for (col, name) in table.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, name, &header_format)?;
        let width = (name.len().max(10) + 2).min(40) as f64;
        worksheet.set_column_width(col as u16, width)?;
    }

    for (row_idx, row) in table.rows.iter().enumerate() {
        let row32 = (row_idx + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            let col16 = col as u16;
            match cell {
                ExportCell::Empty => {}
                ExportCell::Text(s) => {
                    worksheet.write_string(row32, col16, s)?;
                }
                ExportCell::Decimal(d) => match d.to_f64() {
                    Some(n) => {
                        worksheet.write_number(row32, col16, n)?;
                    }
                    None => {
                        worksheet.write_string(row32, col16, d.to_string())?;
                    }
                },
                ExportCell::Date(d) => {
                    worksheet.write_string(row32, col16, d.format("%Y-%m-%d").to_string())?;
                }
            }
        }
    }

    worksheet.set_freeze_panes(1, 0)?;
    Ok(workbook)
}

/// Write the table to an .xlsx file.
pub fn export(table: &ExportTable, path: &Path, sheet_name: &str) -> Result<(), IoError> {
    let mut workbook = build_workbook(table, sheet_name)?;
    workbook.save(path)?;
    Ok(())
}

/// Serialize the table to .xlsx bytes (for callers that stream the download).
pub fn to_buffer(table: &ExportTable, sheet_name: &str) -> Result<Vec<u8>, IoError> {
    let mut workbook = build_workbook(table, sheet_name)?;
    Ok(workbook.save_to_buffer()?)
}
