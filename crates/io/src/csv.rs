// Delimited text import and report export

use std::io::Write;
use std::path::Path;

use crate::decode::decode_text;
use crate::error::IoError;
use crate::export::{ExportCell, ExportTable};
use crate::grid::{Cell, Grid, GridFormat};

/// Candidate delimiters in preference order (first wins a tie).
const CANDIDATES: [u8; 4] = [b',', b'\t', b';', b'|'];

/// Lines sampled when sniffing.
const SNIFF_LINES: usize = 20;

/// Decode and parse a delimited text file into a grid.
pub fn read_delimited(source: &str, bytes: &[u8]) -> Result<Grid, IoError> {
    let (content, encoding) = decode_text(bytes)?;
    let delimiter = sniff_delimiter(&content);
    log::debug!(
        "{source}: {} text, delimiter {:?}",
        encoding.name(),
        delimiter as char
    );
    Ok(Grid {
        source: source.to_string(),
        format: GridFormat::Delimited {
            delimiter: delimiter as char,
        },
        encoding: Some(encoding.name()),
        rows: parse_delimited(&content, delimiter)?,
    })
}

/// Detect the most likely field delimiter by checking consistency across the
/// first non-blank lines.
///
/// For each candidate, count fields per line. A candidate must split the most
/// common line shape into more than one field. Score is
/// (lines sharing the modal field count) * modal field count; ties keep the
/// earlier candidate. Exports often carry a few title lines above the table,
/// so the modal count is used rather than the first line's.
pub fn sniff_delimiter(content: &str) -> u8 {
    let sample_lines: Vec<&str> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in &CANDIDATES {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let Some((modal, consistent)) = modal_count(&counts) else {
            continue;
        };
        if modal <= 1 {
            continue;
        }

        let score = consistent as u64 * modal as u64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Most frequent field count (larger count wins ties) and how often it occurs.
fn modal_count(counts: &[usize]) -> Option<(usize, usize)> {
    let mut tally: Vec<(usize, usize)> = Vec::new();
    for &c in counts {
        match tally.iter_mut().find(|(n, _)| *n == c) {
            Some(entry) => entry.1 += 1,
            None => tally.push((c, 1)),
        }
    }
    tally
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
}

/// Parse delimited content into rows of text cells. Rows keep their physical
/// position (blank lines stay as empty rows) so row numbers in diagnostics
/// match the file.
pub fn parse_delimited(content: &str, delimiter: u8) -> Result<Vec<Vec<Cell>>, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(rows.len() + 1);
        // csv skips blank lines; pad so `rows[i]` is physical line i + 1.
        while rows.len() + 1 < line {
            rows.push(Vec::new());
        }
        rows.push(record.iter().map(Cell::text).collect());
    }
    Ok(rows)
}

/// Write an export table as CSV.
pub fn write_table<W: Write>(table: &ExportTable, writer: W) -> Result<(), IoError> {
    let mut writer = csv::WriterBuilder::new().from_writer(writer);

    writer.write_record(&table.columns)?;
    for row in &table.rows {
        let record: Vec<String> = row.iter().map(ExportCell::to_text).collect();
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn export(table: &ExportTable, path: &Path) -> Result<(), IoError> {
    let file = std::fs::File::create(path)?;
    write_table(table, file)
}
