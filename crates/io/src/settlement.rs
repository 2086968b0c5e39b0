// Card-network settlement summary reports (fixed-layout text).
//
// Typical lines:
//
//   INTERCHANGE                 1,540,000.00DB     1,500.00CR
//   TOTAL INTERCHANGE VALUE  12     1,234.00       5,678.00DB
//   NET SETTLEMENT AMOUNT                          1,000.00CR
//
// Each line with at least one amount becomes a row of
// `Section, Count, Credit, Debit, Net`. A section seen twice keeps its first
// position and the values of its last line.

use std::collections::HashMap;

use regex::Regex;
use rust_decimal::Decimal;

use crate::amount::parse_amount;
use crate::decode::decode_text;
use crate::error::IoError;
use crate::grid::{Cell, Grid, GridFormat};

pub const HEADER: [&str; 5] = ["Section", "Count", "Credit", "Debit", "Net"];

pub fn read_settlement_text(source: &str, bytes: &[u8]) -> Result<Grid, IoError> {
    let (content, encoding) = decode_text(bytes)?;
    let rows = parse_settlement_text(&content);
    log::debug!(
        "{source}: {} settlement lines ({})",
        rows.len().saturating_sub(1),
        encoding.name()
    );
    Ok(Grid {
        source: source.to_string(),
        format: GridFormat::SettlementText,
        encoding: Some(encoding.name()),
        rows,
    })
}

/// Parse report text into a header row followed by one row per section line.
pub fn parse_settlement_text(content: &str) -> Vec<Vec<Cell>> {
    let amount_re = Regex::new(r"[\d,]+\.\d{2}(?:DB|CR|DR)?").expect("valid amount regex");
    let count_re = Regex::new(r"(?:^|\s)(\d+)(?:\s|$)").expect("valid count regex");

    let mut rows = vec![HEADER.iter().map(|h| Cell::text(*h)).collect::<Vec<_>>()];
    let mut seen: HashMap<String, usize> = HashMap::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let upper = line.to_ascii_uppercase();

        let amounts: Vec<&str> = amount_re.find_iter(&upper).map(|m| m.as_str()).collect();
        if amounts.is_empty() {
            continue;
        }

        let section = section_name(&upper);
        if section.is_empty() {
            continue;
        }

        // Integer token between the label and the first amount.
        let first_amount_at = amount_re.find(&upper).map(|m| m.start()).unwrap_or(upper.len());
        let count = count_re
            .captures(&upper[..first_amount_at])
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        let credit = amounts[0];
        let debit = amounts.get(1).copied().unwrap_or("0.00");
        let net = match amounts.get(2) {
            Some(net) => Some(net.to_string()),
            None => {
                let dr = parse_amount(debit).unwrap_or(Decimal::ZERO);
                let cr = parse_amount(credit).unwrap_or(Decimal::ZERO);
                dr.checked_sub(cr).map(|n| n.to_string())
            }
        };

        let row = vec![
            Cell::text(section.clone()),
            count.map(Cell::text).unwrap_or(Cell::Empty),
            Cell::text(credit),
            Cell::text(debit),
            net.map(Cell::text).unwrap_or(Cell::Empty),
        ];
        match seen.get(&section) {
            Some(&idx) => {
                log::debug!("section {section} repeated, keeping its last line");
                rows[idx] = row;
            }
            None => {
                seen.insert(section, rows.len());
                rows.push(row);
            }
        }
    }

    rows
}

/// Section label: the text before the first digit, upper-cased with spaces
/// removed. Total lines drop the TOTAL/AMOUNT/VALUE filler words, and a total
/// line with nothing left is the grand TOTAL.
fn section_name(upper: &str) -> String {
    let cut = upper
        .find(|c: char| c.is_ascii_digit() || c == ',' || c == '.')
        .unwrap_or(upper.len());
    let mut label = upper[..cut].trim().to_string();

    if label.starts_with("TOTAL") || upper.contains("NET SETTLEMENT AMOUNT") {
        label = label
            .replace("TOTAL", "")
            .replace("AMOUNT", "")
            .replace("VALUE", "");
        if label.trim().is_empty() {
            label = "TOTAL".into();
        }
    }

    label.chars().filter(|c| !c.is_whitespace()).collect()
}
