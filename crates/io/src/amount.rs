// Amount parsing shared by the settlement-text reader and the normalizer.

use std::str::FromStr;

use rust_decimal::Decimal;

/// Parse a money amount as it appears in bank and card-network exports.
///
/// Accepts thousands separators, currency symbols and codes, surrounding
/// whitespace, a leading sign, accounting parentheses (`(12.50)` is negative)
/// and the settlement suffixes `DB`/`DR` (debit, positive) and `CR` (credit,
/// negative). Returns `None` for anything that is not a single number.
pub fn parse_amount(input: &str) -> Option<Decimal> {
    let mut s = input.trim().to_ascii_uppercase();
    if s.is_empty() {
        return None;
    }

    let mut negative = false;

    if s.starts_with('(') && s.ends_with(')') {
        negative = true;
        s = s[1..s.len() - 1].trim().to_string();
    }

    for suffix in ["CR", "DB", "DR"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            if suffix == "CR" {
                negative = !negative;
            }
            s = stripped.trim_end().to_string();
            break;
        }
    }

    // Currency codes and symbols on either side.
    for code in ["USD", "INR", "EUR", "GBP", "RS.", "RS"] {
        if let Some(stripped) = s.strip_prefix(code) {
            s = stripped.trim_start().to_string();
        }
        if let Some(stripped) = s.strip_suffix(code) {
            s = stripped.trim_end().to_string();
        }
    }

    let mut cleaned = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '0'..='9' | '.' => cleaned.push(c),
            '-' | '+' => cleaned.push(c),
            ',' | ' ' | '\u{a0}' | '_' | '\'' => {}
            '$' | '€' | '£' | '₹' => {}
            _ => return None,
        }
    }

    if let Some(rest) = cleaned.strip_suffix('-') {
        // Trailing minus, as some ledgers print it.
        if rest.contains('-') {
            return None;
        }
        negative = !negative;
        cleaned = rest.to_string();
    }

    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let value = Decimal::from_str(&cleaned).ok()?;
    Some(if negative { -value } else { value })
}

/// Decimal from a spreadsheet float via its shortest decimal representation,
/// so `100.02` stays `100.02` instead of its binary expansion.
pub fn decimal_from_f64(n: f64) -> Option<Decimal> {
    if !n.is_finite() {
        return None;
    }
    Decimal::from_str(&format!("{}", n))
        .or_else(|_| Decimal::from_scientific(&format!("{:e}", n)))
        .ok()
}
