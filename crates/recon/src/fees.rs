//! Expected fees from a rate chart.
//!
//! Each `[[fees]]` line of a type definition names a rule, either as free
//! rate-chart text or typed, and the records it is measured on. The
//! schedule reports the expected fee per line next to what was charged.

use std::str::FromStr;

use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::config::{FeeConfig, FeeFormula, FeeRuleSpec, Side};
use crate::model::{CanonicalRecord, MatchResult};
use crate::normalize::passes_filter;

// ---------------------------------------------------------------------------
// Rate-chart text
// ---------------------------------------------------------------------------

const NUMBER: &str = r"\d+(?:,\d{3})*(?:\.\d+)?";

fn number(text: &str) -> Option<Decimal> {
    Decimal::from_str(&text.replace(',', "")).ok()
}

/// Currency named by a chart, as an ISO code.
fn chart_currency(lower: &str) -> Option<&'static str> {
    let rupee = Regex::new(r"(?:^|[^a-z])(?:rs|inr)(?:[^a-z]|$)").expect("valid currency regex");
    if rupee.is_match(lower) {
        Some("INR")
    } else if lower.contains('$') || lower.contains("usd") {
        Some("USD")
    } else {
        None
    }
}

/// Read a rate chart such as `"$2 for first 30K cards\n$1.5 per card
/// thereafter"`, `"Rs 0.25 per transaction"`, `"Amount of tran * 0.5$"` or a
/// bare amount.
pub fn parse_chart(text: &str) -> Result<(FeeFormula, Option<&'static str>), String> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return Err("rate chart is empty".into());
    }
    let currency = chart_currency(&lower);
    let number_re = Regex::new(NUMBER).expect("valid number regex");

    let bare = Regex::new(&format!(r"^(?:\$|rs\.?|inr)?\s*({NUMBER})\s*\$?$")).expect("valid amount regex");
    if let Some(caps) = bare.captures(&lower) {
        let amount = number(&caps[1]).ok_or("fixed amount is out of range")?;
        return Ok((FeeFormula::Fixed { amount }, currency));
    }

    if lower.contains("first") && lower.contains("thereafter") {
        let threshold_re = Regex::new(&format!(r"first\s+({NUMBER})\s*(k\b)?")).expect("valid threshold regex");
        let caps = threshold_re
            .captures(&lower)
            .ok_or("tiered chart has no 'first N' threshold")?;
        let span = caps.get(0).map_or(0..0, |m| m.range());
        let mut threshold = number(&caps[1]).ok_or("threshold is out of range")?;
        if caps.get(2).is_some() {
            threshold = threshold
                .checked_mul(Decimal::ONE_THOUSAND)
                .ok_or("threshold is out of range")?;
        }
        let mut rates = number_re
            .find_iter(&lower)
            .filter(|m| !span.contains(&m.start()))
            .filter_map(|m| number(m.as_str()));
        let (Some(first), Some(rest)) = (rates.next(), rates.next()) else {
            return Err("tiered chart needs a rate for the first units and one thereafter".into());
        };
        return Ok((FeeFormula::Tiered { threshold, first, rest }, currency));
    }

    let first_number = || {
        number_re
            .find(&lower)
            .and_then(|m| number(m.as_str()))
            .ok_or_else(|| format!("no rate in '{}'", text.trim()))
    };

    const PER_UNIT: [&str; 6] = [
        "per transaction",
        "per txn",
        "per dispute",
        "per card",
        "per unit",
        "no of tran",
    ];
    if PER_UNIT.iter().any(|p| lower.contains(p)) {
        return Ok((FeeFormula::PerUnit { rate: first_number()? }, currency));
    }

    if ["amount of tran", "amout of tran", "% of"].iter().any(|p| lower.contains(p)) {
        let times = Regex::new(&format!(r"\*\s*(?:\$|rs\.?)?\s*({NUMBER})")).expect("valid rate regex");
        let rate = match times.captures(&lower) {
            Some(caps) => number(&caps[1]).ok_or("rate is out of range")?,
            None => first_number()?,
        };
        let percent = lower.contains('%');
        return Ok((FeeFormula::OnAmount { rate, percent }, currency));
    }

    Err(format!("unrecognised rate chart '{}'", text.trim()))
}

/// The formula a rule stands for, with the currency its chart names.
pub fn resolve_rule(rule: &FeeRuleSpec) -> Result<(FeeFormula, Option<&'static str>), String> {
    let (formula, currency) = match rule {
        FeeRuleSpec::Chart(text) => parse_chart(text)?,
        FeeRuleSpec::Typed(formula) => (*formula, None),
    };
    if let FeeFormula::Tiered { threshold, .. } = formula {
        if threshold < Decimal::ZERO {
            return Err("tiered threshold must not be negative".into());
        }
    }
    Ok((formula, currency))
}

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

impl FeeFormula {
    /// Fee for `units` and the summed `amount`. `None` when an amount-based
    /// rule has no amount or the result leaves the decimal range.
    pub fn apply(&self, units: Decimal, amount: Option<Decimal>) -> Option<Decimal> {
        match *self {
            Self::Fixed { amount } => Some(amount),
            Self::PerUnit { rate } => units.checked_mul(rate),
            Self::Tiered { threshold, first, rest } => {
                if units <= threshold {
                    units.checked_mul(first)
                } else {
                    let beyond = units.checked_sub(threshold)?.checked_mul(rest)?;
                    threshold.checked_mul(first)?.checked_add(beyond)
                }
            }
            Self::OnAmount { rate, percent } => {
                let fee = amount?.checked_mul(rate)?;
                if percent {
                    fee.checked_div(Decimal::ONE_HUNDRED)
                } else {
                    Some(fee)
                }
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Fixed { amount } => format!("fixed {amount}"),
            Self::PerUnit { rate } => format!("{rate} per unit"),
            Self::Tiered { threshold, first, rest } => {
                format!("first {threshold} at {first}, then {rest}")
            }
            Self::OnAmount { rate, percent: true } => format!("{rate}% of amount"),
            Self::OnAmount { rate, percent: false } => format!("{rate} x amount"),
        }
    }

    /// The arithmetic behind [`apply`](Self::apply), for the report.
    pub fn calculation(&self, units: Decimal, amount: Option<Decimal>) -> String {
        match *self {
            Self::Fixed { amount } => format!("fixed {amount}"),
            Self::PerUnit { rate } => format!("{units} x {rate}"),
            Self::Tiered { threshold, first, rest } => {
                if units <= threshold {
                    format!("{units} x {first}")
                } else {
                    let beyond = units.checked_sub(threshold).unwrap_or(Decimal::ZERO);
                    format!("{threshold} x {first} + {beyond} x {rest}")
                }
            }
            Self::OnAmount { rate, percent } => {
                let amount = amount.map_or_else(|| "-".to_string(), |a| a.to_string());
                if percent {
                    format!("{amount} x {rate}%")
                } else {
                    format!("{amount} x {rate}")
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeLine {
    pub name: String,
    pub formula: FeeFormula,
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Records the line was measured on.
    pub records: usize,
    pub units: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub calculation: String,
    pub expected: Option<Decimal>,
    /// `expected` in the report currency.
    pub converted: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charged: Option<Decimal>,
    /// `charged - expected`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difference: Option<Decimal>,
    pub mismatch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeSchedule {
    pub lines: Vec<FeeLine>,
    /// Sum of the converted fees; `None` if it leaves the decimal range.
    pub total: Option<Decimal>,
    pub mismatches: usize,
}

fn round(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

fn measured<'a>(
    fee: &FeeConfig,
    results: &[MatchResult],
    left: &'a [CanonicalRecord],
    right: &'a [CanonicalRecord],
) -> Vec<&'a CanonicalRecord> {
    let records = match fee.side {
        Side::Left => left,
        Side::Right => right,
    };
    let chosen: Vec<&CanonicalRecord> = if fee.matched_only {
        results
            .iter()
            .filter(|r| r.is_pair())
            .filter_map(|r| match fee.side {
                Side::Left => r.left(),
                Side::Right => r.right(),
            })
            .filter_map(|idx| records.get(idx))
            .collect()
    } else {
        records.iter().collect()
    };
    chosen
        .into_iter()
        .filter(|rec| {
            fee.when
                .as_ref()
                .map_or(true, |when| passes_filter(when, rec.get(&when.field)))
        })
        .collect()
}

fn field_sum(records: &[&CanonicalRecord], field: &str) -> Option<Decimal> {
    records
        .iter()
        .filter_map(|r| r.get(field).as_decimal())
        .try_fold(Decimal::ZERO, Decimal::checked_add)
}

fn fee_line(fee: &FeeConfig, records: &[&CanonicalRecord]) -> FeeLine {
    let (formula, chart_currency) = match resolve_rule(&fee.rule) {
        Ok(resolved) => resolved,
        // Validated at load; an unresolvable rule charges nothing.
        Err(msg) => {
            log::warn!("fee '{}': {msg}", fee.name);
            (FeeFormula::Fixed { amount: Decimal::ZERO }, None)
        }
    };
    let rule = match fee.rule {
        FeeRuleSpec::Chart(ref text) => text.trim().to_string(),
        FeeRuleSpec::Typed(ref f) => f.describe(),
    };

    let units = match fee.units_field {
        Some(ref field) => field_sum(records, field),
        None => Some(Decimal::from(records.len())),
    };
    let amount = fee.amount_field.as_ref().and_then(|f| field_sum(records, f));

    let expected = units
        .and_then(|u| formula.apply(u, amount))
        .map(|v| round(v, fee.decimals));
    let converted = match fee.exchange_rate {
        Some(rate) => expected.and_then(|v| v.checked_mul(rate)).map(|v| round(v, fee.decimals)),
        None => expected,
    };
    let calculation = units.map_or_else(
        || "units out of range".to_string(),
        |u| formula.calculation(u, amount),
    );

    let charged = fee.charged_field.as_ref().and_then(|field| {
        if records.iter().all(|r| r.get(field).is_null()) {
            None
        } else {
            field_sum(records, field)
        }
    });
    let difference = charged
        .zip(expected)
        .and_then(|(c, e)| c.checked_sub(e));
    let mismatch = match (fee.charged_field.is_some(), difference) {
        (false, _) => false,
        (true, Some(diff)) => diff.abs() > fee.tolerance,
        (true, None) => true,
    };

    if expected.is_none() {
        log::warn!("fee '{}': expected fee could not be computed", fee.name);
    }

    FeeLine {
        name: fee.name.clone(),
        formula,
        rule,
        currency: fee
            .currency
            .clone()
            .or_else(|| chart_currency.map(str::to_string)),
        records: records.len(),
        units,
        amount,
        calculation,
        expected,
        converted,
        charged,
        difference,
        mismatch,
    }
}

/// Expected fee per configured line. `None` when the type has no fees.
pub fn build_fee_schedule(
    fees: &[FeeConfig],
    results: &[MatchResult],
    left: &[CanonicalRecord],
    right: &[CanonicalRecord],
) -> Option<FeeSchedule> {
    if fees.is_empty() {
        return None;
    }
    let lines: Vec<FeeLine> = fees
        .iter()
        .map(|fee| {
            let records = measured(fee, results, left, right);
            let line = fee_line(fee, &records);
            log::debug!(
                "fee '{}': {} record(s), {} = {:?}",
                line.name,
                line.records,
                line.calculation,
                line.expected
            );
            line
        })
        .collect();

    let total = lines
        .iter()
        .filter_map(|l| l.converted)
        .try_fold(Decimal::ZERO, Decimal::checked_add);
    let mismatches = lines.iter().filter(|l| l.mismatch).count();
    Some(FeeSchedule {
        lines,
        total,
        mismatches,
    })
}
