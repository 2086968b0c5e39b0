use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::config::{RateConfig, Side};
use crate::model::{CanonicalRecord, MatchResult};

const BLANK_GROUP: &str = "(blank)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Rate {
    Defined(Decimal),
    /// Null numerator, or null or zero denominator.
    Undefined,
}

impl Rate {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            Self::Defined(v) => Some(*v),
            Self::Undefined => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateFlag {
    Undefined,
    BelowExpected,
    AboveExpected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateRow {
    /// Index into the report's result list.
    pub result: usize,
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub numerator: Option<Decimal>,
    pub denominator: Option<Decimal>,
    pub rate: Rate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<RateFlag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateStats {
    pub count: usize,
    pub defined: usize,
    pub undefined: usize,
    pub anomalies: usize,
    pub mean: Option<Decimal>,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub group: String,
    #[serde(flatten)]
    pub stats: RateStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateTable {
    pub numerator: String,
    pub denominator: String,
    pub side: Side,
    pub percent: bool,
    pub rows: Vec<RateRow>,
    pub overall: RateStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupStats>,
}

fn round(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

/// `numerator / denominator`, scaled to percent when configured and rounded.
pub fn compute_rate(numerator: Option<Decimal>, denominator: Option<Decimal>, config: &RateConfig) -> Rate {
    let (Some(num), Some(den)) = (numerator, denominator) else {
        return Rate::Undefined;
    };
    if den.is_zero() {
        return Rate::Undefined;
    }
    let Some(ratio) = num.checked_div(den) else {
        return Rate::Undefined;
    };
    let scaled = if config.percent {
        match ratio.checked_mul(Decimal::ONE_HUNDRED) {
            Some(v) => v,
            None => return Rate::Undefined,
        }
    } else {
        ratio
    };
    Rate::Defined(round(scaled, config.decimals))
}

fn flag_for(rate: Rate, config: &RateConfig) -> Option<RateFlag> {
    match rate {
        Rate::Undefined => Some(RateFlag::Undefined),
        Rate::Defined(v) => {
            if config.expected_min.is_some_and(|min| v < min) {
                Some(RateFlag::BelowExpected)
            } else if config.expected_max.is_some_and(|max| v > max) {
                Some(RateFlag::AboveExpected)
            } else {
                None
            }
        }
    }
}

fn stats<'a>(rows: impl Iterator<Item = &'a RateRow>, decimals: u32) -> RateStats {
    let mut s = RateStats::default();
    let mut total = Some(Decimal::ZERO);
    for row in rows {
        s.count += 1;
        match row.rate {
            Rate::Defined(v) => {
                s.defined += 1;
                total = total.and_then(|t| t.checked_add(v));
                s.min = Some(s.min.map_or(v, |m| m.min(v)));
                s.max = Some(s.max.map_or(v, |m| m.max(v)));
            }
            Rate::Undefined => s.undefined += 1,
        }
        if matches!(
            row.flag,
            Some(RateFlag::BelowExpected) | Some(RateFlag::AboveExpected)
        ) {
            s.anomalies += 1;
        }
    }
    if s.defined > 0 {
        s.mean = total
            .and_then(|t| t.checked_div(Decimal::from(s.defined)))
            .map(|m| round(m, decimals));
    }
    s
}

/// Rate for every matched pair (with or without discrepancy), read from the
/// configured side's record.
pub fn build_rate_table(
    config: &RateConfig,
    results: &[MatchResult],
    left: &[CanonicalRecord],
    right: &[CanonicalRecord],
) -> RateTable {
    let mut rows = Vec::new();

    for (idx, result) in results.iter().enumerate() {
        if !result.is_pair() {
            continue;
        }
        let record = match config.side {
            Side::Left => result.left().and_then(|i| left.get(i)),
            Side::Right => result.right().and_then(|i| right.get(i)),
        };
        let Some(record) = record else {
            continue;
        };

        let numerator = record.get(&config.numerator).as_decimal();
        let denominator = record.get(&config.denominator).as_decimal();
        let rate = compute_rate(numerator, denominator, config);
        let group = config.group_by.as_ref().map(|g| {
            let v = record.get(g).display();
            if v.is_empty() {
                BLANK_GROUP.to_string()
            } else {
                v
            }
        });

        rows.push(RateRow {
            result: idx,
            row: record.row,
            group,
            numerator,
            denominator,
            rate,
            flag: flag_for(rate, config),
        });
    }

    let undefined = rows.iter().filter(|r| r.rate == Rate::Undefined).count();
    if undefined > 0 {
        log::warn!("{undefined} record(s) have an undefined rate (null or zero denominator)");
    }

    let overall = stats(rows.iter(), config.decimals);

    let mut groups: Vec<GroupStats> = Vec::new();
    if config.group_by.is_some() {
        let mut names: Vec<&str> = Vec::new();
        for row in &rows {
            if let Some(ref g) = row.group {
                if !names.contains(&g.as_str()) {
                    names.push(g);
                }
            }
        }
        for name in names {
            let members = rows.iter().filter(|r| r.group.as_deref() == Some(name));
            groups.push(GroupStats {
                group: name.to_string(),
                stats: stats(members, config.decimals),
            });
        }
    }

    RateTable {
        numerator: config.numerator.clone(),
        denominator: config.denominator.clone(),
        side: config.side,
        percent: config.percent,
        rows,
        overall,
        groups,
    }
}
