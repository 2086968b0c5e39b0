//! Two-table matching on configured keys and tolerances.
//!
//! The right table is indexed by composite key. Key components with an
//! absolute decimal or a day tolerance are indexed by bucket, and a lookup
//! looks in the neighbouring buckets; every candidate is then re-checked
//! against the exact tolerance. Components with a relative tolerance are left
//! out of the index key and only checked on candidates.

use std::collections::HashMap;

use chrono::Datelike;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::{FieldKind, ReconTypeConfig, ToleranceRule};
use crate::model::{CanonicalRecord, FieldDelta, MatchResult, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Exact(Value),
    Bucket(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyMode {
    Exact,
    /// Bucket width for decimals.
    DecimalBucket(Decimal),
    /// Bucket width in days.
    DateBucket(i64),
    Unindexed,
}

struct KeySpec<'a> {
    field: &'a str,
    mode: KeyMode,
    rule: Option<&'a ToleranceRule>,
}

fn key_specs(config: &ReconTypeConfig) -> Vec<KeySpec<'_>> {
    config
        .keys
        .iter()
        .map(|key| {
            let rule = config.tolerance_for(key);
            let kind = config.field(key).map(|f| f.kind).unwrap_or_default();
            let mode = match (kind, rule) {
                (FieldKind::Decimal, Some(r)) if r.rel.is_some() => KeyMode::Unindexed,
                (FieldKind::Decimal, Some(r)) => match r.abs {
                    Some(abs) if abs > Decimal::ZERO => KeyMode::DecimalBucket(abs),
                    _ => KeyMode::Exact,
                },
                (FieldKind::Date, Some(r)) => match r.days {
                    Some(days) => KeyMode::DateBucket(days.max(1)),
                    None => KeyMode::Exact,
                },
                _ => KeyMode::Exact,
            };
            KeySpec {
                field: key.as_str(),
                mode,
                rule,
            }
        })
        .collect()
}

/// Index key for one record; `None` when a key component is null (or its
/// bucket cannot be represented).
fn index_key(record: &CanonicalRecord, specs: &[KeySpec<'_>]) -> Option<Vec<KeyPart>> {
    let mut parts = Vec::with_capacity(specs.len());
    for spec in specs {
        let value = record.get(spec.field);
        if value.is_null() {
            return None;
        }
        match spec.mode {
            KeyMode::Exact => parts.push(KeyPart::Exact(value.clone())),
            KeyMode::DecimalBucket(width) => {
                let v = value.as_decimal()?;
                let bucket = v.checked_div(width)?.floor().to_i64()?;
                parts.push(KeyPart::Bucket(bucket));
            }
            KeyMode::DateBucket(width) => {
                let day = i64::from(value.as_date()?.num_days_from_ce());
                parts.push(KeyPart::Bucket(day.div_euclid(width)));
            }
            KeyMode::Unindexed => {}
        }
    }
    Some(parts)
}

/// All keys within one bucket of `key` on every bucketed component.
fn neighbour_keys(key: &[KeyPart]) -> Vec<Vec<KeyPart>> {
    let mut out: Vec<Vec<KeyPart>> = vec![Vec::with_capacity(key.len())];
    for part in key {
        match part {
            KeyPart::Exact(_) => {
                for k in &mut out {
                    k.push(part.clone());
                }
            }
            KeyPart::Bucket(b) => {
                let mut next = Vec::with_capacity(out.len() * 3);
                for k in &out {
                    for offset in [-1i64, 0, 1] {
                        let mut k = k.clone();
                        k.push(KeyPart::Bucket(b.saturating_add(offset)));
                        next.push(k);
                    }
                }
                out = next;
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Value comparison
// ---------------------------------------------------------------------------

/// Compare one field of a pair. Returns `(delta, within_tolerance)`.
pub fn compare_values(
    left: &Value,
    right: &Value,
    rule: Option<&ToleranceRule>,
) -> (Option<Decimal>, bool) {
    match (left, right) {
        (Value::Null, Value::Null) => (None, true),
        (Value::Null, _) | (_, Value::Null) => (None, false),
        // A difference beyond the decimal range is never within tolerance.
        (Value::Decimal(l), Value::Decimal(r)) => match l.checked_sub(*r) {
            Some(delta) => (Some(delta), decimal_within(delta.abs(), *l, *r, rule)),
            None => (None, false),
        },
        (Value::Date(l), Value::Date(r)) => {
            let days = (*l - *r).num_days();
            let allowed = rule.and_then(|r| r.days).unwrap_or(0);
            (Some(Decimal::from(days)), days.abs() <= allowed)
        }
        (Value::Text(l), Value::Text(r)) => (None, l == r),
        _ => (None, false),
    }
}

fn decimal_within(diff: Decimal, l: Decimal, r: Decimal, rule: Option<&ToleranceRule>) -> bool {
    let Some(rule) = rule else {
        return diff.is_zero();
    };
    if rule.abs.is_none() && rule.rel.is_none() {
        return diff.is_zero();
    }
    if rule.abs.is_some_and(|abs| diff <= abs) {
        return true;
    }
    rule.rel.is_some_and(|rel| {
        rel.checked_mul(l.abs().max(r.abs()))
            .map_or(true, |limit| diff <= limit)
    })
}

/// Weighted distance used to rank candidates.
fn deviation(left: &Value, right: &Value) -> Decimal {
    match (left, right) {
        (Value::Null, Value::Null) => Decimal::ZERO,
        (Value::Decimal(l), Value::Decimal(r)) => l.checked_sub(*r).map_or(Decimal::MAX, |d| d.abs()),
        (Value::Date(l), Value::Date(r)) => Decimal::from((*l - *r).num_days().abs()),
        (l, r) if l == r => Decimal::ZERO,
        _ => Decimal::ONE,
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Match `left` against `right`. Every record of both tables appears in
/// exactly one result: left-table order first, then unconsumed right records
/// in right-table order.
pub fn match_tables(
    config: &ReconTypeConfig,
    left: &[CanonicalRecord],
    right: &[CanonicalRecord],
) -> Vec<MatchResult> {
    let specs = key_specs(config);
    let compared = config.compared_fields();
    let ranking: Vec<(&str, Decimal)> = config
        .compare
        .iter()
        .filter(|c| !config.keys.contains(&c.field))
        .map(|c| (c.field.as_str(), c.weight))
        .collect();

    let mut index: HashMap<Vec<KeyPart>, Vec<usize>> = HashMap::new();
    for (ri, record) in right.iter().enumerate() {
        if let Some(key) = index_key(record, &specs) {
            index.entry(key).or_default().push(ri);
        }
    }

    let mut consumed = vec![false; right.len()];
    let mut results = Vec::with_capacity(left.len() + right.len());

    for (li, lrec) in left.iter().enumerate() {
        let Some(key) = index_key(lrec, &specs) else {
            results.push(MatchResult::UnmatchedLeft { left: li });
            continue;
        };

        let mut candidates: Vec<usize> = neighbour_keys(&key)
            .iter()
            .filter_map(|k| index.get(k))
            .flatten()
            .copied()
            .filter(|&ri| !consumed[ri])
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        let mut best: Option<(usize, Decimal)> = None;
        for ri in candidates {
            let rrec = &right[ri];
            let keys_ok = specs.iter().all(|spec| {
                let l = lrec.get(spec.field);
                let r = rrec.get(spec.field);
                match spec.mode {
                    KeyMode::Exact => l == r,
                    _ => compare_values(l, r, spec.rule).1,
                }
            });
            if !keys_ok {
                continue;
            }
            let score = ranking.iter().fold(Decimal::ZERO, |acc, (field, weight)| {
                acc.saturating_add(deviation(lrec.get(field), rrec.get(field)).saturating_mul(*weight))
            });
            // Candidates are in right-table order, so strict `<` keeps the earliest on ties.
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((ri, score));
            }
        }

        let Some((ri, _)) = best else {
            results.push(MatchResult::UnmatchedLeft { left: li });
            continue;
        };
        consumed[ri] = true;

        let rrec = &right[ri];
        let deltas: Vec<FieldDelta> = compared
            .iter()
            .map(|(field, _)| {
                let kind = config.field(field).map(|f| f.kind).unwrap_or_default();
                let (delta, within) =
                    compare_values(lrec.get(field), rrec.get(field), config.tolerance_for(field));
                FieldDelta {
                    field: field.to_string(),
                    delta: if kind == FieldKind::Text { None } else { delta },
                    within_tolerance: within,
                }
            })
            .collect();

        if deltas.iter().all(|d| d.within_tolerance) {
            results.push(MatchResult::Matched {
                left: li,
                right: ri,
                deltas,
            });
        } else {
            results.push(MatchResult::MatchedWithDiscrepancy {
                left: li,
                right: ri,
                deltas,
            });
        }
    }

    for (ri, used) in consumed.iter().enumerate() {
        if !used {
            results.push(MatchResult::UnmatchedRight { right: ri });
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchStatus;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn d(s: &str) -> Value {
        Value::Decimal(Decimal::from_str(s).unwrap())
    }

    fn date(s: &str) -> Value {
        Value::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap())
    }

    fn rec(row: usize, pairs: &[(&str, Value)]) -> CanonicalRecord {
        CanonicalRecord {
            row,
            covers: Vec::new(),
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn config(keys: &str, extra: &str) -> ReconTypeConfig {
        let toml = format!(
            r#"
id = "t"
name = "t"
keys = {keys}

[[slots]]
name = "l"
side = "left"

[[slots]]
name = "r"
side = "right"

[[fields]]
name = "id"

[[fields]]
name = "amt"
type = "decimal"

[[fields]]
name = "day"
type = "date"

{extra}
"#
        );
        ReconTypeConfig::from_toml(&toml).unwrap()
    }

    fn statuses(results: &[MatchResult]) -> Vec<MatchStatus> {
        results.iter().map(MatchResult::status).collect()
    }

    #[test]
    fn identical_records_match() {
        let cfg = config(r#"["id"]"#, "[tolerance.amt]\nabs = \"0\"\n\n[[compare]]\nfield = \"amt\"");
        let left = vec![rec(2, &[("id", Value::Text("1".into())), ("amt", d("100.00"))])];
        let right = vec![rec(2, &[("id", Value::Text("1".into())), ("amt", d("100.00"))])];
        let out = match_tables(&cfg, &left, &right);
        assert_eq!(statuses(&out), vec![MatchStatus::Matched]);
        assert_eq!(out[0].deltas()[0].delta, Some(Decimal::ZERO));
    }

    #[test]
    fn discrepancy_beyond_tolerance() {
        let cfg = config(r#"["id"]"#, "[tolerance.amt]\nabs = \"0.01\"\n\n[[compare]]\nfield = \"amt\"");
        let left = vec![rec(2, &[("id", Value::Text("1".into())), ("amt", d("100.00"))])];
        let right = vec![rec(2, &[("id", Value::Text("1".into())), ("amt", d("100.02"))])];
        let out = match_tables(&cfg, &left, &right);
        assert_eq!(statuses(&out), vec![MatchStatus::MatchedWithDiscrepancy]);
        assert_eq!(out[0].deltas()[0].delta, Some(Decimal::from_str("-0.02").unwrap()));
        assert!(!out[0].deltas()[0].within_tolerance);
    }

    #[test]
    fn tolerance_boundary_inclusive() {
        let cfg = config(r#"["id"]"#, "[tolerance.amt]\nabs = \"0.01\"\n\n[[compare]]\nfield = \"amt\"");
        let left = vec![rec(2, &[("id", Value::Text("1".into())), ("amt", d("100.00"))])];
        let right = vec![rec(2, &[("id", Value::Text("1".into())), ("amt", d("100.01"))])];
        assert_eq!(statuses(&match_tables(&cfg, &left, &right)), vec![MatchStatus::Matched]);
    }

    #[test]
    fn difference_out_of_range_is_discrepant() {
        let cfg = config(r#"["id"]"#, "[[compare]]\nfield = \"amt\"");
        let left = vec![rec(2, &[("id", Value::Text("1".into())), ("amt", Value::Decimal(Decimal::MAX))])];
        let right = vec![
            rec(2, &[("id", Value::Text("1".into())), ("amt", Value::Decimal(Decimal::MIN))]),
            rec(3, &[("id", Value::Text("1".into())), ("amt", Value::Decimal(Decimal::MIN))]),
        ];
        let out = match_tables(&cfg, &left, &right);
        assert_eq!(
            statuses(&out),
            vec![MatchStatus::MatchedWithDiscrepancy, MatchStatus::UnmatchedRight]
        );
        assert_eq!(out[0].right(), Some(0));
        assert_eq!(out[0].deltas()[0].delta, None);
        assert!(!out[0].deltas()[0].within_tolerance);
    }

    #[test]
    fn different_keys_unmatched_both_sides() {
        let cfg = config(r#"["id"]"#, "");
        let left = vec![rec(2, &[("id", Value::Text("1".into()))])];
        let right = vec![rec(2, &[("id", Value::Text("2".into()))])];
        let out = match_tables(&cfg, &left, &right);
        assert_eq!(
            out,
            vec![
                MatchResult::UnmatchedLeft { left: 0 },
                MatchResult::UnmatchedRight { right: 0 }
            ]
        );
    }

    #[test]
    fn decimal_keys_ignore_scale() {
        let cfg = config(r#"["amt"]"#, "");
        let left = vec![rec(2, &[("amt", d("100.0"))])];
        let right = vec![rec(2, &[("amt", d("100.00"))])];
        assert_eq!(statuses(&match_tables(&cfg, &left, &right)), vec![MatchStatus::Matched]);
    }

    #[test]
    fn null_key_never_matches() {
        let cfg = config(r#"["id"]"#, "");
        let left = vec![rec(2, &[("id", Value::Null)])];
        let right = vec![rec(2, &[("id", Value::Null)])];
        assert_eq!(
            statuses(&match_tables(&cfg, &left, &right)),
            vec![MatchStatus::UnmatchedLeft, MatchStatus::UnmatchedRight]
        );
    }

    #[test]
    fn bucketed_amount_key_crosses_bucket_edge() {
        // 10.04 and 9.99 sit in neighbouring 0.05 buckets.
        let cfg = config(r#"["amt"]"#, "[tolerance.amt]\nabs = \"0.05\"");
        let left = vec![rec(2, &[("amt", d("10.04"))])];
        let right = vec![rec(2, &[("amt", d("9.99"))]), rec(3, &[("amt", d("10.10"))])];
        let out = match_tables(&cfg, &left, &right);
        assert_eq!(
            out[0],
            MatchResult::Matched {
                left: 0,
                right: 0,
                deltas: vec![FieldDelta {
                    field: "amt".into(),
                    delta: Some(Decimal::from_str("0.05").unwrap()),
                    within_tolerance: true,
                }],
            }
        );
        assert_eq!(out[1], MatchResult::UnmatchedRight { right: 1 });
    }

    #[test]
    fn date_window_key() {
        let cfg = config(r#"["id", "day"]"#, "[tolerance.day]\ndays = 2");
        let left = vec![
            rec(2, &[("id", Value::Text("a".into())), ("day", date("2025-01-10"))]),
            rec(3, &[("id", Value::Text("b".into())), ("day", date("2025-01-10"))]),
        ];
        let right = vec![
            rec(2, &[("id", Value::Text("a".into())), ("day", date("2025-01-12"))]),
            rec(3, &[("id", Value::Text("b".into())), ("day", date("2025-01-13"))]),
        ];
        let out = match_tables(&cfg, &left, &right);
        assert_eq!(
            statuses(&out),
            vec![
                MatchStatus::Matched,
                MatchStatus::UnmatchedLeft,
                MatchStatus::UnmatchedRight
            ]
        );
        assert_eq!(out[0].deltas()[0].delta, Some(Decimal::from(-2)));
    }

    #[test]
    fn relative_tolerance_key_unindexed() {
        let cfg = config(r#"["amt"]"#, "[tolerance.amt]\nrel = \"0.01\"");
        let left = vec![rec(2, &[("amt", d("1000"))])];
        let right = vec![rec(2, &[("amt", d("1011"))]), rec(3, &[("amt", d("1009"))])];
        let out = match_tables(&cfg, &left, &right);
        // 1011 is outside 1% of 1011 (10.11); 1009 is inside.
        assert_eq!(out[0].right(), Some(1));
        assert_eq!(out[1], MatchResult::UnmatchedRight { right: 0 });
    }

    #[test]
    fn best_candidate_by_weighted_deviation() {
        let cfg = config(r#"["id"]"#, "[[compare]]\nfield = \"amt\"\nweight = \"2\"");
        let left = vec![rec(2, &[("id", Value::Text("x".into())), ("amt", d("50"))])];
        let right = vec![
            rec(2, &[("id", Value::Text("x".into())), ("amt", d("40"))]),
            rec(3, &[("id", Value::Text("x".into())), ("amt", d("49"))]),
            rec(4, &[("id", Value::Text("x".into())), ("amt", d("49"))]),
        ];
        let out = match_tables(&cfg, &left, &right);
        // 49 beats 40; the earlier of the two 49s wins the tie.
        assert_eq!(out[0].right(), Some(1));
        assert_eq!(out[0].status(), MatchStatus::MatchedWithDiscrepancy);
        assert_eq!(statuses(&out[1..]), vec![MatchStatus::UnmatchedRight; 2]);
    }

    #[test]
    fn one_to_one_consumption() {
        let cfg = config(r#"["id"]"#, "");
        let left = vec![
            rec(2, &[("id", Value::Text("x".into()))]),
            rec(3, &[("id", Value::Text("x".into()))]),
        ];
        let right = vec![rec(2, &[("id", Value::Text("x".into()))])];
        let out = match_tables(&cfg, &left, &right);
        assert_eq!(out[0].right(), Some(0));
        assert_eq!(out[1], MatchResult::UnmatchedLeft { left: 1 });
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn text_compare_has_no_delta() {
        let (delta, within) =
            compare_values(&Value::Text("a".into()), &Value::Text("b".into()), None);
        assert_eq!((delta, within), (None, false));
        let (delta, within) = compare_values(&d("1"), &Value::Null, None);
        assert_eq!((delta, within), (None, false));
        assert_eq!(compare_values(&Value::Null, &Value::Null, None), (None, true));
    }

    #[test]
    fn empty_key_list_pairs_everything_in_order() {
        let cfg = config("[]", "[[compare]]\nfield = \"amt\"");
        let left = vec![rec(2, &[("amt", d("5"))])];
        let right = vec![rec(2, &[("amt", d("1"))]), rec(3, &[("amt", d("5"))])];
        let out = match_tables(&cfg, &left, &right);
        assert_eq!(out[0].status(), MatchStatus::Matched);
        assert_eq!(out[0].right(), Some(1));
    }
}
