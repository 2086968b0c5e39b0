use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::Serialize;

use settlerec_io::{ExportCell, ExportTable};

use crate::config::{FieldKind, ReconTypeConfig, Side};
use crate::fees::FeeSchedule;
use crate::model::{CanonicalRecord, CanonicalTable, MatchResult, MatchStatus, Value};
use crate::normalize::column_total;
use crate::rates::{Rate, RateStats, RateTable};

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub type_id: String,
    pub type_name: String,
    pub type_version: String,
    pub engine_version: String,
    pub run_at: String,
}

/// Column totals of one decimal compare field on both sides. A total that
/// leaves the decimal range is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldTotal {
    pub field: String,
    pub left: Option<Decimal>,
    pub right: Option<Decimal>,
    pub difference: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconSummary {
    pub left_records: usize,
    pub right_records: usize,
    pub matched: usize,
    pub discrepant: usize,
    pub unmatched_left: usize,
    pub unmatched_right: usize,
    /// Pairs outside tolerance, per compared field.
    pub discrepancies_by_field: BTreeMap<String, usize>,
    pub totals: Vec<FieldTotal>,
    /// Rows dropped during ingestion, both sides.
    pub excluded_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rates: Option<RateStats>,
    /// Fee lines whose charged amount is off the expected fee.
    pub fee_mismatches: usize,
}

impl ReconSummary {
    pub fn is_clean(&self) -> bool {
        self.discrepant == 0
            && self.unmatched_left == 0
            && self.unmatched_right == 0
            && self.fee_mismatches == 0
    }
}

/// Everything one reconciliation run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub meta: ReportMeta,
    pub summary: ReconSummary,
    pub left: CanonicalTable,
    pub right: CanonicalTable,
    pub results: Vec<MatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rates: Option<RateTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees: Option<FeeSchedule>,
    #[serde(skip)]
    columns: ExportColumns,
}

/// Export layout, fixed by the type definition.
#[derive(Debug, Clone, Default)]
struct ExportColumns {
    left: Vec<String>,
    right: Vec<String>,
    delta: Vec<String>,
    rate: bool,
}

impl ExportColumns {
    fn for_type(config: &ReconTypeConfig) -> Self {
        let side_fields = |side: Side| {
            config
                .fields
                .iter()
                .filter(|f| f.applies_to(side))
                .map(|f| f.name.clone())
                .collect()
        };
        Self {
            left: side_fields(Side::Left),
            right: side_fields(Side::Right),
            delta: config
                .compared_fields()
                .into_iter()
                .map(|(name, _)| name.to_string())
                .collect(),
            rate: config.rate.is_some(),
        }
    }
}

fn summarize(
    config: &ReconTypeConfig,
    left: &CanonicalTable,
    right: &CanonicalTable,
    results: &[MatchResult],
    rates: Option<&RateTable>,
    fees: Option<&FeeSchedule>,
) -> ReconSummary {
    let mut counts: HashMap<MatchStatus, usize> = HashMap::new();
    let mut by_field: BTreeMap<String, usize> = BTreeMap::new();
    for result in results {
        *counts.entry(result.status()).or_insert(0) += 1;
        for delta in result.deltas() {
            if !delta.within_tolerance {
                *by_field.entry(delta.field.clone()).or_insert(0) += 1;
            }
        }
    }
    let count = |s: MatchStatus| counts.get(&s).copied().unwrap_or(0);

    let totals = config
        .compared_fields()
        .into_iter()
        .filter(|(name, _)| config.field(name).is_some_and(|f| f.kind == FieldKind::Decimal))
        .map(|(name, _)| {
            let l = column_total(left, name);
            let r = column_total(right, name);
            FieldTotal {
                field: name.to_string(),
                left: l,
                right: r,
                difference: l.zip(r).and_then(|(l, r)| l.checked_sub(r)),
            }
        })
        .collect();

    ReconSummary {
        left_records: left.len(),
        right_records: right.len(),
        matched: count(MatchStatus::Matched),
        discrepant: count(MatchStatus::MatchedWithDiscrepancy),
        unmatched_left: count(MatchStatus::UnmatchedLeft),
        unmatched_right: count(MatchStatus::UnmatchedRight),
        discrepancies_by_field: by_field,
        totals,
        excluded_rows: left.meta.excluded_rows + right.meta.excluded_rows,
        rates: rates.map(|r| r.overall.clone()),
        fee_mismatches: fees.map_or(0, |f| f.mismatches),
    }
}

fn to_cell(value: &Value) -> ExportCell {
    match value {
        Value::Null => ExportCell::Empty,
        Value::Text(s) => ExportCell::Text(s.clone()),
        Value::Decimal(d) => ExportCell::Decimal(*d),
        Value::Date(d) => ExportCell::Date(*d),
    }
}

impl ReconciliationReport {
    pub fn build(
        config: &ReconTypeConfig,
        left: CanonicalTable,
        right: CanonicalTable,
        results: Vec<MatchResult>,
        rates: Option<RateTable>,
        fees: Option<FeeSchedule>,
    ) -> Self {
        let summary = summarize(config, &left, &right, &results, rates.as_ref(), fees.as_ref());
        Self {
            meta: ReportMeta {
                type_id: config.id.clone(),
                type_name: config.name.clone(),
                type_version: config.version.clone(),
                engine_version: crate::ENGINE_VERSION.to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
            },
            summary,
            left,
            right,
            results,
            rates,
            fees,
            columns: ExportColumns::for_type(config),
        }
    }

    pub fn summary(&self) -> &ReconSummary {
        &self.summary
    }

    pub fn left_record(&self, result: &MatchResult) -> Option<&CanonicalRecord> {
        result.left().and_then(|i| self.left.records.get(i))
    }

    pub fn right_record(&self, result: &MatchResult) -> Option<&CanonicalRecord> {
        result.right().and_then(|i| self.right.records.get(i))
    }

    /// One row per match result: `status, left.<field>…, right.<field>…,
    /// delta.<field>…` and `rate` when the type defines one.
    pub fn to_exportable_table(&self) -> ExportTable {
        let cols = &self.columns;
        let mut columns = vec!["status".to_string()];
        columns.extend(cols.left.iter().map(|f| format!("left.{f}")));
        columns.extend(cols.right.iter().map(|f| format!("right.{f}")));
        columns.extend(cols.delta.iter().map(|f| format!("delta.{f}")));
        if cols.rate {
            columns.push("rate".to_string());
        }

        let rate_by_result: HashMap<usize, Rate> = self
            .rates
            .iter()
            .flat_map(|t| t.rows.iter().map(|r| (r.result, r.rate)))
            .collect();

        let mut rows = Vec::with_capacity(self.results.len());
        for (idx, result) in self.results.iter().enumerate() {
            let mut row = Vec::with_capacity(columns.len());
            row.push(ExportCell::Text(result.status().to_string()));

            let left = self.left_record(result);
            row.extend(cols.left.iter().map(|f| left.map_or(ExportCell::Empty, |r| to_cell(r.get(f)))));
            let right = self.right_record(result);
            row.extend(cols.right.iter().map(|f| right.map_or(ExportCell::Empty, |r| to_cell(r.get(f)))));

            for field in &cols.delta {
                let delta = result
                    .deltas()
                    .iter()
                    .find(|d| &d.field == field)
                    .and_then(|d| d.delta);
                row.push(delta.map_or(ExportCell::Empty, ExportCell::Decimal));
            }

            if cols.rate {
                row.push(match rate_by_result.get(&idx) {
                    Some(Rate::Defined(v)) => ExportCell::Decimal(*v),
                    Some(Rate::Undefined) => ExportCell::Text("undefined".into()),
                    None => ExportCell::Empty,
                });
            }
            rows.push(row);
        }

        ExportTable { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDelta, TableMeta};
    use crate::rates::build_rate_table;
    use std::str::FromStr;

    const TYPE: &str = r#"
id = "demo"
name = "Demo"
keys = ["id"]

[[slots]]
name = "a"
side = "left"

[[slots]]
name = "b"
side = "right"

[[fields]]
name = "id"
mandatory = true

[[fields]]
name = "amount"
type = "decimal"

[[fields]]
name = "fee"
type = "decimal"
side = "left"

[[compare]]
field = "amount"

[tolerance.amount]
abs = "0.01"

[rate]
numerator = "fee"
denominator = "amount"
"#;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn rec(row: usize, id: &str, amount: &str, fee: Option<&str>) -> CanonicalRecord {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::Text(id.into()));
        values.insert("amount".to_string(), Value::Decimal(d(amount)));
        if let Some(fee) = fee {
            values.insert("fee".to_string(), Value::Decimal(d(fee)));
        }
        CanonicalRecord {
            row,
            covers: Vec::new(),
            values,
        }
    }

    fn table(records: Vec<CanonicalRecord>) -> CanonicalTable {
        CanonicalTable {
            meta: TableMeta::default(),
            records,
        }
    }

    fn report() -> ReconciliationReport {
        let config = ReconTypeConfig::from_toml(TYPE).unwrap();
        let left = table(vec![
            rec(2, "1", "100.00", Some("2.00")),
            rec(3, "2", "50.00", Some("1.00")),
        ]);
        let right = table(vec![rec(2, "1", "100.02", None), rec(3, "9", "5.00", None)]);
        let results = vec![
            MatchResult::MatchedWithDiscrepancy {
                left: 0,
                right: 0,
                deltas: vec![FieldDelta {
                    field: "amount".into(),
                    delta: Some(d("-0.02")),
                    within_tolerance: false,
                }],
            },
            MatchResult::UnmatchedLeft { left: 1 },
            MatchResult::UnmatchedRight { right: 1 },
        ];
        let rates = config
            .rate
            .as_ref()
            .map(|r| build_rate_table(r, &results, &left.records, &right.records));
        ReconciliationReport::build(&config, left, right, results, rates, None)
    }

    #[test]
    fn summary_counts_and_totals() {
        let report = report();
        let s = report.summary();
        assert_eq!((s.left_records, s.right_records), (2, 2));
        assert_eq!((s.matched, s.discrepant, s.unmatched_left, s.unmatched_right), (0, 1, 1, 1));
        assert_eq!(s.discrepancies_by_field.get("amount"), Some(&1));
        assert_eq!(s.totals.len(), 1);
        assert_eq!(s.totals[0].left, Some(d("150.00")));
        assert_eq!(s.totals[0].right, Some(d("105.02")));
        assert_eq!(s.totals[0].difference, Some(d("44.98")));
        assert_eq!(s.rates.as_ref().map(|r| r.defined), Some(1));
        assert!(!s.is_clean());
    }

    #[test]
    fn totals_out_of_range_are_none() {
        let config = ReconTypeConfig::from_toml(TYPE).unwrap();
        let max = Decimal::MAX.to_string();
        let min = Decimal::MIN.to_string();
        let left = table(vec![rec(2, "1", &max, None), rec(3, "2", &max, None)]);
        let right = table(vec![rec(2, "1", &min, None)]);
        let report = ReconciliationReport::build(&config, left, right, vec![], None, None);
        let total = &report.summary().totals[0];
        assert_eq!(total.left, None);
        assert_eq!(total.right, Some(Decimal::MIN));
        assert_eq!(total.difference, None);
    }

    #[test]
    fn export_columns_follow_definition_order() {
        let table = report().to_exportable_table();
        assert_eq!(
            table.columns,
            vec![
                "status",
                "left.id",
                "left.amount",
                "left.fee",
                "right.id",
                "right.amount",
                "delta.amount",
                "rate",
            ]
        );
        assert_eq!(table.rows.len(), 3);

        let first = &table.rows[0];
        assert_eq!(first[0], ExportCell::Text("matched_with_discrepancy".into()));
        assert_eq!(first[6], ExportCell::Decimal(d("-0.02")));
        assert_eq!(first[7], ExportCell::Decimal(d("2.0000")));

        let unmatched_right = &table.rows[2];
        assert_eq!(unmatched_right[1], ExportCell::Empty);
        assert_eq!(unmatched_right[4], ExportCell::Text("9".into()));
        assert_eq!(unmatched_right[7], ExportCell::Empty);
    }

    #[test]
    fn no_rate_column_without_rate() {
        let config = ReconTypeConfig::from_toml(&TYPE.replace(
            "[rate]\nnumerator = \"fee\"\ndenominator = \"amount\"\n",
            "",
        ))
        .unwrap();
        let report = ReconciliationReport::build(&config, table(vec![]), table(vec![]), vec![], None, None);
        let table = report.to_exportable_table();
        assert!(!table.columns.iter().any(|c| c == "rate"));
        assert!(table.rows.is_empty());
        assert!(report.summary().is_clean());
    }

    #[test]
    fn report_serializes() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["meta"]["type_id"], "demo");
        assert_eq!(json["summary"]["discrepant"], 1);
        assert_eq!(json["results"][0]["status"], "matched_with_discrepancy");
        assert!(json.get("columns").is_none());
    }
}
