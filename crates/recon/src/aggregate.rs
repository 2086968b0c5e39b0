use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;

use crate::config::AggregateConfig;
use crate::model::{CanonicalRecord, CanonicalTable, Value};

/// Group records by the `group_by` fields, sum the `sum` fields and write the
/// group size into `count_into`. Groups come out in first-appearance order.
/// Other fields keep their value when every record in the group agrees and
/// are null otherwise.
pub fn aggregate_records(records: &[CanonicalRecord], config: &AggregateConfig) -> Vec<CanonicalRecord> {
    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut groups: HashMap<Vec<Value>, Vec<&CanonicalRecord>> = HashMap::new();

    for record in records {
        let key: Vec<Value> = config
            .group_by
            .iter()
            .map(|f| record.get(f).clone())
            .collect();
        let entry = groups.entry(key.clone()).or_default();
        if entry.is_empty() {
            order.push(key);
        }
        entry.push(record);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|members| fold_group(&members, config))
        .collect()
}

fn fold_group(members: &[&CanonicalRecord], config: &AggregateConfig) -> CanonicalRecord {
    let first = members[0];
    let mut values: BTreeMap<String, Value> = BTreeMap::new();

    for (name, value) in &first.values {
        let uniform = members.iter().all(|m| m.get(name) == value);
        values.insert(name.clone(), if uniform { value.clone() } else { Value::Null });
    }

    for name in &config.sum {
        let parts: Vec<Decimal> = members
            .iter()
            .filter_map(|m| m.get(name).as_decimal())
            .collect();
        let total = if parts.is_empty() {
            Value::Null
        } else {
            match parts.iter().try_fold(Decimal::ZERO, |acc, d| acc.checked_add(*d)) {
                Some(sum) => Value::Decimal(sum),
                None => {
                    log::warn!("sum of '{name}' over {} record(s) is out of range", parts.len());
                    Value::Null
                }
            }
        };
        values.insert(name.clone(), total);
    }

    if let Some(ref count) = config.count_into {
        values.insert(count.clone(), Value::Decimal(Decimal::from(members.len())));
    }

    let covers: Vec<usize> = members
        .iter()
        .flat_map(|m| {
            if m.covers.is_empty() {
                vec![m.row]
            } else {
                m.covers.clone()
            }
        })
        .collect();

    CanonicalRecord {
        row: first.row,
        covers,
        values,
    }
}

/// Replace a table's records with their aggregates.
pub fn aggregate_table(table: &mut CanonicalTable, config: &AggregateConfig) {
    let before = table.records.len();
    table.records = aggregate_records(&table.records, config);
    table.meta.aggregated_from = Some(before);
    log::debug!(
        "{}: aggregated {before} records into {} group(s)",
        table.meta.file,
        table.records.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Side;
    use std::str::FromStr;

    fn d(s: &str) -> Value {
        Value::Decimal(Decimal::from_str(s).unwrap())
    }

    fn t(s: &str) -> Value {
        Value::Text(s.into())
    }

    fn record(row: usize, mcc: &str, amount: Value, fee: Value) -> CanonicalRecord {
        let mut values = BTreeMap::new();
        values.insert("mcc".to_string(), t(mcc));
        values.insert("amount".to_string(), amount);
        values.insert("fee".to_string(), fee);
        values.insert("count".to_string(), Value::Null);
        values.insert("currency".to_string(), t("INR"));
        CanonicalRecord {
            row,
            covers: Vec::new(),
            values,
        }
    }

    fn config(group_by: &[&str]) -> AggregateConfig {
        AggregateConfig {
            side: Side::Left,
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
            sum: vec!["amount".into(), "fee".into()],
            count_into: Some("count".into()),
        }
    }

    #[test]
    fn whole_table_group() {
        let records = vec![
            record(2, "5411", d("100.00"), d("1.50")),
            record(3, "5812", d("50.25"), Value::Null),
            record(4, "5411", d("-10.00"), d("0.20")),
        ];
        let out = aggregate_records(&records, &config(&[]));
        assert_eq!(out.len(), 1);
        let agg = &out[0];
        assert_eq!(agg.get("amount"), &d("140.25"));
        assert_eq!(agg.get("fee"), &d("1.70"));
        assert_eq!(agg.get("count"), &d("3"));
        assert_eq!(agg.covers, vec![2, 3, 4]);
        assert_eq!(agg.row, 2);
        // Mixed values collapse to null, uniform ones survive.
        assert!(agg.get("mcc").is_null());
        assert_eq!(agg.get("currency"), &t("INR"));
    }

    #[test]
    fn groups_in_first_appearance_order() {
        let records = vec![
            record(2, "5812", d("1"), d("0")),
            record(3, "5411", d("2"), d("0")),
            record(4, "5812", d("3"), d("0")),
        ];
        let out = aggregate_records(&records, &config(&["mcc"]));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get("mcc"), &t("5812"));
        assert_eq!(out[0].get("amount"), &d("4"));
        assert_eq!(out[0].covers, vec![2, 4]);
        assert_eq!(out[1].get("mcc"), &t("5411"));
        assert_eq!(out[1].get("count"), &d("1"));
    }

    #[test]
    fn all_null_sum_is_null() {
        let records = vec![record(2, "1", d("1"), Value::Null)];
        let out = aggregate_records(&records, &config(&[]));
        assert!(out[0].get("fee").is_null());
    }

    #[test]
    fn sum_out_of_range_is_null() {
        let max = Value::Decimal(Decimal::MAX);
        let records = vec![
            record(2, "1", max.clone(), d("1")),
            record(3, "1", max, d("2")),
        ];
        let out = aggregate_records(&records, &config(&[]));
        assert!(out[0].get("amount").is_null());
        assert_eq!(out[0].get("fee"), &d("3"));
    }

    #[test]
    fn empty_input_no_groups() {
        assert!(aggregate_records(&[], &config(&[])).is_empty());
    }
}
