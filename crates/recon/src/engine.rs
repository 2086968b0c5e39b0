use std::collections::HashMap;

use crate::aggregate::aggregate_table;
use crate::config::{ReconTypeConfig, Side, SlotConfig};
use crate::error::ReconError;
use crate::fees::build_fee_schedule;
use crate::matcher::match_tables;
use crate::model::{CanonicalTable, InputFile, TableMeta};
use crate::normalize::normalize_file;
use crate::rates::build_rate_table;
use crate::registry::Registry;
use crate::report::ReconciliationReport;

/// Run one reconciliation: resolve the type, ingest each slot's file, then
/// match, rate and report. `files` is keyed by slot name.
///
/// Configuration problems (unknown type, unknown slot, missing required
/// file) are reported before any file is read.
pub fn reconcile(
    registry: &Registry,
    type_id: &str,
    files: &HashMap<String, InputFile>,
) -> Result<ReconciliationReport, ReconError> {
    let config = registry.resolve(type_id)?;
    check_files(config, files)?;

    let left = load_side(config, Side::Left, files)?;
    let right = load_side(config, Side::Right, files)?;

    Ok(reconcile_tables(config, left, right))
}

fn check_files(config: &ReconTypeConfig, files: &HashMap<String, InputFile>) -> Result<(), ReconError> {
    let mut supplied: Vec<&String> = files.keys().collect();
    supplied.sort();
    if let Some(unknown) = supplied.into_iter().find(|name| config.slot(name).is_none()) {
        return Err(ReconError::UnknownSlot(unknown.clone()));
    }

    for slot in &config.slots {
        if slot.required && !files.contains_key(&slot.name) {
            return Err(ReconError::MissingRequiredFile {
                slot: slot.name.clone(),
                label: slot.display_label().to_string(),
            });
        }
    }
    Ok(())
}

fn load_side(
    config: &ReconTypeConfig,
    side: Side,
    files: &HashMap<String, InputFile>,
) -> Result<CanonicalTable, ReconError> {
    let slot = config
        .slot_for(side)
        .ok_or_else(|| ReconError::validation(&config.id, format!("no {side} slot")))?;
    match files.get(&slot.name) {
        Some(input) => {
            log::debug!("ingesting '{}' for slot '{}'", input.name, slot.name);
            normalize_file(config, slot, input)
        }
        None => {
            log::debug!("optional slot '{}' not supplied, using an empty table", slot.name);
            Ok(empty_table(slot))
        }
    }
}

fn empty_table(slot: &SlotConfig) -> CanonicalTable {
    CanonicalTable {
        meta: TableMeta {
            slot: slot.name.clone(),
            side: Some(slot.side),
            ..TableMeta::default()
        },
        records: Vec::new(),
    }
}

/// Post-ingestion pipeline on already normalized tables: optional
/// aggregation, matching, rates, fees, report.
pub fn reconcile_tables(
    config: &ReconTypeConfig,
    mut left: CanonicalTable,
    mut right: CanonicalTable,
) -> ReconciliationReport {
    if let Some(ref agg) = config.aggregate {
        match agg.side {
            Side::Left => aggregate_table(&mut left, agg),
            Side::Right => aggregate_table(&mut right, agg),
        }
    }

    let results = match_tables(config, &left.records, &right.records);
    let rates = config
        .rate
        .as_ref()
        .map(|rate| build_rate_table(rate, &results, &left.records, &right.records));

    let fees = build_fee_schedule(&config.fees, &results, &left.records, &right.records);

    let report = ReconciliationReport::build(config, left, right, results, rates, fees);
    let s = report.summary();
    log::info!(
        "{}: {} matched, {} discrepant, {} unmatched left, {} unmatched right",
        config.id,
        s.matched,
        s.discrepant,
        s.unmatched_left,
        s.unmatched_right
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const TYPE: &str = r#"
id = "pair"
name = "Pair"
keys = ["id"]

[[slots]]
name = "ledger"
label = "Ledger export"
side = "left"

[[slots]]
name = "bank"
side = "right"
required = false

[[fields]]
name = "id"
aliases = ["ref"]
mandatory = true

[[fields]]
name = "amount"
type = "decimal"

[[compare]]
field = "amount"

[tolerance.amount]
abs = "0.01"
"#;

    fn registry() -> Registry {
        Registry::from_configs(vec![ReconTypeConfig::from_toml(TYPE).unwrap()]).unwrap()
    }

    fn files(entries: &[(&str, &str, &str)]) -> HashMap<String, InputFile> {
        entries
            .iter()
            .map(|(slot, name, body)| (slot.to_string(), InputFile::new(*name, body.as_bytes())))
            .collect()
    }

    #[test]
    fn unknown_type() {
        let err = reconcile(&registry(), "nope", &HashMap::new()).unwrap_err();
        assert!(matches!(err, ReconError::UnknownReconciliationType(ref id) if id == "nope"));
    }

    #[test]
    fn missing_required_slot_before_reading() {
        // The bank file is garbage, but the missing ledger is reported first.
        let input = files(&[("bank", "bank.csv", "\u{0}\u{1}\u{2}")]);
        let err = reconcile(&registry(), "pair", &input).unwrap_err();
        match err {
            ReconError::MissingRequiredFile { slot, label } => {
                assert_eq!(slot, "ledger");
                assert_eq!(label, "Ledger export");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err_is_config(&registry(), &input));
    }

    fn err_is_config(registry: &Registry, input: &HashMap<String, InputFile>) -> bool {
        reconcile(registry, "pair", input)
            .err()
            .is_some_and(|e| e.is_config_error())
    }

    #[test]
    fn unknown_slot_rejected() {
        let input = files(&[("ledger", "l.csv", "id,amount\n1,2\n"), ("extra", "x.csv", "")]);
        let err = reconcile(&registry(), "pair", &input).unwrap_err();
        assert!(matches!(err, ReconError::UnknownSlot(ref s) if s == "extra"));
    }

    #[test]
    fn optional_slot_missing_gives_unmatched_left() {
        let input = files(&[("ledger", "l.csv", "ref,amount\n1,10.00\n2,5.00\n")]);
        let report = reconcile(&registry(), "pair", &input).unwrap();
        assert_eq!(report.summary().unmatched_left, 2);
        assert_eq!(report.right.meta.slot, "bank");
        assert!(report.right.is_empty());
    }

    #[test]
    fn end_to_end_csv() {
        let input = files(&[
            ("ledger", "l.csv", "ref,amount\n1,100.00\n2,50.00\n3,1.00\n"),
            ("bank", "b.csv", "id;amount\n2;50.01\n1;100.05\n4;7.00\n"),
        ]);
        let report = reconcile(&registry(), "pair", &input).unwrap();
        let s = report.summary();
        assert_eq!((s.matched, s.discrepant, s.unmatched_left, s.unmatched_right), (1, 1, 1, 1));
        assert_eq!(report.left.meta.header_row, 1);
    }
}
