use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_xlsxwriter::Workbook;

use settlerec_io::ExportCell;
use settlerec_recon::model::{CanonicalRecord, MatchResult, MatchStatus, Value};
use settlerec_recon::rates::{Rate, RateFlag};
use settlerec_recon::{reconcile, InputFile, ReconError, ReconciliationReport, Registry};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(name: &str) -> InputFile {
    let path = fixtures_dir().join(name);
    let bytes = std::fs::read(&path).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    InputFile::new(name, bytes)
}

fn run(type_id: &str, files: Vec<(&str, InputFile)>) -> ReconciliationReport {
    let registry = Registry::builtin().unwrap();
    let files: HashMap<String, InputFile> = files
        .into_iter()
        .map(|(slot, f)| (slot.to_string(), f))
        .collect();
    reconcile(&registry, type_id, &files).unwrap()
}

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn statuses(report: &ReconciliationReport) -> Vec<MatchStatus> {
    report.results.iter().map(MatchResult::status).collect()
}

fn left_of<'a>(report: &'a ReconciliationReport, result: &MatchResult) -> &'a CanonicalRecord {
    report.left_record(result).unwrap()
}

enum XCell<'a> {
    S(&'a str),
    N(f64),
    Blank,
}

/// Write a single-sheet workbook and read it back as an upload.
fn xlsx_upload(dir: &Path, name: &str, rows: &[Vec<XCell>]) -> InputFile {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            match cell {
                XCell::S(s) => {
                    sheet.write_string(r as u32, c as u16, *s).unwrap();
                }
                XCell::N(n) => {
                    sheet.write_number(r as u32, c as u16, *n).unwrap();
                }
                XCell::Blank => {}
            }
        }
    }
    let path = dir.join(name);
    workbook.save(&path).unwrap();
    InputFile::new(name, std::fs::read(&path).unwrap())
}

// -------------------------------------------------------------------------
// Catalog
// -------------------------------------------------------------------------

#[test]
fn builtin_catalog() {
    let registry = Registry::builtin().unwrap();
    let ids = registry.ids();
    assert_eq!(
        ids,
        vec!["bank_vs_visa", "visa_vs_summary", "cms_vs_visa", "settlement_fee_rates"]
    );
    for summary in registry.list() {
        assert_eq!(summary.slots.len(), 2, "{}", summary.id);
        assert!(!summary.name.is_empty());
    }
}

// -------------------------------------------------------------------------
// Bank statement vs settlement summary
// -------------------------------------------------------------------------

fn bank_statement(dir: &Path, visa_charges_net: f64) -> InputFile {
    use XCell::{Blank, N, S};
    xlsx_upload(
        dir,
        "bank_statement.xlsx",
        &[
            vec![S("Settlement Account Statement")],
            vec![Blank],
            vec![S("Particulars"), S("DR"), S("CR"), S("Net")],
            vec![S("Interchange"), N(-1500.0), N(1540000.0), N(-1541500.0)],
            vec![S("Reimbursement Fees"), N(10.0), N(120.5), N(110.5)],
            vec![S("Visa Charges"), N(0.0), N(25.0), N(visa_charges_net)],
            vec![S("Acquirer Fees"), N(5.0), N(0.0), N(-5.0)],
            vec![S("Total"), N(0.0), N(-1000.0), N(1000.0)],
        ],
    )
}

#[test]
fn bank_vs_visa_sections() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        "bank_vs_visa",
        vec![
            ("bank_statement", bank_statement(dir.path(), -24.0)),
            ("visa_summary", fixture("visa_settlement.txt")),
        ],
    );

    assert_eq!(report.left.meta.header_row, 3);
    assert_eq!(report.right.meta.format, "settlement text");
    assert_eq!(report.right.len(), 4);

    assert_eq!(
        statuses(&report),
        vec![
            MatchStatus::Matched,
            MatchStatus::Matched,
            MatchStatus::MatchedWithDiscrepancy,
            MatchStatus::UnmatchedLeft,
            MatchStatus::Matched,
        ]
    );

    // Value map folds both spellings onto one section key.
    let reimb = left_of(&report, &report.results[1]);
    assert_eq!(reimb.get("section"), &Value::Text("REIMBURSEMENT".into()));

    let charges = &report.results[2];
    let net = charges.deltas().iter().find(|d| d.field == "net").unwrap();
    assert_eq!(net.delta, Some(d("1")));
    assert!(!net.within_tolerance);
    let debit = charges.deltas().iter().find(|d| d.field == "debit").unwrap();
    assert!(debit.within_tolerance);

    let s = report.summary();
    assert_eq!((s.matched, s.discrepant, s.unmatched_left, s.unmatched_right), (3, 1, 1, 0));
    assert_eq!(s.discrepancies_by_field.get("net"), Some(&1));
}

#[test]
fn bank_vs_visa_clean_when_statement_agrees() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        "bank_vs_visa",
        vec![
            ("bank_statement", bank_statement(dir.path(), -25.0)),
            ("visa_summary", fixture("visa_settlement.txt")),
        ],
    );
    assert_eq!(report.summary().discrepant, 0);
    assert_eq!(report.summary().matched, 4);
}

#[test]
fn bank_vs_visa_unlabelled_total_against_summary_totals() {
    use XCell::{Blank, N, S};
    let dir = tempfile::tempdir().unwrap();
    let bank = xlsx_upload(
        dir.path(),
        "bank_statement.xlsx",
        &[
            vec![S("Particulars"), S("DR"), S("CR"), S("Net")],
            vec![S("Interchange"), N(1234.0), N(5678.0), N(-4444.0)],
            vec![Blank, N(0.0), N(-1000.0), N(1000.0)],
        ],
    );
    let report = run(
        "bank_vs_visa",
        vec![
            ("bank_statement", bank),
            ("visa_summary", fixture("visa_summary.txt")),
        ],
    );

    // INTERCHANGE and TOTAL INTERCHANGE VALUE collapse into one section.
    let sections: Vec<String> = report
        .right
        .records
        .iter()
        .map(|r| r.get("section").display())
        .collect();
    assert_eq!(sections, vec!["INTERCHANGE", "TOTAL"]);

    assert_eq!(report.left.meta.excluded_rows, 0);
    assert_eq!(report.left.records[1].get("section"), &Value::Text("TOTAL".into()));
    assert_eq!(statuses(&report), vec![MatchStatus::Matched, MatchStatus::Matched]);
    assert!(report.summary().is_clean());
}

// -------------------------------------------------------------------------
// Detailed report rolled up vs summary
// -------------------------------------------------------------------------

#[test]
fn visa_detail_totals_match_summary() {
    let report = run(
        "visa_vs_summary",
        vec![
            ("visa_detail", fixture("visa_detail.csv")),
            ("visa_summary", fixture("visa_summary.txt")),
        ],
    );

    assert_eq!(report.left.meta.aggregated_from, Some(3));
    assert_eq!(report.left.meta.filtered_rows, 1);
    assert_eq!(report.left.len(), 1);
    assert_eq!(report.right.len(), 1);

    let rolled = &report.left.records[0];
    assert_eq!(rolled.get("transaction_count"), &Value::Decimal(d("3")));
    assert_eq!(rolled.get("debit_amount"), &Value::Decimal(d("1234")));
    assert_eq!(rolled.get("fee_credit"), &Value::Decimal(d("5678")));
    assert_eq!(rolled.covers, vec![3, 4, 5]);

    assert_eq!(statuses(&report), vec![MatchStatus::Matched]);
}

#[test]
fn visa_detail_missing_row_is_discrepant() {
    let detail = std::fs::read_to_string(fixtures_dir().join("visa_detail.csv"))
        .unwrap()
        .replace("3003,4111XXXXXXXX3333,34.00,78.00\n", "");
    let report = run(
        "visa_vs_summary",
        vec![
            ("visa_detail", InputFile::new("visa_detail.csv", detail)),
            ("visa_summary", fixture("visa_summary.txt")),
        ],
    );
    let result = &report.results[0];
    assert_eq!(result.status(), MatchStatus::MatchedWithDiscrepancy);
    let delta = |field: &str| {
        result
            .deltas()
            .iter()
            .find(|d| d.field == field)
            .and_then(|d| d.delta)
    };
    assert_eq!(delta("transaction_count"), Some(d("-1")));
    assert_eq!(delta("debit_amount"), Some(d("-34")));
    assert_eq!(delta("fee_credit"), Some(d("-78")));
}

// -------------------------------------------------------------------------
// Transaction level
// -------------------------------------------------------------------------

#[test]
fn cms_vs_visa_transactions() {
    let report = run(
        "cms_vs_visa",
        vec![
            ("cms_report", fixture("cms_report.csv")),
            ("visa_report", fixture("visa_report.csv")),
        ],
    );

    assert_eq!(report.left.meta.header_row, 4);
    assert_eq!(report.left.meta.filtered_rows, 1);
    assert_eq!(report.left.len(), 3);

    assert_eq!(
        statuses(&report),
        vec![
            MatchStatus::Matched,
            MatchStatus::Matched,
            MatchStatus::MatchedWithDiscrepancy,
            MatchStatus::UnmatchedRight,
        ]
    );

    // Amount off by exactly the tolerance still matches.
    let first = &report.results[0];
    let amount = first.deltas().iter().find(|d| d.field == "amount").unwrap();
    assert_eq!(amount.delta, Some(d("-0.01")));
    assert!(amount.within_tolerance);

    // Day-first date in the CMS export, ISO in the VISA report.
    let late = &report.results[2];
    let date = late.deltas().iter().find(|d| d.field == "transaction_date").unwrap();
    assert_eq!(date.delta, Some(d("-1")));

    let orphan = report.right_record(&report.results[3]).unwrap();
    assert_eq!(orphan.get("transaction_id"), &Value::Text("1004".into()));
}

#[test]
fn cms_vs_visa_export_layout() {
    let report = run(
        "cms_vs_visa",
        vec![
            ("cms_report", fixture("cms_report.csv")),
            ("visa_report", fixture("visa_report.csv")),
        ],
    );
    let table = report.to_exportable_table();
    assert_eq!(
        table.columns,
        vec![
            "status",
            "left.transaction_id",
            "left.rrn",
            "left.amount",
            "left.transaction_date",
            "right.transaction_id",
            "right.rrn",
            "right.amount",
            "right.transaction_date",
            "delta.amount",
            "delta.transaction_date",
        ]
    );
    assert_eq!(table.rows.len(), report.results.len());
    assert_eq!(table.rows[0][3], ExportCell::Decimal(d("1250.00")));

    let bytes = settlerec_io::xlsx::to_buffer(&table, "Reconciliation").unwrap();
    assert!(bytes.starts_with(b"PK"));
}

#[test]
fn missing_mandatory_column_is_reported() {
    let body = "Transaction ID,Txn Date,Amount\n1001,02/01/2025,1.00\n";
    let registry = Registry::builtin().unwrap();
    let mut files = HashMap::new();
    files.insert("cms_report".to_string(), InputFile::new("cms.csv", body));
    files.insert("visa_report".to_string(), fixture("visa_report.csv"));

    let err = reconcile(&registry, "cms_vs_visa", &files).unwrap_err();
    match err {
        ReconError::MissingRequiredField { slot, field, .. } => {
            assert_eq!(slot, "cms_report");
            assert_eq!(field, "rrn");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn file_without_header_is_reported() {
    let registry = Registry::builtin().unwrap();
    let mut files = HashMap::new();
    files.insert("cms_report".to_string(), InputFile::new("cms.csv", "a,b\n1,2\n"));
    files.insert("visa_report".to_string(), fixture("visa_report.csv"));

    let err = reconcile(&registry, "cms_vs_visa", &files).unwrap_err();
    assert!(matches!(err, ReconError::NoHeaderFound { ref slot, .. } if slot == "cms_report"));
    assert!(!err.is_config_error());
}

// -------------------------------------------------------------------------
// Fee rates
// -------------------------------------------------------------------------

fn fee_rates_run() -> ReconciliationReport {
    use XCell::{N, S};
    let dir = tempfile::tempdir().unwrap();
    let detail = xlsx_upload(
        dir.path(),
        "visa_detail.xlsx",
        &[
            vec![S("Transaction ID"), S("MCC"), S("Amount"), S("Interchange Fee")],
            vec![N(2001.0), S("5411"), N(1000.0), N(15.0)],
            vec![N(2002.0), S("5411"), N(200.0), N(8.0)],
            vec![N(2003.0), S("5812"), N(0.0), N(1.0)],
            vec![N(2004.0), S("5812"), N(500.0), N(10.0)],
        ],
    );
    run(
        "settlement_fee_rates",
        vec![("visa_detail", detail), ("cms_report", fixture("fee_cms.csv"))],
    )
}

#[test]
fn fee_rates_per_mcc() {
    let report = fee_rates_run();

    assert_eq!(report.summary().matched, 4);
    let rates = report.rates.as_ref().unwrap();
    let values: Vec<Rate> = rates.rows.iter().map(|r| r.rate).collect();
    assert_eq!(
        values,
        vec![
            Rate::Defined(d("1.5")),
            Rate::Defined(d("4")),
            Rate::Undefined,
            Rate::Defined(d("2")),
        ]
    );
    assert_eq!(rates.rows[1].flag, Some(RateFlag::AboveExpected));
    assert_eq!(rates.rows[2].flag, Some(RateFlag::Undefined));

    let overall = &rates.overall;
    assert_eq!((overall.count, overall.defined, overall.undefined, overall.anomalies), (4, 3, 1, 1));
    assert_eq!(overall.mean, Some(d("2.5")));

    assert_eq!(rates.groups.len(), 2);
    assert_eq!(rates.groups[0].group, "5411");
    assert_eq!(rates.groups[0].stats.mean, Some(d("2.75")));
    assert_eq!(rates.groups[1].group, "5812");
    assert_eq!(rates.groups[1].stats.undefined, 1);

    let table = report.to_exportable_table();
    assert_eq!(table.columns.last().map(String::as_str), Some("rate"));
    assert_eq!(table.rows[2].last(), Some(&ExportCell::Text("undefined".into())));
}

#[test]
fn fee_schedule_on_matched_volume() {
    let report = fee_rates_run();
    let fees = report.fees.as_ref().unwrap();
    assert_eq!(fees.lines.len(), 2);

    let interchange = &fees.lines[0];
    assert_eq!(interchange.records, 4);
    assert_eq!(interchange.amount, Some(d("1700")));
    assert_eq!(interchange.expected, Some(d("25.50")));
    assert_eq!(interchange.charged, Some(d("34")));
    assert_eq!(interchange.difference, Some(d("8.50")));
    assert!(interchange.mismatch);

    let scheme = &fees.lines[1];
    assert_eq!(scheme.units, Some(d("4")));
    assert_eq!(scheme.expected, Some(d("8")));
    assert_eq!(scheme.calculation, "4 x 2");
    assert_eq!(scheme.currency.as_deref(), Some("USD"));
    assert!(!scheme.mismatch);

    assert_eq!(fees.total, Some(d("33.50")));
    assert_eq!(report.summary().fee_mismatches, 1);
    assert!(!report.summary().is_clean());
}

// -------------------------------------------------------------------------
// Registry overrides
// -------------------------------------------------------------------------

#[test]
fn directory_type_runs_like_builtin() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("ledger.recon.toml"),
        r#"
id = "ledger_vs_bank"
name = "Ledger vs Bank"
keys = ["reference"]

[[slots]]
name = "ledger"
side = "left"

[[slots]]
name = "bank"
side = "right"

[[fields]]
name = "reference"
aliases = ["ref", "reference no"]
mandatory = true

[[fields]]
name = "amount"
type = "decimal"
aliases = ["amt"]

[[compare]]
field = "amount"
"#,
    )
    .unwrap();

    let registry = Registry::builtin_with_dir(dir.path()).unwrap();
    assert_eq!(registry.len(), 5);

    let mut files = HashMap::new();
    files.insert("ledger".to_string(), InputFile::new("l.csv", "Ref,Amt\nA1,(10.00)\nA2,5.00\n"));
    files.insert("bank".to_string(), InputFile::new("b.csv", "Reference No\tAmount\nA1\t-10.00\nA3\t1.00\n"));
    let report = reconcile(&registry, "ledger_vs_bank", &files).unwrap();
    assert_eq!(
        statuses(&report),
        vec![MatchStatus::Matched, MatchStatus::UnmatchedLeft, MatchStatus::UnmatchedRight]
    );
}
