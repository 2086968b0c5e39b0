//! `settlerec run` and `settlerec validate`.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};

use settlerec_io::{ExportFormat, IoError};
use settlerec_recon::config::ReconTypeConfig;
use settlerec_recon::model::InputFile;
use settlerec_recon::rates::RateStats;
use settlerec_recon::{ReconError, ReconciliationReport, Registry};

use crate::exit_codes::EXIT_DISCREPANCIES;
use crate::CliError;

const EXPORT_SHEET: &str = "Reconciliation";

/// Parse `SLOT=PATH` for `--file`.
pub fn parse_slot_file(s: &str) -> Result<(String, PathBuf), String> {
    let (slot, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=PATH, got '{s}'"))?;
    let slot = slot.trim();
    if slot.is_empty() {
        return Err(format!("missing slot name in '{s}'"));
    }
    if path.is_empty() {
        return Err(format!("missing path for slot '{slot}'"));
    }
    Ok((slot.to_string(), PathBuf::from(path)))
}

pub struct RunArgs {
    pub type_id: String,
    pub files: Vec<(String, PathBuf)>,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub export: Option<PathBuf>,
    pub strict: bool,
}

fn write_err(path: &Path, e: impl Display) -> CliError {
    CliError::general(format!("cannot write {}: {e}", path.display()))
}

/// Every `--file` names a slot of the type, once. Runs before any file is read.
fn check_slots(config: &ReconTypeConfig, files: &[(String, PathBuf)]) -> Result<(), CliError> {
    let mut seen = HashSet::with_capacity(files.len());
    for (slot, _) in files {
        if config.slot(slot).is_none() {
            return Err(ReconError::UnknownSlot(slot.clone()).into());
        }
        if !seen.insert(slot.as_str()) {
            return Err(CliError::usage(format!("slot '{slot}' given more than once")));
        }
    }
    Ok(())
}

fn read_inputs(files: &[(String, PathBuf)]) -> Result<HashMap<String, InputFile>, CliError> {
    let mut inputs = HashMap::with_capacity(files.len());
    for (slot, path) in files {
        let bytes = std::fs::read(path).map_err(|e| {
            CliError::input(format!("cannot read {}: {e}", path.display()))
                .with_hint(format!("check the path given for --file {slot}=..."))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        log::debug!("slot {slot}: {} ({} bytes)", path.display(), bytes.len());
        inputs.insert(slot.clone(), InputFile::new(name, bytes));
    }
    Ok(inputs)
}

fn report_json(report: &ReconciliationReport) -> Result<String, CliError> {
    settlerec_io::export::to_json(report).map_err(|e| CliError::general(e.to_string()))
}

fn export_report(report: &ReconciliationReport, path: &Path) -> Result<(), CliError> {
    let format = ExportFormat::from_path(path).ok_or_else(|| {
        CliError::usage(format!("cannot export to {}", path.display()))
            .with_hint("use a .xlsx, .csv or .json file name")
    })?;

    let result: Result<(), IoError> = match format {
        ExportFormat::Xlsx => settlerec_io::xlsx::export(&report.to_exportable_table(), path, EXPORT_SHEET),
        ExportFormat::Csv => settlerec_io::csv::export(&report.to_exportable_table(), path),
        ExportFormat::Json => settlerec_io::export::write_json(report, path),
    };
    result.map_err(|e| write_err(path, e))
}

fn bound<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

fn print_rate_stats(label: &str, stats: &RateStats) {
    eprintln!(
        "{label}: {} rows, {} undefined, {} outside expected range; mean {}, min {}, max {}",
        stats.count,
        stats.undefined,
        stats.anomalies,
        bound(stats.mean),
        bound(stats.min),
        bound(stats.max),
    );
}

fn print_summary(report: &ReconciliationReport) {
    let s = report.summary();
    eprintln!(
        "{} ({}): {} left, {} right records",
        report.meta.type_name, report.meta.type_id, s.left_records, s.right_records,
    );
    eprintln!(
        "  {} matched, {} with discrepancies, {} unmatched left, {} unmatched right",
        s.matched, s.discrepant, s.unmatched_left, s.unmatched_right,
    );

    for (field, count) in &s.discrepancies_by_field {
        eprintln!("  {field}: {count} outside tolerance");
    }

    for total in &s.totals {
        eprintln!(
            "  total {}: left {}, right {}, difference {}",
            total.field,
            bound(total.left),
            bound(total.right),
            bound(total.difference),
        );
    }

    if let Some(ref rates) = report.rates {
        print_rate_stats(&format!("  rate {}/{}", rates.numerator, rates.denominator), &rates.overall);
        for group in &rates.groups {
            print_rate_stats(&format!("    {}", group.group), &group.stats);
        }
    }

    if let Some(ref fees) = report.fees {
        for line in &fees.lines {
            let currency = line.currency.as_deref().unwrap_or("");
            eprintln!(
                "  fee {}: {} = {} {currency} over {} record(s)",
                line.name,
                line.calculation,
                bound(line.expected),
                line.records,
            );
            if line.charged.is_some() || line.mismatch {
                eprintln!(
                    "    charged {}, difference {}{}",
                    bound(line.charged),
                    bound(line.difference),
                    if line.mismatch { " (mismatch)" } else { "" },
                );
            }
        }
        eprintln!("  expected fees total {}", bound(fees.total));
    }

    if s.excluded_rows > 0 {
        eprintln!(
            "  {} row(s) excluded during ingestion (see left.meta / right.meta in the JSON report)",
            s.excluded_rows
        );
    }
}

pub fn cmd_run(registry: &Registry, args: RunArgs) -> Result<(), CliError> {
    // Unknown types and slots fail before any input is read.
    let config = registry.resolve(&args.type_id)?;
    check_slots(config, &args.files)?;
    let inputs = read_inputs(&args.files)?;
    let report = settlerec_recon::reconcile(registry, &args.type_id, &inputs)?;

    let json = if args.json || args.output.is_some() {
        Some(report_json(&report)?)
    } else {
        None
    };

    if let (Some(path), Some(body)) = (&args.output, &json) {
        std::fs::write(path, body).map_err(|e| write_err(path, e))?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(ref path) = args.export {
        export_report(&report, path)?;
        eprintln!("exported {}", path.display());
    }

    if args.json {
        if let Some(ref body) = json {
            println!("{body}");
        }
    }

    print_summary(&report);

    if args.strict && !report.summary().is_clean() {
        return Err(CliError::new(EXIT_DISCREPANCIES, "discrepancies found"));
    }
    Ok(())
}

pub fn cmd_validate(path: PathBuf) -> Result<(), CliError> {
    let config = settlerec_recon::registry::load_file(&path)?;
    println!("ok: {} ({})", config.id, config.name);
    Ok(())
}
