// settlerec CLI - settlement reconciliation from the command line

mod catalog;
mod exit_codes;
mod recon;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use settlerec_recon::{ReconError, Registry};

use exit_codes::{EXIT_ERROR, EXIT_INPUT, EXIT_INVALID_CONFIG, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "settlerec")]
#[command(about = "Reconcile settlement files against each other")]
#[command(version)]
struct Cli {
    /// Directory of extra *.recon.toml definitions (same id replaces a built-in)
    #[arg(long, global = true, env = "SETTLEREC_TYPES_DIR")]
    types_dir: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available reconciliation types
    #[command(after_help = "\
Examples:
  settlerec types
  settlerec types --json")]
    Types {
        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one type's slots, fields, keys and tolerances
    #[command(after_help = "\
Examples:
  settlerec show cms_vs_visa
  settlerec show cms_vs_visa --json")]
    Show {
        /// Reconciliation type id
        type_id: String,

        /// Output the full definition as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse and validate a type definition file without running it
    #[command(after_help = "\
Examples:
  settlerec validate types/ledger_vs_bank.recon.toml")]
    Validate {
        /// Path to a .recon.toml file
        definition: PathBuf,
    },

    /// Ingest one file per slot, reconcile and report
    #[command(after_help = "\
Examples:
  settlerec run cms_vs_visa --file cms_report=cms.xlsx --file visa_report=visa.xlsx
  settlerec run bank_vs_visa --file bank_statement=bank.xlsx --file visa_summary=visa.txt --json
  settlerec run settlement_fee_rates --file visa_detail=d.xlsx --file cms_report=c.xlsx --export rates.xlsx
  settlerec run visa_vs_summary --file visa_detail=d.xlsx --file visa_summary=s.txt --strict")]
    Run {
        /// Reconciliation type id
        type_id: String,

        /// Input file for a slot, as SLOT=PATH (repeatable)
        #[arg(long = "file", value_name = "SLOT=PATH", value_parser = recon::parse_slot_file)]
        files: Vec<(String, PathBuf)>,

        /// Print the full report as JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write the full report as JSON to a file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the result table (.xlsx, .csv or .json)
        #[arg(long)]
        export: Option<PathBuf>,

        /// Exit 5 when anything is discrepant or unmatched
        #[arg(long)]
        strict: bool,
    },

    /// Print status, engine version and available types
    Health {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let types_dir = cli.types_dir.as_deref();
    let result = match cli.command {
        Commands::Validate { definition } => recon::cmd_validate(definition),
        Commands::Types { json } => {
            load_registry(types_dir).and_then(|registry| catalog::cmd_types(&registry, json))
        }
        Commands::Show { type_id, json } => load_registry(types_dir)
            .and_then(|registry| catalog::cmd_show(&registry, &type_id, json)),
        Commands::Health { json } => {
            load_registry(types_dir).and_then(|registry| catalog::cmd_health(&registry, json))
        }
        Commands::Run {
            type_id,
            files,
            json,
            output,
            export,
            strict,
        } => load_registry(types_dir).and_then(|registry| {
            recon::cmd_run(
                &registry,
                recon::RunArgs {
                    type_id,
                    files,
                    json,
                    output,
                    export,
                    strict,
                },
            )
        }),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn load_registry(types_dir: Option<&std::path::Path>) -> Result<Registry, CliError> {
    let registry = match types_dir {
        Some(dir) => Registry::builtin_with_dir(dir),
        None => Registry::builtin(),
    };
    registry.map_err(CliError::from)
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::new(EXIT_INPUT, msg)
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        let message = err.to_string();
        match err {
            ReconError::UnknownReconciliationType(_) => Self::new(EXIT_INVALID_CONFIG, message)
                .with_hint("run `settlerec types` to list the available types"),
            ReconError::UnknownSlot(_) => Self::usage(message)
                .with_hint("run `settlerec show <type>` to list its slots"),
            ReconError::MissingRequiredFile { ref slot, .. } => {
                let hint = format!("pass it with --file {slot}=PATH");
                Self::input(message).with_hint(hint)
            }
            ReconError::NoHeaderFound { .. } => Self::input(message)
                .with_hint("the header must be within the first rows and name at least two known columns"),
            ReconError::MissingRequiredField { .. } => Self::input(message)
                .with_hint("check the column headers against `settlerec show <type>`"),
            ReconError::UnreadableFile { .. } => Self::input(message),
            ReconError::Io(_) => Self::general(message),
            ReconError::ConfigParse(_)
            | ReconError::ConfigValidation { .. }
            | ReconError::DuplicateType(_) => Self::new(EXIT_INVALID_CONFIG, message),
        }
    }
}
