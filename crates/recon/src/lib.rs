//! `settlerec-recon`: configuration-driven two-file reconciliation.
//!
//! A reconciliation type is a TOML definition (slots, canonical fields,
//! keys, tolerances, optional aggregation, rate and fee schedule). The engine ingests one
//! file per slot, normalizes it to canonical records, matches left against
//! right and reports. Export writers live in `settlerec-io`.

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod fees;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod rates;
pub mod registry;
pub mod report;

pub use config::{ReconTypeConfig, Side};
pub use engine::{reconcile, reconcile_tables};
pub use error::ReconError;
pub use fees::{FeeLine, FeeSchedule};
pub use model::{CanonicalRecord, CanonicalTable, InputFile, MatchResult, MatchStatus, Value};
pub use rates::{Rate, RateTable};
pub use registry::{Registry, TypeSummary};
pub use report::{ReconSummary, ReconciliationReport};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
