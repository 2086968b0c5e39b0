use std::collections::{BTreeMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use settlerec_io::SourceFormat;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// One reconciliation type. Loaded once, shared read-only.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReconTypeConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub slots: Vec<SlotConfig>,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub tolerance: BTreeMap<String, ToleranceRule>,
    #[serde(default)]
    pub compare: Vec<CompareField>,
    #[serde(default)]
    pub aggregate: Option<AggregateConfig>,
    #[serde(default)]
    pub rate: Option<RateConfig>,
    #[serde(default)]
    pub fees: Vec<FeeConfig>,
    #[serde(default)]
    pub ingest: IngestConfig,
}

fn default_version() -> String {
    "1".into()
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// A named input file position.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SlotConfig {
    pub name: String,
    #[serde(default)]
    pub label: String,
    /// Accepted extensions, e.g. `[".xlsx", ".xls"]`. Informational.
    #[serde(default)]
    pub accept: Vec<String>,
    pub side: Side,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub format: SourceFormat,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
    #[serde(default)]
    pub transform: Option<AmountTransform>,
}

fn default_true() -> bool {
    true
}

impl SlotConfig {
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }
}

// ---------------------------------------------------------------------------
// Filter + Transform
// ---------------------------------------------------------------------------

/// Keep rows whose canonical `field` is one of `values`, or looks numeric.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RowFilter {
    pub field: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub numeric: bool,
}

/// Multiply a decimal field, optionally only when `when_field` is in `when_values`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AmountTransform {
    pub field: String,
    pub multiply: Decimal,
    #[serde(default)]
    pub when_field: Option<String>,
    #[serde(default)]
    pub when_values: Vec<String>,
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Decimal,
    Date,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Decimal => write!(f, "decimal"),
            Self::Date => write!(f, "date"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub mandatory: bool,
    /// Restrict the field to one side's files.
    #[serde(default)]
    pub side: Option<Side>,
    /// Canonical replacements for text values, keyed by the upper-cased,
    /// whitespace-free source value.
    #[serde(default)]
    pub value_map: BTreeMap<String, String>,
    #[serde(default)]
    pub date_formats: Vec<String>,
    /// Text used for an empty cell, e.g. the unlabelled total row of a
    /// bank statement. Goes through `value_map` like any other value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_as: Option<String>,
}

impl FieldConfig {
    pub fn applies_to(&self, side: Side) -> bool {
        self.side.map_or(true, |s| s == side)
    }
}

// ---------------------------------------------------------------------------
// Matching rules
// ---------------------------------------------------------------------------

/// Allowed deviation for one field. `abs`/`rel` apply to decimals, `days`
/// to dates. No rule means exact equality.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToleranceRule {
    #[serde(default)]
    pub abs: Option<Decimal>,
    #[serde(default)]
    pub rel: Option<Decimal>,
    #[serde(default)]
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompareField {
    pub field: String,
    #[serde(default = "default_weight")]
    pub weight: Decimal,
}

fn default_weight() -> Decimal {
    Decimal::ONE
}

/// Collapse one side into groups before matching.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateConfig {
    pub side: Side,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub sum: Vec<String>,
    #[serde(default)]
    pub count_into: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateConfig {
    pub numerator: String,
    pub denominator: String,
    #[serde(default = "default_rate_side")]
    pub side: Side,
    #[serde(default = "default_true")]
    pub percent: bool,
    #[serde(default = "default_rate_decimals")]
    pub decimals: u32,
    #[serde(default)]
    pub expected_min: Option<Decimal>,
    #[serde(default)]
    pub expected_max: Option<Decimal>,
    #[serde(default)]
    pub group_by: Option<String>,
}

fn default_rate_side() -> Side {
    Side::Left
}

fn default_rate_decimals() -> u32 {
    4
}

// ---------------------------------------------------------------------------
// Fee schedule
// ---------------------------------------------------------------------------

/// How an expected fee is derived from volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeFormula {
    Fixed {
        amount: Decimal,
    },
    PerUnit {
        rate: Decimal,
    },
    /// The first `threshold` units at `first`, every unit beyond at `rest`.
    Tiered {
        threshold: Decimal,
        first: Decimal,
        rest: Decimal,
    },
    /// `rate` times the summed amount, or `rate` percent of it.
    OnAmount {
        rate: Decimal,
        #[serde(default)]
        percent: bool,
    },
}

/// Rate-chart text such as `"$2 for first 30K cards, $1.5 per card
/// thereafter"`, or a typed formula table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeeRuleSpec {
    Chart(String),
    Typed(FeeFormula),
}

/// One line of the fee schedule. Volume is measured on `side`: the record
/// count (or the sum of `units_field`) and the sum of `amount_field`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FeeConfig {
    pub name: String,
    pub rule: FeeRuleSpec,
    #[serde(default = "default_rate_side")]
    pub side: Side,
    /// Only records that ended up in a matched pair.
    #[serde(default)]
    pub matched_only: bool,
    #[serde(default)]
    pub when: Option<RowFilter>,
    #[serde(default)]
    pub units_field: Option<String>,
    #[serde(default)]
    pub amount_field: Option<String>,
    /// Fee actually charged, summed over the same records.
    #[serde(default)]
    pub charged_field: Option<String>,
    #[serde(default)]
    pub tolerance: Decimal,
    /// Overrides the currency read from the chart text.
    #[serde(default)]
    pub currency: Option<String>,
    /// Multiplier into the report currency.
    #[serde(default)]
    pub exchange_rate: Option<Decimal>,
    #[serde(default = "default_fee_decimals")]
    pub decimals: u32,
}

fn default_fee_decimals() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// Ingest tuning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    #[serde(default = "default_header_scan_rows")]
    pub header_scan_rows: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_min_header_matches")]
    pub min_header_matches: usize,
}

fn default_header_scan_rows() -> usize {
    10
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_min_header_matches() -> usize {
    2
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            header_scan_rows: default_header_scan_rows(),
            similarity_threshold: default_similarity_threshold(),
            min_header_matches: default_min_header_matches(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconTypeConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconTypeConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn field(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn slot(&self, name: &str) -> Option<&SlotConfig> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn slot_for(&self, side: Side) -> Option<&SlotConfig> {
        self.slots.iter().find(|s| s.side == side)
    }

    pub fn tolerance_for(&self, field: &str) -> Option<&ToleranceRule> {
        self.tolerance.get(field)
    }

    /// Fields compared on every accepted pair: toleranced keys first, then
    /// the configured compare list. Each field appears once.
    pub fn compared_fields(&self) -> Vec<(&str, Decimal)> {
        let mut out: Vec<(&str, Decimal)> = Vec::new();
        for key in &self.keys {
            if self.tolerance.contains_key(key) {
                out.push((key.as_str(), Decimal::ONE));
            }
        }
        for c in &self.compare {
            if !out.iter().any(|(name, _)| *name == c.field) {
                out.push((c.field.as_str(), c.weight));
            }
        }
        out
    }

    fn require_field(&self, what: &str, name: &str) -> Result<&FieldConfig, ReconError> {
        self.field(name).ok_or_else(|| {
            ReconError::validation(&self.id, format!("{what} references unknown field '{name}'"))
        })
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let id = self.id.as_str();
        let fail = |msg: String| Err(ReconError::validation(id, msg));

        if id.trim().is_empty() {
            return Err(ReconError::validation("<unnamed>", "id must not be empty"));
        }

        // Exactly one left and one right slot
        let lefts = self.slots.iter().filter(|s| s.side == Side::Left).count();
        let rights = self.slots.iter().filter(|s| s.side == Side::Right).count();
        if lefts != 1 || rights != 1 {
            return fail(format!(
                "exactly one left and one right slot required, found {lefts} left and {rights} right"
            ));
        }

        let mut seen = HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.name.as_str()) {
                return fail(format!("duplicate slot '{}'", slot.name));
            }
        }

        if self.fields.is_empty() {
            return fail("at least one field is required".into());
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return fail("field name must not be empty".into());
            }
            if !seen.insert(field.name.as_str()) {
                return fail(format!("duplicate field '{}'", field.name));
            }
            if field.empty_as.is_some() && field.kind != FieldKind::Text {
                return fail(format!("field '{}': empty_as applies to text fields only", field.name));
            }
        }

        for key in &self.keys {
            let field = self.require_field("key", key)?;
            if field.side.is_some() {
                return fail(format!("key field '{key}' must not be restricted to one side"));
            }
        }

        for c in &self.compare {
            let field = self.require_field("compare", &c.field)?;
            if field.side.is_some() {
                return fail(format!(
                    "compare field '{}' must not be restricted to one side",
                    c.field
                ));
            }
            if c.weight < Decimal::ZERO {
                return fail(format!("compare field '{}' has a negative weight", c.field));
            }
        }

        for (name, rule) in &self.tolerance {
            let field = self.require_field("tolerance", name)?;
            let numeric = rule.abs.is_some() || rule.rel.is_some();
            match field.kind {
                FieldKind::Decimal if rule.days.is_some() => {
                    return fail(format!("tolerance '{name}': days applies to date fields only"));
                }
                FieldKind::Date if numeric => {
                    return fail(format!("tolerance '{name}': abs/rel apply to decimal fields only"));
                }
                FieldKind::Text => {
                    return fail(format!("tolerance '{name}': text fields cannot have a tolerance"));
                }
                _ => {}
            }
            let negative = rule.abs.is_some_and(|v| v < Decimal::ZERO)
                || rule.rel.is_some_and(|v| v < Decimal::ZERO)
                || rule.days.is_some_and(|d| d < 0);
            if negative {
                return fail(format!("tolerance '{name}' must not be negative"));
            }
        }

        for slot in &self.slots {
            if let Some(ref filter) = slot.filter {
                let field = self.require_field(&format!("slot '{}' filter", slot.name), &filter.field)?;
                if !field.applies_to(slot.side) {
                    return fail(format!(
                        "slot '{}' filter field '{}' is not present on the {} side",
                        slot.name, filter.field, slot.side
                    ));
                }
                if filter.values.is_empty() && !filter.numeric {
                    return fail(format!(
                        "slot '{}' filter needs `values` or `numeric = true`",
                        slot.name
                    ));
                }
            }
            if let Some(ref xf) = slot.transform {
                let field = self.require_field(&format!("slot '{}' transform", slot.name), &xf.field)?;
                if field.kind != FieldKind::Decimal {
                    return fail(format!(
                        "slot '{}' transform field '{}' must be decimal",
                        slot.name, xf.field
                    ));
                }
                if let Some(ref when) = xf.when_field {
                    self.require_field(&format!("slot '{}' transform", slot.name), when)?;
                }
            }
        }

        if let Some(ref agg) = self.aggregate {
            for name in agg.group_by.iter().chain(agg.sum.iter()) {
                let field = self.require_field("aggregate", name)?;
                if !field.applies_to(agg.side) {
                    return fail(format!(
                        "aggregate field '{name}' is not present on the {} side",
                        agg.side
                    ));
                }
            }
            for name in &agg.sum {
                if self.field(name).map(|f| f.kind) != Some(FieldKind::Decimal) {
                    return fail(format!("aggregate sum field '{name}' must be decimal"));
                }
            }
            if let Some(ref count) = agg.count_into {
                let field = self.require_field("aggregate count_into", count)?;
                if field.kind != FieldKind::Decimal {
                    return fail(format!("aggregate count_into field '{count}' must be decimal"));
                }
            }
        }

        if let Some(ref rate) = self.rate {
            for name in [&rate.numerator, &rate.denominator] {
                let field = self.require_field("rate", name)?;
                if field.kind != FieldKind::Decimal {
                    return fail(format!("rate field '{name}' must be decimal"));
                }
                if !field.applies_to(rate.side) {
                    return fail(format!(
                        "rate field '{name}' is not present on the {} side",
                        rate.side
                    ));
                }
            }
            if let Some(ref group) = rate.group_by {
                let field = self.require_field("rate group_by", group)?;
                if !field.applies_to(rate.side) {
                    return fail(format!(
                        "rate group_by field '{group}' is not present on the {} side",
                        rate.side
                    ));
                }
            }
            if let (Some(min), Some(max)) = (rate.expected_min, rate.expected_max) {
                if min > max {
                    return fail("rate expected_min is greater than expected_max".into());
                }
            }
        }

        self.validate_fees()?;

        let t = self.ingest.similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return fail(format!("similarity_threshold must be in (0, 1], got {t}"));
        }
        if self.ingest.header_scan_rows == 0 {
            return fail("header_scan_rows must be at least 1".into());
        }
        if self.ingest.min_header_matches == 0 {
            return fail("min_header_matches must be at least 1".into());
        }

        Ok(())
    }

    fn validate_fees(&self) -> Result<(), ReconError> {
        let fail = |msg: String| Err(ReconError::validation(&self.id, msg));
        let mut names = HashSet::new();
        for fee in &self.fees {
            let what = format!("fee '{}'", fee.name);
            if fee.name.trim().is_empty() {
                return fail("fee name must not be empty".into());
            }
            if !names.insert(fee.name.as_str()) {
                return fail(format!("duplicate fee '{}'", fee.name));
            }
            let formula = match crate::fees::resolve_rule(&fee.rule) {
                Ok((formula, _)) => formula,
                Err(msg) => return fail(format!("{what}: {msg}")),
            };
            for name in [&fee.units_field, &fee.amount_field, &fee.charged_field]
                .into_iter()
                .flatten()
            {
                let field = self.require_field(&what, name)?;
                if field.kind != FieldKind::Decimal {
                    return fail(format!("{what}: field '{name}' must be decimal"));
                }
                if !field.applies_to(fee.side) {
                    return fail(format!(
                        "{what}: field '{name}' is not present on the {} side",
                        fee.side
                    ));
                }
            }
            if let Some(ref when) = fee.when {
                let field = self.require_field(&what, &when.field)?;
                if !field.applies_to(fee.side) {
                    return fail(format!(
                        "{what}: when field '{}' is not present on the {} side",
                        when.field, fee.side
                    ));
                }
            }
            if matches!(formula, FeeFormula::OnAmount { .. }) && fee.amount_field.is_none() {
                return fail(format!("{what}: an amount-based rule needs amount_field"));
            }
            if fee.exchange_rate.is_some_and(|r| r <= Decimal::ZERO) {
                return fail(format!("{what}: exchange_rate must be positive"));
            }
            if fee.tolerance < Decimal::ZERO {
                return fail(format!("{what}: tolerance must not be negative"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
