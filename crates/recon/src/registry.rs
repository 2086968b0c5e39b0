//! Catalog of reconciliation types.
//!
//! Built-in definitions are TOML documents embedded at compile time. A
//! directory of `*.recon.toml` files can be layered on top; a definition
//! whose id matches a built-in replaces it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{ReconTypeConfig, Side};
use crate::error::ReconError;

const BUILTIN: [(&str, &str); 4] = [
    ("bank_vs_visa", include_str!("../types/bank_vs_visa.recon.toml")),
    ("visa_vs_summary", include_str!("../types/visa_vs_summary.recon.toml")),
    ("cms_vs_visa", include_str!("../types/cms_vs_visa.recon.toml")),
    (
        "settlement_fee_rates",
        include_str!("../types/settlement_fee_rates.recon.toml"),
    ),
];

pub const DEFINITION_SUFFIX: &str = ".recon.toml";

/// Immutable set of validated type definitions, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: Vec<ReconTypeConfig>,
    by_id: HashMap<String, usize>,
}

/// Catalog entry as shown to callers.
#[derive(Debug, Clone, Serialize)]
pub struct TypeSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub slots: Vec<SlotSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotSummary {
    pub name: String,
    pub label: String,
    pub side: Side,
    pub accept: Vec<String>,
    pub required: bool,
}

impl Registry {
    pub fn builtin() -> Result<Self, ReconError> {
        let mut registry = Self::default();
        for (id, source) in BUILTIN {
            let config = ReconTypeConfig::from_toml(source)?;
            debug_assert_eq!(config.id, id);
            registry.insert(config, false)?;
        }
        Ok(registry)
    }

    /// Load every `*.recon.toml` in `dir`, in file-name order.
    pub fn from_dir(dir: &Path) -> Result<Self, ReconError> {
        let mut registry = Self::default();
        for path in definition_files(dir)? {
            registry.insert(load_file(&path)?, false)?;
        }
        Ok(registry)
    }

    /// Built-ins with `dir` layered on top.
    pub fn builtin_with_dir(dir: &Path) -> Result<Self, ReconError> {
        let mut registry = Self::builtin()?;
        let mut seen: Vec<String> = Vec::new();
        for path in definition_files(dir)? {
            let config = load_file(&path)?;
            if seen.contains(&config.id) {
                return Err(ReconError::DuplicateType(config.id));
            }
            seen.push(config.id.clone());
            registry.insert(config, true)?;
        }
        Ok(registry)
    }

    pub fn from_configs(configs: Vec<ReconTypeConfig>) -> Result<Self, ReconError> {
        let mut registry = Self::default();
        for config in configs {
            config.validate()?;
            registry.insert(config, false)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, config: ReconTypeConfig, replace: bool) -> Result<(), ReconError> {
        match self.by_id.get(&config.id) {
            Some(&idx) if replace => {
                log::debug!("type '{}' overrides the built-in definition", config.id);
                self.types[idx] = config;
            }
            Some(_) => return Err(ReconError::DuplicateType(config.id)),
            None => {
                self.by_id.insert(config.id.clone(), self.types.len());
                self.types.push(config);
            }
        }
        Ok(())
    }

    pub fn resolve(&self, type_id: &str) -> Result<&ReconTypeConfig, ReconError> {
        self.by_id
            .get(type_id)
            .map(|&idx| &self.types[idx])
            .ok_or_else(|| ReconError::UnknownReconciliationType(type_id.to_string()))
    }

    pub fn list(&self) -> Vec<TypeSummary> {
        self.types.iter().map(summarize).collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn summarize(config: &ReconTypeConfig) -> TypeSummary {
    TypeSummary {
        id: config.id.clone(),
        name: config.name.clone(),
        description: config.description.clone(),
        version: config.version.clone(),
        slots: config
            .slots
            .iter()
            .map(|s| SlotSummary {
                name: s.name.clone(),
                label: s.display_label().to_string(),
                side: s.side,
                accept: s.accept.clone(),
                required: s.required,
            })
            .collect(),
    }
}

fn definition_files(dir: &Path) -> Result<Vec<PathBuf>, ReconError> {
    let entries =
        fs::read_dir(dir).map_err(|e| ReconError::Io(format!("{}: {e}", dir.display())))?;

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(DEFINITION_SUFFIX))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Parse and validate one definition file.
pub fn load_file(path: &Path) -> Result<ReconTypeConfig, ReconError> {
    let content = fs::read_to_string(path)
        .map_err(|e| ReconError::Io(format!("{}: {e}", path.display())))?;
    let config = ReconTypeConfig::from_toml(&content).map_err(|e| match e {
        ReconError::ConfigParse(msg) => ReconError::ConfigParse(format!("{}: {msg}", path.display())),
        other => other,
    })?;
    log::debug!("loaded type '{}' from {}", config.id, path.display());
    Ok(config)
}
