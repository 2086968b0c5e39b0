use thiserror::Error;

use settlerec_io::IoError;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Definition is well-formed TOML but inconsistent.
    #[error("config validation error in '{type_id}': {message}")]
    ConfigValidation { type_id: String, message: String },

    /// Two definitions share an id in one source.
    #[error("duplicate reconciliation type id '{0}'")]
    DuplicateType(String),

    #[error("unknown reconciliation type: {0}")]
    UnknownReconciliationType(String),

    /// A required slot has no file.
    #[error("missing required file '{slot}' ({label})")]
    MissingRequiredFile { slot: String, label: String },

    /// A file was supplied for a slot the type does not define.
    #[error("unexpected file for slot '{0}'")]
    UnknownSlot(String),

    #[error("file '{slot}' ({file}) is unreadable: {reason}")]
    UnreadableFile {
        slot: String,
        file: String,
        reason: String,
    },

    /// No row in the scan window looks like a header.
    #[error("file '{slot}' ({file}): no header row found in the first {scanned} rows")]
    NoHeaderFound {
        slot: String,
        file: String,
        scanned: usize,
    },

    #[error("file '{slot}' ({file}): required column for '{field}' not found")]
    MissingRequiredField {
        slot: String,
        file: String,
        field: String,
    },

    /// IO error (definition directory, etc.).
    #[error("IO error: {0}")]
    Io(String),
}

impl ReconError {
    pub(crate) fn validation(type_id: &str, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            type_id: type_id.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn unreadable(slot: &str, file: &str, err: &IoError) -> Self {
        Self::UnreadableFile {
            slot: slot.to_string(),
            file: file.to_string(),
            reason: err.to_string(),
        }
    }

    /// Configuration problems are reported before any file is read.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse(_)
                | Self::ConfigValidation { .. }
                | Self::DuplicateType(_)
                | Self::UnknownReconciliationType(_)
                | Self::MissingRequiredFile { .. }
                | Self::UnknownSlot(_)
        )
    }
}
