//! CLI Exit Code Registry
//!
//! Single source of truth for `settlerec` exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                                      |
//! |------|--------------------------------------------------------------|
//! | 0    | Success                                                      |
//! | 1    | General error (unspecified)                                  |
//! | 2    | Usage error (bad arguments, unknown slot, bad export path)   |
//! | 3    | Invalid configuration (definition or unknown type)           |
//! | 4    | Input error (missing/unreadable file, no header, no column)  |
//! | 5    | Discrepancies found (only with `run --strict`)               |

/// Command completed.
pub const EXIT_SUCCESS: u8 = 0;

/// Unspecified failure. Prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

/// Bad arguments. clap uses the same code for its own parse errors.
pub const EXIT_USAGE: u8 = 2;

/// Type definition failed to parse or validate, or the type id is unknown.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// An input file is missing, unreadable, or has no usable header/columns.
pub const EXIT_INPUT: u8 = 4;

/// `run --strict` found discrepant or unmatched records.
pub const EXIT_DISCREPANCIES: u8 = 5;
