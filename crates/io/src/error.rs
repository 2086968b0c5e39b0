use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    /// No encoding in the fallback list produced clean text.
    #[error("cannot decode file as text (tried {tried})")]
    Undecodable { tried: String },

    /// calamine could not open or read the workbook.
    #[error("cannot read spreadsheet: {0}")]
    Spreadsheet(String),

    #[error("spreadsheet contains no sheets with data")]
    NoSheets,

    #[error("sheet '{0}' not found")]
    SheetNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XLSX write error: {0}")]
    XlsxWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
