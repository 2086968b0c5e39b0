// File I/O: raw uploads in, cell grids out; export tables in, files out.

pub mod amount;
pub mod csv;
pub mod decode;
pub mod error;
pub mod export;
pub mod grid;
pub mod settlement;
pub mod xlsx;

pub use error::IoError;
pub use export::{ExportCell, ExportFormat, ExportTable};
pub use grid::{Cell, Grid, GridFormat, SourceFormat};

/// Read an uploaded file into a grid, dispatching on the requested format.
///
/// `Auto` treats spreadsheet extensions and zip/OLE magic bytes as
/// spreadsheets and everything else as delimited text. `sheet` only applies
/// to spreadsheets.
pub fn read_grid(
    file_name: &str,
    bytes: &[u8],
    format: SourceFormat,
    sheet: Option<&str>,
) -> Result<Grid, IoError> {
    match format {
        SourceFormat::Auto if xlsx::is_spreadsheet(file_name, bytes) => {
            xlsx::read_spreadsheet(file_name, bytes, sheet)
        }
        SourceFormat::Auto | SourceFormat::Delimited => csv::read_delimited(file_name, bytes),
        SourceFormat::Spreadsheet => xlsx::read_spreadsheet(file_name, bytes, sheet),
        SourceFormat::SettlementText => settlement::read_settlement_text(file_name, bytes),
    }
}
