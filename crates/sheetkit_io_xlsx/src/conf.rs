//! XLSX constants and default preset factories.

use crate::spec::{SpecXlsxExportOptions, SpecXlsxReadOptions};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Fallback prefix for blank sheet names (`Sheet1`, `Sheet2`, ...).
pub const C_SHEET_NAME_FALLBACK: &str = "Sheet";
/// Number of paginated sheets after which `name1` + `0` and `name10` become ambiguous.
pub const N_SHEETS_SUFFIX_AMBIGUOUS: usize = 10;

/// Content type announced for workbook downloads.
pub const C_CONTENT_TYPE_DOWNLOAD: &str = "application/octet-stream;charset=utf-8";

/// Leading bytes of a ZIP container (OOXML workbooks).
pub const V_MAGIC_ZIP: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
/// Leading bytes of an OLE2 compound file (legacy BIFF workbooks).
pub const V_MAGIC_OLE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Build default export options.
pub fn derive_default_xlsx_export_options() -> SpecXlsxExportOptions {
    SpecXlsxExportOptions::default()
}

/// Build default read options.
pub fn derive_default_xlsx_read_options() -> SpecXlsxReadOptions {
    SpecXlsxReadOptions::default()
}
