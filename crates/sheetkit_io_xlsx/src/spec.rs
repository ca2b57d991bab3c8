//! Shared XLSX models: cell values, options, reports and the engine error type.

use std::fmt;
use std::num::NonZeroUsize;

////////////////////////////////////////////////////////////////////////////////
// #region CellValue

/// Normalized cell value exchanged with the spreadsheet codecs.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EnumCellValue {
    /// Missing/blank value.
    #[default]
    None,
    /// Text value.
    String(String),
    /// Numeric value (integers and date serials included).
    Number(f64),
    /// Boolean value.
    Bool(bool),
}

impl EnumCellValue {
    /// `true` for missing values and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::None => true,
            Self::String(s) => s.trim().is_empty(),
            Self::Number(_) | Self::Bool(_) => false,
        }
    }

    /// Render the value as header/plain text.
    pub fn to_text(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::String(s) => s.clone(),
            Self::Number(n) => derive_number_text(*n),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl fmt::Display for EnumCellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for EnumCellValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for EnumCellValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for EnumCellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Worksheets store numbers as IEEE doubles: magnitudes above 2^53 are
/// rounded to the nearest representable value. Encode such ids as text.
impl From<i64> for EnumCellValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for EnumCellValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<bool> for EnumCellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<EnumCellValue>> From<Option<T>> for EnumCellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

fn derive_number_text(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WorkbookTypes

/// Requested workbook flavour; decides the artifact extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumExcelType {
    /// Office Open XML workbook (default).
    #[default]
    Xlsx,
    /// Legacy workbook name. The payload is still OOXML.
    Xls,
}

impl EnumExcelType {
    /// File extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xlsx => ".xlsx",
            Self::Xls => ".xls",
        }
    }
}

/// Maximum record count per sheet for homogeneous exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumPageSize {
    /// Everything goes to one sheet.
    #[default]
    Unbounded,
    /// At most this many records per sheet.
    Rows(NonZeroUsize),
}

impl EnumPageSize {
    /// Validate a caller-supplied page size; `None` means unbounded.
    pub fn from_raw(page_size: Option<i64>) -> Result<Self, SheetIoError> {
        let Some(n_page_size) = page_size else {
            return Ok(Self::Unbounded);
        };
        usize::try_from(n_page_size)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self::Rows)
            .ok_or_else(|| {
                SheetIoError::InvalidArgument(format!(
                    "page_size must be > 0, got {n_page_size}."
                ))
            })
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Options

/// Options shared by the export entry points.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecXlsxExportOptions {
    /// Records per sheet; `None` disables pagination.
    pub page_size: Option<i64>,
    /// Workbook flavour; `None` selects [`EnumExcelType::Xlsx`].
    pub excel_type: Option<EnumExcelType>,
}

impl SpecXlsxExportOptions {
    /// Validated page size.
    pub fn resolve_page_size(&self) -> Result<EnumPageSize, SheetIoError> {
        EnumPageSize::from_raw(self.page_size)
    }

    /// Effective workbook flavour.
    pub fn resolve_excel_type(&self) -> EnumExcelType {
        self.excel_type.unwrap_or_default()
    }
}

/// Options for the read entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecXlsxReadOptions {
    /// Leading rows treated as header; the last one is reported to the listener.
    pub header_rows: usize,
}

impl Default for SpecXlsxReadOptions {
    fn default() -> Self {
        Self { header_rows: 1 }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetSpecification

/// One planned/written sheet: a half-open range into the source records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetSlice {
    /// Zero-based sheet ordinal within the workbook.
    pub index: usize,
    /// Sheet name.
    pub sheet_name: String,
    /// Inclusive source record start.
    pub row_start_inclusive: usize,
    /// Exclusive source record end.
    pub row_end_exclusive: usize,
}

impl SpecSheetSlice {
    /// Number of records covered by this slice.
    pub fn len(&self) -> usize {
        self.row_end_exclusive - self.row_start_inclusive
    }

    /// `true` when the slice covers no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sheet entry enumerated from a source workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetInfo {
    /// Zero-based sheet position.
    pub index: usize,
    /// Sheet name as stored in the workbook.
    pub name: String,
}

/// Position of the row currently handed to a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecRowContext<'a> {
    /// Zero-based sheet position.
    pub sheet_index: usize,
    /// Sheet name.
    pub sheet_name: &'a str,
    /// Zero-based row index inside the sheet (header rows included).
    pub row_index: usize,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Per-export report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecXlsxReport {
    /// Sheet slices written, with final sheet names.
    pub sheets: Vec<SpecSheetSlice>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecXlsxReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }

    /// Total number of records written across sheets.
    pub fn cnt_rows_written(&self) -> usize {
        self.sheets.iter().map(SpecSheetSlice::len).sum()
    }
}

/// Per-sheet read counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecSheetReadSummary {
    /// Zero-based sheet position.
    pub index: usize,
    /// Sheet name.
    pub name: String,
    /// Records handed to `on_row`.
    pub cnt_rows_delivered: u64,
    /// Rows that failed to decode and were skipped by the listener.
    pub cnt_rows_failed: u64,
}

/// Per-import report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecXlsxReadReport {
    /// Sheets read, in read order.
    pub sheets: Vec<SpecSheetReadSummary>,
}

impl SpecXlsxReadReport {
    /// Total records delivered across sheets.
    pub fn cnt_rows_delivered(&self) -> u64 {
        self.sheets.iter().map(|s| s.cnt_rows_delivered).sum()
    }

    /// Total rows skipped after decode failures.
    pub fn cnt_rows_failed(&self) -> u64 {
        self.sheets.iter().map(|s| s.cnt_rows_failed).sum()
    }
}

impl fmt::Display for SpecXlsxReadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[XLSX-READ] sheets={} delivered={} failed={}",
            self.sheets.len(),
            self.cnt_rows_delivered(),
            self.cnt_rows_failed()
        )
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// One row could not be converted to/from the declared record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Zero-based row index inside the sheet, filled in by the reader.
    pub row_index: Option<usize>,
    /// Zero-based column index, when known.
    pub col_index: Option<usize>,
    /// Human-readable reason.
    pub message: String,
}

impl DecodeError {
    /// Error for a specific column.
    pub fn at_column(col_index: usize, message: impl Into<String>) -> Self {
        Self {
            row_index: None,
            col_index: Some(col_index),
            message: message.into(),
        }
    }

    /// Error without column information.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            row_index: None,
            col_index: None,
            message: message.into(),
        }
    }

    /// Attach the sheet row index.
    pub fn with_row(mut self, row_index: usize) -> Self {
        self.row_index = Some(row_index);
        self
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n_row) = self.row_index {
            write!(f, "row {n_row}: ")?;
        }
        if let Some(n_col) = self.col_index {
            write!(f, "column {n_col}: ")?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for DecodeError {}

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumErrorKind {
    /// Invalid caller input (page size, sheet index, oversized sheet).
    InvalidArgument,
    /// Sheet write index not strictly increasing.
    OutOfOrderSheet,
    /// Sink/source open, write, read or close failure.
    IoFailure,
    /// Row conversion failure escalated by the listener.
    DecodeFailure,
    /// Listener stopped the read.
    ListenerAbort,
}

/// Engine error.
#[derive(Debug, thiserror::Error)]
pub enum SheetIoError {
    /// Invalid caller input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// `write_sheet` called with a non-increasing index.
    #[error("sheet index {index} written out of order (last written: {last:?})")]
    OutOfOrderSheet {
        /// Rejected index.
        index: usize,
        /// Last accepted index.
        last: Option<usize>,
    },
    /// Filesystem or stream failure.
    #[error("{context}: {source}")]
    Io {
        /// What the engine was doing.
        context: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Response headers could not be set because body bytes were already sent.
    #[error("response already committed; download headers can no longer be set")]
    ResponseCommitted,
    /// Workbook writer failure.
    #[error("xlsx write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    /// Workbook reader failure.
    #[error("workbook read error: {0}")]
    Calamine(#[from] calamine::Error),
    /// Decode failure escalated by the listener.
    #[error("row decode failed: {0}")]
    Decode(#[from] DecodeError),
    /// Listener-requested abort.
    #[error("listener aborted: {0}")]
    Listener(String),
}

impl SheetIoError {
    /// Build an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> EnumErrorKind {
        match self {
            Self::InvalidArgument(_) => EnumErrorKind::InvalidArgument,
            Self::OutOfOrderSheet { .. } => EnumErrorKind::OutOfOrderSheet,
            Self::Io { .. } | Self::ResponseCommitted | Self::Xlsx(_) | Self::Calamine(_) => {
                EnumErrorKind::IoFailure
            }
            Self::Decode(_) => EnumErrorKind::DecodeFailure,
            Self::Listener(_) => EnumErrorKind::ListenerAbort,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_rejects_non_positive() {
        for n_raw in [0, -1, i64::MIN] {
            let err = EnumPageSize::from_raw(Some(n_raw)).expect_err("must reject");
            assert_eq!(err.kind(), EnumErrorKind::InvalidArgument);
        }
        assert_eq!(EnumPageSize::from_raw(None).unwrap(), EnumPageSize::Unbounded);
        assert_eq!(
            EnumPageSize::from_raw(Some(1000)).unwrap(),
            EnumPageSize::Rows(NonZeroUsize::new(1000).unwrap())
        );
    }

    #[test]
    fn test_export_options_default_to_xlsx() {
        let options = SpecXlsxExportOptions::default();
        assert_eq!(options.resolve_excel_type().extension(), ".xlsx");
        let options = SpecXlsxExportOptions {
            excel_type: Some(EnumExcelType::Xls),
            ..Default::default()
        };
        assert_eq!(options.resolve_excel_type().extension(), ".xls");
    }

    #[test]
    fn test_decode_error_message_includes_position() {
        let err = DecodeError::at_column(2, "expected number").with_row(7);
        assert_eq!(err.to_string(), "row 7: column 2: expected number");
        assert_eq!(DecodeError::new("bad").to_string(), "bad");
    }

    #[test]
    fn test_i64_cells_are_exact_up_to_2_pow_53() {
        let n_exact = 1_i64 << 53;
        assert_eq!(EnumCellValue::from(n_exact), EnumCellValue::Number(9_007_199_254_740_992.0));
        assert_eq!(EnumCellValue::from(-n_exact).to_text(), "-9007199254740992");
        // 2^53 + 1 has no double representation and rounds to 2^53.
        assert_eq!(EnumCellValue::from(n_exact + 1), EnumCellValue::from(n_exact));
    }

    #[test]
    fn test_cell_value_text() {
        assert_eq!(EnumCellValue::from(3_i64).to_text(), "3");
        assert_eq!(EnumCellValue::from(2.5).to_text(), "2.5");
        assert_eq!(EnumCellValue::from(None::<String>), EnumCellValue::None);
        assert!(EnumCellValue::from("  ").is_blank());
        assert!(!EnumCellValue::from(false).is_blank());
    }
}
