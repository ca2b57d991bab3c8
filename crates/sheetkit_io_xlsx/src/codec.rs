//! Record codec contract plus the type-erased batches used by multi-type exports.
//!
//! The engine never inspects record fields itself: a record type describes its
//! header and converts itself to/from one row of [`EnumCellValue`]s.

use std::collections::BTreeMap;
use std::fmt;

use crate::conf::N_NCOLS_EXCEL_MAX;
use crate::spec::{DecodeError, EnumCellValue};

////////////////////////////////////////////////////////////////////////////////
// #region RecordCodec

/// Row codec implemented by every exportable/importable record type.
pub trait RecordCodec: Sized {
    /// Header cells written above the data rows. Empty means "no header row".
    fn encode_header() -> Vec<String>;

    /// Encode one record as a row of cells.
    fn encode_row(&self) -> Vec<EnumCellValue>;

    /// Decode one data row.
    fn decode_row(row: &SpecRowCells<'_>) -> Result<Self, DecodeError>;
}

/// Borrowed view over one decoded row with typed accessors.
#[derive(Debug, Clone, Copy)]
pub struct SpecRowCells<'a> {
    cells: &'a [EnumCellValue],
}

static CELL_NONE: EnumCellValue = EnumCellValue::None;

impl<'a> SpecRowCells<'a> {
    /// Wrap a dense row (missing cells are [`EnumCellValue::None`]).
    pub fn new(cells: &'a [EnumCellValue]) -> Self {
        Self { cells }
    }

    /// All cells of the row.
    pub fn cells(&self) -> &'a [EnumCellValue] {
        self.cells
    }

    /// Number of cells up to the last populated column.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// `true` when the row has no cells at all.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// `true` when every cell is blank.
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(EnumCellValue::is_blank)
    }

    /// Cell at `col_idx`; out-of-range columns read as blank.
    pub fn get(&self, col_idx: usize) -> &'a EnumCellValue {
        self.cells.get(col_idx).unwrap_or(&CELL_NONE)
    }

    /// Required text cell. Numbers and booleans are rendered as text.
    pub fn get_string(&self, col_idx: usize) -> Result<String, DecodeError> {
        match self.get(col_idx) {
            EnumCellValue::None => Err(DecodeError::at_column(col_idx, "missing value")),
            value => Ok(value.to_text()),
        }
    }

    /// Optional text cell; blank cells map to `None`.
    pub fn get_opt_string(&self, col_idx: usize) -> Option<String> {
        let value = self.get(col_idx);
        if value.is_blank() {
            None
        } else {
            Some(value.to_text())
        }
    }

    /// Required numeric cell. Numeric text is accepted.
    pub fn get_f64(&self, col_idx: usize) -> Result<f64, DecodeError> {
        match self.get(col_idx) {
            EnumCellValue::Number(n) => Ok(*n),
            EnumCellValue::String(s) => s.trim().parse::<f64>().map_err(|_| {
                DecodeError::at_column(col_idx, format!("expected number, got {s:?}"))
            }),
            EnumCellValue::Bool(b) => Err(DecodeError::at_column(
                col_idx,
                format!("expected number, got boolean {b}"),
            )),
            EnumCellValue::None => Err(DecodeError::at_column(col_idx, "missing value")),
        }
    }

    /// Required integer cell; fractional numbers are rejected.
    pub fn get_i64(&self, col_idx: usize) -> Result<i64, DecodeError> {
        if let EnumCellValue::String(s) = self.get(col_idx)
            && let Ok(n) = s.trim().parse::<i64>()
        {
            return Ok(n);
        }
        let n = self.get_f64(col_idx)?;
        if n.fract() != 0.0 || !n.is_finite() {
            return Err(DecodeError::at_column(
                col_idx,
                format!("expected integer, got {n}"),
            ));
        }
        Ok(n as i64)
    }

    /// Required boolean cell. Accepts `true`/`false` text and `0`/`1` numbers.
    pub fn get_bool(&self, col_idx: usize) -> Result<bool, DecodeError> {
        match self.get(col_idx) {
            EnumCellValue::Bool(b) => Ok(*b),
            EnumCellValue::Number(n) if *n == 0.0 || *n == 1.0 => Ok(*n == 1.0),
            EnumCellValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(DecodeError::at_column(
                    col_idx,
                    format!("expected boolean, got {s:?}"),
                )),
            },
            EnumCellValue::None => Err(DecodeError::at_column(col_idx, "missing value")),
            other => Err(DecodeError::at_column(
                col_idx,
                format!("expected boolean, got {other}"),
            )),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RawRow

/// Positional row used when the caller has no record type.
///
/// Maps zero-based column index to value; blank cells are absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRow(pub BTreeMap<usize, EnumCellValue>);

impl RawRow {
    /// Value at `col_idx`, if populated.
    pub fn get(&self, col_idx: usize) -> Option<&EnumCellValue> {
        self.0.get(&col_idx)
    }

    /// Populated `(column, value)` pairs in column order.
    pub fn cells(&self) -> &BTreeMap<usize, EnumCellValue> {
        &self.0
    }
}

impl FromIterator<(usize, EnumCellValue)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (usize, EnumCellValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl RecordCodec for RawRow {
    fn encode_header() -> Vec<String> {
        Vec::new()
    }

    fn encode_row(&self) -> Vec<EnumCellValue> {
        let Some(n_col_last) = self.0.keys().next_back() else {
            return Vec::new();
        };
        // Keys at or past the worksheet limit yield a row one cell too wide,
        // which the writer rejects.
        let n_len = usize::min(*n_col_last, N_NCOLS_EXCEL_MAX) + 1;
        let mut l_cells = vec![EnumCellValue::None; n_len];
        for (n_col_idx, value) in self.0.range(..n_len) {
            l_cells[*n_col_idx] = value.clone();
        }
        l_cells
    }

    fn decode_row(row: &SpecRowCells<'_>) -> Result<Self, DecodeError> {
        Ok(row
            .cells()
            .iter()
            .enumerate()
            .filter(|(_, value)| !matches!(value, EnumCellValue::None))
            .map(|(n_col_idx, value)| (n_col_idx, value.clone()))
            .collect())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RecordBatch

/// Type-erased sequence of records of one record type.
pub trait RecordBatch {
    /// Header row of the underlying record type.
    fn header(&self) -> Vec<String>;

    /// Number of records.
    fn len(&self) -> usize;

    /// `true` when the batch holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode the record at `idx`.
    fn encode_row(&self, idx: usize) -> Vec<EnumCellValue>;
}

impl<T: RecordCodec> RecordBatch for Vec<T> {
    fn header(&self) -> Vec<String> {
        T::encode_header()
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn encode_row(&self, idx: usize) -> Vec<EnumCellValue> {
        self[idx].encode_row()
    }
}

impl<T: RecordCodec> RecordBatch for &[T] {
    fn header(&self) -> Vec<String> {
        T::encode_header()
    }

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn encode_row(&self, idx: usize) -> Vec<EnumCellValue> {
        self[idx].encode_row()
    }
}

/// One sheet of a heterogeneous export: a name plus its own typed records.
pub struct SpecSheetDescriptor {
    /// Requested sheet name (may be empty).
    pub name: String,
    /// Records of this sheet.
    pub batch: Box<dyn RecordBatch>,
}

impl SpecSheetDescriptor {
    /// Build a descriptor; `None` records become an empty sheet.
    pub fn new<T>(name: impl Into<String>, records: Option<Vec<T>>) -> Self
    where
        T: RecordCodec + 'static,
    {
        Self {
            name: name.into(),
            batch: Box::new(records.unwrap_or_default()),
        }
    }
}

impl fmt::Debug for SpecSheetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecSheetDescriptor")
            .field("name", &self.name)
            .field("header", &self.batch.header())
            .field("len", &self.batch.len())
            .finish()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
