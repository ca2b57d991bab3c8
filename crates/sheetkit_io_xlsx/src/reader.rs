//! XLSX read session: streams the rows of one source workbook into a row listener.
//!
//! XLSX worksheets are walked cell-by-cell and handed over one assembled row at
//! a time; a sheet is never materialized. Legacy BIFF workbooks have no
//! streaming interface and are read through calamine's range API instead.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use calamine::{Data, DataRef, Reader, Sheets, Xls, Xlsx};
use tracing::{debug, info, info_span};

use crate::codec::{RecordCodec, SpecRowCells};
use crate::conf::{V_MAGIC_OLE, V_MAGIC_ZIP};
use crate::spec::{
    DecodeError, EnumCellValue, SheetIoError, SpecRowContext, SpecSheetInfo,
    SpecSheetReadSummary, SpecXlsxReadOptions, SpecXlsxReadReport,
};

////////////////////////////////////////////////////////////////////////////////
// #region Source

/// Seekable byte source (uploaded workbooks, in-memory buffers, files).
pub trait ReadSeek: Read + Seek + Send {}

impl<R: Read + Seek + Send> ReadSeek for R {}

/// Import origin. Exactly one byte source is opened per import call.
pub enum EnumSource {
    /// Workbook on disk.
    FilePath(PathBuf),
    /// Already-open stream, e.g. an uploaded file.
    UploadedStream(Box<dyn ReadSeek>),
}

impl EnumSource {
    /// Source reading the file at `path`.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::FilePath(path.as_ref().to_path_buf())
    }

    /// Source reading from an open stream.
    pub fn stream(reader: impl ReadSeek + 'static) -> Self {
        Self::UploadedStream(Box::new(reader))
    }
}

type SourceReader = BufReader<Box<dyn ReadSeek>>;

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowListener

/// Caller-side consumer of decoded rows.
///
/// A listener carries call-scoped state: hand a fresh instance to every read
/// call and never share one between two reads in flight. Returning `Err` from
/// any callback aborts the read; the source is still closed.
pub trait RowListener<T> {
    /// One decoded data row.
    fn on_row(&mut self, record: T, ctx: &SpecRowContext<'_>) -> Result<(), SheetIoError>;

    /// Last header row of a sheet, as text.
    fn on_header(
        &mut self,
        _header: &[String],
        _ctx: &SpecRowContext<'_>,
    ) -> Result<(), SheetIoError> {
        Ok(())
    }

    /// A row failed to decode. Return `Ok` to skip it, `Err` to abort.
    fn on_decode_error(
        &mut self,
        err: DecodeError,
        _ctx: &SpecRowContext<'_>,
    ) -> Result<(), SheetIoError> {
        Err(err.into())
    }

    /// Every row of `sheet` has been delivered.
    fn on_sheet_end(&mut self, _sheet: &SpecSheetInfo) -> Result<(), SheetIoError> {
        Ok(())
    }
}

/// Listener backed by a closure; see [`listener_fn`].
pub struct FnRowListener<F>(F);

/// Wrap a closure as a [`RowListener`] that aborts on decode failures.
pub fn listener_fn<T, F>(f: F) -> FnRowListener<F>
where
    F: FnMut(T, &SpecRowContext<'_>) -> Result<(), SheetIoError>,
{
    FnRowListener(f)
}

impl<T, F> RowListener<T> for FnRowListener<F>
where
    F: FnMut(T, &SpecRowContext<'_>) -> Result<(), SheetIoError>,
{
    fn on_row(&mut self, record: T, ctx: &SpecRowContext<'_>) -> Result<(), SheetIoError> {
        (self.0)(record, ctx)
    }
}

/// Listener accumulating every record in memory.
#[derive(Debug)]
pub struct CollectRowListener<T> {
    /// Decoded records in read order.
    pub records: Vec<T>,
    /// Header rows seen, one per sheet.
    pub headers: Vec<Vec<String>>,
    /// Decode failures that were skipped.
    pub errors: Vec<DecodeError>,
    if_skip_decode_errors: bool,
}

impl<T> CollectRowListener<T> {
    /// Collector that aborts on the first decode failure.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            headers: Vec::new(),
            errors: Vec::new(),
            if_skip_decode_errors: false,
        }
    }

    /// Collector that records decode failures and keeps going.
    pub fn skipping_decode_errors() -> Self {
        Self {
            if_skip_decode_errors: true,
            ..Self::new()
        }
    }
}

impl<T> Default for CollectRowListener<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RowListener<T> for CollectRowListener<T> {
    fn on_row(&mut self, record: T, _ctx: &SpecRowContext<'_>) -> Result<(), SheetIoError> {
        self.records.push(record);
        Ok(())
    }

    fn on_header(
        &mut self,
        header: &[String],
        _ctx: &SpecRowContext<'_>,
    ) -> Result<(), SheetIoError> {
        self.headers.push(header.to_vec());
        Ok(())
    }

    fn on_decode_error(
        &mut self,
        err: DecodeError,
        _ctx: &SpecRowContext<'_>,
    ) -> Result<(), SheetIoError> {
        if !self.if_skip_decode_errors {
            return Err(err.into());
        }
        self.errors.push(err);
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReadSession

/// Open workbook reader bound to one source and one listener.
///
/// The source is released by [`Self::close`], by any failing read, or when
/// the session is dropped.
pub struct XlsxReadSession<'l, T, L> {
    workbook: Option<Sheets<SourceReader>>,
    l_sheets: Vec<SpecSheetInfo>,
    listener: &'l mut L,
    options: SpecXlsxReadOptions,
    report: SpecXlsxReadReport,
    _marker: PhantomData<fn() -> T>,
}

impl<'l, T, L> XlsxReadSession<'l, T, L>
where
    T: RecordCodec,
    L: RowListener<T>,
{
    /// Open `source`, detect its format and enumerate its sheets.
    ///
    /// Use [`crate::codec::RawRow`] as `T` to receive positional rows instead
    /// of typed records.
    pub fn open(
        source: EnumSource,
        listener: &'l mut L,
        options: SpecXlsxReadOptions,
    ) -> Result<Self, SheetIoError> {
        let reader: Box<dyn ReadSeek> = match source {
            EnumSource::FilePath(path) => {
                let file = File::open(&path).map_err(|err| {
                    SheetIoError::io(format!("Failed to open {}", path.display()), err)
                })?;
                Box::new(file)
            }
            EnumSource::UploadedStream(reader) => reader,
        };
        let workbook = open_sheets(BufReader::new(reader))?;
        let l_sheets: Vec<SpecSheetInfo> = workbook
            .sheet_names()
            .into_iter()
            .enumerate()
            .map(|(index, name)| SpecSheetInfo { index, name })
            .collect();
        debug!(sheets = l_sheets.len(), "opened read session");

        Ok(Self {
            workbook: Some(workbook),
            l_sheets,
            listener,
            options,
            report: SpecXlsxReadReport::default(),
            _marker: PhantomData,
        })
    }

    /// Sheets declared by the source, in workbook order.
    pub fn sheets(&self) -> &[SpecSheetInfo] {
        &self.l_sheets
    }

    /// Stream every row of sheet `idx_sheet` to the listener, in row order.
    ///
    /// Any failure closes the session before it is returned.
    pub fn read_sheet(&mut self, idx_sheet: usize) -> Result<(), SheetIoError> {
        let result = self.read_sheet_inner(idx_sheet);
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Read every declared sheet in ascending order. No sheets is a no-op.
    pub fn read_all_sheets(&mut self) -> Result<(), SheetIoError> {
        if self.l_sheets.is_empty() {
            debug!("source declares no sheets; nothing to read");
            return Ok(());
        }
        for idx_sheet in 0..self.l_sheets.len() {
            self.read_sheet(idx_sheet)?;
        }
        Ok(())
    }

    fn read_sheet_inner(&mut self, idx_sheet: usize) -> Result<(), SheetIoError> {
        let Some(workbook) = self.workbook.as_mut() else {
            return Err(SheetIoError::InvalidArgument(
                "Cannot read after close().".to_string(),
            ));
        };
        let info = self.l_sheets.get(idx_sheet).cloned().ok_or_else(|| {
            SheetIoError::InvalidArgument(format!(
                "sheet index {idx_sheet} out of range ({} sheets).",
                self.l_sheets.len()
            ))
        })?;

        let mut dispatcher = RowDispatcher::<T, L> {
            listener: &mut *self.listener,
            info: &info,
            n_header_rows: self.options.header_rows,
            summary: SpecSheetReadSummary {
                index: info.index,
                name: info.name.clone(),
                ..Default::default()
            },
            _marker: PhantomData,
        };

        match workbook {
            Sheets::Xlsx(xlsx) => stream_xlsx_rows(xlsx, &info.name, |n_row, l_cells| {
                dispatcher.dispatch(n_row, l_cells)
            })?,
            other => {
                let range = other.worksheet_range(&info.name)?;
                let (n_row_start, n_col_start) = range.start().unwrap_or((0, 0));
                for (n_row_offset, row) in range.rows().enumerate() {
                    let l_cells: Vec<EnumCellValue> = std::iter::repeat_n(
                        EnumCellValue::None,
                        n_col_start as usize,
                    )
                    .chain(row.iter().map(convert_data))
                    .collect();
                    dispatcher.dispatch(n_row_start as usize + n_row_offset, &l_cells)?;
                }
            }
        }

        let summary = dispatcher.summary;
        self.listener.on_sheet_end(&info)?;
        debug!(
            sheet = %info.name,
            delivered = summary.cnt_rows_delivered,
            failed = summary.cnt_rows_failed,
            "sheet read"
        );
        self.report.sheets.push(summary);
        Ok(())
    }
}

impl<T, L> XlsxReadSession<'_, T, L> {
    /// Release the source. Idempotent.
    pub fn close(&mut self) {
        if self.workbook.take().is_some() {
            debug!("read session closed");
        }
    }

    /// `true` until [`Self::close`] ran.
    pub fn is_open(&self) -> bool {
        self.workbook.is_some()
    }

    /// Counters for the sheets read so far.
    pub fn report(&self) -> &SpecXlsxReadReport {
        &self.report
    }

    /// Take the accumulated report, leaving an empty one behind.
    pub fn take_report(&mut self) -> SpecXlsxReadReport {
        std::mem::take(&mut self.report)
    }
}

impl<T, L> Drop for XlsxReadSession<'_, T, L> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Per-sheet row handling: header detection, blank skipping, decoding.
struct RowDispatcher<'a, T, L> {
    listener: &'a mut L,
    info: &'a SpecSheetInfo,
    n_header_rows: usize,
    summary: SpecSheetReadSummary,
    _marker: PhantomData<fn() -> T>,
}

impl<T, L> RowDispatcher<'_, T, L>
where
    T: RecordCodec,
    L: RowListener<T>,
{
    fn dispatch(&mut self, row_index: usize, l_cells: &[EnumCellValue]) -> Result<(), SheetIoError> {
        let ctx = SpecRowContext {
            sheet_index: self.info.index,
            sheet_name: &self.info.name,
            row_index,
        };

        if row_index < self.n_header_rows {
            if row_index + 1 == self.n_header_rows {
                let l_header: Vec<String> = l_cells.iter().map(EnumCellValue::to_text).collect();
                self.listener.on_header(&l_header, &ctx)?;
            }
            return Ok(());
        }

        // Only rows without any stored cell are skipped; whitespace text is data.
        if l_cells.iter().all(|value| matches!(value, EnumCellValue::None)) {
            return Ok(());
        }
        let row = SpecRowCells::new(l_cells);
        match T::decode_row(&row) {
            Ok(record) => {
                self.listener.on_row(record, &ctx)?;
                self.summary.cnt_rows_delivered += 1;
            }
            Err(err) => {
                self.listener.on_decode_error(err.with_row(row_index), &ctx)?;
                self.summary.cnt_rows_failed += 1;
            }
        }
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region EntryPoints

/// Read only the first sheet of `source`.
pub fn read_first_sheet<T, L>(
    source: EnumSource,
    listener: &mut L,
    options: SpecXlsxReadOptions,
) -> Result<SpecXlsxReadReport, SheetIoError>
where
    T: RecordCodec,
    L: RowListener<T>,
{
    let _span = info_span!("xlsx_read_first_sheet").entered();
    let mut session = XlsxReadSession::<T, L>::open(source, listener, options)?;
    if !session.sheets().is_empty() {
        session.read_sheet(0)?;
    }
    finish_read(session)
}

/// Read sheet `idx_sheet` of `source`.
pub fn read_sheet_at<T, L>(
    source: EnumSource,
    idx_sheet: usize,
    listener: &mut L,
    options: SpecXlsxReadOptions,
) -> Result<SpecXlsxReadReport, SheetIoError>
where
    T: RecordCodec,
    L: RowListener<T>,
{
    let _span = info_span!("xlsx_read_sheet", index = idx_sheet).entered();
    let mut session = XlsxReadSession::<T, L>::open(source, listener, options)?;
    session.read_sheet(idx_sheet)?;
    finish_read(session)
}

/// Read every sheet of `source` in workbook order.
pub fn read_all_sheets<T, L>(
    source: EnumSource,
    listener: &mut L,
    options: SpecXlsxReadOptions,
) -> Result<SpecXlsxReadReport, SheetIoError>
where
    T: RecordCodec,
    L: RowListener<T>,
{
    let _span = info_span!("xlsx_read_all_sheets").entered();
    let mut session = XlsxReadSession::<T, L>::open(source, listener, options)?;
    session.read_all_sheets()?;
    finish_read(session)
}

fn finish_read<T, L>(
    mut session: XlsxReadSession<'_, T, L>,
) -> Result<SpecXlsxReadReport, SheetIoError> {
    session.close();
    let report = session.take_report();
    info!("{report}");
    Ok(report)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CodecGlue

/// Detect the workbook container from its leading bytes and open it.
fn open_sheets(mut reader: SourceReader) -> Result<Sheets<SourceReader>, SheetIoError> {
    let mut v_magic = Vec::with_capacity(V_MAGIC_OLE.len());
    (&mut reader)
        .take(V_MAGIC_OLE.len() as u64)
        .read_to_end(&mut v_magic)
        .and_then(|_| reader.seek(SeekFrom::Start(0)))
        .map_err(|err| SheetIoError::io("Failed to read workbook signature", err))?;

    if v_magic.starts_with(&V_MAGIC_OLE) {
        let xls = Xls::new(reader).map_err(calamine::Error::from)?;
        return Ok(Sheets::Xls(xls));
    }
    if v_magic.starts_with(&V_MAGIC_ZIP) {
        let xlsx = Xlsx::new(reader).map_err(calamine::Error::from)?;
        return Ok(Sheets::Xlsx(xlsx));
    }
    Err(SheetIoError::io(
        "Unrecognized workbook format",
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "source is neither an OOXML (zip) nor a legacy OLE2 workbook",
        ),
    ))
}

/// Walk an XLSX worksheet cell-by-cell, emitting one dense row at a time.
fn stream_xlsx_rows<F>(
    xlsx: &mut Xlsx<SourceReader>,
    sheet_name: &str,
    mut on_row: F,
) -> Result<(), SheetIoError>
where
    F: FnMut(usize, &[EnumCellValue]) -> Result<(), SheetIoError>,
{
    let mut cells_reader = xlsx
        .worksheet_cells_reader(sheet_name)
        .map_err(calamine::Error::from)?;

    let mut n_row_current: Option<u32> = None;
    let mut l_row: Vec<EnumCellValue> = Vec::new();
    while let Some(cell) = cells_reader.next_cell().map_err(calamine::Error::from)? {
        let (n_row, n_col) = cell.get_position();
        if n_row_current != Some(n_row) {
            if let Some(n_row_done) = n_row_current {
                on_row(n_row_done as usize, &l_row)?;
            }
            l_row.clear();
            n_row_current = Some(n_row);
        }

        let value = convert_data_ref(cell.get_value());
        if matches!(value, EnumCellValue::None) {
            continue;
        }
        let n_col = n_col as usize;
        if l_row.len() <= n_col {
            l_row.resize(n_col + 1, EnumCellValue::None);
        }
        l_row[n_col] = value;
    }
    if let Some(n_row_done) = n_row_current {
        on_row(n_row_done as usize, &l_row)?;
    }
    Ok(())
}

#[allow(unreachable_patterns)]
fn convert_data_ref(value: &DataRef<'_>) -> EnumCellValue {
    match value {
        DataRef::Int(n) => EnumCellValue::Number(*n as f64),
        DataRef::Float(n) => EnumCellValue::Number(*n),
        DataRef::String(s) => EnumCellValue::String(s.clone()),
        DataRef::SharedString(s) => EnumCellValue::String((*s).to_string()),
        DataRef::Bool(b) => EnumCellValue::Bool(*b),
        DataRef::DateTime(dt) => EnumCellValue::Number(dt.as_f64()),
        DataRef::DateTimeIso(s) | DataRef::DurationIso(s) => EnumCellValue::String(s.clone()),
        DataRef::Error(err) => EnumCellValue::String(err.to_string()),
        DataRef::Empty => EnumCellValue::None,
        _ => EnumCellValue::None,
    }
}

#[allow(unreachable_patterns)]
fn convert_data(value: &Data) -> EnumCellValue {
    match value {
        Data::Int(n) => EnumCellValue::Number(*n as f64),
        Data::Float(n) => EnumCellValue::Number(*n),
        Data::String(s) => EnumCellValue::String(s.clone()),
        Data::Bool(b) => EnumCellValue::Bool(*b),
        Data::DateTime(dt) => EnumCellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => EnumCellValue::String(s.clone()),
        Data::Error(err) => EnumCellValue::String(err.to_string()),
        Data::Empty => EnumCellValue::None,
        _ => EnumCellValue::None,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
