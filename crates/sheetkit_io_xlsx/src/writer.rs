//! XLSX write session: one workbook bound to one sink, flushed exactly once.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Workbook, Worksheet};
use tracing::{debug, warn};

use crate::codec::{RecordBatch, RecordCodec};
use crate::conf::{N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX};
use crate::sink::{EnumSink, ResponseSink, prepare_download_headers};
use crate::spec::{EnumCellValue, EnumExcelType, SheetIoError, SpecXlsxReport};
use crate::util::{cast_col_num, cast_row_num, derive_fallback_sheet_name, sanitize_sheet_name};

/// Open byte destination owned by a session.
enum EnumSinkHandle<'a> {
    File { path: PathBuf, file: File },
    Response { response: &'a mut dyn ResponseSink },
}

/// Stateful workbook writer bound to exactly one sink.
///
/// The workbook is buffered in memory and serialized by [`Self::finalize`].
/// Dropping an unfinalized session releases the sink without emitting a
/// workbook (a file sink's placeholder file is removed).
pub struct XlsxWriteSession<'a> {
    workbook: Workbook,
    sink: Option<EnumSinkHandle<'a>>,
    c_artifact_name: String,
    header_uniform: Option<Vec<String>>,
    set_sheet_names_existing: BTreeSet<String>,
    idx_sheet_last: Option<usize>,
    report: SpecXlsxReport,
    if_closed: bool,
}

impl<'a> XlsxWriteSession<'a> {
    /// Open the sink.
    ///
    /// With `header_uniform` set every sheet shares that header; with `None`
    /// each [`Self::write_sheet`] call uses its batch's own header.
    /// Response sinks receive their download headers here, before any byte.
    pub fn open(
        sink: EnumSink<'a>,
        excel_type: EnumExcelType,
        header_uniform: Option<Vec<String>>,
    ) -> Result<Self, SheetIoError> {
        let c_artifact_name = sink.artifact_name(excel_type);
        let handle = match sink {
            EnumSink::FilePath { dir, .. } => {
                let path = dir.join(&c_artifact_name);
                let file = File::create(&path).map_err(|err| {
                    SheetIoError::io(format!("Failed to create {}", path.display()), err)
                })?;
                EnumSinkHandle::File { path, file }
            }
            EnumSink::ResponseStream { response, .. } => {
                prepare_download_headers(response, &c_artifact_name)?;
                EnumSinkHandle::Response { response }
            }
        };
        debug!(artifact = %c_artifact_name, uniform = header_uniform.is_some(), "opened write session");

        Ok(Self {
            workbook: Workbook::new(),
            sink: Some(handle),
            c_artifact_name,
            header_uniform,
            set_sheet_names_existing: BTreeSet::new(),
            idx_sheet_last: None,
            report: SpecXlsxReport::default(),
            if_closed: false,
        })
    }

    /// Open in uniform-header mode using the header of `T`.
    pub fn open_uniform<T: RecordCodec>(
        sink: EnumSink<'a>,
        excel_type: EnumExcelType,
    ) -> Result<Self, SheetIoError> {
        Self::open(sink, excel_type, Some(T::encode_header()))
    }

    /// Artifact name (file name or download name) including extension.
    pub fn artifact_name(&self) -> &str {
        &self.c_artifact_name
    }

    /// Warnings and sheets recorded so far.
    pub fn report(&self) -> &SpecXlsxReport {
        &self.report
    }

    /// Take the accumulated report, leaving an empty one behind.
    pub fn take_report(&mut self) -> SpecXlsxReport {
        std::mem::take(&mut self.report)
    }

    /// Write one sheet and return its final (sanitized, unique) name.
    ///
    /// `idx_sheet` must be strictly greater than the previous call's index;
    /// violations are rejected with [`SheetIoError::OutOfOrderSheet`].
    /// An empty batch yields a sheet holding only the header row.
    pub fn write_sheet(
        &mut self,
        idx_sheet: usize,
        sheet_name: &str,
        batch: &dyn RecordBatch,
    ) -> Result<String, SheetIoError> {
        if self.if_closed {
            return Err(SheetIoError::InvalidArgument(
                "Cannot write after finalize().".to_string(),
            ));
        }
        if let Some(idx_last) = self.idx_sheet_last
            && idx_sheet <= idx_last
        {
            return Err(SheetIoError::OutOfOrderSheet {
                index: idx_sheet,
                last: Some(idx_last),
            });
        }

        let l_header = match &self.header_uniform {
            Some(l_header) => l_header.clone(),
            None => batch.header(),
        };
        let n_rows_header = usize::from(!l_header.is_empty());
        let n_rows_data = batch.len();
        if n_rows_data + n_rows_header > N_NROWS_EXCEL_MAX {
            return Err(SheetIoError::InvalidArgument(format!(
                "Sheet {sheet_name:?} needs {} rows, Excel allows {N_NROWS_EXCEL_MAX}; \
                 supply a page size.",
                n_rows_data + n_rows_header
            )));
        }
        if l_header.len() > N_NCOLS_EXCEL_MAX {
            return Err(SheetIoError::InvalidArgument(format!(
                "Header has {} columns, Excel allows {N_NCOLS_EXCEL_MAX}.",
                l_header.len()
            )));
        }

        // Detached until every row is written: a failed call adds no sheet and reserves no name.
        let (c_sheet_name, l_rename_warnings) = self.derive_unique_sheet_name(sheet_name);
        let mut worksheet = Worksheet::new();
        worksheet.set_name(&c_sheet_name)?;

        if n_rows_header > 0 {
            for (n_idx_col, c_title) in l_header.iter().enumerate() {
                worksheet.write_string(0, cast_col_num(n_idx_col)?, c_title)?;
            }
        }
        for n_idx_record in 0..n_rows_data {
            let l_cells = batch.encode_row(n_idx_record);
            write_row(&mut worksheet, n_idx_record + n_rows_header, &l_cells)?;
        }

        self.workbook.push_worksheet(worksheet);
        self.set_sheet_names_existing.insert(c_sheet_name.to_lowercase());
        for msg in l_rename_warnings {
            self.warn(msg);
        }
        self.idx_sheet_last = Some(idx_sheet);
        debug!(
            sheet = %c_sheet_name,
            index = idx_sheet,
            rows = n_rows_data,
            "sheet written"
        );
        Ok(c_sheet_name)
    }

    /// Write one sheet from typed records.
    pub fn write_records<T: RecordCodec>(
        &mut self,
        idx_sheet: usize,
        sheet_name: &str,
        records: &[T],
    ) -> Result<String, SheetIoError> {
        self.write_sheet(idx_sheet, sheet_name, &records)
    }

    /// Serialize the workbook into the sink and release it. Idempotent.
    pub fn finalize(&mut self) -> Result<(), SheetIoError> {
        if self.if_closed {
            return Ok(());
        }
        self.if_closed = true;
        let Some(handle) = self.sink.take() else {
            return Ok(());
        };

        match handle {
            EnumSinkHandle::File { path, mut file } => {
                let result = self
                    .workbook
                    .save_to_writer(&mut file)
                    .map_err(SheetIoError::from)
                    .and_then(|()| {
                        file.sync_all().map_err(|err| {
                            SheetIoError::io(format!("Failed to flush {}", path.display()), err)
                        })
                    });
                if result.is_err() {
                    drop(file);
                    discard_partial_file(&path);
                }
                result?;
            }
            EnumSinkHandle::Response { response } => {
                let v_bytes = self.workbook.save_to_buffer()?;
                response
                    .write_all(&v_bytes)
                    .and_then(|()| response.flush())
                    .map_err(|err| SheetIoError::io("Failed to stream workbook", err))?;
            }
        }

        debug!(artifact = %self.c_artifact_name, "write session finalized");
        Ok(())
    }

    /// Sanitized, case-insensitively unique name plus the rename warnings to report.
    fn derive_unique_sheet_name(&self, name: &str) -> (String, Vec<String>) {
        let mut l_warnings = Vec::new();
        let n_position = self.set_sheet_names_existing.len();
        let c_name = match sanitize_sheet_name(name, "_") {
            Some(c_name) => {
                if c_name != name {
                    l_warnings.push(format!("Sheet name {name:?} sanitized to {c_name:?}."));
                }
                c_name
            }
            None => {
                let c_fallback = derive_fallback_sheet_name(n_position);
                l_warnings.push(format!("Blank sheet name replaced with {c_fallback:?}."));
                c_fallback
            }
        };

        // Excel compares sheet names case-insensitively.
        if !self.set_sheet_names_existing.contains(&c_name.to_lowercase()) {
            return (c_name, l_warnings);
        }

        let mut n_idx = 2usize;
        loop {
            let c_suffix = format!("__{n_idx}");
            let n_len_base_max = N_LEN_EXCEL_SHEET_NAME_MAX.saturating_sub(c_suffix.len());
            let c_base: String = c_name.chars().take(n_len_base_max).collect();
            let candidate = format!("{c_base}{c_suffix}");
            if !self.set_sheet_names_existing.contains(&candidate.to_lowercase()) {
                l_warnings.push(format!(
                    "Duplicate sheet name {c_name:?} renamed to {candidate:?}."
                ));
                return (candidate, l_warnings);
            }
            n_idx += 1;
        }
    }

    fn warn(&mut self, msg: String) {
        warn!(artifact = %self.c_artifact_name, "{msg}");
        self.report.warn(msg);
    }
}

impl Drop for XlsxWriteSession<'_> {
    fn drop(&mut self) {
        if self.if_closed {
            return;
        }
        warn!(artifact = %self.c_artifact_name, "write session dropped before finalize; workbook discarded");
        if let Some(EnumSinkHandle::File { path, file }) = self.sink.take() {
            drop(file);
            discard_partial_file(&path);
        }
    }
}

fn discard_partial_file(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %err, "failed to remove partial workbook");
    }
}

fn write_row(
    worksheet: &mut Worksheet,
    row_idx: usize,
    l_cells: &[EnumCellValue],
) -> Result<(), SheetIoError> {
    if l_cells.len() > N_NCOLS_EXCEL_MAX {
        return Err(SheetIoError::InvalidArgument(format!(
            "Row {row_idx} has {} cells, Excel allows {N_NCOLS_EXCEL_MAX}.",
            l_cells.len()
        )));
    }
    let n_row = cast_row_num(row_idx)?;
    for (n_idx_col, value) in l_cells.iter().enumerate() {
        let n_col = cast_col_num(n_idx_col)?;
        match value {
            EnumCellValue::None => {}
            EnumCellValue::String(val) => {
                worksheet.write_string(n_row, n_col, val)?;
            }
            EnumCellValue::Number(val) if val.is_finite() => {
                worksheet.write_number(n_row, n_col, *val)?;
            }
            EnumCellValue::Number(val) => {
                worksheet.write_string(n_row, n_col, convert_nan_inf_to_str(*val))?;
            }
            EnumCellValue::Bool(val) => {
                worksheet.write_boolean(n_row, n_col, *val)?;
            }
        }
    }
    Ok(())
}

/// Text stand-in for values a worksheet cannot store as numbers.
fn convert_nan_inf_to_str(x: f64) -> &'static str {
    if x.is_nan() {
        "NaN"
    } else if x.is_sign_positive() {
        "Inf"
    } else {
        "-Inf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawRow;
    use crate::sink::BufferedResponse;

    fn raw_rows(n: usize) -> Vec<RawRow> {
        (0..n)
            .map(|i| RawRow::from_iter([(0, EnumCellValue::from(i as i64))]))
            .collect()
    }

    #[test]
    fn test_write_sheet_rejects_out_of_order_index() {
        let mut response = BufferedResponse::buffered();
        let mut session = XlsxWriteSession::open(
            EnumSink::response(&mut response, "out"),
            EnumExcelType::Xlsx,
            None,
        )
        .unwrap();

        session.write_records(1, "a", &raw_rows(1)).unwrap();
        let err = session
            .write_records(1, "b", &raw_rows(1))
            .expect_err("same index");
        assert!(matches!(
            err,
            SheetIoError::OutOfOrderSheet {
                index: 1,
                last: Some(1)
            }
        ));
        let err = session
            .write_records(0, "c", &raw_rows(1))
            .expect_err("lower index");
        assert_eq!(err.kind(), crate::spec::EnumErrorKind::OutOfOrderSheet);
        session.write_records(5, "d", &raw_rows(1)).unwrap();
        session.finalize().unwrap();
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut response = BufferedResponse::buffered();
        {
            let mut session = XlsxWriteSession::open(
                EnumSink::response(&mut response, "twice"),
                EnumExcelType::Xlsx,
                None,
            )
            .unwrap();
            session.write_records(0, "only", &raw_rows(3)).unwrap();
            session.finalize().unwrap();
            session.finalize().unwrap();
        }
        let v_body = response.body();
        assert!(v_body.starts_with(b"PK"));
        // One zip end-of-central-directory record: the workbook was streamed once.
        let n_eocd = v_body.windows(4).filter(|w| *w == b"PK\x05\x06").count();
        assert_eq!(n_eocd, 1);

        let err = {
            let mut response_again = BufferedResponse::buffered();
            let mut session = XlsxWriteSession::open(
                EnumSink::response(&mut response_again, "closed"),
                EnumExcelType::Xlsx,
                None,
            )
            .unwrap();
            session.finalize().unwrap();
            session.write_records(0, "late", &raw_rows(1)).expect_err("closed")
        };
        assert_eq!(err.kind(), crate::spec::EnumErrorKind::InvalidArgument);
    }

    #[test]
    fn test_second_finalize_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.xlsx");
        let mut session = XlsxWriteSession::open(
            EnumSink::file(dir.path(), "twice"),
            EnumExcelType::Xlsx,
            None,
        )
        .unwrap();
        session.write_records(0, "only", &raw_rows(3)).unwrap();

        session.finalize().unwrap();
        let v_once = fs::read(&path).unwrap();
        session.finalize().unwrap();
        drop(session);
        let v_twice = fs::read(&path).unwrap();

        assert!(v_once.starts_with(b"PK"));
        assert_eq!(v_once, v_twice);
    }

    #[test]
    fn test_many_duplicates_of_long_name_stay_unique() {
        let mut response = BufferedResponse::buffered();
        let mut session = XlsxWriteSession::open(
            EnumSink::response(&mut response, "long"),
            EnumExcelType::Xlsx,
            None,
        )
        .unwrap();
        let c_long = "x".repeat(30);

        let mut set_names = BTreeSet::new();
        for n_idx in 0..12 {
            let c_name = session.write_records(n_idx, &c_long, &raw_rows(0)).unwrap();
            assert!(c_name.chars().count() <= N_LEN_EXCEL_SHEET_NAME_MAX);
            assert!(set_names.insert(c_name));
        }
        assert!(set_names.contains(&format!("{}__10", "x".repeat(27))));
        assert!(set_names.contains(&format!("{}__12", "x".repeat(27))));
        assert_eq!(session.report().warnings.len(), 11);
        session.finalize().unwrap();
    }

    #[test]
    fn test_failed_write_leaves_no_partial_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = XlsxWriteSession::open(
            EnumSink::file(dir.path(), "partial"),
            EnumExcelType::Xlsx,
            None,
        )
        .unwrap();
        let l_too_wide = vec![
            RawRow::from_iter([(0, EnumCellValue::from("ok"))]),
            RawRow::from_iter([(20_000, EnumCellValue::from("wide"))]),
        ];
        let l_far = vec![RawRow::from_iter([(usize::MAX, EnumCellValue::from("far"))])];

        for l_rows in [&l_too_wide, &l_far] {
            let err = session
                .write_records(0, "bad", l_rows)
                .expect_err("row wider than a worksheet");
            assert_eq!(err.kind(), crate::spec::EnumErrorKind::InvalidArgument);
        }
        assert!(session.report().warnings.is_empty());

        assert_eq!(session.write_records(0, "bad", &raw_rows(1)).unwrap(), "bad");
        assert_eq!(session.write_records(1, "good", &raw_rows(2)).unwrap(), "good");
        session.finalize().unwrap();

        let workbook: calamine::Xlsx<_> =
            calamine::open_workbook(dir.path().join("partial.xlsx")).unwrap();
        assert_eq!(
            calamine::Reader::sheet_names(&workbook),
            vec!["bad".to_string(), "good".to_string()]
        );
    }

    #[test]
    fn test_unique_sheet_names_are_case_insensitive() {
        let mut response = BufferedResponse::buffered();
        let mut session = XlsxWriteSession::open(
            EnumSink::response(&mut response, "dupes"),
            EnumExcelType::Xlsx,
            None,
        )
        .unwrap();
        assert_eq!(session.write_records(0, "Data", &raw_rows(0)).unwrap(), "Data");
        assert_eq!(
            session.write_records(1, "data", &raw_rows(0)).unwrap(),
            "data__2"
        );
        assert_eq!(session.write_records(2, "", &raw_rows(0)).unwrap(), "Sheet3");
        assert_eq!(
            session.write_records(3, "a[b]", &raw_rows(0)).unwrap(),
            "a_b_"
        );
        assert_eq!(session.report().warnings.len(), 3);
        session.finalize().unwrap();
    }

    #[test]
    fn test_dropped_session_removes_placeholder_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abandoned.xlsx");
        {
            let mut session = XlsxWriteSession::open(
                EnumSink::file(dir.path(), "abandoned"),
                EnumExcelType::Xlsx,
                None,
            )
            .unwrap();
            session.write_records(0, "s", &raw_rows(2)).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = XlsxWriteSession::open(
            EnumSink::file(dir.path().join("missing"), "x"),
            EnumExcelType::Xlsx,
            None,
        )
        .err()
        .expect("missing dir");
        assert_eq!(err.kind(), crate::spec::EnumErrorKind::IoFailure);
    }

    #[test]
    fn test_non_finite_numbers_become_text() {
        assert_eq!(convert_nan_inf_to_str(f64::NAN), "NaN");
        assert_eq!(convert_nan_inf_to_str(f64::INFINITY), "Inf");
        assert_eq!(convert_nan_inf_to_str(f64::NEG_INFINITY), "-Inf");
    }
}
