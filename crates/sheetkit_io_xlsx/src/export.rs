//! Export orchestration over [`XlsxWriteSession`].
//!
//! - homogeneous   : one record type, paginated across sheets by count
//! - heterogeneous : one caller-declared sheet per descriptor, each with its own record type

use tracing::{info, info_span, warn};

use crate::codec::{RawRow, RecordCodec, SpecSheetDescriptor};
use crate::sink::EnumSink;
use crate::spec::{SheetIoError, SpecSheetSlice, SpecXlsxExportOptions, SpecXlsxReport};
use crate::util::{plan_sheet_slices, warn_suffix_ambiguity};
use crate::writer::XlsxWriteSession;

/// Export `records` into one workbook, splitting into sheets of `options.page_size`.
///
/// Sheet 0 is named `sheet_name`, sheet `i > 0` is `sheet_name + i`.
/// Page size is validated before the sink is opened.
pub fn export_homogeneous<T: RecordCodec>(
    records: &[T],
    sink: EnumSink<'_>,
    sheet_name: &str,
    options: &SpecXlsxExportOptions,
) -> Result<SpecXlsxReport, SheetIoError> {
    let page_size = options.resolve_page_size()?;
    let excel_type = options.resolve_excel_type();

    let _span = info_span!(
        "xlsx_export_homogeneous",
        sheet = sheet_name,
        records = records.len()
    )
    .entered();

    let l_slices = plan_sheet_slices(records.len(), page_size, sheet_name);
    let mut session = XlsxWriteSession::open_uniform::<T>(sink, excel_type)?;

    let mut l_sheets_written = Vec::with_capacity(l_slices.len());
    for slice in l_slices {
        let c_sheet_name = session.write_records(
            slice.index,
            &slice.sheet_name,
            &records[slice.row_start_inclusive..slice.row_end_exclusive],
        )?;
        l_sheets_written.push(SpecSheetSlice {
            sheet_name: c_sheet_name,
            ..slice
        });
    }
    session.finalize()?;

    let mut report = session.take_report();
    warn_suffix_ambiguity(&l_sheets_written, &mut report);
    report.sheets = l_sheets_written;
    info!(
        artifact = session.artifact_name(),
        sheets = report.sheets.len(),
        rows = report.cnt_rows_written(),
        "homogeneous export finished"
    );
    Ok(report)
}

/// Export one sheet per descriptor, in order, each with its own header and records.
///
/// Descriptors are never paginated; `options.page_size` is ignored here.
/// An empty descriptor list still yields a workbook with one blank sheet.
pub fn export_heterogeneous(
    descriptors: &[SpecSheetDescriptor],
    sink: EnumSink<'_>,
    options: &SpecXlsxExportOptions,
) -> Result<SpecXlsxReport, SheetIoError> {
    let excel_type = options.resolve_excel_type();

    let _span = info_span!("xlsx_export_heterogeneous", sheets = descriptors.len()).entered();

    let mut session = XlsxWriteSession::open(sink, excel_type, None)?;

    let mut l_sheets_written = Vec::with_capacity(descriptors.len());
    for (n_idx_sheet, descriptor) in descriptors.iter().enumerate() {
        let c_sheet_name =
            session.write_sheet(n_idx_sheet, &descriptor.name, descriptor.batch.as_ref())?;
        l_sheets_written.push(SpecSheetSlice {
            index: n_idx_sheet,
            sheet_name: c_sheet_name,
            row_start_inclusive: 0,
            row_end_exclusive: descriptor.batch.len(),
        });
    }
    if descriptors.is_empty() {
        let c_sheet_name = session.write_records::<RawRow>(0, "", &[])?;
        l_sheets_written.push(SpecSheetSlice {
            index: 0,
            sheet_name: c_sheet_name,
            row_start_inclusive: 0,
            row_end_exclusive: 0,
        });
    }
    session.finalize()?;

    let mut report = session.take_report();
    if options.page_size.is_some() {
        warn!("page_size ignored for per-descriptor exports");
        report.warn("page_size is ignored for per-descriptor exports.");
    }
    report.sheets = l_sheets_written;
    info!(
        artifact = session.artifact_name(),
        sheets = report.sheets.len(),
        rows = report.cnt_rows_written(),
        "heterogeneous export finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{EnumCellValue, EnumErrorKind};

    #[test]
    fn test_invalid_page_size_opens_no_sink() {
        let dir = tempfile::tempdir().unwrap();
        let l_records = vec![RawRow::from_iter([(0, EnumCellValue::from("x"))])];
        let options = SpecXlsxExportOptions {
            page_size: Some(-1),
            ..Default::default()
        };

        let err = export_homogeneous(
            &l_records,
            EnumSink::file(dir.path(), "never"),
            "S",
            &options,
        )
        .expect_err("negative page size");

        assert_eq!(err.kind(), EnumErrorKind::InvalidArgument);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_homogeneous_report_lists_source_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let l_records: Vec<RawRow> = (0..25)
            .map(|i| RawRow::from_iter([(0, EnumCellValue::from(i as i64))]))
            .collect();
        let options = SpecXlsxExportOptions {
            page_size: Some(10),
            ..Default::default()
        };

        let report =
            export_homogeneous(&l_records, EnumSink::file(dir.path(), "paged"), "S", &options)
                .unwrap();

        let l_got: Vec<_> = report
            .sheets
            .iter()
            .map(|s| (s.sheet_name.as_str(), s.row_start_inclusive, s.row_end_exclusive))
            .collect();
        assert_eq!(l_got, vec![("S", 0, 10), ("S1", 10, 20), ("S2", 20, 25)]);
        assert!(report.warnings.is_empty());
        assert!(dir.path().join("paged.xlsx").exists());
    }

    #[test]
    fn test_heterogeneous_empty_descriptor_list_writes_one_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let report = export_heterogeneous(
            &[],
            EnumSink::file(dir.path(), "blank"),
            &SpecXlsxExportOptions::default(),
        )
        .unwrap();
        assert_eq!(report.sheets.len(), 1);
        assert_eq!(report.sheets[0].sheet_name, "Sheet1");
    }
}
