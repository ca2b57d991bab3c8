//! Stateless helper utilities used by the XLSX export/import kernels.

use crate::conf::{
    C_SHEET_NAME_FALLBACK, N_LEN_EXCEL_SHEET_NAME_MAX, N_SHEETS_SUFFIX_AMBIGUOUS,
    TUP_EXCEL_ILLEGAL,
};
use crate::spec::{EnumPageSize, SheetIoError, SpecSheetSlice, SpecXlsxReport};

////////////////////////////////////////////////////////////////////////////////
// #region SheetPlanning

/// Split `n_records_total` records into ordered sheet slices of at most `page_size`.
///
/// Sheet 0 keeps `sheet_name` unchanged; sheet `i > 0` is named
/// `sheet_name + i`. Zero records still produce one empty slice.
pub fn plan_sheet_slices(
    n_records_total: usize,
    page_size: EnumPageSize,
    sheet_name: &str,
) -> Vec<SpecSheetSlice> {
    let n_rows_per_sheet = match page_size {
        EnumPageSize::Rows(n) if n.get() <= n_records_total => n.get(),
        _ => {
            return vec![SpecSheetSlice {
                index: 0,
                sheet_name: sheet_name.to_string(),
                row_start_inclusive: 0,
                row_end_exclusive: n_records_total,
            }];
        }
    };

    let n_sheets = n_records_total.div_ceil(n_rows_per_sheet);
    (0..n_sheets)
        .map(|n_idx_sheet| SpecSheetSlice {
            index: n_idx_sheet,
            sheet_name: create_sheet_identifier(sheet_name, n_idx_sheet),
            row_start_inclusive: n_idx_sheet * n_rows_per_sheet,
            row_end_exclusive: usize::min((n_idx_sheet + 1) * n_rows_per_sheet, n_records_total),
        })
        .collect()
}

/// Warn about `name1` + `0` vs `name10` ambiguity once pagination passes ten sheets.
pub fn warn_suffix_ambiguity(l_slices: &[SpecSheetSlice], report: &mut SpecXlsxReport) {
    if l_slices.len() > N_SHEETS_SUFFIX_AMBIGUOUS {
        report.warn(format!(
            "Pagination produced {} sheets; numeric suffixes from 10 on may collide with \
             literal sheet names (e.g. `name1`+`0` vs `name10`).",
            l_slices.len()
        ));
    }
}

/// Create positional sheet name (`base`, `base1`, `base2`, ...), respecting length cap.
pub fn create_sheet_identifier(base_name: &str, idx_sheet: usize) -> String {
    if idx_sheet == 0 {
        return base_name.to_string();
    }
    let c_sheet_name_suffix = idx_sheet.to_string();
    let n_len_base_name_max = N_LEN_EXCEL_SHEET_NAME_MAX.saturating_sub(c_sheet_name_suffix.len());

    let c_sheet_name_base: String = base_name.chars().take(n_len_base_name_max).collect();

    format!("{c_sheet_name_base}{c_sheet_name_suffix}")
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to a valid Excel sheet name.
///
/// Returns `None` when nothing usable is left, so callers can pick a positional fallback.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> Option<String> {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    // Excel rejects names wrapped in apostrophes.
    let c_name = c_name.trim().trim_matches('\'').trim();
    if c_name.is_empty() {
        return None;
    }

    Some(c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect())
}

/// Positional fallback name for blank sheet names (`Sheet1` for index 0).
pub fn derive_fallback_sheet_name(idx_sheet: usize) -> String {
    format!("{C_SHEET_NAME_FALLBACK}{}", idx_sheet + 1)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DownloadHeaders

/// `Content-Disposition` value for a workbook download.
pub fn derive_content_disposition(file_name: &str) -> String {
    format!(
        "attachment; filename=\"{}\"",
        urlencoding::encode(file_name)
    )
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Casts

pub(crate) fn cast_row_num(value: usize) -> Result<u32, SheetIoError> {
    u32::try_from(value)
        .map_err(|_| SheetIoError::InvalidArgument(format!("row index overflow: {value}")))
}

pub(crate) fn cast_col_num(value: usize) -> Result<u16, SheetIoError> {
    u16::try_from(value)
        .map_err(|_| SheetIoError::InvalidArgument(format!("column index overflow: {value}")))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn rows(n: usize) -> EnumPageSize {
        EnumPageSize::Rows(NonZeroUsize::new(n).unwrap())
    }

    #[test]
    fn test_plan_sheet_slices_concrete_pagination() {
        let l_slices = plan_sheet_slices(2500, rows(1000), "S");
        let l_got: Vec<_> = l_slices
            .iter()
            .map(|s| {
                (
                    s.index,
                    s.row_start_inclusive,
                    s.row_end_exclusive,
                    s.sheet_name.as_str(),
                )
            })
            .collect();
        assert_eq!(
            l_got,
            vec![(0, 0, 1000, "S"), (1, 1000, 2000, "S1"), (2, 2000, 2500, "S2")]
        );
    }

    #[test]
    fn test_plan_sheet_slices_cover_input_exactly() {
        for n_total in [0usize, 1, 7, 99, 100, 101, 300, 1234] {
            for n_page in [1usize, 3, 100, 5000] {
                let l_slices = plan_sheet_slices(n_total, rows(n_page), "base");

                assert_eq!(l_slices.len(), usize::max(1, n_total.div_ceil(n_page)));
                assert_eq!(l_slices[0].row_start_inclusive, 0);
                assert_eq!(l_slices.last().unwrap().row_end_exclusive, n_total);
                for pair in l_slices.windows(2) {
                    assert_eq!(pair[0].row_end_exclusive, pair[1].row_start_inclusive);
                    assert_eq!(pair[0].index + 1, pair[1].index);
                }
                for slice in &l_slices {
                    assert!(slice.len() <= n_page);
                    let c_expected = if slice.index == 0 {
                        "base".to_string()
                    } else {
                        format!("base{}", slice.index)
                    };
                    assert_eq!(slice.sheet_name, c_expected);
                }
            }
        }
    }

    #[test]
    fn test_plan_sheet_slices_single_sheet_cases() {
        let l_unbounded = plan_sheet_slices(5000, EnumPageSize::Unbounded, "S");
        assert_eq!(l_unbounded.len(), 1);
        assert_eq!(l_unbounded[0].row_end_exclusive, 5000);

        let l_smaller = plan_sheet_slices(999, rows(1000), "S");
        assert_eq!(l_smaller.len(), 1);
        assert_eq!(l_smaller[0].sheet_name, "S");

        let l_exact = plan_sheet_slices(1000, rows(1000), "S");
        assert_eq!(l_exact.len(), 1);
        assert_eq!(l_exact[0].len(), 1000);

        let l_empty = plan_sheet_slices(0, rows(1000), "S");
        assert_eq!(l_empty.len(), 1);
        assert!(l_empty[0].is_empty());
    }

    #[test]
    fn test_create_sheet_identifier_truncates_base_not_suffix() {
        let c_base = "x".repeat(40);
        let c_name = create_sheet_identifier(&c_base, 12);
        assert_eq!(c_name.chars().count(), N_LEN_EXCEL_SHEET_NAME_MAX);
        assert!(c_name.ends_with("12"));
        assert_eq!(create_sheet_identifier("Data", 0), "Data");
    }

    #[test]
    fn test_warn_suffix_ambiguity_only_past_ten_sheets() {
        let mut report = SpecXlsxReport::default();
        warn_suffix_ambiguity(&plan_sheet_slices(10, rows(1), "S"), &mut report);
        assert!(report.warnings.is_empty());
        warn_suffix_ambiguity(&plan_sheet_slices(11, rows(1), "S"), &mut report);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_sanitize_sheet_name() {
        assert_eq!(sanitize_sheet_name("a/b:c", "_").as_deref(), Some("a_b_c"));
        assert_eq!(sanitize_sheet_name("   ", "_"), None);
        assert_eq!(sanitize_sheet_name("'q'", "_").as_deref(), Some("q"));
        assert_eq!(
            sanitize_sheet_name(&"y".repeat(50), "_").map(|s| s.len()),
            Some(N_LEN_EXCEL_SHEET_NAME_MAX)
        );
        assert_eq!(derive_fallback_sheet_name(1), "Sheet2");
    }

    #[test]
    fn test_content_disposition_is_percent_encoded() {
        assert_eq!(
            derive_content_disposition("报表 2024.xlsx"),
            "attachment; filename=\"%E6%8A%A5%E8%A1%A8%202024.xlsx\""
        );
    }
}
