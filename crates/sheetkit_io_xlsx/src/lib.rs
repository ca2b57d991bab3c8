//! `sheetkit_io_xlsx` v1:
//! Paginated multi-sheet spreadsheet export and streaming import.
//!
//! Modules:
//! - `conf`   : constants and default presets
//! - `spec`   : cell model, options, reports, errors
//! - `codec`  : record codec contract and type-erased sheet batches
//! - `util`   : pure helper functions (sheet planning, naming, headers)
//! - `sink`   : file and HTTP-response destinations
//! - `writer` : write session over one workbook
//! - `export` : homogeneous and heterogeneous export engine
//! - `reader` : read session streaming rows to a listener
pub mod codec;
pub mod conf;
pub mod export;
pub mod reader;
pub mod sink;
pub mod spec;
pub mod util;
pub mod writer;

pub use codec::{RawRow, RecordBatch, RecordCodec, SpecRowCells, SpecSheetDescriptor};
pub use conf::{
    C_CONTENT_TYPE_DOWNLOAD, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    TUP_EXCEL_ILLEGAL, derive_default_xlsx_export_options, derive_default_xlsx_read_options,
};
pub use export::{export_heterogeneous, export_homogeneous};
pub use reader::{
    CollectRowListener, EnumSource, FnRowListener, ReadSeek, RowListener, XlsxReadSession,
    listener_fn, read_all_sheets, read_first_sheet, read_sheet_at,
};
pub use sink::{BufferedResponse, EnumSink, ResponseSink, StreamResponse, prepare_download_headers};
pub use spec::{
    DecodeError, EnumCellValue, EnumErrorKind, EnumExcelType, EnumPageSize, SheetIoError,
    SpecRowContext, SpecSheetInfo, SpecSheetReadSummary, SpecSheetSlice, SpecXlsxExportOptions,
    SpecXlsxReadOptions, SpecXlsxReadReport, SpecXlsxReport,
};
pub use util::{
    create_sheet_identifier, derive_content_disposition, plan_sheet_slices, sanitize_sheet_name,
};
pub use writer::XlsxWriteSession;
