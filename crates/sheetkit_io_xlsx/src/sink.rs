//! Export sinks: filesystem targets and HTTP download responses.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Response};

use crate::conf::C_CONTENT_TYPE_DOWNLOAD;
use crate::spec::{EnumExcelType, SheetIoError};
use crate::util::derive_content_disposition;

////////////////////////////////////////////////////////////////////////////////
// #region ResponseSink

/// Writable HTTP response body whose headers stay mutable until the first body byte.
pub trait ResponseSink: Write {
    /// Response headers.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// `true` once body bytes were written; headers are frozen from then on.
    fn is_committed(&self) -> bool;
}

/// Response adapter over any byte writer.
#[derive(Debug, Default)]
pub struct StreamResponse<W> {
    headers: HeaderMap,
    inner: W,
    if_committed: bool,
}

impl<W: Write> StreamResponse<W> {
    /// Wrap a body writer with an empty header map.
    pub fn new(inner: W) -> Self {
        Self {
            headers: HeaderMap::new(),
            inner,
            if_committed: false,
        }
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Split into headers and body writer.
    pub fn into_parts(self) -> (HeaderMap, W) {
        (self.headers, self.inner)
    }
}

impl<W: Write> Write for StreamResponse<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n_written = self.inner.write(buf)?;
        if n_written > 0 {
            self.if_committed = true;
        }
        Ok(n_written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> ResponseSink for StreamResponse<W> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn is_committed(&self) -> bool {
        self.if_committed
    }
}

/// Fully buffered response, convertible into an [`http::Response`].
pub type BufferedResponse = StreamResponse<Vec<u8>>;

impl StreamResponse<Vec<u8>> {
    /// Empty buffered response.
    pub fn buffered() -> Self {
        Self::new(Vec::new())
    }

    /// Buffered body bytes.
    pub fn body(&self) -> &[u8] {
        &self.inner
    }

    /// Build a `200 OK` response carrying the collected headers and body.
    pub fn into_response(self) -> Response<Vec<u8>> {
        let (headers, body) = self.into_parts();
        let mut response = Response::new(body);
        *response.headers_mut() = headers;
        response
    }
}

/// Set download headers on `response`. Must run before any body byte is written.
pub fn prepare_download_headers(
    response: &mut dyn ResponseSink,
    file_name: &str,
) -> Result<(), SheetIoError> {
    if response.is_committed() {
        return Err(SheetIoError::ResponseCommitted);
    }
    let c_disposition = derive_content_disposition(file_name);
    let header_disposition = HeaderValue::from_str(&c_disposition).map_err(|err| {
        SheetIoError::InvalidArgument(format!(
            "file name {file_name:?} is not a valid header value: {err}"
        ))
    })?;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(C_CONTENT_TYPE_DOWNLOAD));
    headers.insert(CONTENT_DISPOSITION, header_disposition);
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Sink

/// Export destination. Exactly one byte destination is opened per export call.
pub enum EnumSink<'a> {
    /// Workbook file `<dir>/<base_name><extension>`.
    FilePath {
        /// Output directory.
        dir: PathBuf,
        /// File name without extension.
        base_name: String,
    },
    /// Live HTTP download.
    ResponseStream {
        /// Response receiving headers and body.
        response: &'a mut dyn ResponseSink,
        /// Suggested download name without extension.
        file_name: String,
    },
}

impl<'a> EnumSink<'a> {
    /// File sink under `dir`.
    pub fn file(dir: impl AsRef<Path>, base_name: impl Into<String>) -> Self {
        Self::FilePath {
            dir: dir.as_ref().to_path_buf(),
            base_name: base_name.into(),
        }
    }

    /// Response sink with a suggested download name.
    pub fn response(response: &'a mut dyn ResponseSink, file_name: impl Into<String>) -> Self {
        Self::ResponseStream {
            response,
            file_name: file_name.into(),
        }
    }

    /// Artifact name including the extension of `excel_type`.
    pub fn artifact_name(&self, excel_type: EnumExcelType) -> String {
        let c_base = match self {
            Self::FilePath { base_name, .. } => base_name,
            Self::ResponseStream { file_name, .. } => file_name,
        };
        format!("{c_base}{}", excel_type.extension())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_download_headers_sets_type_and_disposition() {
        let mut response = BufferedResponse::buffered();
        prepare_download_headers(&mut response, "report 1.xlsx").unwrap();

        let headers = response.headers();
        assert_eq!(
            headers[CONTENT_TYPE],
            "application/octet-stream;charset=utf-8"
        );
        assert_eq!(
            headers[CONTENT_DISPOSITION],
            "attachment; filename=\"report%201.xlsx\""
        );
    }

    #[test]
    fn test_prepare_download_headers_rejects_committed_response() {
        let mut response = BufferedResponse::buffered();
        response.write_all(b"PK").unwrap();
        let err = prepare_download_headers(&mut response, "late.xlsx").expect_err("committed");
        assert!(matches!(err, SheetIoError::ResponseCommitted));
        assert!(response.headers().is_empty());
    }

    #[test]
    fn test_artifact_name_uses_requested_extension() {
        let sink = EnumSink::file("/tmp", "orders");
        assert_eq!(sink.artifact_name(EnumExcelType::Xlsx), "orders.xlsx");
        assert_eq!(sink.artifact_name(EnumExcelType::Xls), "orders.xls");
    }

    #[test]
    fn test_buffered_response_into_http_response() {
        let mut response = BufferedResponse::buffered();
        prepare_download_headers(&mut response, "a.xlsx").unwrap();
        response.write_all(b"body").unwrap();
        let http_response = response.into_response();
        assert_eq!(http_response.status(), http::StatusCode::OK);
        assert_eq!(http_response.body(), b"body");
        assert!(http_response.headers().contains_key(CONTENT_DISPOSITION));
    }
}
