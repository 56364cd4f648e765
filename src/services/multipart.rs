//! Extraction of uploaded files from a buffered multipart/form-data body.
//!
//! Bodies that are not multipart, fail to parse, or exceed the size ceiling
//! all yield zero files. None of these abort the transaction.

use std::io::Cursor;

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, Request};

use crate::models::scan::ScanTarget;
use crate::models::transaction::{header_value, BodyReader, Headers};

/// One uploaded file held in memory.
#[derive(Debug, Clone)]
pub struct FormFile {
    pub field: String,
    pub filename: String,
    pub data: Bytes,
}

impl FormFile {
    pub fn target(&self) -> ScanTarget {
        ScanTarget::form_file(&self.field, &self.filename)
    }

    pub fn reader(&self) -> BodyReader {
        Box::new(Cursor::new(self.data.clone()))
    }
}

/// Collect every file part of a multipart body.
///
/// `max_bytes` bounds the total size of all parts, files and plain fields
/// alike. Exceeding it discards everything parsed so far.
pub async fn extract(headers: &Headers, body: Bytes, max_bytes: usize) -> Vec<FormFile> {
    let Some(content_type) = header_value(headers, header::CONTENT_TYPE.as_str()) else {
        tracing::debug!("No content type, no http form");
        return Vec::new();
    };
    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
    {
        tracing::debug!(content_type, "Not a multipart form");
        return Vec::new();
    }

    let request = match Request::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(axum::body::Body::from(body))
    {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Unusable multipart content type");
            return Vec::new();
        }
    };

    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(e) => {
            tracing::debug!(error = %e, "No http form");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    let mut total = 0usize;
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed multipart body");
                return Vec::new();
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);

        let mut data = Vec::new();
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    total += chunk.len();
                    if total > max_bytes {
                        tracing::warn!(
                            max_bytes,
                            "Multipart form exceeds size ceiling, skipping files"
                        );
                        return Vec::new();
                    }
                    if filename.is_some() {
                        data.extend_from_slice(&chunk);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, field = %name, "Malformed multipart part");
                    return Vec::new();
                }
            }
        }

        if let Some(filename) = filename {
            files.push(FormFile {
                field: name,
                filename,
                data: Bytes::from(data),
            });
        }
    }

    tracing::debug!(files = files.len(), bytes = total, "Parsed multipart form");
    files
}
