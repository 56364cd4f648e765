//! Duplicate a single-read body so it can be scanned and still forwarded.

use std::io::{self, Cursor};

use axum::body::Bytes;
use tokio::io::AsyncReadExt;

use crate::models::transaction::Body;

const READ_CHUNK: usize = 8 * 1024;

/// Buffering the source stream failed.
///
/// `recovered` replays the bytes read before the failure followed by the
/// unread remainder of the source, so the caller can still forward it.
#[derive(Debug, thiserror::Error)]
#[error("failed to buffer body stream: {source}")]
pub struct TeeError {
    #[source]
    pub source: io::Error,
    pub recovered: Body,
}

/// Split `body` into two independent copies.
///
/// A stream is read to the end exactly once. Already buffered bodies are
/// shared without copying, and the absent-body sentinel stays absent on both
/// sides.
pub async fn tee(body: Body) -> Result<(Body, Body), TeeError> {
    let bytes = match body {
        Body::Empty => return Ok((Body::Empty, Body::Empty)),
        Body::Buffered(bytes) => bytes,
        Body::Stream(mut reader) => {
            let mut buf = Vec::new();
            loop {
                buf.reserve(READ_CHUNK);
                match reader.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(source) => {
                        let replay = Cursor::new(Bytes::from(buf)).chain(reader);
                        return Err(TeeError {
                            source,
                            recovered: Body::from_reader(replay),
                        });
                    }
                }
            }
            Bytes::from(buf)
        }
    };
    Ok((Body::Buffered(bytes.clone()), Body::Buffered(bytes)))
}
