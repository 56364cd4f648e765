//! Transaction capability types handed to the interceptors by the host pipeline.
//!
//! A transaction is either an inbound [`ProxyRequest`] or an outbound
//! [`ProxyResponse`]. Both carry a [`Body`] that may only be read once.

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;

use axum::body::Bytes;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Single-read byte source backing a body.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Header map as exposed to the host: name to ordered values.
pub type Headers = HashMap<String, Vec<String>>;

/// Transaction body.
///
/// `Empty` is the "no body" sentinel and is kept distinct from a zero-length
/// stream so callers can tell an absent body from an empty one.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Buffered(Bytes),
    Stream(BodyReader),
}

impl Body {
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    /// True for the absent-body sentinel only.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Buffered content, if this body has already been materialised.
    pub fn buffered(&self) -> Option<&Bytes> {
        match self {
            Self::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Consume the body as a reader. The sentinel reads as zero bytes.
    pub fn into_reader(self) -> BodyReader {
        match self {
            Self::Empty => Box::new(tokio::io::empty()),
            Self::Buffered(bytes) => Box::new(Cursor::new(bytes)),
            Self::Stream(reader) => reader,
        }
    }

    /// Read the whole body into memory.
    pub async fn into_bytes(self) -> std::io::Result<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Buffered(bytes) => Ok(bytes),
            Self::Stream(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Buffered(bytes)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Buffered(bytes) => write!(f, "Body::Buffered({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

/// Inbound request as seen by the request interceptor.
#[derive(Debug, Default)]
pub struct ProxyRequest {
    pub method: String,
    pub url: String,
    /// Query parameters in the order they appeared.
    pub query: Vec<(String, String)>,
    /// Route pattern the request matched, or the raw path.
    pub path: String,
    pub params: HashMap<String, String>,
    pub headers: Headers,
    pub body: Body,
}

impl ProxyRequest {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Outbound response as seen by the response interceptor.
#[derive(Debug, Default)]
pub struct ProxyResponse {
    pub headers: Headers,
    pub status_code: u16,
    pub is_complete: bool,
    /// Structured view of the payload, when the host keeps one.
    pub data: Map<String, Value>,
    pub body: Body,
}

/// First value of a header, matched case-insensitively.
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

/// Which leg of the exchange a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Request,
    Response,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
        }
    }
}

/// A transaction passed through the host pipeline.
#[derive(Debug)]
pub enum Transaction {
    Request(ProxyRequest),
    Response(ProxyResponse),
}

impl Transaction {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Request(_) => TransactionKind::Request,
            Self::Response(_) => TransactionKind::Response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_sentinel_reads_as_zero_bytes() {
        let body = Body::Empty;
        assert!(body.is_absent());
        assert!(body.into_bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_body_is_read_fully() {
        let body = Body::from_reader(Cursor::new(b"payload".to_vec()));
        assert!(!body.is_absent());
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"payload"));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let request = ProxyRequest {
            headers: HashMap::from([(
                "Content-Type".to_string(),
                vec!["text/plain".to_string()],
            )]),
            ..Default::default()
        };
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.header("accept"), None);
    }

    #[test]
    fn transaction_kind_display() {
        let tx = Transaction::Response(ProxyResponse::default());
        assert_eq!(tx.kind(), TransactionKind::Response);
        assert_eq!(tx.kind().to_string(), "response");
    }
}
