//! Streaming client for the clamd daemon.
//!
//! Each scan opens its own connection and speaks the `INSTREAM` command:
//! the source is forwarded in length-prefixed chunks as it is read, then the
//! reply lines are drained and classified. Connection, protocol and timeout
//! failures all become [`Verdict::ScanError`], so an unreachable scanner
//! never admits unscanned content.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{ClamdAddress, ScanConfig};
use crate::models::scan::{ScanTarget, Verdict};
use crate::models::transaction::BodyReader;

const CHUNK_SIZE: usize = 8 * 1024;

/// Anything that can render a verdict for a byte stream.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan `reader` to the end. `target` is used for attribution only.
    async fn scan(&self, target: &ScanTarget, reader: BodyReader) -> Verdict;
}

/// Failures talking to clamd.
#[derive(Debug, thiserror::Error)]
pub enum ClamdError {
    #[error("could not connect to clamd at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("clamd connection failed: {0}")]
    Io(#[from] io::Error),

    #[error("reading the scan source failed: {0}")]
    Source(#[source] io::Error),

    #[error("clamd did not answer within {0:?}")]
    Timeout(Duration),

    #[error("unexpected clamd reply: {0}")]
    Protocol(String),
}

/// Status of one clamd reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    Ok,
    Found(String),
    Error(String),
}

impl ScanStatus {
    /// Parse a single reply line such as `stream: OK` or
    /// `stream: Eicar-Test-Signature FOUND`. Unrecognised lines are errors.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let status = line.split_once(": ").map_or(line, |(_, rest)| rest);

        if status == "OK" {
            Self::Ok
        } else if let Some(signature) = status.strip_suffix(" FOUND") {
            Self::Found(signature.trim().to_string())
        } else if let Some(message) = line.strip_suffix(" ERROR") {
            Self::Error(message.trim().to_string())
        } else {
            Self::Error(format!("unrecognised reply '{line}'"))
        }
    }
}

/// Split a raw reply into status lines. clamd terminates lines with NUL when
/// commands are `z`-prefixed and with newline otherwise.
pub fn parse_reply(reply: &[u8]) -> Vec<ScanStatus> {
    String::from_utf8_lossy(reply)
        .split(['\0', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ScanStatus::parse)
        .collect()
}

/// Fold reply statuses into a verdict.
///
/// Any `FOUND` line makes the stream infected. Otherwise any error line makes
/// it a scan error. A reply without lines counts as clean.
pub fn classify(statuses: &[ScanStatus]) -> Verdict {
    if let Some(signature) = statuses.iter().find_map(|s| match s {
        ScanStatus::Found(signature) => Some(signature),
        _ => None,
    }) {
        return Verdict::Infected {
            signature: signature.clone(),
        };
    }
    if let Some(message) = statuses.iter().find_map(|s| match s {
        ScanStatus::Error(message) => Some(message),
        _ => None,
    }) {
        return Verdict::ScanError(message.clone());
    }
    Verdict::Clean
}

trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

/// clamd client. Holds no connection; every call opens a fresh one.
#[derive(Debug, Clone)]
pub struct ClamdClient {
    address: ClamdAddress,
    timeout: Duration,
}

impl ClamdClient {
    pub fn new(address: ClamdAddress, timeout: Duration) -> Self {
        Self { address, timeout }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.clamd_address.clone(), config.timeout)
    }

    pub fn address(&self) -> &ClamdAddress {
        &self.address
    }

    /// Check the daemon answers `PONG`.
    pub async fn ping(&self) -> Result<(), ClamdError> {
        let reply = self.command(b"zPING\0").await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(ClamdError::Protocol(reply))
        }
    }

    /// Engine and signature database version string.
    pub async fn version(&self) -> Result<String, ClamdError> {
        self.command(b"zVERSION\0").await
    }

    /// Stream `source` through `INSTREAM` and return every reply status.
    pub async fn scan_stream(&self, source: BodyReader) -> Result<Vec<ScanStatus>, ClamdError> {
        tokio::time::timeout(self.timeout, self.instream(source))
            .await
            .map_err(|_| ClamdError::Timeout(self.timeout))?
    }

    async fn instream(&self, mut source: BodyReader) -> Result<Vec<ScanStatus>, ClamdError> {
        let mut conn = self.connect().await?;
        conn.write_all(b"zINSTREAM\0").await?;

        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut sent = 0usize;
        loop {
            let n = source.read(&mut chunk).await.map_err(ClamdError::Source)?;
            if n == 0 {
                break;
            }
            // n <= CHUNK_SIZE, always fits the 4-byte length prefix.
            conn.write_all(&(n as u32).to_be_bytes()).await?;
            conn.write_all(&chunk[..n]).await?;
            sent += n;
        }
        conn.write_all(&0u32.to_be_bytes()).await?;
        conn.flush().await?;

        let mut reply = Vec::new();
        conn.read_to_end(&mut reply).await?;
        tracing::debug!(bytes = sent, reply_len = reply.len(), "INSTREAM session finished");
        Ok(parse_reply(&reply))
    }

    async fn command(&self, command: &[u8]) -> Result<String, ClamdError> {
        let session = async {
            let mut conn = self.connect().await?;
            conn.write_all(command).await?;
            conn.flush().await?;
            let mut reply = Vec::new();
            conn.read_to_end(&mut reply).await?;
            Ok::<_, ClamdError>(
                String::from_utf8_lossy(&reply)
                    .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                    .to_string(),
            )
        };
        tokio::time::timeout(self.timeout, session)
            .await
            .map_err(|_| ClamdError::Timeout(self.timeout))?
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, ClamdError> {
        let connect_err = |source| ClamdError::Connect {
            address: self.address.to_string(),
            source,
        };
        match &self.address {
            ClamdAddress::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr.as_str())
                    .await
                    .map_err(connect_err)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            ClamdAddress::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(connect_err)?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            ClamdAddress::Unix(_) => Err(connect_err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            ))),
        }
    }
}

#[async_trait]
impl Scanner for ClamdClient {
    async fn scan(&self, target: &ScanTarget, reader: BodyReader) -> Verdict {
        let statuses = match self.scan_stream(reader).await {
            Ok(statuses) => statuses,
            Err(e) => {
                tracing::warn!(scan_target = %target.label, error = %e, "clamd scan failed");
                return Verdict::ScanError(e.to_string());
            }
        };
        for status in &statuses {
            tracing::debug!(scan_target = %target.label, ?status, "clamd result");
        }
        let verdict = classify(&statuses);
        if let Verdict::Infected { signature } = &verdict {
            tracing::warn!(scan_target = %target.label, %signature, "Virus found");
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::net::TcpListener;

    use super::*;

    /// Accept one connection, capture what was sent, answer with `reply`.
    async fn one_shot_clamd(
        reply: &'static [u8],
    ) -> (ClamdClient, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 10];
            socket.read_exact(&mut command).await.unwrap();
            let mut received = command.to_vec();
            if &command == b"zINSTREAM\0" {
                loop {
                    let len = socket.read_u32().await.unwrap() as usize;
                    received.extend_from_slice(&(len as u32).to_be_bytes());
                    if len == 0 {
                        break;
                    }
                    let mut chunk = vec![0u8; len];
                    socket.read_exact(&mut chunk).await.unwrap();
                    received.extend_from_slice(&chunk);
                }
            }
            socket.write_all(reply).await.unwrap();
            socket.shutdown().await.unwrap();
            received
        });
        let client = ClamdClient::new(
            ClamdAddress::Tcp(addr.to_string()),
            Duration::from_secs(5),
        );
        (client, handle)
    }

    #[test]
    fn parses_reply_lines() {
        assert_eq!(ScanStatus::parse("stream: OK"), ScanStatus::Ok);
        assert_eq!(
            ScanStatus::parse("stream: Win.Test.EICAR_HDB-1 FOUND"),
            ScanStatus::Found("Win.Test.EICAR_HDB-1".to_string())
        );
        assert_eq!(
            ScanStatus::parse("INSTREAM size limit exceeded. ERROR"),
            ScanStatus::Error("INSTREAM size limit exceeded.".to_string())
        );
        assert!(matches!(ScanStatus::parse("garbage"), ScanStatus::Error(_)));
    }

    #[test]
    fn splits_nul_and_newline_terminated_replies() {
        let statuses = parse_reply(b"stream: OK\0stream: Eicar FOUND\nstream: OK\n");
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[1], ScanStatus::Found("Eicar".to_string()));
    }

    #[test]
    fn classification_prefers_found_then_error() {
        assert_eq!(classify(&[]), Verdict::Clean);
        assert_eq!(classify(&[ScanStatus::Ok, ScanStatus::Ok]), Verdict::Clean);
        assert_eq!(
            classify(&[
                ScanStatus::Error("busy".to_string()),
                ScanStatus::Found("Eicar".to_string()),
            ]),
            Verdict::Infected {
                signature: "Eicar".to_string()
            }
        );
        assert_eq!(
            classify(&[ScanStatus::Ok, ScanStatus::Error("busy".to_string())]),
            Verdict::ScanError("busy".to_string())
        );
    }

    #[tokio::test]
    async fn instream_frames_chunks() {
        let (client, handle) = one_shot_clamd(b"stream: OK\0").await;
        let verdict = client
            .scan(
                &ScanTarget::request_body(),
                Box::new(Cursor::new(b"hello".to_vec())),
            )
            .await;
        assert_eq!(verdict, Verdict::Clean);

        let received = handle.await.unwrap();
        let mut expected = b"zINSTREAM\0".to_vec();
        expected.extend_from_slice(&5u32.to_be_bytes());
        expected.extend_from_slice(b"hello");
        expected.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn found_reply_is_infected() {
        let (client, handle) = one_shot_clamd(b"stream: Eicar-Test-Signature FOUND\0").await;
        let verdict = client
            .scan(&ScanTarget::metadata(), Box::new(Cursor::new(b"x".to_vec())))
            .await;
        assert!(matches!(verdict, Verdict::Infected { .. }));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn empty_reply_is_clean() {
        let (client, handle) = one_shot_clamd(b"").await;
        let verdict = client
            .scan(&ScanTarget::metadata(), Box::new(tokio::io::empty()))
            .await;
        assert_eq!(verdict, Verdict::Clean);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_daemon_is_scan_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ClamdClient::new(ClamdAddress::Tcp(addr.to_string()), Duration::from_secs(2));
        let verdict = client
            .scan(&ScanTarget::request_body(), Box::new(tokio::io::empty()))
            .await;
        assert!(matches!(verdict, Verdict::ScanError(_)));
        assert!(matches!(client.ping().await, Err(ClamdError::Connect { .. })));
    }

    #[tokio::test]
    async fn silent_daemon_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let client = ClamdClient::new(
            ClamdAddress::Tcp(addr.to_string()),
            Duration::from_millis(200),
        );
        let err = client.scan_stream(Box::new(tokio::io::empty())).await.unwrap_err();
        assert!(matches!(err, ClamdError::Timeout(_)));
    }

    #[tokio::test]
    async fn ping_expects_pong() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 6];
            socket.read_exact(&mut command).await.unwrap();
            assert_eq!(&command, b"zPING\0");
            socket.write_all(b"PONG\0").await.unwrap();
        });

        let client = ClamdClient::new(ClamdAddress::Tcp(addr.to_string()), Duration::from_secs(2));
        client.ping().await.unwrap();
    }
}
