//! Request and response interceptors.
//!
//! Each invocation buffers the body at most once through [`tee`], scans the
//! enabled categories in policy order and stops at the first denial. An
//! admitted transaction is handed back with its body replaced by the
//! untouched copy; a denied one is dropped.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::errors::InterceptError;
use crate::models::scan::{Decision, ScanCategory, ScanOutcome, ScanTarget};
use crate::models::transaction::{
    Body, BodyReader, Headers, ProxyRequest, ProxyResponse, Transaction, TransactionKind,
};
use crate::services::clamd::Scanner;
use crate::services::metadata::{self, EncodeError};
use crate::services::multipart;
use crate::services::observer::{CategoryEvent, ScanObserver, TracingObserver};
use crate::services::policy::ScanPolicy;
use crate::services::tee::tee;

/// Host-facing modifier: takes a transaction, returns it or refuses it.
#[async_trait]
pub trait Modifier: Send + Sync {
    async fn modify(&self, input: Transaction) -> Result<Transaction, InterceptError>;
}

/// Progress of one request through the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    FilesChecked,
    BodyChecked,
    MetadataChecked,
    Admitted,
    Denied,
}

impl RequestStage {
    /// Category checked on the way out of this stage.
    fn pending(self) -> Option<ScanCategory> {
        match self {
            Self::Received => Some(ScanCategory::FormFile),
            Self::FilesChecked => Some(ScanCategory::Body),
            Self::BodyChecked => Some(ScanCategory::Metadata),
            _ => None,
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Received => Self::FilesChecked,
            Self::FilesChecked => Self::BodyChecked,
            Self::BodyChecked => Self::MetadataChecked,
            Self::MetadataChecked => Self::Admitted,
            terminal => terminal,
        }
    }
}

/// Scanning and decision plumbing shared by both legs.
#[derive(Clone)]
struct Inspector {
    scanner: Arc<dyn Scanner>,
    policy: ScanPolicy,
    observer: Arc<dyn ScanObserver>,
    deny_unreadable_body: bool,
}

impl Inspector {
    fn new(config: &ScanConfig, scanner: Arc<dyn Scanner>) -> Self {
        Self {
            scanner,
            policy: config.policy,
            observer: Arc::new(TracingObserver),
            deny_unreadable_body: config.deny_unreadable_body,
        }
    }

    /// Split `body` for scanning. When the source cannot be read, the
    /// replayable remainder is left in `body` and `None` is returned unless
    /// unreadable bodies are refused.
    async fn tee_body(
        &self,
        kind: TransactionKind,
        body: &mut Body,
    ) -> Result<Option<Body>, InterceptError> {
        match tee(std::mem::take(body)).await {
            Ok((scan, forward)) => {
                *body = forward;
                Ok(Some(scan))
            }
            Err(e) => {
                *body = e.recovered;
                if self.deny_unreadable_body {
                    tracing::warn!(%kind, error = %e.source, "Could not buffer body, refusing");
                    return Err(InterceptError::Io(e.source));
                }
                tracing::warn!(
                    %kind,
                    error = %e.source,
                    "Could not buffer body, forwarding without body scans"
                );
                Ok(None)
            }
        }
    }

    /// Scan the targets of one category in order, stopping at the first
    /// non-clean verdict. Unscanned readers are dropped on return.
    async fn check(
        &self,
        invocation_id: Uuid,
        kind: TransactionKind,
        category: ScanCategory,
        targets: Vec<(ScanTarget, BodyReader)>,
    ) -> Result<(), InterceptError> {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(targets.len());
        for (target, reader) in targets {
            let verdict = self.scanner.scan(&target, reader).await;
            let failed = !verdict.is_clean();
            outcomes.push(ScanOutcome { target, verdict });
            if failed {
                break;
            }
        }

        let decision = self.policy.decide(&outcomes);
        self.observer.on_category(&CategoryEvent {
            invocation_id,
            kind,
            category,
            scanned: outcomes.len(),
            decision: &decision,
            duration: started.elapsed(),
        });

        match decision {
            Decision::Admit => Ok(()),
            Decision::Deny(reason) => Err(InterceptError::Denied(reason)),
        }
    }
}

fn bytes_reader(bytes: Vec<u8>) -> BodyReader {
    Box::new(Cursor::new(bytes))
}

/// Entry point for inbound requests.
#[derive(Clone)]
pub struct RequestInterceptor {
    inspector: Inspector,
    max_form_bytes: usize,
}

impl RequestInterceptor {
    pub fn new(config: &ScanConfig, scanner: Arc<dyn Scanner>) -> Self {
        Self {
            inspector: Inspector::new(config, scanner),
            max_form_bytes: config.max_form_bytes,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.inspector.observer = observer;
        self
    }

    /// Scan a transaction that must be a request.
    pub async fn intercept(&self, input: Transaction) -> Result<Transaction, InterceptError> {
        match input {
            Transaction::Request(request) => self
                .intercept_request(request)
                .await
                .map(Transaction::Request),
            other => Err(InterceptError::Type(format!(
                "expected a request, got a {}",
                other.kind()
            ))),
        }
    }

    pub async fn intercept_request(
        &self,
        request: ProxyRequest,
    ) -> Result<ProxyRequest, InterceptError> {
        let invocation_id = Uuid::now_v7();
        let span = tracing::info_span!(
            "intercept_request",
            %invocation_id,
            method = %request.method,
            path = %request.path,
            content_type = request.header("content-type").unwrap_or_default(),
        );
        self.run(invocation_id, request).instrument(span).await
    }

    async fn run(
        &self,
        invocation_id: Uuid,
        mut request: ProxyRequest,
    ) -> Result<ProxyRequest, InterceptError> {
        let policy = self.inspector.policy;

        // Form files and the body scan read the same buffered copy.
        let scan_copy = if policy.scan_form_files || policy.scan_body {
            self.inspector
                .tee_body(TransactionKind::Request, &mut request.body)
                .await?
        } else {
            Some(Body::Empty)
        };
        let body_readable = scan_copy.is_some();
        let buffered = scan_copy.as_ref().and_then(Body::buffered).cloned();

        let mut stage = RequestStage::Received;
        while let Some(category) = stage.pending() {
            let body_derived = category != ScanCategory::Metadata;
            if policy.is_enabled(category) && (body_readable || !body_derived) {
                let targets = match category {
                    ScanCategory::FormFile => {
                        self.form_file_targets(&request.headers, buffered.clone())
                            .await
                    }
                    ScanCategory::Body => buffered
                        .clone()
                        .map(|bytes| {
                            (ScanTarget::request_body(), Body::from(bytes).into_reader())
                        })
                        .into_iter()
                        .collect(),
                    ScanCategory::Metadata => {
                        let encoded = metadata::encode_request(&request)?;
                        vec![(ScanTarget::metadata(), bytes_reader(encoded))]
                    }
                };
                if let Err(err) = self
                    .inspector
                    .check(invocation_id, TransactionKind::Request, category, targets)
                    .await
                {
                    tracing::debug!(stage = ?RequestStage::Denied, %err, "Request denied");
                    return Err(err);
                }
            }
            stage = stage.next();
            tracing::debug!(?stage, "Request stage");
        }

        stage = stage.next();
        tracing::debug!(?stage, "Request admitted");
        Ok(request)
    }

    async fn form_file_targets(
        &self,
        headers: &Headers,
        body: Option<axum::body::Bytes>,
    ) -> Vec<(ScanTarget, BodyReader)> {
        let Some(body) = body else {
            return Vec::new();
        };
        multipart::extract(headers, body, self.max_form_bytes)
            .await
            .iter()
            .map(|file| (file.target(), file.reader()))
            .collect()
    }
}

#[async_trait]
impl Modifier for RequestInterceptor {
    async fn modify(&self, input: Transaction) -> Result<Transaction, InterceptError> {
        self.intercept(input).await
    }
}

/// Entry point for outbound responses.
#[derive(Clone)]
pub struct ResponseInterceptor {
    inspector: Inspector,
}

impl ResponseInterceptor {
    pub fn new(config: &ScanConfig, scanner: Arc<dyn Scanner>) -> Self {
        Self {
            inspector: Inspector::new(config, scanner),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.inspector.observer = observer;
        self
    }

    /// Scan a transaction that must be a response.
    pub async fn intercept(&self, input: Transaction) -> Result<Transaction, InterceptError> {
        match input {
            Transaction::Response(response) => self
                .intercept_response(response)
                .await
                .map(Transaction::Response),
            other => Err(InterceptError::Type(format!(
                "expected a response, got a {}",
                other.kind()
            ))),
        }
    }

    pub async fn intercept_response(
        &self,
        response: ProxyResponse,
    ) -> Result<ProxyResponse, InterceptError> {
        let invocation_id = Uuid::now_v7();
        let span = tracing::info_span!(
            "intercept_response",
            %invocation_id,
            status_code = response.status_code,
            is_complete = response.is_complete,
        );
        self.run(invocation_id, response).instrument(span).await
    }

    async fn run(
        &self,
        invocation_id: Uuid,
        mut response: ProxyResponse,
    ) -> Result<ProxyResponse, InterceptError> {
        for category in self.inspector.policy.categories(TransactionKind::Response) {
            let targets = match category {
                ScanCategory::Body => {
                    let scan = self
                        .inspector
                        .tee_body(TransactionKind::Response, &mut response.body)
                        .await?;
                    match scan {
                        Some(scan) => self.body_targets(scan, &response)?,
                        None => continue,
                    }
                }
                ScanCategory::Metadata => {
                    let encoded = metadata::encode_response(&response)?;
                    vec![(ScanTarget::metadata(), bytes_reader(encoded))]
                }
                ScanCategory::FormFile => Vec::new(),
            };
            self.inspector
                .check(invocation_id, TransactionKind::Response, category, targets)
                .await?;
        }
        tracing::debug!("Response admitted");
        Ok(response)
    }

    /// Without a body stream the structured data view is what gets forwarded,
    /// so it is scanned in its JSON form instead.
    fn body_targets(
        &self,
        scan: Body,
        response: &ProxyResponse,
    ) -> Result<Vec<(ScanTarget, BodyReader)>, InterceptError> {
        match scan {
            Body::Empty if response.data.is_empty() => Ok(Vec::new()),
            Body::Empty => {
                let encoded = serde_json::to_vec(&response.data).map_err(|source| EncodeError {
                    leg: "response data",
                    source,
                })?;
                Ok(vec![(ScanTarget::response_body(), bytes_reader(encoded))])
            }
            scan => Ok(vec![(ScanTarget::response_body(), scan.into_reader())]),
        }
    }
}

#[async_trait]
impl Modifier for ResponseInterceptor {
    async fn modify(&self, input: Transaction) -> Result<Transaction, InterceptError> {
        self.intercept(input).await
    }
}
