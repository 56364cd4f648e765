//! Axum middleware running the interceptors around a route.
//!
//! Requests and responses are converted into [`ProxyRequest`] and
//! [`ProxyResponse`], scanned, and rebuilt from their original parts with
//! the forwarded body. A denied transaction is answered with the
//! [`InterceptError`] response and never reaches the next layer.

use std::collections::HashMap;
use std::io;

use axum::body::{Body as AxumBody, HttpBody};
use axum::extract::{FromRequestParts, MatchedPath, Query, RawPathParams, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use futures::TryStreamExt;
use serde_json::Map;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::errors::InterceptError;
use crate::models::transaction::{Body, Headers, ProxyRequest, ProxyResponse};
use crate::AppState;

/// Scan the inbound request before it reaches the handler.
pub async fn scan_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, InterceptError> {
    let (mut parts, body) = request.into_parts();
    let proxy = proxy_request(&mut parts, body).await?;
    let admitted = state
        .requests
        .intercept_request(proxy)
        .await
        .inspect_err(log_denial)?;
    let request = Request::from_parts(parts, into_http_body(admitted.body));
    Ok(next.run(request).await)
}

/// Scan the handler's response before it is sent.
pub async fn scan_response(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, InterceptError> {
    let response = next.run(request).await;
    let (parts, body) = response.into_parts();
    let proxy = ProxyResponse {
        headers: headers_map(&parts.headers),
        status_code: parts.status.as_u16(),
        is_complete: true,
        data: Map::new(),
        body: from_http_body(body),
    };
    let admitted = state
        .responses
        .intercept_response(proxy)
        .await
        .inspect_err(log_denial)
        .map_err(upstream_error)?;
    Ok(Response::from_parts(parts, into_http_body(admitted.body)))
}

fn log_denial(err: &InterceptError) {
    if let Some(reason) = err.deny_reason() {
        tracing::info!(
            category = %reason.category,
            cause = ?reason.cause,
            "Transaction blocked"
        );
    }
}

/// An unreadable response body is the handler's fault, not the client's.
fn upstream_error(err: InterceptError) -> InterceptError {
    match err {
        InterceptError::Io(source) => InterceptError::Upstream(source),
        other => other,
    }
}

/// Build the capability view of a request. Parts stay with the caller so
/// the request can be reassembled unchanged.
pub async fn proxy_request(
    parts: &mut Parts,
    body: AxumBody,
) -> Result<ProxyRequest, InterceptError> {
    let query = match parts.uri.query() {
        None => Vec::new(),
        Some(_) => Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map(|Query(pairs)| pairs)
            .map_err(|e| InterceptError::Type(format!("undecodable query string: {e}")))?,
    };

    // Only populated when mounted with `route_layer`.
    let params = match RawPathParams::from_request_parts(parts, &()).await {
        Ok(raw) => raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        Err(_) => HashMap::new(),
    };

    let path = parts
        .extensions
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    Ok(ProxyRequest {
        method: parts.method.to_string(),
        url: parts.uri.to_string(),
        query,
        path,
        params,
        headers: headers_map(&parts.headers),
        body: from_http_body(body),
    })
}

fn headers_map(headers: &HeaderMap) -> Headers {
    let mut map: Headers = HashMap::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

/// Wrap an HTTP body as a single-read stream. A body known to be empty maps
/// to the absent-body sentinel.
fn from_http_body(body: AxumBody) -> Body {
    if body.size_hint().exact() == Some(0) {
        return Body::Empty;
    }
    let stream = body.into_data_stream().map_err(io::Error::other);
    Body::from_reader(StreamReader::new(stream))
}

fn into_http_body(body: Body) -> AxumBody {
    match body {
        Body::Empty => AxumBody::empty(),
        Body::Buffered(bytes) => AxumBody::from(bytes),
        Body::Stream(reader) => AxumBody::from_stream(ReaderStream::new(reader)),
    }
}
