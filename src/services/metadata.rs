//! Deterministic serialization of transaction metadata for scanning.
//!
//! Metadata is encoded as JSON with a fixed field order. Maps are re-keyed
//! into `BTreeMap`s and header names are lower-cased, so the same logical
//! metadata always yields the same bytes regardless of `HashMap` iteration
//! order or header-name casing. Query parameters keep their request order.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::transaction::{Headers, ProxyRequest, ProxyResponse};

/// Metadata could not be serialized.
#[derive(Debug, thiserror::Error)]
#[error("could not encode {leg} metadata: {source}")]
pub struct EncodeError {
    pub leg: &'static str,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Serialize)]
struct RequestMetadata<'a> {
    method: &'a str,
    url: &'a str,
    query: &'a [(String, String)],
    path: &'a str,
    params: BTreeMap<&'a str, &'a str>,
    headers: BTreeMap<String, Vec<&'a str>>,
}

#[derive(Serialize)]
struct ResponseMetadata<'a> {
    headers: BTreeMap<String, Vec<&'a str>>,
    status_code: u16,
}

/// Encode method, URL, query, path, path parameters and headers.
pub fn encode_request(request: &ProxyRequest) -> Result<Vec<u8>, EncodeError> {
    let metadata = RequestMetadata {
        method: &request.method,
        url: &request.url,
        query: &request.query,
        path: &request.path,
        params: request
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
        headers: canonical_headers(&request.headers),
    };
    serde_json::to_vec(&metadata).map_err(|source| EncodeError {
        leg: "request",
        source,
    })
}

/// Encode headers and status code.
pub fn encode_response(response: &ProxyResponse) -> Result<Vec<u8>, EncodeError> {
    let metadata = ResponseMetadata {
        headers: canonical_headers(&response.headers),
        status_code: response.status_code,
    };
    serde_json::to_vec(&metadata).map_err(|source| EncodeError {
        leg: "response",
        source,
    })
}

/// Lower-case header names, merging names that differ only by case. Source
/// names are visited in sorted order so merged value lists are stable.
fn canonical_headers(headers: &Headers) -> BTreeMap<String, Vec<&str>> {
    let mut names: Vec<&String> = headers.keys().collect();
    names.sort();

    let mut canonical: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for name in names {
        canonical
            .entry(name.to_ascii_lowercase())
            .or_default()
            .extend(headers[name].iter().map(String::as_str));
    }
    canonical
}
