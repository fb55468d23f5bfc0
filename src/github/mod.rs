//! GitHub REST API clients.
//!
//! - `app`: GitHub App JWT and installation access tokens
//! - `org`: approval of pending fine-grained personal access token requests
//! - `repo`: deployment environments and encrypted environment secrets

pub mod app;
pub mod org;
pub mod repo;

use reqwest::header::{HeaderMap, LINK};
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use std::borrow::Cow;

pub const ACCEPT: &str = "application/vnd.github+json";
pub const API_VERSION: &str = "2022-11-28";

/// Adds bearer auth and the versioned GitHub media type to a request.
pub(crate) fn authorized(req: RequestBuilder, token: &str) -> RequestBuilder {
    req.bearer_auth(token)
        .header("Accept", ACCEPT)
        .header("X-GitHub-Api-Version", API_VERSION)
}

/// Percent-encodes a single path segment (environment names contain spaces).
pub(crate) fn segment(value: &str) -> Cow<'_, str> {
    urlencoding::encode(value)
}

pub(crate) fn api_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Error text from a failed response: the `message` field when the body is
/// GitHub's JSON error document, otherwise the raw body.
pub(crate) async fn error_message(resp: Response) -> String {
    let body = resp.text().await.unwrap_or_default();
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body)
}

/// Target of the `rel="next"` entry in a `Link` header.
pub(crate) fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == "rel=\"next\"")
            .then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}
