//! Upstream catalog API client.
//!
//! The upstream is a paginated `GET` endpoint answering
//!
//! ```text
//! { "success": true, "records": [...], "pageInfo": { "pageCount": 5, "rowCount": 487 } }
//! ```
//!
//! Every request is signed with fresh material: a new timestamp and nonce
//! are generated per call, so no auth state is cached on the client.
//!
//! # Signature
//!
//! ```text
//! X-Signature = hex(HMAC-SHA256(secret, "GET\n{path}\n{canonical query}\n{timestamp}\n{nonce}"))
//! ```
//!
//! The canonical query is the request's own query string: keys sorted,
//! values percent-encoded (RFC 3986 unreserved set left as-is).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use catalog_sync_core::models::UpstreamRecord;

use crate::config::{Credentials, UpstreamConfig};
use crate::error::{ConfigError, PageError};

type HmacSha256 = Hmac<Sha256>;

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 0-based page index.
    pub page: u32,
    pub limit: u32,
    pub fields: Vec<String>,
    pub modified_since: Option<DateTime<Utc>>,
}

impl PageRequest {
    /// `key=value` pairs sorted by key and percent-encoded.
    pub fn canonical_query(&self) -> String {
        let mut pairs: Vec<(&str, String)> = vec![
            ("limit", self.limit.to_string()),
            ("page", self.page.to_string()),
        ];
        if !self.fields.is_empty() {
            pairs.push(("fields", self.fields.join(",")));
        }
        if let Some(since) = self.modified_since {
            pairs.push((
                "modifiedSince",
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        pairs
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub row_count: u64,
}

#[derive(Debug, Clone)]
pub struct UpstreamPage {
    pub records: Vec<UpstreamRecord>,
    pub page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    success: bool,
    #[serde(default)]
    records: Vec<UpstreamRecord>,
    #[serde(default)]
    page_info: Option<PageInfo>,
    #[serde(default)]
    message: Option<String>,
}

/// A source of upstream pages.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<UpstreamPage, PageError>;
}

/// HTTP implementation of [`UpstreamApi`].
pub struct HttpUpstream {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    credentials: Credentials,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig, credentials: Credentials) -> Result<Self, ConfigError> {
        let raw = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.records_path.trim_start_matches('/')
        );
        let endpoint = reqwest::Url::parse(&raw).map_err(|e| ConfigError::InvalidEndpoint {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidEndpoint {
                url: raw,
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            credentials,
        })
    }
}

#[async_trait]
impl UpstreamApi for HttpUpstream {
    async fn fetch_page(&self, request: &PageRequest) -> Result<UpstreamPage, PageError> {
        let query = request.canonical_query();
        let timestamp = Utc::now().timestamp().to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        let signature = sign(
            &self.credentials.api_secret,
            self.endpoint.path(),
            &query,
            &timestamp,
            &nonce,
        );

        let mut url = self.endpoint.clone();
        url.set_query(Some(&query));

        let response = self
            .client
            .get(url)
            .header("X-Api-Key", &self.credentials.api_key)
            .header("X-Timestamp", &timestamp)
            .header("X-Nonce", &nonce)
            .header("X-Signature", &signature)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| PageError::Transient(describe_transport_error(&e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PageError::Auth {
                status: status.as_u16(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(PageError::Transient(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PageError::Rejected(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&body, 200)
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PageError::Transient(format!("failed to read body: {}", e)))?;
        parse_envelope(&body)
    }
}

fn parse_envelope(body: &str) -> Result<UpstreamPage, PageError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| PageError::Transient(format!("undecodable response body: {}", e)))?;

    if !envelope.success {
        return Err(PageError::Rejected(
            envelope
                .message
                .unwrap_or_else(|| "upstream reported success=false".to_string()),
        ));
    }

    Ok(UpstreamPage {
        records: envelope.records,
        page_info: envelope.page_info,
    })
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Compute the request signature. Public so a receiving side can verify it.
pub fn sign(secret: &str, path: &str, query: &str, timestamp: &str, nonce: &str) -> String {
    let message = format!("GET\n{}\n{}\n{}\n{}", path, query, timestamp, nonce);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}
