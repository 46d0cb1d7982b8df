//! Paginated fetcher: the I/O half of a crawl.
//!
//! [`Fetcher::probe`] asks for page 0 with a single record and only the id
//! field to learn the record count. [`Fetcher::fetch_pages`] then walks the
//! pages the [`Crawl`] state machine hands out, one request at a time,
//! with a fixed delay between pages and bounded retries per page.
//!
//! | Page error | Handling |
//! |------------|----------|
//! | `Auth` | abort the fetch immediately |
//! | `Transient` | retry up to `max_retries` with exponential backoff, then count as failed |
//! | `Rejected` | count as failed, no retry |

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use catalog_sync_core::crawl::{dedupe_records, Crawl, CrawlEnd, CrawlLimits, CrawlStep, PageOutcome};
use catalog_sync_core::mapper::EXTERNAL_ID;
use catalog_sync_core::models::UpstreamRecord;

use crate::config::UpstreamConfig;
use crate::error::{FetchError, PageError};
use crate::upstream::{PageInfo, PageRequest, UpstreamApi};

/// Tunables for one fetcher.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub page_size: u32,
    pub fields: Vec<String>,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub page_delay: Duration,
    pub limits: CrawlLimits,
}

impl FetchSettings {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            page_size: config.page_size,
            fields: config.fields.clone(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            page_delay: Duration::from_millis(config.page_delay_ms),
            limits: CrawlLimits {
                page_ceiling: config.page_ceiling,
                ..CrawlLimits::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub total_records: u64,
    pub page_info: PageInfo,
}

/// A completed crawl.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub records: Vec<UpstreamRecord>,
    pub total_records: u64,
    pub total_pages: u32,
    pub page_size: u32,
    pub pages_fetched: u32,
    pub pages_skipped: Vec<u32>,
    pub duplicates_dropped: usize,
    pub end: CrawlEnd,
    pub modified_since: Option<DateTime<Utc>>,
}

impl FetchReport {
    /// Whether the snapshot can be trusted to contain every upstream record.
    pub fn is_complete(&self) -> bool {
        self.pages_skipped.is_empty() && self.end == CrawlEnd::Exhausted
    }

    /// Pagination metadata for the run log.
    pub fn details(&self) -> serde_json::Value {
        json!({
            "total_records": self.total_records,
            "total_pages": self.total_pages,
            "page_size": self.page_size,
            "pages_fetched": self.pages_fetched,
            "pages_skipped": self.pages_skipped,
            "duplicates_dropped": self.duplicates_dropped,
            "records_fetched": self.records.len(),
            "end": self.end,
            "modified_since": self
                .modified_since
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        })
    }
}

pub struct Fetcher<'a> {
    api: &'a dyn UpstreamApi,
    settings: &'a FetchSettings,
}

impl<'a> Fetcher<'a> {
    pub fn new(api: &'a dyn UpstreamApi, settings: &'a FetchSettings) -> Self {
        Self { api, settings }
    }

    /// Minimal authenticated request to learn the record count.
    pub async fn probe(
        &self,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<ProbeResult, FetchError> {
        let request = PageRequest {
            page: 0,
            limit: 1,
            fields: vec![EXTERNAL_ID[0].to_string()],
            modified_since,
        };

        let page = match self.request_with_retry(&request).await {
            Ok(page) => page,
            Err(e @ PageError::Auth { .. }) => return Err(FetchError::Auth(e.to_string())),
            Err(e) => return Err(FetchError::Probe(e.to_string())),
        };
        let page_info = page
            .page_info
            .ok_or_else(|| FetchError::Probe("response carried no pageInfo".to_string()))?;

        Ok(ProbeResult {
            total_records: page_info.row_count,
            page_info,
        })
    }

    /// Probe, then crawl every page.
    pub async fn fetch_all(
        &self,
        modified_since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, FetchError> {
        let probe = self.probe(modified_since).await?;
        self.fetch_pages(&probe, modified_since, cancel).await
    }

    /// Crawl the pages implied by an earlier probe.
    pub async fn fetch_pages(
        &self,
        probe: &ProbeResult,
        modified_since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, FetchError> {
        let page_size = self.settings.page_size;
        let mut crawl = Crawl::new(
            Crawl::pages_for(probe.total_records, page_size),
            self.settings.limits,
        );
        let mut records: Vec<UpstreamRecord> = Vec::new();
        let mut first_request = true;

        tracing::info!(
            total_records = probe.total_records,
            total_pages = crawl.total_pages(),
            page_size,
            "starting crawl"
        );

        let end = loop {
            let page = match crawl.next_step() {
                CrawlStep::Fetch(page) => page,
                CrawlStep::Finished(end) => break end,
                CrawlStep::Aborted(reason) => {
                    tracing::error!(%reason, "crawl aborted");
                    return Err(FetchError::Aborted(reason));
                }
            };

            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if !first_request && !self.settings.page_delay.is_zero() {
                tokio::time::sleep(self.settings.page_delay).await;
            }
            first_request = false;

            let request = PageRequest {
                page,
                limit: page_size,
                fields: self.settings.fields.clone(),
                modified_since,
            };

            match self.request_with_retry(&request).await {
                Ok(result) => {
                    if let Some(info) = result.page_info {
                        crawl.revise_total(info.page_count);
                    }
                    let count = result.records.len();
                    tracing::debug!(page, records = count, "page fetched");
                    records.extend(result.records);
                    crawl.record(page, PageOutcome::Records(count));
                }
                Err(e @ PageError::Auth { .. }) => {
                    tracing::error!(page, error = %e, "upstream rejected credentials");
                    return Err(FetchError::Auth(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(page, error = %e, "page failed, skipping");
                    crawl.record(page, PageOutcome::Failed);
                }
            }
        };

        let (records, duplicates_dropped) = dedupe_records(records);
        if duplicates_dropped > 0 {
            tracing::info!(duplicates_dropped, "dropped duplicate records across pages");
        }

        Ok(FetchReport {
            records,
            total_records: probe.total_records,
            total_pages: crawl.total_pages(),
            page_size,
            pages_fetched: crawl.pages_fetched(),
            pages_skipped: crawl.pages_skipped().to_vec(),
            duplicates_dropped,
            end,
            modified_since,
        })
    }

    async fn request_with_retry(
        &self,
        request: &PageRequest,
    ) -> Result<crate::upstream::UpstreamPage, PageError> {
        let mut attempt: u32 = 0;
        loop {
            match self.api.fetch_page(request).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let backoff = self.settings.retry_backoff * (1u32 << (attempt - 1).min(5));
                    tracing::debug!(
                        page = request.page,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retrying page"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
