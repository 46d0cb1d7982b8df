//! Scripted upstream for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use catalog_sync_core::models::UpstreamRecord;

use crate::error::PageError;
use crate::upstream::{PageInfo, PageRequest, UpstreamApi, UpstreamPage};

/// `n` records with ids `SKU-0000..`, all modified an hour ago.
pub fn catalog(n: usize) -> Vec<UpstreamRecord> {
    let modified = Utc::now() - chrono::Duration::hours(1);
    (0..n)
        .map(|i| record(&format!("SKU-{:04}", i), &format!("Item {}", i), modified))
        .collect()
}

pub fn record(id: &str, name: &str, modified: DateTime<Utc>) -> UpstreamRecord {
    json!({
        "id": id,
        "name": name,
        "price": "9.99",
        "stock": 5,
        "category": "Tools",
        "modifiedAt": modified.to_rfc3339(),
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

/// In-process [`UpstreamApi`] serving a fixed record list, honoring
/// `page`, `limit`, and `modifiedSince`, with per-page failure injection.
pub struct ScriptedUpstream {
    records: Mutex<Vec<UpstreamRecord>>,
    failures: Mutex<HashMap<u32, (PageError, u32)>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedUpstream {
    pub fn new(records: Vec<UpstreamRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_records(&self, records: Vec<UpstreamRecord>) {
        *self.records.lock().unwrap() = records;
    }

    /// Fail the next `times` requests for `page` with `error`.
    pub fn fail_page(&self, page: u32, error: PageError, times: u32) {
        self.failures.lock().unwrap().insert(page, (error, times));
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn modified_at(record: &UpstreamRecord) -> Option<DateTime<Utc>> {
    record
        .get("modifiedAt")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl UpstreamApi for ScriptedUpstream {
    async fn fetch_page(&self, request: &PageRequest) -> Result<UpstreamPage, PageError> {
        self.requests.lock().unwrap().push(request.clone());

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some((error, remaining)) = failures.get_mut(&request.page) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(error.clone());
                }
            }
        }

        let all = self.records.lock().unwrap();
        let matching: Vec<&UpstreamRecord> = all
            .iter()
            .filter(|r| match request.modified_since {
                // the upstream filter is inclusive
                Some(since) => modified_at(r).map(|t| t >= since).unwrap_or(true),
                None => true,
            })
            .collect();

        let limit = request.limit.max(1) as usize;
        let start = request.page as usize * limit;
        let records = matching
            .iter()
            .skip(start)
            .take(limit)
            .map(|r| (*r).clone())
            .collect();

        Ok(UpstreamPage {
            records,
            page_info: Some(PageInfo {
                page_count: matching.len().div_ceil(limit) as u32,
                row_count: matching.len() as u64,
            }),
        })
    }
}
