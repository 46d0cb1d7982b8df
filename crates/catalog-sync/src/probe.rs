//! Connection prober.
//!
//! Sends the same authenticated minimal request the fetcher opens a crawl
//! with. Never writes to the catalog or the run log, so it is safe to call
//! from health checks as often as needed.

use serde::Serialize;

use crate::fetch::{FetchSettings, Fetcher};
use crate::upstream::{PageInfo, UpstreamApi};

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub reachable: bool,
    pub total_records: u64,
    pub page_info: Option<PageInfo>,
    pub message: String,
}

pub async fn probe_connection(api: &dyn UpstreamApi, settings: &FetchSettings) -> ProbeReport {
    match Fetcher::new(api, settings).probe(None).await {
        Ok(probe) => {
            let pages = catalog_sync_core::crawl::Crawl::pages_for(
                probe.total_records,
                settings.page_size,
            );
            tracing::info!(total_records = probe.total_records, pages, "upstream reachable");
            ProbeReport {
                reachable: true,
                total_records: probe.total_records,
                page_info: Some(probe.page_info),
                message: format!(
                    "upstream reachable: {} records ({} pages of {})",
                    probe.total_records, pages, settings.page_size
                ),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "upstream probe failed");
            ProbeReport {
                reachable: false,
                total_records: 0,
                page_info: None,
                message: e.to_string(),
            }
        }
    }
}
