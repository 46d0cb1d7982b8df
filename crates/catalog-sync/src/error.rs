//! Error taxonomy for the sync engine.
//!
//! | Error | Raised by | Effect on the run |
//! |-------|-----------|-------------------|
//! | [`ConfigError`] | startup | fatal, no run is created |
//! | [`PageError`] | one upstream request | retried or counted against the crawl |
//! | [`FetchError`] | the fetcher | run finalized as `failed` |
//! | [`SyncError`] | the orchestrator | surfaced as a failed trigger result |
//!
//! Per-item reconciliation failures are not errors at this level: they are
//! recorded as [`catalog_sync_core::run::ItemError`] data.

use catalog_sync_core::crawl::CrawlAbort;

/// Missing or invalid startup configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(&'static str),

    #[error("invalid upstream endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

/// Failure of a single upstream page request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    /// Upstream rejected the credentials (401/403). Never retried.
    #[error("authentication rejected: HTTP {status}")]
    Auth { status: u16 },

    /// Network failure, timeout, 429, 5xx, or an undecodable body.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Upstream answered but refused the request (other 4xx, `success: false`).
    #[error("upstream rejected page request: {0}")]
    Rejected(String),
}

impl PageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PageError::Transient(_))
    }
}

/// Why a fetch produced no usable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    Auth(String),

    #[error("probe request failed: {0}")]
    Probe(String),

    #[error("fetch aborted: {0}")]
    Aborted(CrawlAbort),

    #[error("incremental fetch skipped pages {pages:?}; watermark not advanced")]
    Incomplete { pages: Vec<u32> },

    #[error("cancelled")]
    Cancelled,
}

/// Run-level failure as seen by a trigger.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Fetch(FetchError),

    #[error("catalog store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("a sync run is already in progress for this source{}", run_suffix(.run_id))]
    AlreadyRunning { run_id: Option<i64> },
}

fn run_suffix(run_id: &Option<i64>) -> String {
    run_id.map(|id| format!(" (run {})", id)).unwrap_or_default()
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(_) => SyncError::Auth(err.to_string()),
            FetchError::Cancelled => SyncError::Cancelled,
            other => SyncError::Fetch(other),
        }
    }
}
