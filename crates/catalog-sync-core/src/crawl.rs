//! Pagination state machine for a full crawl of the upstream catalog.
//!
//! The fetch loop itself lives in the app crate (it needs a network client
//! and a timer). This module owns the decisions: which page comes next,
//! when the crawl is complete, and when it must be abandoned.
//!
//! # Termination
//!
//! | Condition | Result |
//! |-----------|--------|
//! | all `total_pages` consumed | [`CrawlEnd::Exhausted`] |
//! | two consecutive pages with zero records | [`CrawlEnd::EmptyPages`] |
//! | `total_pages` (or the next page) exceeds the page ceiling | [`CrawlAbort::PageCeiling`] |
//! | three consecutive pages failed after retries | [`CrawlAbort::ConsecutiveFailures`] |
//!
//! A failed page that does not hit the consecutive-failure limit is skipped
//! and remembered in [`Crawl::pages_skipped`].

use std::collections::HashMap;

use serde::Serialize;

use crate::mapper::external_id_of;
use crate::models::UpstreamRecord;

/// Hard limits applied to every crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlLimits {
    /// Safety cap on the number of pages a single crawl may visit.
    pub page_ceiling: u32,
    /// Consecutive hard page failures that abort the crawl.
    pub max_consecutive_failures: u32,
    /// Consecutive empty pages that end the crawl early.
    pub max_consecutive_empty: u32,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            page_ceiling: 1000,
            max_consecutive_failures: 3,
            max_consecutive_empty: 2,
        }
    }
}

/// How a completed crawl ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CrawlEnd {
    /// Every advertised page was visited.
    Exhausted,
    /// Stopped early after consecutive empty pages; `at_page` is the last one visited.
    EmptyPages { at_page: u32 },
}

/// Why a crawl was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlAbort {
    PageCeiling { pages: u32, ceiling: u32 },
    ConsecutiveFailures { last_page: u32, failures: u32 },
}

impl std::fmt::Display for CrawlAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrawlAbort::PageCeiling { pages, ceiling } => write!(
                f,
                "upstream reports {} pages, above the safety ceiling of {}",
                pages, ceiling
            ),
            CrawlAbort::ConsecutiveFailures {
                last_page,
                failures,
            } => write!(
                f,
                "{} consecutive page failures (last failed page: {})",
                failures, last_page
            ),
        }
    }
}

/// What the fetch loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStep {
    Fetch(u32),
    Finished(CrawlEnd),
    Aborted(CrawlAbort),
}

/// Result of one page request, after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Records(usize),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Finished(CrawlEnd),
    Aborted(CrawlAbort),
}

/// Explicit crawl state: pages remaining plus the two consecutive counters.
#[derive(Debug, Clone)]
pub struct Crawl {
    limits: CrawlLimits,
    total_pages: u32,
    next_page: u32,
    consecutive_failures: u32,
    consecutive_empty: u32,
    pages_fetched: u32,
    pages_skipped: Vec<u32>,
    state: State,
}

impl Crawl {
    pub fn new(total_pages: u32, limits: CrawlLimits) -> Self {
        Self {
            limits,
            total_pages,
            next_page: 0,
            consecutive_failures: 0,
            consecutive_empty: 0,
            pages_fetched: 0,
            pages_skipped: Vec::new(),
            state: State::Running,
        }
    }

    /// Pages needed to hold `total_records` at `page_size` records per page.
    pub fn pages_for(total_records: u64, page_size: u32) -> u32 {
        if page_size == 0 {
            return 0;
        }
        let pages = total_records.div_ceil(u64::from(page_size));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    pub fn next_step(&self) -> CrawlStep {
        match self.state {
            State::Finished(end) => CrawlStep::Finished(end),
            State::Aborted(reason) => CrawlStep::Aborted(reason),
            State::Running => {
                if self.total_pages > self.limits.page_ceiling {
                    CrawlStep::Aborted(CrawlAbort::PageCeiling {
                        pages: self.total_pages,
                        ceiling: self.limits.page_ceiling,
                    })
                } else if self.next_page >= self.total_pages {
                    CrawlStep::Finished(CrawlEnd::Exhausted)
                } else {
                    CrawlStep::Fetch(self.next_page)
                }
            }
        }
    }

    /// Record the outcome of the page returned by the last [`Crawl::next_step`].
    pub fn record(&mut self, page: u32, outcome: PageOutcome) {
        if self.state != State::Running {
            return;
        }
        self.next_page = page.saturating_add(1);

        match outcome {
            PageOutcome::Records(0) => {
                self.pages_fetched += 1;
                self.consecutive_failures = 0;
                self.consecutive_empty += 1;
                if self.consecutive_empty >= self.limits.max_consecutive_empty {
                    self.state = State::Finished(CrawlEnd::EmptyPages { at_page: page });
                }
            }
            PageOutcome::Records(_) => {
                self.pages_fetched += 1;
                self.consecutive_failures = 0;
                self.consecutive_empty = 0;
            }
            PageOutcome::Failed => {
                self.pages_skipped.push(page);
                self.consecutive_empty = 0;
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.limits.max_consecutive_failures {
                    self.state = State::Aborted(CrawlAbort::ConsecutiveFailures {
                        last_page: page,
                        failures: self.consecutive_failures,
                    });
                }
            }
        }
    }

    /// Adopt the page count an upstream page response reported. The upstream
    /// is authoritative over the estimate derived from the probe.
    pub fn revise_total(&mut self, reported_pages: u32) {
        if reported_pages > 0 {
            self.total_pages = reported_pages;
        }
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn pages_skipped(&self) -> &[u32] {
        &self.pages_skipped
    }
}

/// Drop duplicate records by external id.
///
/// Overlapping pages can return the same record twice while upstream is
/// being written to. The first-seen position is kept with the last-seen
/// content. Records without an id are passed through untouched; they fail
/// reconciliation later, where the failure is visible in the run's errors.
///
/// Returns the unique records and the number of duplicates dropped.
pub fn dedupe_records(records: Vec<UpstreamRecord>) -> (Vec<UpstreamRecord>, usize) {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<UpstreamRecord> = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for record in records {
        match external_id_of(&record) {
            Some(id) => match positions.get(&id) {
                Some(&pos) => {
                    unique[pos] = record;
                    dropped += 1;
                }
                None => {
                    positions.insert(id, unique.len());
                    unique.push(record);
                }
            },
            None => unique.push(record),
        }
    }

    (unique, dropped)
}
