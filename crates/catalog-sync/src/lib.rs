//! # Catalog Sync
//!
//! Pulls product records from a paginated ERP API and reconciles them into
//! a local SQLite catalog, keeping an audit log of every run.
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌────────┐   ┌────────────┐   ┌──────────┐
//! │ Upstream API │──▶│ Fetcher  │──▶│ Mapper │──▶│ Reconciler │──▶│  SQLite  │
//! │ (signed GET) │   │ (crawl)  │   │ (core) │   │ (batches)  │   │ catalog  │
//! └──────────────┘   └──────────┘   └────────┘   └────────────┘   └────┬─────┘
//!                          ▲                                          │
//!                          └──────────── SyncEngine ◀──── run log ◀───┘
//!                                            ▲
//!                                  CLI (catsync) / HTTP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`error`] | Error taxonomy (`ConfigError`, `PageError`, `FetchError`, `SyncError`) |
//! | [`upstream`] | `UpstreamApi` trait and the signed reqwest client |
//! | [`fetch`] | Probe and paginated crawl with retries |
//! | [`reconcile`] | Batched create/update/unchanged against the catalog store |
//! | [`sync`] | `SyncEngine`: full and incremental runs, run-log bookkeeping |
//! | [`probe`] | Connection prober for health checks |
//! | [`server`] | Axum trigger surface |
//! | [`runs`] | `catsync runs` output |
//! | [`sqlite_store`] | SQLite `CatalogStore` + `RunLog` |
//! | [`db`] | SQLite pool with WAL mode |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`logging`] | `tracing-subscriber` setup |
//!
//! The mapper, crawl state machine, run finalization rules, and store
//! traits live in [`catalog_sync_core`].

pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod migrate;
pub mod probe;
pub mod reconcile;
pub mod runs;
pub mod server;
pub mod sqlite_store;
pub mod sync;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use catalog_sync_core::store;
pub use sync::{SyncEngine, TriggerResult};
