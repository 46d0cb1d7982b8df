//! # Catalog Sync Core
//!
//! Runtime-free logic for the catalog synchronization engine: data models,
//! the field mapper, the pagination state machine, run finalization rules,
//! and the storage traits.
//!
//! This crate contains no tokio, sqlx, network, or filesystem dependencies.
//! Everything here is deterministic given its inputs, which is what lets
//! the app crate's tests drive it with scripted upstreams and an
//! in-memory store.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `UpstreamRecord`, `CatalogItem`, `CatalogRow`, content hashing |
//! | [`mapper`] | Tolerant upstream record → `CatalogItem` mapping |
//! | [`crawl`] | Page iteration state machine and de-duplication |
//! | [`run`] | `SyncStats`, `SyncRun`, and finalization |
//! | [`store`] | `CatalogStore` / `RunLog` traits and an in-memory implementation |

pub mod crawl;
pub mod mapper;
pub mod models;
pub mod run;
pub mod store;
