//! Core data models for the catalog synchronization pipeline.
//!
//! An [`UpstreamRecord`] is what the ERP hands us: an untyped JSON object
//! whose shape is allowed to drift. The [field mapper](crate::mapper) turns
//! it into a [`CatalogItem`], the canonical shape the store understands.
//! A [`CatalogRow`] is a stored item as read back from the catalog, carrying
//! the store-assigned identity and the locally-owned presentation fields.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One raw product record as returned by the upstream API.
pub type UpstreamRecord = serde_json::Map<String, serde_json::Value>;

/// Sentinel used when upstream omits a category or subcategory.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Unit of measure used when upstream omits one.
pub const DEFAULT_UNIT: &str = "pcs";

/// Key under which the mapper stamps the mapping time into `raw_metadata`.
pub const MAPPED_AT_KEY: &str = "_mapped_at";

/// Catalog visibility derived from upstream's active/suspended flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Active,
    Inactive,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ItemStatus::Active),
            "inactive" => Some(ItemStatus::Inactive),
            _ => None,
        }
    }
}

/// A mapped product, ready for reconciliation.
///
/// Every field here is upstream-owned: the sync engine overwrites all of
/// them on update. Human-curated fields live in [`Presentation`] and are
/// never part of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Upstream identity; the join key for reconciliation. Empty when the
    /// upstream record carried no recognizable identifier.
    pub external_id: String,
    /// Upstream's human-readable item number. Not guaranteed unique.
    pub external_code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub price: Decimal,
    /// May be negative in memory; [`CatalogItem::persisted_stock`] is what gets written.
    pub stock_quantity: i64,
    pub unit: String,
    pub category: String,
    pub subcategory: String,
    pub status: ItemStatus,
    /// Unmapped upstream fields plus the mapping timestamp. Opaque to the reconciler.
    pub raw_metadata: serde_json::Value,
    /// Upstream's own last-modified timestamp, when it reports one.
    pub upstream_modified_at: Option<DateTime<Utc>>,
}

impl CatalogItem {
    /// Stock as it may be persisted: never negative.
    pub fn persisted_stock(&self) -> i64 {
        self.stock_quantity.max(0)
    }

    /// SHA-256 over the upstream-owned field set.
    ///
    /// The mapping timestamp inside `raw_metadata` and `upstream_modified_at`
    /// are excluded so that re-syncing an unchanged upstream snapshot yields
    /// the same hash.
    pub fn content_hash(&self) -> String {
        let mut metadata = self.raw_metadata.clone();
        if let Some(obj) = metadata.as_object_mut() {
            obj.remove(MAPPED_AT_KEY);
        }

        let canonical = serde_json::json!({
            "external_id": self.external_id,
            "external_code": self.external_code,
            "name": self.name,
            "description": self.description,
            "short_description": self.short_description,
            "price": self.price.normalize().to_string(),
            "stock_quantity": self.persisted_stock(),
            "unit": self.unit,
            "category": self.category,
            "subcategory": self.subcategory,
            "status": self.status.as_str(),
            "raw_metadata": metadata,
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Locally-owned presentation fields. Written only by admin flows, never by sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    pub image_url: Option<String>,
    pub slug: Option<String>,
    pub published: bool,
}

/// A catalog item as stored, with store-owned identity and timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogRow {
    /// Store-assigned identity. Stable, never reused.
    pub internal_id: i64,
    /// Upstream source label the item belongs to.
    pub source: String,
    pub item: CatalogItem,
    pub content_hash: String,
    pub last_synced_at: DateTime<Utc>,
    pub presentation: Presentation,
}
