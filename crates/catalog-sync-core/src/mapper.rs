//! Field mapping from upstream records to [`CatalogItem`]s.
//!
//! Upstream ERPs are inconsistent about field names (`price` vs
//! `salesPrice`, `stock` vs `qtyOnHand`, ...). Each canonical field has an
//! ordered list of aliases; the first alias that is present and carries a
//! usable value wins. Mapping never fails: absent or malformed values
//! degrade to fixed defaults.
//!
//! | Field | Default |
//! |-------|---------|
//! | `name` | `"Product {external_id}"` |
//! | `price` | `0` (also for negative or unparseable values) |
//! | `stock_quantity` | `0` |
//! | `unit` | `"pcs"` |
//! | `category` / `subcategory` | `"Uncategorized"` |
//! | `status` | `active` unless inactive or suspended |
//!
//! Every upstream key that was not consumed by a matching alias is copied
//! verbatim into `raw_metadata`, together with the mapping timestamp.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::models::{
    CatalogItem, ItemStatus, UpstreamRecord, DEFAULT_UNIT, MAPPED_AT_KEY, UNCATEGORIZED,
};

pub const EXTERNAL_ID: &[&str] = &["id", "itemId", "item_id", "uuid", "_key"];
pub const EXTERNAL_CODE: &[&str] = &["code", "itemCode", "item_code", "sku", "number"];
pub const NAME: &[&str] = &["name", "itemName", "item_name", "title"];
pub const DESCRIPTION: &[&str] = &["description", "longDescription", "long_description"];
pub const SHORT_DESCRIPTION: &[&str] = &["shortDescription", "short_description", "summary"];
pub const PRICE: &[&str] = &["price", "salesPrice", "sales_price", "unitPrice", "listPrice"];
pub const STOCK: &[&str] = &[
    "stock",
    "stockQuantity",
    "stock_quantity",
    "quantity",
    "qtyOnHand",
];
pub const UNIT: &[&str] = &["unit", "unitName", "unit_name", "uom"];
pub const CATEGORY: &[&str] = &["category", "categoryName", "category_name", "group", "itemGroup"];
pub const SUBCATEGORY: &[&str] = &["subcategory", "subCategory", "sub_category", "subGroup"];
pub const ACTIVE: &[&str] = &["active", "isActive", "is_active", "enabled"];
pub const SUSPENDED: &[&str] = &["suspended", "isSuspended", "is_suspended", "blocked"];
pub const MODIFIED_AT: &[&str] = &["modifiedAt", "updatedAt", "lastModified", "modified_at", "updated_at"];

/// Every alias the mapper reads, canonical field by field. Requesting this
/// set lets an upstream that honors a field list use any naming the mapper
/// understands.
pub fn known_aliases() -> Vec<&'static str> {
    [
        EXTERNAL_ID,
        EXTERNAL_CODE,
        NAME,
        DESCRIPTION,
        SHORT_DESCRIPTION,
        PRICE,
        STOCK,
        UNIT,
        CATEGORY,
        SUBCATEGORY,
        ACTIVE,
        SUSPENDED,
        MODIFIED_AT,
    ]
    .concat()
}

/// Tracks which upstream keys a mapping consumed.
struct Lookup<'a> {
    raw: &'a UpstreamRecord,
    consumed: HashSet<&'static str>,
}

impl<'a> Lookup<'a> {
    fn new(raw: &'a UpstreamRecord) -> Self {
        Self {
            raw,
            consumed: HashSet::new(),
        }
    }

    /// Try each alias in order; the first whose value converts wins and is
    /// marked consumed.
    fn first<T>(
        &mut self,
        aliases: &[&'static str],
        convert: impl Fn(&Value) -> Option<T>,
    ) -> Option<T> {
        for alias in aliases {
            if let Some(value) = self.raw.get(*alias) {
                if let Some(converted) = convert(value) {
                    self.consumed.insert(*alias);
                    return Some(converted);
                }
            }
        }
        None
    }

    /// Everything not consumed, verbatim.
    fn leftovers(&self) -> serde_json::Map<String, Value> {
        self.raw
            .iter()
            .filter(|(k, _)| !self.consumed.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Map one upstream record into a [`CatalogItem`]. Never fails.
pub fn map_record(raw: &UpstreamRecord, mapped_at: DateTime<Utc>) -> CatalogItem {
    let mut lookup = Lookup::new(raw);

    let external_id = lookup.first(EXTERNAL_ID, as_text).unwrap_or_default();
    let external_code = lookup.first(EXTERNAL_CODE, as_text);
    let name = lookup
        .first(NAME, as_text)
        .unwrap_or_else(|| format!("Product {}", external_id));
    let description = lookup.first(DESCRIPTION, as_text);
    let short_description = lookup.first(SHORT_DESCRIPTION, as_text);
    let price = lookup
        .first(PRICE, as_decimal)
        .filter(|p| !p.is_sign_negative())
        .unwrap_or(Decimal::ZERO);
    let stock_quantity = lookup.first(STOCK, as_integer).unwrap_or(0);
    let unit = lookup
        .first(UNIT, as_text)
        .unwrap_or_else(|| DEFAULT_UNIT.to_string());
    let category = lookup
        .first(CATEGORY, as_text)
        .unwrap_or_else(|| UNCATEGORIZED.to_string());
    let subcategory = lookup
        .first(SUBCATEGORY, as_text)
        .unwrap_or_else(|| UNCATEGORIZED.to_string());
    let active = lookup.first(ACTIVE, as_flag).unwrap_or(true);
    let suspended = lookup.first(SUSPENDED, as_flag).unwrap_or(false);
    let upstream_modified_at = lookup.first(MODIFIED_AT, as_timestamp);

    let status = if active && !suspended {
        ItemStatus::Active
    } else {
        ItemStatus::Inactive
    };

    let mut metadata = lookup.leftovers();
    metadata.insert(
        MAPPED_AT_KEY.to_string(),
        Value::String(mapped_at.to_rfc3339()),
    );

    CatalogItem {
        external_id,
        external_code,
        name,
        description,
        short_description,
        price: price.normalize(),
        stock_quantity,
        unit,
        category,
        subcategory,
        status,
        raw_metadata: Value::Object(metadata),
        upstream_modified_at,
    }
}

/// The upstream identity of a raw record, resolved with the same alias
/// order the mapper uses.
pub fn external_id_of(raw: &UpstreamRecord) -> Option<String> {
    EXTERNAL_ID
        .iter()
        .find_map(|alias| raw.get(*alias).and_then(as_text))
}

// ============ Value coercion ============

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        // Nested lookups like `"category": { "id": 4, "name": "Tools" }`
        Value::Object(obj) => obj.get("name").and_then(as_text),
        _ => None,
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().replace(',', "."),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.replace(',', ".")
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Some(true),
            "false" | "0" | "no" | "n" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
