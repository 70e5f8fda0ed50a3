//! Repository interfaces for tracked products
//!
//! The store owns the canonical copy of every `Product`. The orchestrator
//! only reads a transient copy and writes through `record_check`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::errors::StoreResult;
use super::product::{CheckHistoryEntry, Product, ProductStatus};

/// One observation to persist: product update plus history append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRecord {
    pub product_id: i64,
    pub status: ProductStatus,
    pub price: Option<Decimal>,
    pub checked_at: DateTime<Utc>,
    /// Only fills an empty display name, never overwrites one
    pub extracted_name: Option<String>,
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    // Lookup
    async fn get_product(&self, url: &str) -> StoreResult<Option<Product>>;
    async fn get_product_by_id(&self, id: i64) -> StoreResult<Option<Product>>;
    async fn list_products(&self) -> StoreResult<Vec<Product>>;

    /// Create the product if the URL is new. An existing display name wins
    /// over the supplied one.
    async fn upsert_product(&self, url: &str, display_name: Option<&str>) -> StoreResult<Product>;

    /// Atomically update the product fields and append one history entry
    /// with the same timestamp.
    async fn record_check(&self, check: &CheckRecord) -> StoreResult<Product>;

    /// Most-recent-first
    async fn get_history(&self, product_id: i64, limit: u32)
    -> StoreResult<Vec<CheckHistoryEntry>>;

    async fn set_check_flags(
        &self,
        product_id: i64,
        availability: Option<bool>,
        price: Option<bool>,
    ) -> StoreResult<Product>;

    // Administrative only
    async fn delete_product(&self, product_id: i64) -> StoreResult<bool>;

    // Settings
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;
}
