//! Test utilities for restock-watch
//!
//! In-memory doubles for the store, the fetch boundary and the notifier so
//! orchestrator and scheduler tests run without network or disk. The
//! SQLite-backed `TestDatabase` mirrors the production schema.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::errors::{FetchError, NotificationError, StoreError, StoreResult};
use crate::domain::product::{CheckHistoryEntry, Product, ProductRecord};
use crate::domain::repositories::{CheckRecord, ProductStore};
use crate::domain::services::{FetchedPage, Notifier, PageFetcher};
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::product_repository::SqliteProductStore;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fresh in-memory SQLite database with the schema applied
pub struct TestDatabase {
    pub connection: DatabaseConnection,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let connection = DatabaseConnection::new("sqlite::memory:").await?;
        connection.migrate().await?;
        Ok(Self { connection })
    }

    pub fn store(&self) -> Arc<SqliteProductStore> {
        Arc::new(SqliteProductStore::new(Arc::new(self.connection.pool().clone())))
    }
}

/// Serves canned bodies keyed by URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct StaticFetcher {
    pages: Mutex<HashMap<String, Result<String, FetchError>>>,
    requests: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_page(&self, url: &str, body: impl Into<String>) {
        locked(&self.pages).insert(url.to_string(), Ok(body.into()));
    }

    pub fn set_error(&self, url: &str, error: FetchError) {
        locked(&self.pages).insert(url.to_string(), Err(error));
    }

    /// Hold every response for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *locked(&self.delay) = delay;
    }

    /// URLs fetched so far, in order
    pub fn requests(&self) -> Vec<String> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        locked(&self.requests).push(url.to_string());
        let delay = *locked(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match locked(&self.pages).get(url) {
            Some(Ok(body)) => Ok(FetchedPage {
                status: 200,
                final_url: url.to_string(),
                body: body.clone(),
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

/// A notification the recording notifier received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentNotification {
    Available {
        name: String,
        url: String,
    },
    PriceDrop {
        url: String,
        old_price: Decimal,
        new_price: Decimal,
    },
    Test,
}

/// Records every notification; can be told to fail
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failure: Mutex<Option<NotificationError>>,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: NotificationError) -> Self {
        let notifier = Self::default();
        *locked(&notifier.failure) = Some(error);
        notifier
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        locked(&self.sent).clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn deliver(&self, notification: SentNotification) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = locked(&self.failure).clone() {
            return Err(error);
        }
        locked(&self.sent).push(notification);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_available(&self, record: &ProductRecord) -> Result<(), NotificationError> {
        self.deliver(SentNotification::Available {
            name: record.name.clone(),
            url: record.source_url.clone(),
        })
    }

    async fn notify_price_drop(
        &self,
        product: &Product,
        _record: &ProductRecord,
        old_price: Decimal,
        new_price: Decimal,
    ) -> Result<(), NotificationError> {
        self.deliver(SentNotification::PriceDrop {
            url: product.url.clone(),
            old_price,
            new_price,
        })
    }

    async fn send_test(&self) -> Result<(), NotificationError> {
        self.deliver(SentNotification::Test)
    }
}

#[derive(Default)]
struct MemoryState {
    products: BTreeMap<i64, Product>,
    history: Vec<CheckHistoryEntry>,
    settings: HashMap<String, String>,
    next_product_id: i64,
    next_history_id: i64,
}

/// `ProductStore` held in memory with the same update rules as SQLite
#[derive(Default)]
pub struct InMemoryProductStore {
    state: Mutex<MemoryState>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn get_product(&self, url: &str) -> StoreResult<Option<Product>> {
        Ok(locked(&self.state)
            .products
            .values()
            .find(|p| p.url == url)
            .cloned())
    }

    async fn get_product_by_id(&self, id: i64) -> StoreResult<Option<Product>> {
        Ok(locked(&self.state).products.get(&id).cloned())
    }

    async fn list_products(&self) -> StoreResult<Vec<Product>> {
        Ok(locked(&self.state).products.values().cloned().collect())
    }

    async fn upsert_product(&self, url: &str, display_name: Option<&str>) -> StoreResult<Product> {
        let display_name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        let mut state = locked(&self.state);
        if let Some(existing) = state.products.values_mut().find(|p| p.url == url) {
            if existing.display_name.is_none() {
                existing.display_name = display_name;
            }
            return Ok(existing.clone());
        }

        state.next_product_id += 1;
        let product = Product {
            id: state.next_product_id,
            url: url.to_string(),
            display_name,
            last_status: None,
            last_price: None,
            last_checked_at: None,
            check_availability_enabled: true,
            check_price_enabled: true,
            created_at: Utc::now(),
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn record_check(&self, check: &CheckRecord) -> StoreResult<Product> {
        let mut state = locked(&self.state);
        let product = state
            .products
            .get_mut(&check.product_id)
            .ok_or(StoreError::ProductNotFound(check.product_id))?;

        product.last_status = Some(check.status);
        if check.price.is_some() {
            product.last_price = check.price;
        }
        product.last_checked_at = Some(check.checked_at);
        if product.display_name.is_none() {
            product.display_name = check
                .extracted_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);
        }
        let updated = product.clone();

        state.next_history_id += 1;
        let entry = CheckHistoryEntry {
            id: state.next_history_id,
            product_id: check.product_id,
            status: check.status,
            price: check.price,
            checked_at: check.checked_at,
        };
        state.history.push(entry);
        Ok(updated)
    }

    async fn get_history(
        &self,
        product_id: i64,
        limit: u32,
    ) -> StoreResult<Vec<CheckHistoryEntry>> {
        let state = locked(&self.state);
        let mut entries: Vec<_> = state
            .history
            .iter()
            .filter(|h| h.product_id == product_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.checked_at.cmp(&a.checked_at).then(b.id.cmp(&a.id)));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn set_check_flags(
        &self,
        product_id: i64,
        availability: Option<bool>,
        price: Option<bool>,
    ) -> StoreResult<Product> {
        let mut state = locked(&self.state);
        let product = state
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;
        if let Some(enabled) = availability {
            product.check_availability_enabled = enabled;
        }
        if let Some(enabled) = price {
            product.check_price_enabled = enabled;
        }
        Ok(product.clone())
    }

    async fn delete_product(&self, product_id: i64) -> StoreResult<bool> {
        let mut state = locked(&self.state);
        let existed = state.products.remove(&product_id).is_some();
        state.history.retain(|h| h.product_id != product_id);
        Ok(existed)
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(locked(&self.state).settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        locked(&self.state)
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
