//! Outbound ports: page fetching and notification delivery

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::errors::{FetchError, NotificationError};
use super::product::{Product, ProductRecord};

/// A successfully fetched product page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
    pub body: String,
}

/// One outbound GET per check
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Non-2xx statuses and network failures are errors
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// Push-notification transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_available(&self, record: &ProductRecord) -> Result<(), NotificationError>;

    async fn notify_price_drop(
        &self,
        product: &Product,
        record: &ProductRecord,
        old_price: Decimal,
        new_price: Decimal,
    ) -> Result<(), NotificationError>;

    async fn send_test(&self) -> Result<(), NotificationError>;
}
