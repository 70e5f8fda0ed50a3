//! Push notification transports
//!
//! `PushoverNotifier` posts form-encoded messages to the Pushover API.
//! `LogNotifier` only writes the event to the log and is used when no
//! credentials are configured.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::domain::errors::NotificationError;
use crate::domain::product::{Product, ProductRecord, display_price};
use crate::domain::services::Notifier;
use crate::infrastructure::config::PushoverConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One Pushover message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushoverMessage {
    pub title: String,
    pub message: String,
    pub url: Option<String>,
    pub url_title: Option<String>,
    pub priority: i8,
    pub sound: Option<&'static str>,
}

impl PushoverMessage {
    pub fn available(record: &ProductRecord) -> Self {
        Self {
            title: "Item Available!".to_string(),
            message: format!(
                "{} is now available!\n\n{}",
                record.name,
                display_price(record.price, &record.currency)
            ),
            url: Some(record.source_url.clone()),
            url_title: Some("View Product".to_string()),
            priority: 1,
            sound: Some("cashregister"),
        }
    }

    pub fn price_drop(
        product: &Product,
        record: &ProductRecord,
        old_price: Decimal,
        new_price: Decimal,
    ) -> Self {
        let name = product.display_name.as_deref().unwrap_or(&record.name);
        Self {
            title: "Price Drop!".to_string(),
            message: format!(
                "{name} dropped from {} to {}",
                display_price(Some(old_price), &record.currency),
                display_price(Some(new_price), &record.currency)
            ),
            url: Some(product.url.clone()),
            url_title: Some("View Product".to_string()),
            priority: 0,
            sound: Some("cashregister"),
        }
    }

    pub fn test() -> Self {
        Self {
            title: "Restock Watch Test".to_string(),
            message: "Test notification - Restock Watch is configured correctly!".to_string(),
            url: None,
            url_title: None,
            priority: 0,
            sound: None,
        }
    }

    fn form(&self, config: &PushoverConfig) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("token", config.api_token.clone()),
            ("user", config.user_key.clone()),
            ("title", self.title.clone()),
            ("message", self.message.clone()),
            ("priority", self.priority.to_string()),
        ];
        if let Some(url) = &self.url {
            form.push(("url", url.clone()));
        }
        if let Some(url_title) = &self.url_title {
            form.push(("url_title", url_title.clone()));
        }
        if let Some(sound) = self.sound {
            form.push(("sound", sound.to_string()));
        }
        form
    }
}

pub struct PushoverNotifier {
    client: Client,
    config: PushoverConfig,
}

impl PushoverNotifier {
    pub fn new(config: PushoverConfig) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotificationError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub async fn send(&self, message: &PushoverMessage) -> Result<(), NotificationError> {
        if !self.config.is_configured() {
            warn!("Pushover credentials not configured, skipping notification");
            return Err(NotificationError::NotConfigured);
        }

        let response = self
            .client
            .post(&self.config.api_url)
            .form(&message.form(&self.config))
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send notification: {}", e);
                NotificationError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Pushover API error: {} - {}", status.as_u16(), body);
            return Err(NotificationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        info!(title = %message.title, "Notification sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn notify_available(&self, record: &ProductRecord) -> Result<(), NotificationError> {
        self.send(&PushoverMessage::available(record)).await
    }

    async fn notify_price_drop(
        &self,
        product: &Product,
        record: &ProductRecord,
        old_price: Decimal,
        new_price: Decimal,
    ) -> Result<(), NotificationError> {
        self.send(&PushoverMessage::price_drop(product, record, old_price, new_price))
            .await
    }

    async fn send_test(&self) -> Result<(), NotificationError> {
        self.send(&PushoverMessage::test()).await
    }
}

/// Writes events to the log instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_available(&self, record: &ProductRecord) -> Result<(), NotificationError> {
        let message = PushoverMessage::available(record);
        info!(title = %message.title, url = %record.source_url, "{}", message.message);
        Ok(())
    }

    async fn notify_price_drop(
        &self,
        product: &Product,
        record: &ProductRecord,
        old_price: Decimal,
        new_price: Decimal,
    ) -> Result<(), NotificationError> {
        let message = PushoverMessage::price_drop(product, record, old_price, new_price);
        info!(title = %message.title, url = %product.url, "{}", message.message);
        Ok(())
    }

    async fn send_test(&self) -> Result<(), NotificationError> {
        Err(NotificationError::NotConfigured)
    }
}
