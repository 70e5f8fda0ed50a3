//! Change orchestrator
//!
//! Drives one check per tracked product: fetch, extract, compare with the
//! persisted state, write the new state plus a history row, then notify.
//! Notification failures are logged and never roll back the write.

use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::{CheckError, StoreError};
use crate::domain::events::{ProductEvent, availability_event_due, price_drop};
use crate::domain::product::{Product, ProductRecord, display_price};
use crate::domain::repositories::{CheckRecord, ProductStore};
use crate::domain::services::{Notifier, PageFetcher};
use crate::infrastructure::extraction::SiteDispatcher;

/// The two independent check cadences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    Availability,
    Price,
}

impl Cadence {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Availability => "availability",
            Self::Price => "price",
        }
    }

    /// Whether a product takes part in this cadence
    pub const fn includes(self, product: &Product) -> bool {
        match self {
            Self::Availability => product.wants_availability_check(),
            Self::Price => product.wants_price_check(),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Pause between consecutive product fetches in a cycle
    pub inter_product_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            inter_product_delay: Duration::from_secs(1),
        }
    }
}

/// Result of checking one product
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// State written; `events` were raised and dispatched
    Updated {
        product: Product,
        record: ProductRecord,
        events: Vec<ProductEvent>,
        notifications_failed: usize,
    },
    /// Extraction could not name the product; nothing was written
    Unidentified { record: ProductRecord },
    /// Price cadence saw no price; nothing was written
    NoPrice { record: ProductRecord },
}

/// Counters for one cadence run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub visited: usize,
    pub checked: usize,
    pub skipped: usize,
    pub failed: usize,
    pub events_fired: usize,
    pub notifications_failed: usize,
    pub cancelled: bool,
}

impl CycleReport {
    fn absorb(&mut self, outcome: &CheckOutcome) {
        match outcome {
            CheckOutcome::Updated {
                events,
                notifications_failed,
                ..
            } => {
                self.checked += 1;
                self.events_fired += events.len();
                self.notifications_failed += notifications_failed;
            }
            CheckOutcome::Unidentified { .. } | CheckOutcome::NoPrice { .. } => self.skipped += 1,
        }
    }
}

/// Per-product async locks so the two cadences never interleave a
/// read-modify-write on the same product
#[derive(Default)]
struct ProductLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProductLocks {
    fn lock_for(&self, product_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(product_id).or_default())
    }
}

pub struct ChangeOrchestrator {
    store: Arc<dyn ProductStore>,
    fetcher: Arc<dyn PageFetcher>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Arc<SiteDispatcher>,
    settings: OrchestratorSettings,
    locks: ProductLocks,
}

impl ChangeOrchestrator {
    pub fn new(
        store: Arc<dyn ProductStore>,
        fetcher: Arc<dyn PageFetcher>,
        notifier: Arc<dyn Notifier>,
        dispatcher: Arc<SiteDispatcher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            notifier,
            dispatcher,
            settings,
            locks: ProductLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        &self.store
    }

    /// Manual single-product check: create the product if needed, then
    /// check it as the availability cadence would
    pub async fn check_product(&self, url: &str) -> Result<CheckOutcome, CheckError> {
        let product = self.store.upsert_product(url, None).await?;
        self.check(&product, Cadence::Availability).await
    }

    /// Run one full cadence over every tracked product.
    ///
    /// Products are visited sequentially with the configured delay between
    /// fetches. A failing product is logged and counted, never fatal.
    /// Cancellation is honoured between products and during the delay.
    pub async fn run_cycle(
        &self,
        cadence: Cadence,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CheckError> {
        info!(%cadence, "Starting check cycle");

        let products = self.store.list_products().await?;
        let mut report = CycleReport::default();
        if products.is_empty() {
            warn!(%cadence, "No products configured to check");
            return Ok(report);
        }

        let mut fetched_any = false;
        for product in &products {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.visited += 1;

            if !cadence.includes(product) {
                debug!(%cadence, product = product.label(), "Product not eligible, skipping");
                report.skipped += 1;
                continue;
            }

            if fetched_any && !self.settings.inter_product_delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(self.settings.inter_product_delay) => {}
                    () = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                }
            }
            fetched_any = true;

            match self.check(product, cadence).await {
                Ok(outcome) => report.absorb(&outcome),
                Err(e) => {
                    warn!(%cadence, product = product.label(), error = %e, "Check failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            %cadence,
            visited = report.visited,
            checked = report.checked,
            skipped = report.skipped,
            failed = report.failed,
            events = report.events_fired,
            notifications_failed = report.notifications_failed,
            cancelled = report.cancelled,
            "Check cycle complete"
        );
        Ok(report)
    }

    /// Check one tracked product
    pub async fn check(&self, product: &Product, cadence: Cadence) -> Result<CheckOutcome, CheckError> {
        let pipeline = self.dispatcher.resolve(&product.url).ok_or_else(|| {
            warn!(url = %product.url, "No scraper found for URL");
            CheckError::no_handler(&product.url)
        })?;

        let page = self.fetcher.fetch(&product.url).await?;
        let record = pipeline.extract(&product.url, &page.body);

        if !record.is_identified() {
            warn!(url = %product.url, "Could not identify product, leaving state unchanged");
            return Ok(CheckOutcome::Unidentified { record });
        }

        info!(
            "Checked {}: {} - {}",
            record.name,
            if record.available { "Available" } else { "Unavailable" },
            display_price(record.price, &record.currency)
        );

        if cadence == Cadence::Price && record.price.is_none() {
            debug!(url = %product.url, "No price observed, skipping price update");
            return Ok(CheckOutcome::NoPrice { record });
        }

        let (updated, events) = self.apply(product.id, &record).await?;
        let notifications_failed = self.dispatch(&events).await;

        Ok(CheckOutcome::Updated {
            product: updated,
            record,
            events,
            notifications_failed,
        })
    }

    /// Compare against the persisted state and write the observation.
    /// Runs under the product's lock.
    async fn apply(
        &self,
        product_id: i64,
        record: &ProductRecord,
    ) -> Result<(Product, Vec<ProductEvent>), CheckError> {
        let lock = self.locks.lock_for(product_id);
        let _guard = lock.lock().await;

        let current = self
            .store
            .get_product_by_id(product_id)
            .await?
            .ok_or(StoreError::ProductNotFound(product_id))?;

        let mut events = Vec::new();
        if current.check_availability_enabled
            && availability_event_due(current.last_status, record.status())
        {
            info!("Item became available: {}", record.name);
            events.push(ProductEvent::Available {
                record: record.clone(),
            });
        }

        let dropped = if current.check_price_enabled {
            price_drop(current.last_price, record.price)
        } else {
            None
        };
        if let Some((old_price, new_price)) = dropped {
            info!(
                "Price drop for {}: {} -> {}",
                current.label(),
                display_price(Some(old_price), &record.currency),
                display_price(Some(new_price), &record.currency)
            );
            events.push(ProductEvent::PriceDrop {
                product: current.clone(),
                record: record.clone(),
                old_price,
                new_price,
            });
        }

        let updated = self
            .store
            .record_check(&CheckRecord {
                product_id,
                status: record.status(),
                price: record.price,
                checked_at: Utc::now(),
                extracted_name: Some(record.name.clone()),
            })
            .await?;

        Ok((updated, events))
    }

    /// Deliver events, returning how many failed
    async fn dispatch(&self, events: &[ProductEvent]) -> usize {
        let mut failed = 0;
        for event in events {
            let result = match event {
                ProductEvent::Available { record } => self.notifier.notify_available(record).await,
                ProductEvent::PriceDrop {
                    product,
                    record,
                    old_price,
                    new_price,
                } => {
                    self.notifier
                        .notify_price_drop(product, record, *old_price, *new_price)
                        .await
                }
            };

            if let Err(e) = result {
                warn!(event = event.kind(), error = %e, "Notification failed, state already saved");
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{FetchError, NotificationError};
    use crate::domain::product::ProductStatus;
    use crate::test_utils::{
        InMemoryProductStore, RecordingNotifier, SentNotification, StaticFetcher, TestDatabase,
    };
    use rust_decimal::Decimal;

    const URL: &str = "https://store.ui.com/us/en/products/udm-pro";

    fn page(name: &str, price: &str, availability: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">
            {{"@type":"Product","name":"{name}","offers":{{"price":"{price}","priceCurrency":"USD","availability":"https://schema.org/{availability}"}}}}
            </script></head><body></body></html>"#
        )
    }

    struct Harness {
        store: Arc<InMemoryProductStore>,
        fetcher: Arc<StaticFetcher>,
        notifier: Arc<RecordingNotifier>,
        orchestrator: ChangeOrchestrator,
    }

    fn harness_with(notifier: RecordingNotifier) -> Harness {
        let store = Arc::new(InMemoryProductStore::new());
        let fetcher = Arc::new(StaticFetcher::new());
        let notifier = Arc::new(notifier);
        let orchestrator = ChangeOrchestrator::new(
            store.clone(),
            fetcher.clone(),
            notifier.clone(),
            Arc::new(SiteDispatcher::with_default_sites().unwrap()),
            OrchestratorSettings {
                inter_product_delay: Duration::ZERO,
            },
        );
        Harness {
            store,
            fetcher,
            notifier,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingNotifier::new())
    }

    #[tokio::test]
    async fn test_first_available_check_notifies() {
        let h = harness();
        h.fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "InStock"));

        let outcome = h.orchestrator.check_product(URL).await.unwrap();
        let CheckOutcome::Updated { product, events, .. } = outcome else {
            panic!("expected an update");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(product.last_status, Some(ProductStatus::Available));
        assert_eq!(product.last_price, Some(Decimal::new(37_900, 2)));
        assert_eq!(product.display_name.as_deref(), Some("Dream Machine Pro"));
        assert_eq!(
            h.notifier.sent(),
            vec![SentNotification::Available {
                name: "Dream Machine Pro".into(),
                url: URL.into()
            }]
        );
    }

    #[tokio::test]
    async fn test_staying_available_does_not_renotify() {
        let h = harness();
        h.fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "InStock"));

        h.orchestrator.check_product(URL).await.unwrap();
        h.orchestrator.check_product(URL).await.unwrap();

        assert_eq!(h.notifier.sent().len(), 1);
        let product = h.store.get_product(URL).await.unwrap().unwrap();
        assert_eq!(h.store.get_history(product.id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_to_available_fires_once() {
        let h = harness();
        h.fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "OutOfStock"));
        h.orchestrator.check_product(URL).await.unwrap();
        assert!(h.notifier.sent().is_empty());

        h.fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "InStock"));
        h.orchestrator.check_product(URL).await.unwrap();
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_price_drop_fires_on_price_cadence() {
        let h = harness();
        h.fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "OutOfStock"));
        h.orchestrator.check_product(URL).await.unwrap();

        h.fetcher.set_page(URL, page("Dream Machine Pro", "349.00", "OutOfStock"));
        let report = h
            .orchestrator
            .run_cycle(Cadence::Price, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.events_fired, 1);
        assert_eq!(
            h.notifier.sent(),
            vec![SentNotification::PriceDrop {
                url: URL.into(),
                old_price: Decimal::new(37_900, 2),
                new_price: Decimal::new(34_900, 2),
            }]
        );
    }

    #[tokio::test]
    async fn test_price_increase_is_silent() {
        let h = harness();
        h.fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "OutOfStock"));
        h.orchestrator.check_product(URL).await.unwrap();

        h.fetcher.set_page(URL, page("Dream Machine Pro", "399.00", "OutOfStock"));
        h.orchestrator
            .run_cycle(Cadence::Price, &CancellationToken::new())
            .await
            .unwrap();

        assert!(h.notifier.sent().is_empty());
        let product = h.store.get_product(URL).await.unwrap().unwrap();
        assert_eq!(product.last_price, Some(Decimal::new(39_900, 2)));
    }

    #[tokio::test]
    async fn test_unidentified_page_leaves_state_untouched() {
        let h = harness();
        h.fetcher.set_page(URL, "<html><body><p>Access denied</p></body></html>");

        let outcome = h.orchestrator.check_product(URL).await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Unidentified { .. }));

        let product = h.store.get_product(URL).await.unwrap().unwrap();
        assert_eq!(product.last_status, None);
        assert!(h.store.get_history(product.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_url_is_no_handler() {
        let h = harness();
        let err = h
            .orchestrator
            .check_product("https://shop.example.org/item")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::NoHandler { .. }));
        assert!(h.fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_write() {
        let h = harness();
        h.fetcher.set_error(
            URL,
            FetchError::HttpStatus {
                status: 503,
                url: URL.into(),
            },
        );

        let err = h.orchestrator.check_product(URL).await.unwrap_err();
        assert!(matches!(err, CheckError::Transport(_)));
        let product = h.store.get_product(URL).await.unwrap().unwrap();
        assert!(product.last_checked_at.is_none());
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_state() {
        let h = harness_with(RecordingNotifier::failing(NotificationError::Api {
            status: 500,
            body: "down".into(),
        }));
        h.fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "InStock"));

        let outcome = h.orchestrator.check_product(URL).await.unwrap();
        assert!(matches!(
            outcome,
            CheckOutcome::Updated {
                notifications_failed: 1,
                ..
            }
        ));
        assert_eq!(h.notifier.attempts(), 1);

        // The write stuck, so the next check sees no transition
        h.orchestrator.check_product(URL).await.unwrap();
        assert_eq!(h.notifier.attempts(), 1);
    }

    #[tokio::test]
    async fn test_cycle_skips_disabled_and_counts_failures() {
        let h = harness();
        let other = "https://store.ui.com/us/en/products/udr";
        let broken = "https://store.ui.com/us/en/products/missing";
        h.fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "InStock"));
        h.fetcher.set_page(other, page("Dream Router", "199.00", "InStock"));

        h.store.upsert_product(URL, None).await.unwrap();
        let disabled = h.store.upsert_product(other, None).await.unwrap();
        h.store.upsert_product(broken, None).await.unwrap();
        h.store
            .set_check_flags(disabled.id, Some(false), None)
            .await
            .unwrap();

        let report = h
            .orchestrator
            .run_cycle(Cadence::Availability, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.visited, 3);
        assert_eq!(report.checked, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert!(!h.fetcher.requests().contains(&other.to_string()));
    }

    #[tokio::test]
    async fn test_price_cadence_without_price_writes_nothing() {
        let h = harness();
        h.fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "InStock"));
        h.orchestrator.check_product(URL).await.unwrap();

        h.fetcher.set_page(
            URL,
            r#"<html><head><script type="application/ld+json">
            {"@type":"Product","name":"Dream Machine Pro","offers":{"availability":"InStock"}}
            </script></head></html>"#,
        );
        let report = h
            .orchestrator
            .run_cycle(Cadence::Price, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        let product = h.store.get_product(URL).await.unwrap().unwrap();
        assert_eq!(h.store.get_history(product.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_stops_early() {
        let h = harness();
        h.store.upsert_product(URL, None).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = h
            .orchestrator
            .run_cycle(Cadence::Availability, &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.visited, 0);
        assert!(h.fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_cadences_serialize_on_one_product() {
        let db = TestDatabase::new().await.unwrap();
        let store = db.store();
        let fetcher = Arc::new(StaticFetcher::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let orchestrator = ChangeOrchestrator::new(
            store.clone(),
            fetcher.clone(),
            notifier.clone(),
            Arc::new(SiteDispatcher::with_default_sites().unwrap()),
            OrchestratorSettings {
                inter_product_delay: Duration::ZERO,
            },
        );

        let product = store.upsert_product(URL, None).await.unwrap();
        fetcher.set_page(URL, page("Dream Machine Pro", "379.00", "InStock"));
        // Both fetches are in flight before either cycle writes
        fetcher.set_delay(Duration::from_millis(50));

        let cancel = CancellationToken::new();
        let (availability, price) = tokio::join!(
            orchestrator.run_cycle(Cadence::Availability, &cancel),
            orchestrator.run_cycle(Cadence::Price, &cancel),
        );
        let availability = availability.unwrap();
        let price = price.unwrap();

        assert_eq!(availability.checked + price.checked, 2);
        assert_eq!(availability.events_fired + price.events_fired, 1);
        assert_eq!(
            notifier.sent(),
            vec![SentNotification::Available {
                name: "Dream Machine Pro".into(),
                url: URL.into(),
            }]
        );

        let after = store.get_product_by_id(product.id).await.unwrap().unwrap();
        assert_eq!(after.last_status, Some(ProductStatus::Available));
        assert_eq!(after.last_price, Some(Decimal::new(37_900, 2)));
        assert_eq!(store.get_history(product.id, 10).await.unwrap().len(), 2);
    }
}
