//! End-to-end checks: HTTP fetch, extraction, SQLite state and notification
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use restock_watch::application::{Cadence, ChangeOrchestrator, CheckOutcome, OrchestratorSettings};
use restock_watch::domain::errors::{CheckError, FetchError, NotificationError};
use restock_watch::domain::product::ProductStatus;
use restock_watch::domain::repositories::ProductStore;
use restock_watch::infrastructure::extraction::{
    DomFallbackStrategy, DomProfile, Site, SiteDispatcher, SitePipeline, StructuredDataStrategy,
};
use restock_watch::infrastructure::{HttpClient, HttpClientConfig};
use restock_watch::test_utils::{RecordingNotifier, SentNotification, TestDatabase};

fn product_page(price: &str, availability: &str) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">
        {{"@type":"Product","name":"Cloud Gateway Ultra",
          "offers":{{"price":"{price}","priceCurrency":"USD","availability":"https://schema.org/{availability}"}}}}
        </script></head><body><h1>Cloud Gateway Ultra</h1></body></html>"#
    )
}

/// Pipeline that claims the mock server's host
fn local_dispatcher() -> SiteDispatcher {
    let pipeline = SitePipeline::new(Site::UiStore, r"127\.0\.0\.1")
        .unwrap()
        .with_strategy(StructuredDataStrategy::products().unwrap())
        .with_strategy(
            DomFallbackStrategy::new(&DomProfile {
                name_selectors: vec!["h1"],
                ..DomProfile::default()
            })
            .unwrap(),
        );
    let mut dispatcher = SiteDispatcher::new();
    dispatcher.register(pipeline);
    dispatcher
}

struct Setup {
    server: MockServer,
    _db: TestDatabase,
    store: Arc<dyn ProductStore>,
    notifier: Arc<RecordingNotifier>,
    orchestrator: ChangeOrchestrator,
}

async fn setup(notifier: RecordingNotifier) -> Setup {
    let server = MockServer::start().await;
    let db = TestDatabase::new().await.unwrap();
    let store: Arc<dyn ProductStore> = db.store();
    let notifier = Arc::new(notifier);
    let fetcher = HttpClient::new(HttpClientConfig {
        max_requests_per_second: 100,
        timeout_seconds: 5,
        ..HttpClientConfig::default()
    })
    .unwrap();

    let orchestrator = ChangeOrchestrator::new(
        Arc::clone(&store),
        Arc::new(fetcher),
        notifier.clone(),
        Arc::new(local_dispatcher()),
        OrchestratorSettings {
            inter_product_delay: std::time::Duration::ZERO,
        },
    );

    Setup {
        server,
        _db: db,
        store,
        notifier,
        orchestrator,
    }
}

async fn serve(server: &MockServer, route: &str, body: String) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn restock_then_price_drop_over_http() {
    let s = setup(RecordingNotifier::new()).await;
    let url = format!("{}/products/ucg-ultra", s.server.uri());

    serve(&s.server, "/products/ucg-ultra", product_page("129.00", "OutOfStock")).await;
    s.orchestrator.check_product(&url).await.unwrap();
    assert!(s.notifier.sent().is_empty());

    serve(&s.server, "/products/ucg-ultra", product_page("129.00", "InStock")).await;
    let report = s
        .orchestrator
        .run_cycle(Cadence::Availability, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.events_fired, 1);

    serve(&s.server, "/products/ucg-ultra", product_page("99.00", "InStock")).await;
    let report = s
        .orchestrator
        .run_cycle(Cadence::Price, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.events_fired, 1);

    assert_eq!(
        s.notifier.sent(),
        vec![
            SentNotification::Available {
                name: "Cloud Gateway Ultra".into(),
                url: url.clone()
            },
            SentNotification::PriceDrop {
                url: url.clone(),
                old_price: Decimal::new(12_900, 2),
                new_price: Decimal::new(9_900, 2),
            },
        ]
    );

    let product = s.store.get_product(&url).await.unwrap().unwrap();
    assert_eq!(product.last_status, Some(ProductStatus::Available));
    assert_eq!(product.last_price, Some(Decimal::new(9_900, 2)));
    assert_eq!(s.store.get_history(product.id, 10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn server_error_leaves_state_unchanged() {
    let s = setup(RecordingNotifier::new()).await;
    let url = format!("{}/products/ucg-ultra", s.server.uri());

    serve(&s.server, "/products/ucg-ultra", product_page("129.00", "OutOfStock")).await;
    s.orchestrator.check_product(&url).await.unwrap();
    let before = s.store.get_product(&url).await.unwrap().unwrap();

    s.server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&s.server)
        .await;

    let err = s.orchestrator.check_product(&url).await.unwrap_err();
    assert!(matches!(
        err,
        CheckError::Transport(FetchError::HttpStatus { status: 503, .. })
    ));

    let after = s.store.get_product(&url).await.unwrap().unwrap();
    assert_eq!(after.last_checked_at, before.last_checked_at);
    assert_eq!(s.store.get_history(after.id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn price_disabled_product_is_never_fetched_by_price_cadence() {
    let s = setup(RecordingNotifier::new()).await;
    let url = format!("{}/products/ucg-ultra", s.server.uri());

    serve(&s.server, "/products/ucg-ultra", product_page("129.00", "InStock")).await;
    let CheckOutcome::Updated { product, .. } = s.orchestrator.check_product(&url).await.unwrap()
    else {
        panic!("expected an update");
    };
    s.store
        .set_check_flags(product.id, None, Some(false))
        .await
        .unwrap();

    s.server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("50.00", "InStock")))
        .expect(0)
        .mount(&s.server)
        .await;

    let report = s
        .orchestrator
        .run_cycle(Cadence::Price, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);

    let after = s.store.get_product(&url).await.unwrap().unwrap();
    assert_eq!(after.last_price, Some(Decimal::new(12_900, 2)));
    assert_eq!(s.store.get_history(after.id, 10).await.unwrap().len(), 1);
    s.server.verify().await;
}

#[tokio::test]
async fn failed_notification_is_not_retried_next_cycle() {
    let s = setup(RecordingNotifier::failing(NotificationError::Request(
        "connection reset".into(),
    )))
    .await;
    let url = format!("{}/products/ucg-ultra", s.server.uri());
    serve(&s.server, "/products/ucg-ultra", product_page("129.00", "InStock")).await;

    s.store.upsert_product(&url, None).await.unwrap();
    let cancel = CancellationToken::new();
    let first = s
        .orchestrator
        .run_cycle(Cadence::Availability, &cancel)
        .await
        .unwrap();
    let second = s
        .orchestrator
        .run_cycle(Cadence::Availability, &cancel)
        .await
        .unwrap();

    assert_eq!(first.notifications_failed, 1);
    assert_eq!(second.events_fired, 0);
    assert_eq!(s.notifier.attempts(), 1);
}

#[tokio::test]
async fn unsupported_url_is_rejected_before_fetch() {
    let s = setup(RecordingNotifier::new()).await;
    let err = s
        .orchestrator
        .check_product("https://www.example.org/item")
        .await
        .unwrap_err();
    assert!(matches!(err, CheckError::NoHandler { .. }));
    assert!(s.server.received_requests().await.unwrap_or_default().is_empty());
}
