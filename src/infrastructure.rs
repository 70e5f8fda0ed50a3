//! Infrastructure layer: configuration, logging, persistence, HTTP and
//! page extraction

pub mod config;
pub mod database_connection;
pub mod extraction;
pub mod http_client;
pub mod logging;
pub mod notification;
pub mod product_repository;

// Re-export commonly used items
pub use config::{AppConfig, ConfigError};
pub use database_connection::DatabaseConnection;
pub use extraction::{SiteDispatcher, SitePipeline};
pub use http_client::{HttpClient, HttpClientConfig};
pub use logging::{init_logging, init_logging_with_config};
pub use notification::{LogNotifier, PushoverNotifier};
pub use product_repository::SqliteProductStore;
