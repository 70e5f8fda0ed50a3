//! Domain module - Core business logic and entities
//!
//! This module contains the tracked-product entities, the change events
//! raised on state transitions, the error taxonomy, and the port traits
//! (store, fetcher, notifier) the application layer depends on.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod errors;
pub mod events;
pub mod product;
pub mod repositories;
pub mod services;

// Re-export commonly used items for convenience
pub use errors::{CheckError, FetchError, NotificationError, StoreError, StoreResult};
pub use events::{ProductEvent, availability_event_due, price_drop};
pub use product::{
    CheckHistoryEntry, DEFAULT_CURRENCY, Product, ProductRecord, ProductStatus,
    UNKNOWN_PRODUCT_NAME,
};
pub use repositories::{CheckRecord, ProductStore};
pub use services::{FetchedPage, Notifier, PageFetcher};
