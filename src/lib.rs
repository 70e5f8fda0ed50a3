//! Restock Watch - availability and price-drop tracking for e-commerce
//! product pages
//!
//! Product pages are fetched on two cadences, run through a per-site
//! extraction pipeline, compared with the last persisted state, and turned
//! into push notifications when an item comes back in stock or its price
//! drops.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
