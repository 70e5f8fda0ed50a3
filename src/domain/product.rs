//! Product entities
//!
//! `ProductRecord` is the ephemeral result of one extraction attempt.
//! `Product` and `CheckHistoryEntry` are the persisted tracking state owned
//! by the store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder name meaning "extraction could not determine a name".
pub const UNKNOWN_PRODUCT_NAME: &str = "Unknown Product";

/// Currency assumed when a page does not declare one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Normalized result of one extraction attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub name: String,
    pub price: Option<Decimal>,
    pub available: bool,
    #[serde(rename = "sourceUrl")]
    pub source_url: String,
    pub currency: String,
}

impl ProductRecord {
    /// Create a record for a named product with no price, not available
    pub fn new(name: impl Into<String>, source_url: impl Into<String>) -> Self {
        let name = name.into();
        let name = match name.trim() {
            "" => UNKNOWN_PRODUCT_NAME.to_string(),
            trimmed => trimmed.to_string(),
        };

        Self {
            name,
            price: None,
            available: false,
            source_url: source_url.into(),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    /// Record returned when every extraction tier came up empty
    pub fn unidentified(source_url: impl Into<String>) -> Self {
        Self::new(UNKNOWN_PRODUCT_NAME, source_url)
    }

    /// Set the price. Negative prices are dropped.
    #[must_use]
    pub fn with_price(mut self, price: Option<Decimal>) -> Self {
        self.price = price.filter(|p| !p.is_sign_negative());
        self
    }

    #[must_use]
    pub const fn with_availability(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Set the currency, keeping the default for missing or blank codes
    #[must_use]
    pub fn with_currency(mut self, currency: Option<&str>) -> Self {
        if let Some(code) = currency.map(str::trim).filter(|c| !c.is_empty()) {
            self.currency = code.to_string();
        }
        self
    }

    /// Whether extraction recovered a real product name
    pub fn is_identified(&self) -> bool {
        self.name != UNKNOWN_PRODUCT_NAME
    }

    pub const fn status(&self) -> ProductStatus {
        ProductStatus::from_available(self.available)
    }
}

/// Persisted availability status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Available,
    Unavailable,
}

impl ProductStatus {
    pub const fn from_available(available: bool) -> Self {
        if available {
            Self::Available
        } else {
            Self::Unavailable
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(format!("unknown product status '{other}'")),
        }
    }
}

/// A tracked product, one per URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub url: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "lastStatus")]
    pub last_status: Option<ProductStatus>,
    #[serde(rename = "lastPrice")]
    pub last_price: Option<Decimal>,
    #[serde(rename = "lastCheckedAt")]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(rename = "checkAvailabilityEnabled")]
    pub check_availability_enabled: bool,
    #[serde(rename = "checkPriceEnabled")]
    pub check_price_enabled: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Name shown to humans: the display name, else the URL
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.url)
    }

    /// Whether the availability cadence should fetch this product
    pub const fn wants_availability_check(&self) -> bool {
        self.check_availability_enabled
    }

    /// Whether the price cadence should fetch this product.
    /// A product with no price baseline cannot produce a price drop.
    pub const fn wants_price_check(&self) -> bool {
        self.check_price_enabled && self.last_price.is_some()
    }
}

/// One row of the append-only check log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckHistoryEntry {
    pub id: i64,
    #[serde(rename = "productId")]
    pub product_id: i64,
    pub status: ProductStatus,
    pub price: Option<Decimal>,
    #[serde(rename = "checkedAt")]
    pub checked_at: DateTime<Utc>,
}

/// Human readable price, e.g. `$1299.00` or `EUR 12.50`
pub fn display_price(price: Option<Decimal>, currency: &str) -> String {
    match price {
        None => "Price unknown".to_string(),
        Some(p) if currency.eq_ignore_ascii_case(DEFAULT_CURRENCY) => format!("${p:.2}"),
        Some(p) => format!("{currency} {p:.2}"),
    }
}

/// Stored amount without a currency, which is not persisted
pub fn display_amount(price: Option<Decimal>) -> String {
    price.map_or_else(|| "-".to_string(), |p| format!("{p:.2}"))
}
