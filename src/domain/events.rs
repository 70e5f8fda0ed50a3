//! Change events and the pure transition rules that produce them

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::product::{Product, ProductRecord, ProductStatus};

/// Notification-worthy state transition observed by a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProductEvent {
    /// Product moved from unknown/unavailable to available
    Available { record: ProductRecord },
    /// Observed price went strictly below the persisted baseline
    PriceDrop {
        product: Product,
        record: ProductRecord,
        #[serde(rename = "oldPrice")]
        old_price: Decimal,
        #[serde(rename = "newPrice")]
        new_price: Decimal,
    },
}

impl ProductEvent {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Available { .. } => "available",
            Self::PriceDrop { .. } => "price_drop",
        }
    }
}

/// Edge-triggered availability rule.
///
/// `previous` is the persisted status, `None` meaning never checked.
pub fn availability_event_due(previous: Option<ProductStatus>, current: ProductStatus) -> bool {
    current == ProductStatus::Available && previous != Some(ProductStatus::Available)
}

/// Strict price-drop rule. Returns `(old, new)` when a drop occurred.
pub fn price_drop(old: Option<Decimal>, new: Option<Decimal>) -> Option<(Decimal, Decimal)> {
    match (old, new) {
        (Some(old), Some(new)) if new < old => Some((old, new)),
        _ => None,
    }
}
