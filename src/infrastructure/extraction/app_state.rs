//! Application-state blob tier
//!
//! Server-rendered storefronts ship their hydration state as JSON: either a
//! `<script id="__NEXT_DATA__">` block or a `window.__INITIAL_STATE__ = {...};`
//! style assignment. This tier looks in the well-known places first and then
//! falls back to a bounded search for any object carrying both a name and a
//! price.

use regex::Regex;
use scraper::Selector;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::normalize::{value_to_availability, value_to_price, value_to_text};
use super::{Extraction, ExtractionStrategy, PageDocument, PipelineError, compile_selector};
use crate::domain::product::ProductRecord;

/// Deepest nesting level the search inspects (root is level 0)
pub const MAX_DEPTH: usize = 6;
/// Only this many leading elements of each array are inspected
pub const MAX_LIST_SCAN: usize = 5;

const PAGE_PROPS_PATHS: [&str; 5] = [
    "/product",
    "/productDetails",
    "/productData",
    "/initialData/product",
    "/pdpData/product",
];
const NAME_KEYS: [&str; 3] = ["name", "title", "productName"];
const PRICE_KEYS: [&str; 6] = [
    "finalPrice",
    "salePrice",
    "price",
    "unitPrice",
    "listPrice",
    "startingPrice",
];
const NESTED_PRICE_KEYS: [&str; 3] = ["pricing", "priceInfo", "priceDetails"];
const AVAILABILITY_KEYS: [&str; 5] = [
    "availability",
    "stockStatus",
    "inventoryStatus",
    "inStock",
    "isAvailable",
];

pub struct AppStateStrategy {
    next_data: Selector,
    state_assignment: Regex,
}

impl AppStateStrategy {
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self {
            next_data: compile_selector("script#__NEXT_DATA__")?,
            state_assignment: Regex::new(
                r"window\.__(?:INITIAL_STATE|PRELOADED_STATE|STATE|DATA)__\s*=\s*",
            )?,
        })
    }

    fn from_next_data(&self, document: &PageDocument) -> Option<ProductRecord> {
        let Some(script) = document.select_first(&self.next_data) else {
            debug!(url = document.url(), "No __NEXT_DATA__ script tag found");
            return None;
        };

        let text = script.text().collect::<String>();
        let data: Value = serde_json::from_str(text.trim()).ok()?;

        let page_props = data.pointer("/props/pageProps");
        if let Some(Value::Object(props)) = page_props {
            info!(
                url = document.url(),
                keys = ?props.keys().collect::<Vec<_>>(),
                "__NEXT_DATA__ pageProps found"
            );
        }

        let search_root = page_props.unwrap_or(&data);
        let product = PAGE_PROPS_PATHS
            .iter()
            .filter_map(|path| search_root.pointer(path))
            .find_map(|v| v.as_object().filter(|o| !o.is_empty()))
            .or_else(|| deep_find(search_root, &["name", "price"]))?;

        record_from_object(product, document.url())
    }

    fn from_state_assignment(&self, document: &PageDocument) -> Option<ProductRecord> {
        document.script_texts().find_map(|text| {
            let start = self.state_assignment.find(&text)?.end();
            let state = serde_json::Deserializer::from_str(&text[start..])
                .into_iter::<Value>()
                .next()?
                .ok()?;
            let product = deep_find(&state, &["name", "price"])?;
            record_from_object(product, document.url())
        })
    }
}

impl ExtractionStrategy for AppStateStrategy {
    fn name(&self) -> &'static str {
        "app-state"
    }

    fn extract(&self, document: &PageDocument) -> Extraction {
        self.from_next_data(document)
            .or_else(|| self.from_state_assignment(document))
            .map_or(Extraction::NotFound, Extraction::Found)
    }
}

/// Depth-first search for the first object holding every required key.
///
/// Uses an explicit stack so hostile input cannot exhaust the call stack.
/// Objects deeper than [`MAX_DEPTH`] and array elements past
/// [`MAX_LIST_SCAN`] are never visited.
pub fn deep_find<'a>(root: &'a Value, required: &[&str]) -> Option<&'a Map<String, Value>> {
    let mut stack: Vec<(&Value, usize)> = vec![(root, 0)];

    while let Some((value, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            continue;
        }
        match value {
            Value::Object(map) => {
                if required.iter().all(|k| map.contains_key(*k)) {
                    return Some(map);
                }
                // reversed so the first child is visited first
                stack.extend(map.values().rev().map(|v| (v, depth + 1)));
            }
            Value::Array(items) => {
                let scanned = items.len().min(MAX_LIST_SCAN);
                stack.extend(items[..scanned].iter().rev().map(|v| (v, depth + 1)));
            }
            _ => {}
        }
    }
    None
}

fn name_of(object: &Map<String, Value>) -> Option<String> {
    NAME_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(value_to_text))
}

fn price_of(object: &Map<String, Value>, depth: usize) -> Option<rust_decimal::Decimal> {
    PRICE_KEYS
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(value_to_price)
        .or_else(|| {
            if depth >= MAX_DEPTH {
                return None;
            }
            NESTED_PRICE_KEYS
                .iter()
                .filter_map(|key| object.get(*key).and_then(Value::as_object))
                .find_map(|nested| price_of(nested, depth + 1))
        })
}

fn availability_of(object: &Map<String, Value>) -> bool {
    AVAILABILITY_KEYS
        .iter()
        .filter_map(|key| object.get(*key))
        .find(|v| !v.is_null())
        .is_some_and(value_to_availability)
}

/// Build a record from a product-like object. A name is required.
fn record_from_object(object: &Map<String, Value>, url: &str) -> Option<ProductRecord> {
    let name = name_of(object)?;
    let record = ProductRecord::new(name, url)
        .with_price(price_of(object, 0))
        .with_availability(availability_of(object));

    debug!(
        name = %record.name,
        price = ?record.price,
        available = record.available,
        "Parsed application state"
    );
    Some(record)
}
