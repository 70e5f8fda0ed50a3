//! JSON-LD structured-data tier
//!
//! Reads every `application/ld+json` block, flattens top-level arrays and
//! `@graph` containers, and picks the first node whose `@type` is accepted.

use scraper::Selector;
use serde_json::Value;
use tracing::debug;

use super::normalize::{is_in_stock, value_to_price, value_to_text};
use super::{Extraction, ExtractionStrategy, PageDocument, PipelineError, compile_selector};
use crate::domain::product::{ProductRecord, UNKNOWN_PRODUCT_NAME};

pub struct StructuredDataStrategy {
    accepted_types: Vec<&'static str>,
    script_selector: Selector,
}

impl StructuredDataStrategy {
    /// Accepts `Product` nodes only
    pub fn products() -> Result<Self, PipelineError> {
        Self::with_types(&["Product"])
    }

    /// Accepts `Product` and `ProductGroup` nodes
    pub fn products_and_groups() -> Result<Self, PipelineError> {
        Self::with_types(&["Product", "ProductGroup"])
    }

    pub fn with_types(types: &[&'static str]) -> Result<Self, PipelineError> {
        Ok(Self {
            accepted_types: types.to_vec(),
            script_selector: compile_selector(r#"script[type="application/ld+json"]"#)?,
        })
    }

    /// All parseable JSON-LD nodes in document order, flattened
    fn nodes(&self, document: &PageDocument) -> Vec<Value> {
        let mut nodes = Vec::new();
        for element in document.html().select(&self.script_selector) {
            let text = element.text().collect::<String>();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(text) {
                Ok(value) => flatten_into(value, &mut nodes),
                Err(e) => debug!("Skipping unparseable JSON-LD block: {}", e),
            }
        }
        nodes
    }

    fn accepts(&self, node: &Value) -> bool {
        match node.get("@type") {
            Some(Value::String(t)) => self.accepted_types.contains(&t.as_str()),
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| self.accepted_types.contains(&t)),
            _ => false,
        }
    }
}

impl ExtractionStrategy for StructuredDataStrategy {
    fn name(&self) -> &'static str {
        "structured-data"
    }

    fn extract(&self, document: &PageDocument) -> Extraction {
        let nodes = self.nodes(document);
        let Some(node) = nodes.iter().find(|n| self.accepts(n)) else {
            return Extraction::NotFound;
        };

        debug!(url = document.url(), "Found JSON-LD product node");
        Extraction::Found(record_from_node(node, document.url()))
    }
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_into(graph, out);
            }
            if !map.is_empty() {
                out.push(Value::Object(map));
            }
        }
        _ => {}
    }
}

/// First element of a list, or the value itself
fn first_of(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    }
}

fn offer_of(node: &Value) -> Option<&Value> {
    node.get("offers").and_then(first_of)
}

fn offer_in_stock(offer: &Value) -> bool {
    offer
        .get("availability")
        .and_then(Value::as_str)
        .is_some_and(is_in_stock)
}

/// Pick the offer to read: the node's own offer, else the first in-stock
/// variant's offer, else the first variant's offer.
fn select_offer(node: &Value) -> (Option<&Value>, Option<&Value>) {
    if let Some(offer) = offer_of(node) {
        return (Some(offer), None);
    }

    let variants: Vec<&Value> = node
        .get("hasVariant")
        .map(|v| match v {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        })
        .unwrap_or_default();

    let chosen = variants
        .iter()
        .copied()
        .find(|v| offer_of(v).is_some_and(offer_in_stock))
        .or_else(|| variants.first().copied());

    (chosen.and_then(offer_of), chosen)
}

fn record_from_node(node: &Value, url: &str) -> ProductRecord {
    let (offer, variant) = select_offer(node);

    let name = node
        .get("name")
        .and_then(value_to_text)
        .or_else(|| variant.and_then(|v| v.get("name")).and_then(value_to_text))
        .unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string());

    let price_spec = offer
        .and_then(|o| o.get("priceSpecification"))
        .and_then(first_of);

    let price = offer
        .and_then(|o| o.get("price"))
        .and_then(value_to_price)
        .or_else(|| price_spec.and_then(|s| s.get("price")).and_then(value_to_price))
        .or_else(|| offer.and_then(|o| o.get("lowPrice")).and_then(value_to_price));

    let currency = offer
        .and_then(|o| o.get("priceCurrency"))
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .or_else(|| {
            price_spec
                .and_then(|s| s.get("priceCurrency"))
                .and_then(Value::as_str)
        });

    let available = offer.is_some_and(offer_in_stock);

    ProductRecord::new(name, url)
        .with_price(price)
        .with_currency(currency)
        .with_availability(available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn page(json: &str) -> PageDocument {
        PageDocument::parse(
            "https://store.example/p/1",
            &format!(
                r#"<html><head><script type="application/ld+json">{json}</script></head><body></body></html>"#
            ),
        )
    }

    fn found(extraction: Extraction) -> ProductRecord {
        match extraction {
            Extraction::Found(record) => record,
            Extraction::NotFound => panic!("expected a record"),
        }
    }

    #[test]
    fn test_basic_product_offer() {
        let doc = page(
            r#"{"@type":"Product","offers":{"price":"1299.00","priceCurrency":"EUR",
                "availability":"http://schema.org/InStock"},"name":"Widget"}"#,
        );
        let record = found(StructuredDataStrategy::products().unwrap().extract(&doc));
        assert_eq!(record.name, "Widget");
        assert_eq!(record.price, Some(Decimal::from_str("1299.00").unwrap()));
        assert_eq!(record.currency, "EUR");
        assert!(record.available);
    }

    #[test]
    fn test_graph_and_offer_list() {
        let doc = page(
            r#"{"@context":"https://schema.org","@graph":[
                {"@type":"WebSite","name":"Shop"},
                {"@type":["Product","Thing"],"name":"Switch",
                 "offers":[{"price":59,"availability":"OutOfStock"},{"price":49}]}]}"#,
        );
        let record = found(StructuredDataStrategy::products().unwrap().extract(&doc));
        assert_eq!(record.name, "Switch");
        assert_eq!(record.price, Some(Decimal::from(59)));
        assert!(!record.available);
        assert_eq!(record.currency, "USD");
    }

    #[test]
    fn test_price_specification_fallback() {
        let doc = page(
            r#"[{"@type":"Product","name":"Gateway","offers":{"price":"",
                "priceSpecification":[{"price":"379.00","priceCurrency":"CAD"}],
                "availability":"InStock"}}]"#,
        );
        let record = found(StructuredDataStrategy::products().unwrap().extract(&doc));
        assert_eq!(record.price, Some(Decimal::from(379)));
        assert_eq!(record.currency, "CAD");
    }

    #[test]
    fn test_product_group_prefers_in_stock_variant() {
        let doc = page(
            r#"{"@type":"ProductGroup","name":"PowerEdge R760","hasVariant":[
                {"name":"Base","offers":{"price":"4000","availability":"OutOfStock"}},
                {"name":"Plus","offers":{"price":"5200","availability":"InStock"}}]}"#,
        );

        assert_eq!(
            StructuredDataStrategy::products().unwrap().extract(&doc),
            Extraction::NotFound
        );

        let record = found(StructuredDataStrategy::products_and_groups().unwrap().extract(&doc));
        assert_eq!(record.name, "PowerEdge R760");
        assert_eq!(record.price, Some(Decimal::from(5200)));
        assert!(record.available);
    }

    #[test]
    fn test_nameless_node_yields_sentinel() {
        let doc = page(r#"{"@type":"Product","offers":{"price":"10"}}"#);
        let record = found(StructuredDataStrategy::products().unwrap().extract(&doc));
        assert!(!record.is_identified());
    }

    #[test]
    fn test_malformed_blocks_are_skipped() {
        let doc = PageDocument::parse(
            "u",
            r#"<script type="application/ld+json">{not json</script>
               <script type="application/ld+json">{"@type":"Product","name":"Ok"}</script>"#,
        );
        let record = found(StructuredDataStrategy::products().unwrap().extract(&doc));
        assert_eq!(record.name, "Ok");
    }
}
