//! Inline-script heuristic tier
//!
//! Last resort before DOM scraping: a regex over raw script text that looks
//! for a quoted product name matching a configured prefix, and a numeric
//! price field in the same script.

use regex::Regex;
use tracing::debug;

use super::normalize::parse_price;
use super::{Extraction, ExtractionStrategy, PageDocument, PipelineError};
use crate::domain::product::ProductRecord;

pub struct InlineScriptStrategy {
    name_pattern: Regex,
    price_pattern: Regex,
}

impl InlineScriptStrategy {
    /// `name_prefix` is a regex fragment the product name must start with,
    /// e.g. `PowerEdge`
    pub fn new(name_prefix: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            name_pattern: Regex::new(&format!(
                r#""(?:productName|product_name|name)"\s*:\s*"({name_prefix}[^"]*)""#
            ))?,
            price_pattern: Regex::new(
                r#""(?:price|salePrice|finalPrice|unitPrice)"\s*:\s*([\d.]+)"#,
            )?,
        })
    }
}

impl ExtractionStrategy for InlineScriptStrategy {
    fn name(&self) -> &'static str {
        "inline-script"
    }

    fn extract(&self, document: &PageDocument) -> Extraction {
        for text in document.script_texts() {
            let Some(name) = self.name_pattern.captures(&text).and_then(|c| c.get(1)) else {
                continue;
            };

            let price = self
                .price_pattern
                .captures(&text)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_price(m.as_str()));

            debug!(name = name.as_str(), price = ?price, "Inline script matched");

            // A named, priced product blob is taken as purchasable
            return Extraction::Found(
                ProductRecord::new(name.as_str(), document.url())
                    .with_price(price)
                    .with_availability(true),
            );
        }
        Extraction::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_matches_named_blob() {
        let doc = PageDocument::parse(
            "https://www.dell.com/p",
            r#"<script>var dl = {"productName": "PowerEdge R660xs Rack Server", "sku": "x", "salePrice": 3249.5};</script>"#,
        );
        let strategy = InlineScriptStrategy::new("PowerEdge").unwrap();

        let Extraction::Found(record) = strategy.extract(&doc) else {
            panic!("expected a record");
        };
        assert_eq!(record.name, "PowerEdge R660xs Rack Server");
        assert_eq!(record.price, Some(Decimal::new(32_495, 1)));
        assert!(record.available);
    }

    #[test]
    fn test_other_names_do_not_fire() {
        let doc = PageDocument::parse(
            "https://www.dell.com/p",
            r#"<script>{"name": "Inspiron 16", "price": 799}</script>"#,
        );
        let strategy = InlineScriptStrategy::new("PowerEdge").unwrap();
        assert_eq!(strategy.extract(&doc), Extraction::NotFound);
    }

    #[test]
    fn test_name_without_price() {
        let doc = PageDocument::parse(
            "https://www.dell.com/p",
            r#"<script>{"name":"PowerEdge T150"}</script>"#,
        );
        let strategy = InlineScriptStrategy::new("PowerEdge").unwrap();

        let Extraction::Found(record) = strategy.extract(&doc) else {
            panic!("expected a record");
        };
        assert!(record.price.is_none());
    }
}
