//! DOM and meta-tag fallback tier
//!
//! Always produces a record. A page the selectors cannot read comes back
//! with the "Unknown Product" name, which the pipeline treats as a miss.

use regex::Regex;
use scraper::{ElementRef, Selector};
use tracing::debug;

use super::normalize::parse_price;
use super::{
    Extraction, ExtractionStrategy, PageDocument, PipelineError, compile_selector,
    compile_selectors, element_text,
};
use crate::domain::product::{ProductRecord, UNKNOWN_PRODUCT_NAME};

/// Selector and pattern sources for one store's markup
#[derive(Debug, Clone, Default)]
pub struct DomProfile {
    /// Tried in order. `meta` elements contribute their `content` attribute.
    pub name_selectors: Vec<&'static str>,
    /// Stripped from `<title>` text, e.g. a `| Store Name` suffix
    pub title_suffix: Option<&'static str>,
    /// Tried in order, first parseable price wins
    pub price_selectors: Vec<&'static str>,
    /// Element whose text decides availability when present
    pub availability_selector: Option<&'static str>,
    /// Pattern the availability element's text must match to count as in stock
    pub availability_in_stock: Option<&'static str>,
    /// Elements whose enabled presence means the product can be bought
    pub buy_control_selectors: Vec<&'static str>,
    /// Button or link text that means the product can be bought
    pub buy_control_pattern: Option<&'static str>,
    /// Visible text that vetoes any positive signal
    pub negative_pattern: Option<&'static str>,
}

pub struct DomFallbackStrategy {
    name_selectors: Vec<Selector>,
    title_suffix: Option<Regex>,
    price_selectors: Vec<Selector>,
    availability_selector: Option<Selector>,
    availability_in_stock: Option<Regex>,
    buy_control_selectors: Vec<Selector>,
    buy_control_pattern: Option<Regex>,
    clickable: Selector,
    negative_pattern: Option<Regex>,
}

impl DomFallbackStrategy {
    pub fn new(profile: &DomProfile) -> Result<Self, PipelineError> {
        Ok(Self {
            name_selectors: compile_selectors(&profile.name_selectors)?,
            title_suffix: profile.title_suffix.map(Regex::new).transpose()?,
            price_selectors: compile_selectors(&profile.price_selectors)?,
            availability_selector: profile
                .availability_selector
                .map(compile_selector)
                .transpose()?,
            availability_in_stock: profile.availability_in_stock.map(Regex::new).transpose()?,
            buy_control_selectors: compile_selectors(&profile.buy_control_selectors)?,
            buy_control_pattern: profile.buy_control_pattern.map(Regex::new).transpose()?,
            clickable: compile_selector("button, a")?,
            negative_pattern: profile.negative_pattern.map(Regex::new).transpose()?,
        })
    }

    fn extract_name(&self, document: &PageDocument) -> Option<String> {
        self.name_selectors.iter().find_map(|selector| {
            let element = document.select_first(selector)?;
            let raw = match element.value().name() {
                "meta" => element.value().attr("content")?.trim().to_string(),
                "title" => {
                    let raw = element_text(&element);
                    let cleaned = self
                        .title_suffix
                        .as_ref()
                        .map_or_else(|| raw.clone(), |re| re.replace(&raw, "").trim().to_string());
                    if cleaned.is_empty() { raw } else { cleaned }
                }
                _ => element_text(&element),
            };
            (!raw.is_empty()).then_some(raw)
        })
    }

    fn extract_price(&self, document: &PageDocument) -> Option<rust_decimal::Decimal> {
        self.price_selectors.iter().find_map(|selector| {
            let element = document.select_first(selector)?;
            let text = match element.value().name() {
                "meta" => element.value().attr("content")?.to_string(),
                _ => element_text(&element),
            };
            parse_price(&text)
        })
    }

    fn extract_availability(&self, document: &PageDocument) -> bool {
        let element_signal = self
            .availability_selector
            .as_ref()
            .and_then(|selector| document.select_first(selector))
            .map(|element| {
                let text = element_text(&element);
                self.availability_in_stock
                    .as_ref()
                    .is_some_and(|re| re.is_match(&text))
            });

        let available = element_signal.unwrap_or_else(|| self.has_enabled_buy_control(document));

        let vetoed = self
            .negative_pattern
            .as_ref()
            .is_some_and(|negative| document.any_text_matches(negative));
        if available && vetoed {
            debug!(url = document.url(), "Negative availability text overrides buy control");
            return false;
        }
        available
    }

    fn has_enabled_buy_control(&self, document: &PageDocument) -> bool {
        let by_selector = self
            .buy_control_selectors
            .iter()
            .flat_map(|selector| document.html().select(selector))
            .any(|el| is_enabled(&el));

        by_selector
            || self.buy_control_pattern.as_ref().is_some_and(|pattern| {
                document
                    .html()
                    .select(&self.clickable)
                    .any(|el| is_enabled(&el) && pattern.is_match(&element_text(&el)))
            })
    }
}

fn is_enabled(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    value.attr("disabled").is_none()
        && !value
            .attr("aria-disabled")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

impl ExtractionStrategy for DomFallbackStrategy {
    fn name(&self) -> &'static str {
        "dom-fallback"
    }

    fn extract(&self, document: &PageDocument) -> Extraction {
        let name = self
            .extract_name(document)
            .unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string());

        Extraction::Found(
            ProductRecord::new(name, document.url())
                .with_price(self.extract_price(document))
                .with_availability(self.extract_availability(document)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn store_profile() -> DomProfile {
        DomProfile {
            name_selectors: vec!["meta[property='og:title']", "title", "h1"],
            title_suffix: Some(r"\s*[|\-–]\s*Shop.*$"),
            price_selectors: vec!["meta[property='og:price:amount']", ".price"],
            buy_control_pattern: Some(r"(?i)add to cart|buy now"),
            negative_pattern: Some(r"(?i)out of stock|sold out"),
            ..DomProfile::default()
        }
    }

    fn run(profile: &DomProfile, html: &str) -> ProductRecord {
        let doc = PageDocument::parse("https://shop.example/p", html);
        match DomFallbackStrategy::new(profile).unwrap().extract(&doc) {
            Extraction::Found(record) => record,
            Extraction::NotFound => panic!("dom tier always returns a record"),
        }
    }

    #[test]
    fn test_title_suffix_is_stripped() {
        let record = run(
            &store_profile(),
            "<html><head><title>Router X | Shop USA</title></head><body></body></html>",
        );
        assert_eq!(record.name, "Router X");
    }

    #[test]
    fn test_meta_takes_precedence() {
        let record = run(
            &store_profile(),
            r#"<html><head><meta property="og:title" content="Meta Name">
               <meta property="og:price:amount" content="1,299.00">
               <title>Title | Shop</title></head><body><h1>Heading</h1>
               <span class="price">$5.00</span></body></html>"#,
        );
        assert_eq!(record.name, "Meta Name");
        assert_eq!(record.price, Some(Decimal::new(129_900, 2)));
    }

    #[test]
    fn test_enabled_buy_button_means_available() {
        let record = run(
            &store_profile(),
            r#"<h1>Widget</h1><span class="price">$19.99</span><button>Add to Cart</button>"#,
        );
        assert_eq!(record.price, Some(Decimal::new(1999, 2)));
        assert!(record.available);
    }

    #[test]
    fn test_disabled_buy_button_is_ignored() {
        let record = run(
            &store_profile(),
            r#"<h1>Widget</h1><button disabled>Add to Cart</button>
               <a aria-disabled="true" href="/cart">Buy now</a>"#,
        );
        assert!(!record.available);
    }

    #[test]
    fn test_negative_text_overrides_button() {
        let record = run(
            &store_profile(),
            r#"<h1>Widget</h1><button>Add to Cart</button><p>Sold Out</p>"#,
        );
        assert!(!record.available);
    }

    #[test]
    fn test_availability_element_decides() {
        let profile = DomProfile {
            name_selectors: vec!["#productTitle"],
            availability_selector: Some("#availability"),
            availability_in_stock: Some(r"(?i)in stock"),
            buy_control_selectors: vec!["#add-to-cart-button"],
            ..DomProfile::default()
        };

        let record = run(
            &profile,
            r#"<span id="productTitle"> Echo Dot </span>
               <div id="availability"><span>Currently unavailable.</span></div>
               <input id="add-to-cart-button" type="submit">"#,
        );
        assert_eq!(record.name, "Echo Dot");
        assert!(!record.available);

        let record = run(
            &profile,
            r#"<span id="productTitle">Echo Dot</span><input id="add-to-cart-button">"#,
        );
        assert!(record.available);
    }

    #[test]
    fn test_empty_page_yields_sentinel() {
        let record = run(&store_profile(), "<html></html>");
        assert!(!record.is_identified());
        assert!(record.price.is_none());
        assert!(!record.available);
    }
}
