//! Supported stores and their extraction pipelines

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{
    AppStateStrategy, DomFallbackStrategy, DomProfile, InlineScriptStrategy, PipelineError,
    SitePipeline, StructuredDataStrategy,
};

/// Visible text that marks a product as not purchasable
const NEGATIVE_TEXT: &str = r"(?i)out of stock|sold out|unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Site {
    UiStore,
    Amazon,
    Dell,
}

impl Site {
    /// Default registration order
    pub const ALL: [Self; 3] = [Self::UiStore, Self::Amazon, Self::Dell];

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::UiStore => "UI Store",
            Self::Amazon => "Amazon",
            Self::Dell => "Dell",
        }
    }

    /// Regex matched against the full URL
    pub const fn domain_pattern(self) -> &'static str {
        match self {
            Self::UiStore => r"store\.ui\.com",
            Self::Amazon => r"amazon\.(com|co\.uk|ca|de|fr|it|es|co\.jp|com\.au)",
            Self::Dell => r"dell\.com",
        }
    }

    /// Build this store's tiered pipeline
    pub fn pipeline(self) -> Result<SitePipeline, PipelineError> {
        let pipeline = SitePipeline::new(self, self.domain_pattern())?;

        let pipeline = match self {
            Self::UiStore => pipeline
                .with_strategy(StructuredDataStrategy::products()?)
                .with_strategy(DomFallbackStrategy::new(&ui_store_profile())?),
            Self::Amazon => pipeline
                .with_strategy(StructuredDataStrategy::products()?)
                .with_strategy(DomFallbackStrategy::new(&amazon_profile())?),
            Self::Dell => pipeline
                .with_strategy(StructuredDataStrategy::products_and_groups()?)
                .with_strategy(AppStateStrategy::new()?)
                .with_strategy(InlineScriptStrategy::new("PowerEdge")?)
                .with_strategy(DomFallbackStrategy::new(&dell_profile())?),
        };
        Ok(pipeline)
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

fn ui_store_profile() -> DomProfile {
    DomProfile {
        name_selectors: vec!["h1"],
        price_selectors: vec!["[class*='price']", "[class*='Price']"],
        buy_control_pattern: Some(r"(?i)add to cart"),
        negative_pattern: Some(NEGATIVE_TEXT),
        ..DomProfile::default()
    }
}

fn amazon_profile() -> DomProfile {
    DomProfile {
        name_selectors: vec!["#productTitle"],
        price_selectors: vec![".a-price .a-offscreen"],
        availability_selector: Some("#availability"),
        availability_in_stock: Some(r"(?i)in stock"),
        buy_control_selectors: vec!["#add-to-cart-button"],
        ..DomProfile::default()
    }
}

fn dell_profile() -> DomProfile {
    DomProfile {
        name_selectors: vec!["meta[property='og:title']", "title", "h1"],
        title_suffix: Some(r"\s*[|\-–]\s*Dell.*$"),
        price_selectors: vec![
            "meta[property='og:price:amount']",
            "[data-testid='product-price']",
            ".pd-price",
            ".ps-price",
            ".product-price",
            "[class*='starting-price']",
            "[class*='price']",
        ],
        buy_control_pattern: Some(r"(?i)add to cart|configure|buy now|customize"),
        negative_pattern: Some(r"(?i)out of stock|sold out|unavailable|discontinued"),
        ..DomProfile::default()
    }
}
