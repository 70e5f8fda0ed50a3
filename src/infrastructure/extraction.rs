//! Multi-tier product extraction
//!
//! Every supported store gets a [`SitePipeline`]: a domain predicate plus an
//! ordered list of [`ExtractionStrategy`] tiers. Tiers run in strict priority
//! order and the first one that recovers a real product name wins. A page
//! that defeats every tier yields the "Unknown Product" record instead of an
//! error.
//!
//! Extraction is synchronous. `scraper::Html` is not `Send`, so a parsed
//! document never lives across an `.await`.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::product::ProductRecord;

pub mod app_state;
pub mod dispatcher;
pub mod dom_fallback;
pub mod inline_script;
pub mod normalize;
pub mod sites;
pub mod structured_data;

pub use app_state::AppStateStrategy;
pub use dispatcher::SiteDispatcher;
pub use dom_fallback::{DomFallbackStrategy, DomProfile};
pub use inline_script::InlineScriptStrategy;
pub use sites::Site;
pub use structured_data::StructuredDataStrategy;

/// Errors raised while building a pipeline from selector and pattern strings
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Compile a CSS selector, keeping the source text in the error
pub fn compile_selector(selector: &str) -> Result<Selector, PipelineError> {
    Selector::parse(selector).map_err(|e| PipelineError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Compile a list of CSS selectors, preserving order
pub fn compile_selectors(selectors: &[&str]) -> Result<Vec<Selector>, PipelineError> {
    selectors.iter().map(|s| compile_selector(s)).collect()
}

/// A fetched page parsed once and shared by every tier
pub struct PageDocument {
    url: String,
    html: Html,
    body_len: usize,
}

impl PageDocument {
    pub fn parse(url: &str, body: &str) -> Self {
        Self {
            url: url.to_string(),
            html: Html::parse_document(body),
            body_len: body.len(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub const fn html(&self) -> &Html {
        &self.html
    }

    pub const fn body_len(&self) -> usize {
        self.body_len
    }

    /// First element matching the selector
    pub fn select_first(&self, selector: &Selector) -> Option<ElementRef<'_>> {
        self.html.select(selector).next()
    }

    /// Raw text of every non-empty `<script>` element, in document order
    pub fn script_texts(&self) -> impl Iterator<Item = String> + '_ {
        static SCRIPT: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("script").ok());

        SCRIPT
            .as_ref()
            .into_iter()
            .flat_map(|sel| self.html.select(sel))
            .map(|el| el.text().collect::<String>())
            .filter(|text| !text.trim().is_empty())
    }

    /// Whether any visible text node matches the pattern.
    /// Script, style and noscript contents are ignored.
    pub fn any_text_matches(&self, pattern: &Regex) -> bool {
        self.html.root_element().descendants().any(|node| {
            let Some(text) = node.value().as_text() else {
                return false;
            };
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
            !hidden && pattern.is_match(text)
        })
    }
}

impl fmt::Debug for PageDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageDocument")
            .field("url", &self.url)
            .field("body_len", &self.body_len)
            .finish_non_exhaustive()
    }
}

/// Whitespace-collapsed text content of an element
pub fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result of one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Found(ProductRecord),
    NotFound,
}

/// A single extraction tier
pub trait ExtractionStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Must never panic on malformed input
    fn extract(&self, document: &PageDocument) -> Extraction;
}

/// Domain predicate plus ordered tiers for one store
pub struct SitePipeline {
    site: Site,
    domain: Regex,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl SitePipeline {
    pub fn new(site: Site, domain_pattern: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            site,
            domain: Regex::new(domain_pattern)?,
            strategies: Vec::new(),
        })
    }

    /// Append a tier. Tiers run in the order they were added.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl ExtractionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub const fn site(&self) -> Site {
        self.site
    }

    /// Whether this pipeline's domain predicate matches the URL
    pub fn claims(&self, url: &str) -> bool {
        self.domain.is_match(url)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the tiers against a page body
    pub fn extract(&self, url: &str, body: &str) -> ProductRecord {
        let document = PageDocument::parse(url, body);
        self.extract_document(&document)
    }

    /// Run the tiers against an already parsed page
    pub fn extract_document(&self, document: &PageDocument) -> ProductRecord {
        for strategy in &self.strategies {
            match strategy.extract(document) {
                Extraction::Found(record) if record.is_identified() => {
                    debug!(
                        site = %self.site,
                        tier = strategy.name(),
                        name = %record.name,
                        price = ?record.price,
                        available = record.available,
                        "Extraction tier succeeded"
                    );
                    return record;
                }
                Extraction::Found(_) => {
                    debug!(site = %self.site, tier = strategy.name(), "Tier produced no product name");
                }
                Extraction::NotFound => {
                    debug!(site = %self.site, tier = strategy.name(), "Tier found nothing");
                }
            }
        }

        let script_count = document.script_texts().count();
        warn!(
            site = %self.site,
            url = document.url(),
            scripts = script_count,
            html_len = document.body_len(),
            "Could not identify product, page likely requires JavaScript"
        );
        ProductRecord::unidentified(document.url())
    }
}

impl fmt::Debug for SitePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SitePipeline")
            .field("site", &self.site)
            .field("domain", &self.domain.as_str())
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
