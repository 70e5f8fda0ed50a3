//! URL to pipeline dispatch

use tracing::debug;

use super::{PipelineError, Site, SitePipeline};

/// Ordered registry of site pipelines. The first pipeline whose domain
/// predicate matches a URL handles it.
#[derive(Debug, Default)]
pub struct SiteDispatcher {
    pipelines: Vec<SitePipeline>,
}

impl SiteDispatcher {
    pub const fn new() -> Self {
        Self {
            pipelines: Vec::new(),
        }
    }

    /// Every supported store, in default registration order
    pub fn with_default_sites() -> Result<Self, PipelineError> {
        let mut dispatcher = Self::new();
        for site in Site::ALL {
            dispatcher.register(site.pipeline()?);
        }
        Ok(dispatcher)
    }

    /// Append a pipeline. Earlier registrations win ties.
    pub fn register(&mut self, pipeline: SitePipeline) {
        self.pipelines.push(pipeline);
    }

    /// Pipeline for the URL, or `None` when no store claims it
    pub fn resolve(&self, url: &str) -> Option<&SitePipeline> {
        let resolved = self.pipelines.iter().find(|p| p.claims(url));
        match resolved {
            Some(pipeline) => debug!(url, site = %pipeline.site(), "Resolved site pipeline"),
            None => debug!(url, "No site pipeline claims URL"),
        }
        resolved
    }

    pub fn is_supported(&self, url: &str) -> bool {
        self.pipelines.iter().any(|p| p.claims(url))
    }

    pub fn sites(&self) -> Vec<Site> {
        self.pipelines.iter().map(SitePipeline::site).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registration_order() {
        let dispatcher = SiteDispatcher::with_default_sites().unwrap();
        assert_eq!(dispatcher.sites(), Site::ALL.to_vec());
    }

    #[test]
    fn test_resolves_each_store() {
        let dispatcher = SiteDispatcher::with_default_sites().unwrap();
        let site_of = |url: &str| dispatcher.resolve(url).map(SitePipeline::site);

        assert_eq!(site_of("https://store.ui.com/us/en/pro/category/all-unifi-cloud-gateways/products/ucg-max"), Some(Site::UiStore));
        assert_eq!(site_of("https://www.amazon.com/dp/B09B8V1LZ3"), Some(Site::Amazon));
        assert_eq!(site_of("https://www.dell.com/en-us/shop/cty/pdp/spd/poweredge-r760"), Some(Site::Dell));
        assert_eq!(site_of("https://www.bestbuy.com/site/123"), None);
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let mut dispatcher = SiteDispatcher::new();
        dispatcher.register(SitePipeline::new(Site::Dell, r"shop\.example").unwrap());
        dispatcher.register(SitePipeline::new(Site::Amazon, r"example").unwrap());

        let resolved = dispatcher.resolve("https://shop.example/item").unwrap();
        assert_eq!(resolved.site(), Site::Dell);

        let resolved = dispatcher.resolve("https://other.example/item").unwrap();
        assert_eq!(resolved.site(), Site::Amazon);
    }
}
