//! # Fetcher Registry
//!
//! An explicit site → fetcher map, populated once at startup and shared
//! read-only by the dispatcher. Sites without an entry are reported by the
//! dispatcher as per-site errors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::Fetcher;
use crate::models::{CrawlRecord, SiteCode};

pub struct FetcherRegistry<R: CrawlRecord> {
    fetchers: HashMap<R::Site, Arc<dyn Fetcher<R>>>,
}

impl<R: CrawlRecord> Default for FetcherRegistry<R> {
    fn default() -> Self {
        Self {
            fetchers: HashMap::new(),
        }
    }
}

impl<R: CrawlRecord> FetcherRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, site: R::Site, fetcher: Arc<dyn Fetcher<R>>) -> Self {
        self.register(site, fetcher);
        self
    }

    /// Adds or replaces the fetcher for `site`.
    pub fn register(&mut self, site: R::Site, fetcher: Arc<dyn Fetcher<R>>) {
        debug!(kind = %R::KIND, site = site.code(), "Registered fetcher");
        self.fetchers.insert(site, fetcher);
    }

    pub fn get(&self, site: R::Site) -> Option<Arc<dyn Fetcher<R>>> {
        self.fetchers.get(&site).cloned()
    }

    pub fn contains(&self, site: R::Site) -> bool {
        self.fetchers.contains_key(&site)
    }

    /// Registered sites, in code order.
    pub fn sites(&self) -> Vec<R::Site> {
        let mut sites: Vec<R::Site> = self.fetchers.keys().copied().collect();
        sites.sort_by_key(|site| site.code());
        sites
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

impl<R: CrawlRecord> fmt::Debug for FetcherRegistry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherRegistry")
            .field("kind", &R::KIND)
            .field("sites", &self.sites())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestors::FetchError;
    use crate::models::{FlashNewsItem, FlashNewsSite};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct Nothing;

    #[async_trait]
    impl Fetcher<FlashNewsItem> for Nothing {
        async fn fetch(&self, _after: DateTime<Utc>) -> Result<Vec<FlashNewsItem>, FetchError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn lookup_by_site() {
        let registry = FetcherRegistry::<FlashNewsItem>::new()
            .with(FlashNewsSite::WallstreetCn, Arc::new(Nothing))
            .with(FlashNewsSite::Finnhub, Arc::new(Nothing));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(FlashNewsSite::Finnhub).is_some());
        assert!(!registry.contains(FlashNewsSite::Investing));
        assert_eq!(
            registry.sites(),
            vec![FlashNewsSite::Finnhub, FlashNewsSite::WallstreetCn]
        );
    }
}
