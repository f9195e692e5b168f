//! # Crawl Data Model
//!
//! Shared vocabulary for every other module in the crate:
//!
//! - **`sites`**: closed sets of site and source codes, parsed case-insensitively
//!   from configuration and rendered as the upper-case codes stored in the database.
//! - **`items`**: the two persisted record kinds (flash news and articles), their
//!   MD5 title fingerprint, and the `CrawlRecord` trait that lets the engine treat
//!   both kinds generically.

/// Site and source code enumerations.
pub mod sites;
/// Persisted record types and the `CrawlRecord` abstraction.
pub mod items;

pub use items::{title_md5, ArticleItem, CrawlRecord, FlashNewsItem, ItemKind};
pub use sites::{
    ArticleSite, ArticleSource, FlashNewsSite, FlashNewsSource, ParseCodeError, SiteCode,
};
