//! # Configuration Modules
//!
//! Process configuration for the crawler: CLI flags, environment fallbacks and
//! docker secrets, plus the conversions into the settings structs the
//! connection and lifecycle layers consume.

/// Provides the `clap` configuration for the crawler process.
pub mod config_crawler;

pub use config_crawler::{parse_site_list, read_secret, ConfigError, CrawlerConfig};
