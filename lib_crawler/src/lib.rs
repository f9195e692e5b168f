//! # lib_crawler
//!
//! Building blocks of the incremental news crawler, gated by folder-level
//! features so a consumer only compiles what it uses.
//!
//! - `models` (always on): site codes, item records, fingerprints.
//! - `connections`: pooled PostgreSQL client and the item tables.
//! - `ingestors`: site fetchers over a shared HTTP client.
//! - `crawl`: watermarks, dispatcher, scheduler, health endpoint, lifecycle.
//! - `configs`: `clap` process configuration.
//! - `loggers`: global `tracing` subscriber setup.

pub mod models;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "crawl")]
pub mod crawl;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "loggers")]
pub mod loggers;
