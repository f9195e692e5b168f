//! # Site and Source Codes
//!
//! Every crawlable site is identified by a short upper-case code. The same code
//! is written to the `site` column, used as the log field for per-site units and
//! accepted (case-insensitively) in the `ACTIVATED_*_SITES` settings.
//!
//! Sources describe where an item originally came from. Unknown source strings
//! coming back from an upstream API fold into `OTHERS` instead of failing.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a configuration or database value does not name a known code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} code: {value:?}")]
pub struct ParseCodeError {
    /// Which code family was being parsed (e.g. `"flash news site"`).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Behaviour shared by all site enumerations, so the engine can key fetchers,
/// watermarks and log fields by site without knowing which item kind it handles.
pub trait SiteCode:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + FromStr<Err = ParseCodeError> + Send + Sync + 'static
{
    /// Upper-case code as stored in the database.
    fn code(&self) -> &'static str;
}

/// Generates a closed code enumeration with `as_str`, `ALL`, `Display` and a
/// case-insensitive `FromStr`.
macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $family:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $code:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $code)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Upper-case code as stored in the database.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $code,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseCodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| ParseCodeError {
                        kind: $family,
                        value: s.to_string(),
                    })
            }
        }
    };
}

code_enum! {
    /// Sites that publish short, timestamped flash news.
    FlashNewsSite, "flash news site" {
        ChainCatcher => "CHAINCATCHER",
        Finnhub => "FINNHUB",
        WallstreetCn => "WALLSTREETCN",
        Investing => "INVESTING",
        YFinance => "YFINANCE",
    }
}

code_enum! {
    /// Sites that publish long-form articles.
    ArticleSite, "article site" {
        ChainCatcher => "CHAINCATCHER",
        Glassnode => "GLASSNODE",
    }
}

code_enum! {
    /// Original publishers of flash news items.
    FlashNewsSource, "flash news source" {
        Investing => "INVESTING",
        YFinance => "YFINANCE",
        ChainCatcher => "CHAINCATCHER",
        CoinDesk => "COINDESK",
        CoinTelegraph => "COINTELEGRAPH",
        Cnbc => "CNBC",
        MarketWatch => "MARKETWATCH",
        WallstreetCn => "WALLSTREETCN",
        Others => "OTHERS",
    }
}

code_enum! {
    /// Original publishers of articles.
    ArticleSource, "article source" {
        Investing => "INVESTING",
        YFinance => "YFINANCE",
        ChainCatcher => "CHAINCATCHER",
        CoinDesk => "COINDESK",
        Glassnode => "GLASSNODE",
        Others => "OTHERS",
    }
}

impl SiteCode for FlashNewsSite {
    fn code(&self) -> &'static str {
        self.as_str()
    }
}

impl SiteCode for ArticleSite {
    fn code(&self) -> &'static str {
        self.as_str()
    }
}

impl FlashNewsSource {
    /// Maps an upstream publisher name onto a known source, defaulting to `OTHERS`.
    pub fn from_code_or_others(raw: &str) -> Self {
        raw.parse().unwrap_or(FlashNewsSource::Others)
    }
}

impl ArticleSource {
    /// Maps an upstream publisher name onto a known source, defaulting to `OTHERS`.
    pub fn from_code_or_others(raw: &str) -> Self {
        raw.parse().unwrap_or(ArticleSource::Others)
    }
}
