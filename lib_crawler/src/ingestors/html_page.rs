//! # HTML Page Helpers
//!
//! Shared pieces of the scraping fetchers, built on `scraper`.
//!
//! ## Key Features:
//! - **Selectors**: compiled on demand; a bad selector is a parse error, not a panic.
//! - **Site-local timestamps**: Beijing wall-clock times and bare dates into UTC.
//! - **Article cleaning**: re-serializes an article body without presentational
//!   attributes, optionally dropping whole subtrees and everything after a
//!   separator element.
//!
//! `scraper::Html` is not `Send`, so pages are parsed in synchronous functions
//! that return owned values; no document is held across an `.await`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use scraper::{ElementRef, Node, Selector};

use super::FetchError;

/// Attributes removed from every element of a cleaned article.
const STRIPPED_ATTRIBUTES: &[&str] = &[
    "lang", "language", "onmouseover", "onmouseout", "script", "style", "font", "dir", "face",
    "size", "color", "class", "width", "height", "hspace", "border", "valign", "align",
    "background", "bgcolor", "text", "link", "vlink", "alink", "cellpadding", "cellspacing",
    "href", "id", "rel",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Compiles a CSS selector.
pub(crate) fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("selector {css:?}: {e}")))
}

/// Whitespace-trimmed text content of `element`.
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Trimmed, non-empty value of attribute `name` on `found`.
pub(crate) fn attr_of<'a>(found: Option<ElementRef<'a>>, name: &str) -> Option<&'a str> {
    found
        .and_then(|element| element.value().attr(name))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Resolves a site-relative link against `base`; absolute links pass through.
pub(crate) fn absolute_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let base = base.trim_end_matches('/');
    match href.strip_prefix('/') {
        Some(path) => format!("{base}/{path}"),
        None => format!("{base}/{href}"),
    }
}

/// Parses `%Y-%m-%d %H:%M:%S` published as Beijing time (UTC+8).
pub(crate) fn beijing_wall_clock(raw: &str) -> Result<DateTime<Utc>, FetchError> {
    let local = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
        .map_err(|e| FetchError::Parse(format!("timestamp {raw:?}: {e}")))?;
    Ok((local - TimeDelta::hours(8)).and_utc())
}

/// Parses a `%Y-%m-%d` date as midnight UTC.
pub(crate) fn utc_date(raw: &str) -> Result<DateTime<Utc>, FetchError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| FetchError::Parse(format!("date {raw:?}: {e}")))?
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| FetchError::Parse(format!("date {raw:?} has no midnight")))
}

/// Escapes text for inclusion in generated HTML.
pub(crate) fn escape_text(raw: &str) -> String {
    escape(raw, false)
}

fn escape(raw: &str, in_attribute: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// What [`clean_html`] leaves out besides the stripped attributes.
#[derive(Default, Clone, Copy)]
pub(crate) struct CleanRules<'d> {
    /// Elements dropped together with their subtree.
    pub drop_tags: &'static [&'static str],
    /// Elements carrying any of these classes are dropped with their subtree.
    pub drop_classes: &'static [&'static str],
    /// Siblings following this element are dropped; the element itself stays.
    pub cut_after: Option<ElementRef<'d>>,
}

impl CleanRules<'_> {
    fn drops(&self, element: ElementRef<'_>) -> bool {
        let value = element.value();
        self.drop_tags.contains(&value.name())
            || value.classes().any(|class| self.drop_classes.contains(&class))
    }

    fn cuts_after(&self, element: ElementRef<'_>) -> bool {
        self.cut_after.is_some_and(|cut| cut.id() == element.id())
    }
}

/// Serializes `root`, tag included, applying `rules`.
pub(crate) fn clean_html(root: ElementRef<'_>, rules: &CleanRules<'_>) -> String {
    let mut out = String::new();
    write_element(root, rules, &mut out);
    out
}

fn write_element(element: ElementRef<'_>, rules: &CleanRules<'_>, out: &mut String) {
    let value = element.value();
    let name = value.name();

    out.push('<');
    out.push_str(name);
    for (key, attr) in value.attrs() {
        if STRIPPED_ATTRIBUTES.contains(&key) {
            continue;
        }
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(attr, true));
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&escape(text, false)),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                if rules.drops(child) {
                    continue;
                }
                write_element(child, rules, out);
                if rules.cuts_after(child) {
                    break;
                }
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}
