//! Declarative in-memory model of a site under crawl
//!
//! A fixture is keywords mapped to listing pages, each page holding results,
//! each result scripting how its landing page behaves. Tests describe a
//! whole crawl scenario in a few lines and hand it to `ScriptedAdapter`.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// How a landing page responds when a detail context works on it
#[derive(Debug, Clone)]
pub enum LandingBehavior {
    /// Extraction succeeds with these records
    Extract(Vec<Value>),
    /// Extraction stalls for this long before succeeding with one record
    Hang(Duration),
    /// Extraction fails outright
    Fail,
}

/// One listing entry and its scripted landing page
#[derive(Debug, Clone)]
pub struct ResultFixture {
    pub url: String,
    pub title: String,
    pub landing: LandingBehavior,
}

impl ResultFixture {
    /// A result whose landing page yields `records` on extraction
    pub fn extracting(url: &str, title: &str, records: Vec<Value>) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            landing: LandingBehavior::Extract(records),
        }
    }

    /// A result whose landing page stalls for `delay` before yielding
    pub fn hanging(url: &str, title: &str, delay: Duration) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            landing: LandingBehavior::Hang(delay),
        }
    }

    /// A result whose landing page breaks extraction
    pub fn failing(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            landing: LandingBehavior::Fail,
        }
    }
}

/// One listing page
#[derive(Debug, Clone, Default)]
pub struct PageFixture {
    pub results: Vec<ResultFixture>,
}

impl PageFixture {
    pub fn new(results: Vec<ResultFixture>) -> Self {
        Self { results }
    }
}

/// The whole scripted site
#[derive(Debug, Clone, Default)]
pub struct SiteFixture {
    keywords: HashMap<String, Vec<PageFixture>>,
    /// (keyword, 1-based page) pairs where a CAPTCHA blocks the page
    captcha_pages: HashSet<(String, u32)>,
}

impl SiteFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the listing pages served for a keyword
    pub fn keyword(mut self, keyword: &str, pages: Vec<PageFixture>) -> Self {
        self.keywords.insert(keyword.to_string(), pages);
        self
    }

    /// Script a CAPTCHA blocking the given page of a keyword. The block is
    /// detected at the next page interaction and reported once.
    pub fn captcha_on(mut self, keyword: &str, page: u32) -> Self {
        self.captcha_pages.insert((keyword.to_string(), page));
        self
    }

    pub fn pages_for(&self, keyword: &str) -> Option<&[PageFixture]> {
        self.keywords.get(keyword).map(Vec::as_slice)
    }

    pub fn has_captcha(&self, keyword: &str, page: u32) -> bool {
        self.captcha_pages.contains(&(keyword.to_string(), page))
    }

    /// Find a result anywhere in the fixture by its url
    pub fn result_by_url(&self, url: &str) -> Option<&ResultFixture> {
        self.keywords
            .values()
            .flatten()
            .flat_map(|page| &page.results)
            .find(|result| result.url == url)
    }

    /// Total number of results across every keyword and page
    pub fn total_results(&self) -> usize {
        self.keywords
            .values()
            .flatten()
            .map(|page| page.results.len())
            .sum()
    }
}

/// Shorthand for a result extracting exactly one contact-style record
pub fn simple_result(url: &str, title: &str) -> ResultFixture {
    ResultFixture::extracting(
        url,
        title,
        vec![serde_json::json!({ "source": url, "contact": "info@example.com" })],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_lookup() {
        let fixture = SiteFixture::new()
            .keyword(
                "rust",
                vec![
                    PageFixture::new(vec![
                        simple_result("https://a.example/1", "one"),
                        simple_result("https://a.example/2", "two"),
                    ]),
                    PageFixture::new(vec![simple_result("https://a.example/3", "three")]),
                ],
            )
            .captcha_on("rust", 2);

        assert_eq!(fixture.pages_for("rust").unwrap().len(), 2);
        assert!(fixture.pages_for("go").is_none());
        assert!(fixture.has_captcha("rust", 2));
        assert!(!fixture.has_captcha("rust", 1));
        assert_eq!(fixture.total_results(), 3);
        assert_eq!(
            fixture.result_by_url("https://a.example/3").unwrap().title,
            "three"
        );
    }
}
