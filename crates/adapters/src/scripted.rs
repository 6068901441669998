//! Scripted `PageAdapter` over a `SiteFixture`
//!
//! Behaves like a real site driver from the orchestrator's point of view:
//! navigation mutates an internal view, results come from the fixture, and
//! every call is journaled so tests can assert what the crawl actually did.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use orchestrator::{
    CrawlError, ExtractOptions, ExtractedRecord, PageAdapter, Result, ResultItem, ResultStyle,
};

use crate::fixture::{LandingBehavior, SiteFixture};

/// Current listing position of the scripted browser
#[derive(Debug, Clone)]
struct View {
    keyword: String,
    page: u32,
}

pub struct ScriptedAdapter {
    fixture: SiteFixture,
    view: RwLock<Option<View>>,
    /// CAPTCHAs already reported; each blocks exactly once
    consumed_captchas: Mutex<HashSet<(String, u32)>>,
    journal: Mutex<Vec<String>>,
    styles: Mutex<HashMap<String, ResultStyle>>,
}

impl ScriptedAdapter {
    pub fn new(fixture: SiteFixture) -> Self {
        Self {
            fixture,
            view: RwLock::new(None),
            consumed_captchas: Mutex::new(HashSet::new()),
            journal: Mutex::new(Vec::new()),
            styles: Mutex::new(HashMap::new()),
        }
    }

    /// Every adapter call so far, in order
    pub async fn journal(&self) -> Vec<String> {
        self.journal.lock().await.clone()
    }

    /// The last visual style applied to a listing entry
    pub async fn style_of(&self, external_ref: &str) -> Option<ResultStyle> {
        self.styles.lock().await.get(external_ref).copied()
    }

    async fn record(&self, entry: String) {
        self.journal.lock().await.push(entry);
    }
}

#[async_trait]
impl PageAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn perform_search(&self, keyword: &str) -> Result<()> {
        self.record(format!("search:{keyword}")).await;
        *self.view.write().await = Some(View {
            keyword: keyword.to_string(),
            page: 1,
        });
        Ok(())
    }

    async fn get_search_result_links(&self) -> Result<Vec<ResultItem>> {
        let view = self.view.read().await.clone();
        let Some(view) = view else {
            return Err(CrawlError::Adapter("no listing loaded".to_string()));
        };
        self.record(format!("links:{}:{}", view.keyword, view.page))
            .await;

        let pages = self.fixture.pages_for(&view.keyword).unwrap_or(&[]);
        let Some(page) = pages.get(view.page as usize - 1) else {
            return Ok(Vec::new());
        };

        let mut items = Vec::with_capacity(page.results.len());
        for (idx, result) in page.results.iter().enumerate() {
            // Malformed hrefs are real; a crawl skips them instead of dying.
            if let Err(e) = Url::parse(&result.url) {
                tracing::warn!("[Scripted] Skipping malformed link {:?}: {}", result.url, e);
                continue;
            }
            items.push(ResultItem {
                url: result.url.clone(),
                title: result.title.clone(),
                external_ref: format!("{}:{}:{}", view.keyword, view.page, idx),
            });
        }
        Ok(items)
    }

    async fn has_next_page(&self) -> Result<bool> {
        let view = self.view.read().await.clone();
        let Some(view) = view else { return Ok(false) };
        let pages = self.fixture.pages_for(&view.keyword).unwrap_or(&[]);
        Ok((view.page as usize) < pages.len())
    }

    async fn click_next_page(&self) -> Result<()> {
        let mut view = self.view.write().await;
        let Some(view) = view.as_mut() else {
            return Err(CrawlError::Adapter("no listing loaded".to_string()));
        };
        let pages = self.fixture.pages_for(&view.keyword).unwrap_or(&[]);
        if (view.page as usize) >= pages.len() {
            return Err(CrawlError::Adapter(format!(
                "no page after {} for {:?}",
                view.page, view.keyword
            )));
        }
        view.page += 1;
        self.record(format!("next_page:{}:{}", view.keyword, view.page))
            .await;
        Ok(())
    }

    async fn check_and_handle_captcha(&self) -> Result<bool> {
        let view = self.view.read().await.clone();
        let Some(view) = view else { return Ok(false) };
        if !self.fixture.has_captcha(&view.keyword, view.page) {
            return Ok(false);
        }

        let key = (view.keyword.clone(), view.page);
        let mut consumed = self.consumed_captchas.lock().await;
        if consumed.contains(&key) {
            // Solved on the previous encounter.
            return Ok(false);
        }
        consumed.insert(key);
        self.record(format!("captcha:{}:{}", view.keyword, view.page))
            .await;
        Ok(true)
    }

    async fn open_link(&self, url: &str) -> Result<()> {
        self.record(format!("open:{url}")).await;
        match self.fixture.result_by_url(url) {
            Some(_) => Ok(()),
            None => Err(CrawlError::Adapter(format!("dead link {url}"))),
        }
    }

    async fn extract_data_from_landing_page(
        &self,
        url: &str,
        _options: &ExtractOptions,
    ) -> Result<Vec<ExtractedRecord>> {
        self.record(format!("extract:{url}")).await;
        let result = self
            .fixture
            .result_by_url(url)
            .ok_or_else(|| CrawlError::Adapter(format!("dead link {url}")))?;

        match &result.landing {
            LandingBehavior::Extract(records) => Ok(records
                .iter()
                .map(|data| ExtractedRecord {
                    source_url: url.to_string(),
                    data: data.clone(),
                })
                .collect()),
            LandingBehavior::Hang(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(vec![ExtractedRecord {
                    source_url: url.to_string(),
                    data: serde_json::json!({ "late": true }),
                }])
            }
            LandingBehavior::Fail => {
                Err(CrawlError::Adapter(format!("extraction broke on {url}")))
            }
        }
    }

    async fn apply_result_style(&self, external_ref: &str, style: ResultStyle) {
        self.styles
            .lock()
            .await
            .insert(external_ref.to_string(), style);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{simple_result, PageFixture, ResultFixture};

    fn two_page_site() -> ScriptedAdapter {
        ScriptedAdapter::new(
            SiteFixture::new().keyword(
                "rust",
                vec![
                    PageFixture::new(vec![
                        simple_result("https://a.example/1", "one"),
                        simple_result("https://a.example/2", "two"),
                    ]),
                    PageFixture::new(vec![simple_result("https://a.example/3", "three")]),
                ],
            ),
        )
    }

    #[tokio::test]
    async fn test_search_then_paginate() {
        let adapter = two_page_site();
        adapter.perform_search("rust").await.unwrap();
        assert_eq!(adapter.get_search_result_links().await.unwrap().len(), 2);
        assert!(adapter.has_next_page().await.unwrap());

        adapter.click_next_page().await.unwrap();
        let links = adapter.get_search_result_links().await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://a.example/3");
        assert!(!adapter.has_next_page().await.unwrap());
        assert!(adapter.click_next_page().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_keyword_yields_empty_listing() {
        let adapter = two_page_site();
        adapter.perform_search("cobol").await.unwrap();
        assert!(adapter.get_search_result_links().await.unwrap().is_empty());
        assert!(!adapter.has_next_page().await.unwrap());
    }

    #[tokio::test]
    async fn test_captcha_blocks_exactly_once() {
        let adapter = ScriptedAdapter::new(
            SiteFixture::new()
                .keyword(
                    "rust",
                    vec![PageFixture::new(vec![simple_result(
                        "https://a.example/1",
                        "one",
                    )])],
                )
                .captcha_on("rust", 1),
        );

        adapter.perform_search("rust").await.unwrap();
        assert!(adapter.check_and_handle_captcha().await.unwrap());
        // Second encounter: already solved.
        assert!(!adapter.check_and_handle_captcha().await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_link_is_skipped() {
        let adapter = ScriptedAdapter::new(SiteFixture::new().keyword(
            "rust",
            vec![PageFixture::new(vec![
                simple_result("https://a.example/1", "ok"),
                simple_result("not a url at all", "broken"),
            ])],
        ));

        adapter.perform_search("rust").await.unwrap();
        let links = adapter.get_search_result_links().await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://a.example/1");
    }

    #[tokio::test]
    async fn test_failing_landing_errors() {
        let adapter = ScriptedAdapter::new(SiteFixture::new().keyword(
            "rust",
            vec![PageFixture::new(vec![ResultFixture::failing(
                "https://a.example/x",
                "broken",
            )])],
        ));

        adapter.perform_search("rust").await.unwrap();
        adapter.open_link("https://a.example/x").await.unwrap();
        assert!(adapter
            .extract_data_from_landing_page("https://a.example/x", &ExtractOptions::default())
            .await
            .is_err());
        assert_eq!(adapter.journal().await.last().unwrap(), "extract:https://a.example/x");
    }
}
