//! External web search.
//!
//! The scout only needs "query in, URLs out", so the engine sits behind a
//! trait. The default implementation scrapes the DuckDuckGo HTML endpoint,
//! unwrapping its redirect links back to the target URLs.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use inquest_core::Error;

const DDG_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Result URLs for a query, best first.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, Error>;
}

#[derive(Clone, Default)]
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
}

impl DuckDuckGoSearch {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, Error> {
        let response = self
            .client
            .get(DDG_HTML_ENDPOINT)
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let html = response.text().await?;
        let urls = parse_result_links(&html, max_results);
        debug!(query, count = urls.len(), "web search done");
        Ok(urls)
    }
}

/// Pull result anchors out of the DDG HTML page. Hrefs are usually
/// `/l/?uddg=<encoded target>` redirects; decode those, keep direct http(s)
/// links as-is.
fn parse_result_links(html: &str, max_results: usize) -> Vec<String> {
    let Ok(selector) = Selector::parse("a.result__a") else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    let mut urls = Vec::new();
    for element in doc.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if let Some(target) = decode_redirect(href) {
            if !urls.contains(&target) {
                urls.push(target);
            }
        }
        if urls.len() >= max_results {
            break;
        }
    }
    urls
}

fn decode_redirect(href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    // Relative redirect form: resolve against the DDG origin, then unwrap.
    let resolved = Url::parse("https://duckduckgo.com").ok()?.join(href).ok()?;
    resolved
        .query_pairs()
        .find(|(k, _)| k == "uddg")
        .map(|(_, v)| v.into_owned())
        .filter(|target| target.starts_with("http"))
}
