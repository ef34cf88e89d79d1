//! Client for the headless-browser rendering service (web perceptor).
//!
//! `POST {url}` with `{url, timeout}` returns `{url, body, hrefs}`. The
//! service never returns a non-2xx for page failures; a transport failure on
//! our side degrades to an empty-body response so callers treat both the
//! same way.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RendererConfig;
use crate::text;

/// Extra HTTP budget on top of the page render budget.
const HTTP_BUFFER_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    timeout: u64,
}

/// A deeply rendered page: final URL, body HTML, and absolute hrefs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderResponse {
    pub url: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub hrefs: Option<Vec<String>>,
}

impl RenderResponse {
    fn empty(url: &str) -> Self {
        Self {
            url: url.to_string(),
            body: String::new(),
            hrefs: Some(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Hrefs reported by the service, or extracted from the body when the
    /// service omitted them.
    pub fn links(&self) -> Vec<String> {
        match &self.hrefs {
            Some(hrefs) => hrefs.clone(),
            None => text::extract_links(&self.body, &self.url),
        }
    }
}

/// HTTP client for the rendering service.
#[derive(Clone)]
pub struct RenderClient {
    client: reqwest::Client,
    endpoint: String,
    timeout_ms: u64,
}

impl RenderClient {
    pub fn new(config: &RendererConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms) + Duration::from_secs(HTTP_BUFFER_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: config.url.clone(),
            timeout_ms: config.timeout_ms,
        }
    }

    /// Render a page. Transport failures and malformed responses yield an
    /// empty-body response; callers decide whether that warrants a retry.
    pub async fn render(&self, url: &str) -> RenderResponse {
        let request = RenderRequest {
            url,
            timeout: self.timeout_ms,
        };

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "renderer unreachable");
                return RenderResponse::empty(url);
            }
        };

        if !response.status().is_success() {
            warn!(url, status = %response.status(), "renderer returned error status");
            return RenderResponse::empty(url);
        }

        match response.json::<RenderResponse>().await {
            Ok(rendered) => {
                debug!(url, body_len = rendered.body.len(), "page rendered");
                rendered
            }
            Err(e) => {
                warn!(url, error = %e, "renderer returned malformed payload");
                RenderResponse::empty(url)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_fall_back_to_body_extraction() {
        let rendered = RenderResponse {
            url: "https://example.com/".to_string(),
            body: r#"<a href="/next">next</a>"#.to_string(),
            hrefs: None,
        };
        assert_eq!(rendered.links(), vec!["https://example.com/next".to_string()]);
    }

    #[test]
    fn service_hrefs_take_precedence() {
        let rendered = RenderResponse {
            url: "https://example.com/".to_string(),
            body: r#"<a href="/ignored">x</a>"#.to_string(),
            hrefs: Some(vec!["https://example.com/from-service".to_string()]),
        };
        assert_eq!(
            rendered.links(),
            vec!["https://example.com/from-service".to_string()]
        );
    }

    #[tokio::test]
    async fn unreachable_renderer_degrades_to_empty_body() {
        let client = RenderClient::new(&RendererConfig {
            // Nothing listens here.
            url: "http://127.0.0.1:1/render".to_string(),
            timeout_ms: 100,
        });
        let rendered = client.render("https://example.com/").await;
        assert!(rendered.is_empty());
        assert_eq!(rendered.url, "https://example.com/");
    }
}
