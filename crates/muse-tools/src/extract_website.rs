//! extract_website: fetch a page and pull out its brand copy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use muse_core::config::WebsiteConfig;
use muse_core::types::ExecutionContext;

use crate::html::{HtmlExtractor, PageData};
use crate::{ParamType, ParameterSpec, Tool, ToolOutcome, str_param};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; MuseBot/1.0)";

pub struct ExtractWebsiteTool {
    client: reqwest::Client,
    extractor: HtmlExtractor,
}

impl ExtractWebsiteTool {
    pub fn new(config: WebsiteConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            extractor: HtmlExtractor::new(config.max_words)?,
        })
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .header("accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "Request timeout".to_string()
                } else {
                    e.to_string()
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        resp.text().await.map_err(|e| e.to_string())
    }
}

/// Prefix `https://` when no scheme is given, then validate.
pub fn normalize_url(raw: &str) -> Result<String, String> {
    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    url::Url::parse(&candidate)
        .map(|u| u.to_string())
        .map_err(|e| format!("Invalid URL '{raw}': {e}"))
}

/// Shape page data into the `websiteData` payload consumed by later steps.
pub fn website_data(page: &PageData) -> Value {
    json!({
        "url": page.url,
        "title": page.title,
        "description": page.description(),
        "headline": page.h1,
        "sections": page.h2s,
        "heroText": page.hero_text,
        "keyPoints": page.key_bullets,
        "summary": page.summary,
    })
}

#[async_trait]
impl Tool for ExtractWebsiteTool {
    fn name(&self) -> &str {
        "extract_website"
    }

    fn description(&self) -> &str {
        "Extract structured content from a website URL. Use when user wants to create content based on their website or brand. Fast and deterministic."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::required(
            "url",
            ParamType::String,
            "The website URL to extract content from (e.g., example.com)",
        )]
    }

    async fn invoke(
        &self,
        params: Value,
        _context: &mut ExecutionContext,
    ) -> anyhow::Result<ToolOutcome> {
        let Some(raw) = str_param(&params, "url") else {
            return Ok(ToolOutcome::failure("URL is required"));
        };
        let url = match normalize_url(raw) {
            Ok(u) => u,
            Err(e) => return Ok(ToolOutcome::failure(e)),
        };

        let started = Instant::now();
        let html = match self.fetch(&url).await {
            Ok(h) => h,
            Err(e) => return Ok(ToolOutcome::failure(e)),
        };
        debug!(%url, bytes = html.len(), elapsed_ms = started.elapsed().as_millis() as u64, "Fetched page");

        let page = self.extractor.extract(&url, &html);
        info!(
            %url,
            headings = page.h2s.len(),
            bullets = page.key_bullets.len(),
            "extract_website"
        );

        let label = if page.title.is_empty() { url.as_str() } else { page.title.as_str() };
        Ok(ToolOutcome::success(json!({
            "websiteData": website_data(&page),
            "message": format!("Extracted content from {label}. Use this to create relevant content."),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_adds_scheme() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com/");
        assert_eq!(
            normalize_url("http://example.com/about").unwrap(),
            "http://example.com/about"
        );
        assert!(normalize_url("exa mple..com:99999").is_err());
    }

    #[test]
    fn test_website_data_shape() {
        let page = PageData {
            url: "https://acme.test/".into(),
            title: "Acme".into(),
            og_description: "OG".into(),
            h1: "Fly".into(),
            h2s: vec!["Reusable".into()],
            key_bullets: vec!["Launch in under a week".into()],
            summary: "**Acme**".into(),
            ..PageData::default()
        };
        let data = website_data(&page);
        assert_eq!(data["description"], "OG");
        assert_eq!(data["headline"], "Fly");
        assert_eq!(data["sections"][0], "Reusable");
        assert_eq!(data["keyPoints"][0], "Launch in under a week");
    }

    #[tokio::test]
    async fn test_missing_url_is_failure() {
        let tool = ExtractWebsiteTool::new(WebsiteConfig::default()).unwrap();
        let mut ctx = ExecutionContext::default();
        let outcome = tool.invoke(json!({}), &mut ctx).await.unwrap();
        assert_eq!(outcome.error_message(), Some("URL is required"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_failure_value() {
        let tool = ExtractWebsiteTool::new(WebsiteConfig {
            timeout_ms: 500,
            max_words: 600,
        })
        .unwrap();
        let mut ctx = ExecutionContext::default();
        let outcome = tool
            .invoke(json!({"url": "http://127.0.0.1:9/"}), &mut ctx)
            .await
            .unwrap();
        assert!(!outcome.is_success());
    }
}
