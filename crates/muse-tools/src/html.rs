//! Lightweight HTML content extraction.
//!
//! Regex based, not a full parser: good enough to pull brand copy (title,
//! descriptions, headings, bullets) out of marketing pages.

use regex::Regex;
use serde::{Deserialize, Serialize};

const NOISE_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "iframe", "noscript", "svg", "form",
];
const CONTAINER_TAGS: &[&str] = &["main", "article", "section"];
const MAX_HEADINGS: usize = 5;
const MAX_BULLETS: usize = 8;

/// Structured content pulled from one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub url: String,
    pub title: String,
    pub meta_description: String,
    pub og_title: String,
    pub og_description: String,
    pub h1: String,
    pub h2s: Vec<String>,
    pub hero_text: String,
    pub key_bullets: Vec<String>,
    pub main_content: String,
    pub summary: String,
}

impl PageData {
    /// Meta description, falling back to the Open Graph one.
    pub fn description(&self) -> &str {
        if self.meta_description.is_empty() {
            &self.og_description
        } else {
            &self.meta_description
        }
    }
}

pub struct HtmlExtractor {
    max_words: usize,
    noise: Vec<Regex>,
    comment: Regex,
    tag: Regex,
    whitespace: Regex,
    meta: Regex,
    attr: Regex,
    title: Regex,
    h1: Regex,
    h2: Regex,
    li: Regex,
    p: Regex,
    body: Regex,
    containers: Vec<Regex>,
}

fn element(tag: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}\s*>"))
}

impl HtmlExtractor {
    pub fn new(max_words: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            max_words,
            noise: NOISE_TAGS
                .iter()
                .map(|t| element(t))
                .collect::<Result<_, _>>()?,
            comment: Regex::new(r"(?s)<!--.*?-->")?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
            whitespace: Regex::new(r"\s+")?,
            meta: Regex::new(r"(?is)<meta\b[^>]*>")?,
            attr: Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            title: element("title")?,
            h1: element("h1")?,
            h2: element("h2")?,
            li: element("li")?,
            p: element("p")?,
            body: element("body")?,
            containers: CONTAINER_TAGS
                .iter()
                .map(|t| element(t))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Extract structured page data from raw HTML.
    pub fn extract(&self, url: &str, html: &str) -> PageData {
        let doc = self.comment.replace_all(html, " ");
        let mut doc = doc.into_owned();
        for re in &self.noise {
            doc = re.replace_all(&doc, " ").into_owned();
        }

        let mut data = PageData {
            url: url.to_string(),
            title: self.first_text(&self.title, &doc),
            meta_description: self.meta_content(&doc, "name", "description"),
            og_title: self.meta_content(&doc, "property", "og:title"),
            og_description: self.meta_content(&doc, "property", "og:description"),
            h1: self.first_text(&self.h1, &doc),
            ..PageData::default()
        };

        data.h2s = self
            .h2
            .captures_iter(&doc)
            .take(MAX_HEADINGS)
            .map(|c| self.clean_text(&c[1]))
            .filter(|t| t.chars().count() > 3)
            .collect();

        data.key_bullets = self
            .li
            .captures_iter(&doc)
            .take(MAX_BULLETS)
            .map(|c| self.clean_text(&c[1]))
            .filter(|t| {
                let n = t.chars().count();
                n > 10 && n < 200
            })
            .collect();

        let containers: Vec<String> = self
            .containers
            .iter()
            .flat_map(|re| re.captures_iter(&doc).map(|c| c[1].to_string()))
            .collect();

        data.hero_text = containers
            .iter()
            .find_map(|inner| {
                let text = self.first_text(&self.p, inner);
                (!text.is_empty()).then_some(text)
            })
            .unwrap_or_default();

        let body_text = if containers.is_empty() {
            let body = self
                .body
                .captures(&doc)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| doc.clone());
            self.clean_text(&body)
        } else {
            self.clean_text(&containers.join(" "))
        };
        data.main_content = truncate_to_words(&body_text, self.max_words);
        data.summary = build_summary(&data);
        data
    }

    fn first_text(&self, re: &Regex, html: &str) -> String {
        re.captures(html)
            .map(|c| self.clean_text(&c[1]))
            .unwrap_or_default()
    }

    /// `content` of the first `<meta>` whose `key` attribute equals `value`.
    fn meta_content(&self, html: &str, key: &str, value: &str) -> String {
        for tag in self.meta.find_iter(html) {
            let mut matched = false;
            let mut content = None;
            for cap in self.attr.captures_iter(tag.as_str()) {
                let name = cap[1].to_ascii_lowercase();
                let val = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
                if name == key && val.eq_ignore_ascii_case(value) {
                    matched = true;
                } else if name == "content" {
                    content = Some(val.to_string());
                }
            }
            if matched {
                return content.map(|c| self.clean_text(&c)).unwrap_or_default();
            }
        }
        String::new()
    }

    /// Strip tags, decode common entities and collapse whitespace.
    pub fn clean_text(&self, fragment: &str) -> String {
        let stripped = self.tag.replace_all(fragment, " ");
        let decoded = decode_entities(&stripped);
        self.whitespace.replace_all(&decoded, " ").trim().to_string()
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Keep the first `max_words` words, marking the cut with an ellipsis.
pub fn truncate_to_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    format!("{}...", words[..max_words].join(" "))
}

fn build_summary(data: &PageData) -> String {
    let mut parts = Vec::new();
    if !data.title.is_empty() {
        parts.push(format!("**{}**", data.title));
    }
    if !data.description().is_empty() {
        parts.push(data.description().to_string());
    }
    if !data.hero_text.is_empty() {
        parts.push(data.hero_text.clone());
    }
    if !data.key_bullets.is_empty() {
        let top: Vec<&str> = data.key_bullets.iter().take(3).map(String::as_str).collect();
        parts.push(format!("Key points: {}", top.join("; ")));
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head>
  <title>Acme   Rockets</title>
  <meta name="description" content="Rockets for everyone &amp; their dog">
  <meta property='og:title' content='Acme'>
  <script>var tracking = "<h1>not a heading</h1>";</script>
  <style>h1 { color: red }</style>
</head>
<body>
  <header><h1>Header noise</h1></header>
  <nav><ul><li>Home page navigation link</li></ul></nav>
  <main>
    <h1>Fly <em>higher</em> today</h1>
    <p>We build reusable rockets for small teams.</p>
    <h2>Go</h2>
    <h2>Reusable boosters</h2>
    <ul>
      <li>Launch in under a week</li>
      <li>Short</li>
      <li>Carbon neutral fuel options available</li>
    </ul>
  </main>
  <!-- <p>commented out</p> -->
  <footer>Copyright Acme</footer>
</body></html>"#;

    fn extractor() -> HtmlExtractor {
        HtmlExtractor::new(600).unwrap()
    }

    #[test]
    fn test_extracts_brand_fields() {
        let data = extractor().extract("https://acme.test", PAGE);
        assert_eq!(data.title, "Acme Rockets");
        assert_eq!(data.meta_description, "Rockets for everyone & their dog");
        assert_eq!(data.og_title, "Acme");
        assert_eq!(data.h1, "Fly higher today");
        assert_eq!(data.h2s, vec!["Reusable boosters".to_string()]);
        assert_eq!(data.hero_text, "We build reusable rockets for small teams.");
        assert_eq!(
            data.key_bullets,
            vec![
                "Launch in under a week".to_string(),
                "Carbon neutral fuel options available".to_string()
            ]
        );
        assert!(!data.main_content.contains("Copyright"));
        assert!(!data.main_content.contains("navigation"));
    }

    #[test]
    fn test_summary_layout() {
        let data = extractor().extract("https://acme.test", PAGE);
        assert_eq!(
            data.summary,
            "**Acme Rockets**\n\nRockets for everyone & their dog\n\n\
             We build reusable rockets for small teams.\n\n\
             Key points: Launch in under a week; Carbon neutral fuel options available"
        );
    }

    #[test]
    fn test_og_description_fallback_and_body_text() {
        let html = r#"<html><head><meta property="og:description" content="OG text"></head>
            <body><div>Plain body copy here</div></body></html>"#;
        let data = extractor().extract("https://x.test", html);
        assert_eq!(data.description(), "OG text");
        assert_eq!(data.main_content, "Plain body copy here");
        assert!(data.hero_text.is_empty());
    }

    #[test]
    fn test_truncate_to_words() {
        assert_eq!(truncate_to_words("a b c d", 2), "a b...");
        assert_eq!(truncate_to_words("a b", 5), "a b");
    }
}
