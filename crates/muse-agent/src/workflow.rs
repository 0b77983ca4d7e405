//! Multi-step workflow continuations.
//!
//! After every successful tool call the executor consults a [`Workflow`]:
//! a table of rules keyed by `(router intent, tool)`. A matching rule writes
//! the produced artifact into the context and returns the user turn that
//! drives the next iteration. No match means the run ends on that call.

use serde_json::Value;

use muse_core::types::{ExecutionContext, Intent};
use muse_tools::ToolOutcome;

/// Builds the synthesized user turn for a continuation.
pub type ContinuationBuilder = fn(&ToolOutcome, &mut ExecutionContext) -> String;

#[derive(Clone)]
pub struct ContinuationRule {
    pub name: &'static str,
    pub intent: Intent,
    pub tool: &'static str,
    pub build: ContinuationBuilder,
}

impl ContinuationRule {
    pub fn matches(&self, intent: Option<Intent>, tool: &str, success: bool) -> bool {
        success && intent == Some(self.intent) && tool == self.tool
    }
}

/// A continuation chosen for the current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub rule: &'static str,
    pub message: String,
}

#[derive(Clone)]
pub struct Workflow {
    rules: Vec<ContinuationRule>,
}

impl Default for Workflow {
    /// The two built-in chains: website to content, image to post.
    fn default() -> Self {
        Self {
            rules: vec![
                ContinuationRule {
                    name: "website_to_content",
                    intent: Intent::WebsiteContent,
                    tool: "extract_website",
                    build: website_continuation,
                },
                ContinuationRule {
                    name: "image_to_post",
                    intent: Intent::GenerateAndPost,
                    tool: "generate_image",
                    build: post_continuation,
                },
            ],
        }
    }
}

impl Workflow {
    /// A table with no rules: every successful tool call is terminal.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: ContinuationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ContinuationRule] {
        &self.rules
    }

    /// First matching rule wins.
    pub fn continuation(
        &self,
        tool: &str,
        outcome: &ToolOutcome,
        context: &mut ExecutionContext,
    ) -> Option<Continuation> {
        let intent = context.router_intent;
        let rule = self
            .rules
            .iter()
            .find(|r| r.matches(intent, tool, outcome.is_success()))?;
        Some(Continuation {
            rule: rule.name,
            message: (rule.build)(outcome, context),
        })
    }
}

/// Bare URL from an image entry: a string or a `{mimeType, url}` object.
pub fn image_entry_url(entry: &Value) -> Option<&str> {
    entry
        .as_str()
        .or_else(|| entry.get("url").and_then(Value::as_str))
        .filter(|u| !u.is_empty())
}

/// Resolve the generated image URL: first image entry, then `imageUrl`.
/// Payloads nested under `data` are accepted too.
pub fn resolve_image_url(outcome: &ToolOutcome) -> Option<String> {
    let nested = outcome.get("data").and_then(Value::as_object);
    [Some(outcome.as_map()), nested]
        .into_iter()
        .flatten()
        .find_map(|fields| {
            fields
                .get("images")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(image_entry_url)
                .or_else(|| {
                    fields
                        .get("imageUrl")
                        .and_then(Value::as_str)
                        .filter(|u| !u.is_empty())
                })
                .map(str::to_string)
        })
}

fn field_or_na(data: Option<&Value>, key: &str) -> String {
    data.and_then(|d| d.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("N/A")
        .to_string()
}

fn website_continuation(outcome: &ToolOutcome, context: &mut ExecutionContext) -> String {
    let data = outcome.get("websiteData").cloned();
    let key_points = data
        .as_ref()
        .and_then(|d| d.get("keyPoints"))
        .and_then(Value::as_array)
        .map(|points| {
            points
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "N/A".to_string());

    let message = format!(
        "Website extracted successfully. Brand context:\n\
         - Title: {}\n\
         - Description: {}\n\
         - Headline: {}\n\
         - Key Points: {key_points}\n\n\
         Now create an engaging image and/or content for this brand based on the original user request. \
         Use this context to make it relevant and on-brand.",
        field_or_na(data.as_ref(), "title"),
        field_or_na(data.as_ref(), "description"),
        field_or_na(data.as_ref(), "headline"),
    );
    context.website_data = data;
    message
}

fn post_continuation(outcome: &ToolOutcome, context: &mut ExecutionContext) -> String {
    match resolve_image_url(outcome) {
        Some(url) => {
            context.generated_image_url = Some(url.clone());
            format!(
                "Image generated successfully: {url}. Now proceed to post this image to the user's account as requested. \
                 Use the schedule_post tool with imageUrl set to exactly \"{url}\". Do not use any earlier image."
            )
        }
        None => "Image generated successfully, but no image URL was returned. \
                 Do not post an earlier image; tell the user the post could not be scheduled."
            .to_string(),
    }
}
