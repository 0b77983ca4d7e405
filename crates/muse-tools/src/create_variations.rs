//! create_variations: several takes on one prompt, each with a different look.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use muse_core::types::ExecutionContext;

use crate::generate_image::primary_url;
use crate::service::ServiceClient;
use crate::{ParamType, ParameterSpec, Tool, ToolOutcome, str_param};

const MIN_VARIATIONS: u64 = 2;
const MAX_VARIATIONS: u64 = 10;
const DEFAULT_VARIATIONS: u64 = 4;

/// Suffixes appended to the base prompt, cycled in order.
const STYLE_VARIANTS: [&str; 10] = [
    "cinematic lighting, dramatic",
    "soft natural lighting, peaceful",
    "vibrant colors, energetic",
    "moody atmosphere, artistic",
    "golden hour lighting, warm tones",
    "studio lighting, professional",
    "neon glow, cyberpunk aesthetic",
    "vintage film look, retro",
    "high contrast, bold shadows",
    "dreamy soft focus, ethereal",
];

pub struct CreateVariationsTool {
    service: Option<ServiceClient>,
}

impl CreateVariationsTool {
    pub fn new(service: Option<ServiceClient>) -> Self {
        Self { service }
    }
}

fn variation_count(params: &Value) -> u64 {
    params
        .get("count")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_VARIATIONS)
        .clamp(MIN_VARIATIONS, MAX_VARIATIONS)
}

/// The last image keeps the same subject across variations; attached
/// references follow it.
fn reference_images(context: &ExecutionContext) -> Vec<Value> {
    context
        .last_image_url
        .iter()
        .chain(&context.reference_images)
        .map(|url| json!({ "data": url, "mimeType": "image/jpeg" }))
        .collect()
}

#[async_trait]
impl Tool for CreateVariationsTool {
    fn name(&self) -> &str {
        "create_variations"
    }

    fn description(&self) -> &str {
        "Create multiple variations of an image with different styles or tweaks. Use when user wants alternatives or options. Uses the last generated image as reference to keep the same subject."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required(
                "basePrompt",
                ParamType::String,
                "The base prompt to create variations from",
            ),
            ParameterSpec::optional(
                "count",
                ParamType::Number,
                "Number of variations (2-10). Default is 4",
            ),
            ParameterSpec::optional(
                "variationType",
                ParamType::String,
                "Type of variation: style, color, composition, lighting",
            ),
        ]
    }

    async fn invoke(
        &self,
        params: Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ToolOutcome> {
        let Some(base_prompt) = str_param(&params, "basePrompt") else {
            return Ok(ToolOutcome::failure("basePrompt is required"));
        };
        if context.user_id.is_none() {
            return Ok(ToolOutcome::failure("userId is required"));
        }
        let Some(service) = &self.service else {
            return Ok(ToolOutcome::failure(
                "Image generation service is not configured",
            ));
        };

        let count = variation_count(&params);
        let images = reference_images(context);
        info!(
            count,
            references = images.len(),
            variation_type = str_param(&params, "variationType").unwrap_or("style"),
            "create_variations"
        );

        let mut variations = Vec::new();
        for (index, variant) in STYLE_VARIANTS.iter().cycle().take(count as usize).enumerate() {
            let request = json!({
                "prompt": format!("{base_prompt}, {variant}"),
                "userId": context.user_id,
                "imageChatId": context.chat_id,
                "images": images,
                "isEdit": false,
            });
            // One failed variation does not sink the rest.
            match service.post_json("generate", &request).await {
                Ok(resp) if resp.is_success() => {
                    if let Some(url) = primary_url(&resp.body) {
                        variations.push(json!({
                            "imageUrl": url,
                            "variant": variant,
                            "index": index + 1,
                        }));
                    }
                }
                Ok(resp) => warn!(index = index + 1, status = resp.status, "Variation failed"),
                Err(e) => warn!(index = index + 1, error = %e, "Variation failed"),
            }
        }

        if variations.is_empty() {
            return Ok(ToolOutcome::failure("No variations could be generated"));
        }
        let images: Vec<Value> = variations
            .iter()
            .map(|v| json!({ "mimeType": "image/png", "url": v["imageUrl"] }))
            .collect();

        Ok(ToolOutcome::success(json!({
            "message": format!("Created {} variations using the same reference image", variations.len()),
            "count": variations.len(),
            "variations": variations,
            "images": images,
            "imageChatId": context.chat_id,
        })))
    }
}
