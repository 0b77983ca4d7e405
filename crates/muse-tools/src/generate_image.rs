//! generate_image: delegates to the image generation service.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use muse_core::types::ExecutionContext;

use crate::service::ServiceClient;
use crate::{ParamType, ParameterSpec, Tool, ToolOutcome, str_param};

const MAX_IMAGES: u64 = 4;

pub struct GenerateImageTool {
    service: Option<ServiceClient>,
}

impl GenerateImageTool {
    pub fn new(service: Option<ServiceClient>) -> Self {
        Self { service }
    }
}

/// Build the service request. Attached references win; otherwise the last
/// known image is passed along so "same photo but..." requests keep context.
fn build_request(prompt: &str, params: &Value, context: &ExecutionContext) -> Value {
    let mut images: Vec<Value> = context
        .reference_images
        .iter()
        .map(|url| json!({ "data": url, "mimeType": "image/jpeg" }))
        .collect();
    if images.is_empty() {
        if let Some(last) = &context.last_image_url {
            images.push(json!({ "data": last, "mimeType": "image/jpeg" }));
        }
    }

    let count = params
        .get("count")
        .and_then(Value::as_u64)
        .unwrap_or(1)
        .clamp(1, MAX_IMAGES);

    json!({
        "prompt": prompt,
        "userId": context.user_id,
        "imageChatId": context.chat_id,
        "images": images,
        "isEdit": false,
        "count": count,
        "style": str_param(params, "style"),
        "aspectRatio": str_param(params, "aspectRatio"),
    })
}

/// Primary URL of a generation response: `imageUrl`, else the first image.
pub(crate) fn primary_url(body: &Value) -> Option<String> {
    if let Some(url) = body.get("imageUrl").and_then(Value::as_str) {
        return Some(url.to_string());
    }
    let first = body.get("images")?.as_array()?.first()?;
    first
        .as_str()
        .or_else(|| first.get("url").and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl Tool for GenerateImageTool {
    fn name(&self) -> &str {
        "generate_image"
    }

    fn description(&self) -> &str {
        "Generate new AI image(s) from a text prompt. Use this when user wants to create a new image."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required(
                "prompt",
                ParamType::String,
                "Detailed prompt describing the image to generate",
            ),
            ParameterSpec::optional(
                "count",
                ParamType::Number,
                "Number of images to generate (1-4). Default is 1",
            ),
            ParameterSpec::optional(
                "style",
                ParamType::String,
                "Style like cinematic, anime, photorealistic, etc",
            ),
            ParameterSpec::optional(
                "aspectRatio",
                ParamType::String,
                "Aspect ratio like 1:1, 16:9, 9:16, 4:3, 3:4",
            ),
        ]
    }

    async fn invoke(
        &self,
        params: Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ToolOutcome> {
        let Some(prompt) = str_param(&params, "prompt") else {
            return Ok(ToolOutcome::failure("prompt is required"));
        };
        if context.user_id.is_none() {
            return Ok(ToolOutcome::failure("userId is required"));
        }
        let Some(service) = &self.service else {
            return Ok(ToolOutcome::failure(
                "Image generation service is not configured",
            ));
        };

        let request = build_request(prompt, &params, context);
        info!(
            references = request["images"].as_array().map_or(0, Vec::len),
            "generate_image"
        );

        let resp = match service.post_json("generate", &request).await {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::failure(format!("Generation failed: {e}"))),
        };
        if !resp.is_success() {
            return Ok(ToolOutcome::failure(
                resp.error_text()
                    .unwrap_or_else(|| "Generation failed".to_string()),
            ));
        }

        let Some(image_url) = primary_url(&resp.body) else {
            return Ok(ToolOutcome::failure("Generation returned no image"));
        };
        context.last_image_url = Some(image_url.clone());

        Ok(ToolOutcome::success(json!({
            "imageUrl": image_url,
            "images": resp.body.get("images").cloned().unwrap_or_else(|| json!([])),
            "imageChatId": resp.body.get("imageChatId").cloned().unwrap_or(Value::Null),
        })))
    }
}
