//! edit_image: modify an existing image through the image service.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use muse_core::types::ExecutionContext;

use crate::generate_image::primary_url;
use crate::service::ServiceClient;
use crate::{ParamType, ParameterSpec, Tool, ToolOutcome, str_param};

pub struct EditImageTool {
    service: Option<ServiceClient>,
}

impl EditImageTool {
    pub fn new(service: Option<ServiceClient>) -> Self {
        Self { service }
    }
}

/// Images sent with an edit: the image being edited first, then any
/// attached references that are not the same image.
fn images_to_edit(params: &Value, context: &ExecutionContext) -> Vec<Value> {
    let primary = str_param(params, "imageUrl").or(context.last_image_url.as_deref());
    primary
        .into_iter()
        .chain(
            context
                .reference_images
                .iter()
                .map(String::as_str)
                .filter(|url| Some(*url) != primary),
        )
        .map(|url| json!({ "data": url, "mimeType": "image/jpeg" }))
        .collect()
}

#[async_trait]
impl Tool for EditImageTool {
    fn name(&self) -> &str {
        "edit_image"
    }

    fn description(&self) -> &str {
        "Edit or modify an existing image. Use when user wants to change something in a previously generated image or an uploaded reference image."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required(
                "editPrompt",
                ParamType::String,
                "Description of what changes to make to the image",
            ),
            ParameterSpec::optional(
                "imageUrl",
                ParamType::String,
                "URL of image to edit. If not provided, uses the last generated image or reference image",
            ),
        ]
    }

    async fn invoke(
        &self,
        params: Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ToolOutcome> {
        let Some(edit_prompt) = str_param(&params, "editPrompt") else {
            return Ok(ToolOutcome::failure("editPrompt is required"));
        };
        if context.user_id.is_none() {
            return Ok(ToolOutcome::failure("userId is required"));
        }
        let images = images_to_edit(&params, context);
        if images.is_empty() {
            return Ok(ToolOutcome::failure("No image provided to edit"));
        }
        let Some(service) = &self.service else {
            return Ok(ToolOutcome::failure(
                "Image generation service is not configured",
            ));
        };

        info!(images = images.len(), "edit_image");
        let request = json!({
            "prompt": edit_prompt,
            "userId": context.user_id,
            "imageChatId": context.chat_id,
            "images": images,
            "isEdit": true,
        });

        let resp = match service.post_json("generate", &request).await {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::failure(format!("Edit failed: {e}"))),
        };
        if !resp.is_success() {
            return Ok(ToolOutcome::failure(
                resp.error_text()
                    .unwrap_or_else(|| "Edit failed".to_string()),
            ));
        }

        let Some(image_url) = primary_url(&resp.body) else {
            return Ok(ToolOutcome::failure("Edit returned no image"));
        };
        context.last_image_url = Some(image_url.clone());

        Ok(ToolOutcome::success(json!({
            "imageUrl": image_url,
            "images": resp.body.get("images").cloned().unwrap_or_else(|| json!([])),
            "imageChatId": resp.body.get("imageChatId").cloned().unwrap_or(Value::Null),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fake;

    fn urls(images: &[Value]) -> Vec<&str> {
        images.iter().map(|i| i["data"].as_str().unwrap()).collect()
    }

    #[test]
    fn test_explicit_url_wins_and_duplicates_are_skipped() {
        let mut ctx = ExecutionContext::for_user("u1");
        ctx.last_image_url = Some("https://x/last.png".into());
        ctx.reference_images = vec!["https://x/a.png".into(), "https://x/ref.png".into()];
        let images = images_to_edit(&json!({"imageUrl": "https://x/a.png"}), &ctx);
        assert_eq!(urls(&images), vec!["https://x/a.png", "https://x/ref.png"]);
    }

    #[test]
    fn test_falls_back_to_last_image_then_references() {
        let mut ctx = ExecutionContext::for_user("u1");
        ctx.last_image_url = Some("https://x/last.png".into());
        assert_eq!(urls(&images_to_edit(&json!({}), &ctx)), vec!["https://x/last.png"]);

        ctx.last_image_url = None;
        ctx.reference_images = vec!["https://x/ref.png".into()];
        assert_eq!(urls(&images_to_edit(&json!({"imageUrl": " "}), &ctx)), vec!["https://x/ref.png"]);
    }

    #[tokio::test]
    async fn test_nothing_to_edit() {
        let tool = EditImageTool::new(None);
        let mut ctx = ExecutionContext::for_user("u1");
        let outcome = tool
            .invoke(json!({"editPrompt": "make it blue"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.error_message(), Some("No image provided to edit"));

        let outcome = tool.invoke(json!({}), &mut ctx).await.unwrap();
        assert_eq!(outcome.error_message(), Some("editPrompt is required"));
    }

    #[tokio::test]
    async fn test_edits_last_image_and_updates_context() {
        let service = fake::spawn(vec![(
            200,
            json!({
                "imageUrl": "https://img/edited.png",
                "images": [{"mimeType": "image/png", "url": "https://img/edited.png"}],
                "imageChatId": "ic1",
            }),
        )])
        .await;
        let tool = EditImageTool::new(Some(service.client.clone()));
        let mut ctx = ExecutionContext::for_user("u1");
        ctx.chat_id = Some("c1".into());
        ctx.last_image_url = Some("https://img/original.png".into());

        let outcome = tool
            .invoke(json!({"editPrompt": "add a hat"}), &mut ctx)
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.get_str("imageUrl"), Some("https://img/edited.png"));
        assert_eq!(
            outcome.get("images"),
            Some(&json!([{"mimeType": "image/png", "url": "https://img/edited.png"}]))
        );
        assert_eq!(ctx.last_image_url.as_deref(), Some("https://img/edited.png"));

        let requests = service.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["prompt"], "add a hat");
        assert_eq!(requests[0]["isEdit"], true);
        assert_eq!(requests[0]["imageChatId"], "c1");
        assert_eq!(requests[0]["images"][0]["data"], "https://img/original.png");
    }

    #[tokio::test]
    async fn test_service_error_is_a_failure_value() {
        let service = fake::spawn(vec![(402, json!({"error": "Insufficient credits"}))]).await;
        let tool = EditImageTool::new(Some(service.client.clone()));
        let mut ctx = ExecutionContext::for_user("u1");
        ctx.last_image_url = Some("https://img/original.png".into());

        let outcome = tool
            .invoke(json!({"editPrompt": "add a hat"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.error_message(), Some("Insufficient credits"));
        assert_eq!(ctx.last_image_url.as_deref(), Some("https://img/original.png"));
    }
}
