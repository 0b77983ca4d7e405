//! schedule_post: queue an image post with the scheduler service.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::{Value, json};
use tracing::info;

use muse_core::types::ExecutionContext;

use crate::service::ServiceClient;
use crate::{ParamType, ParameterSpec, Tool, ToolOutcome, str_param};

const DEFAULT_CAPTION: &str = "Posted with Muse";

static RELATIVE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*(min|minute|hour|hr|day)").expect("relative time pattern is valid")
});

pub struct SchedulePostTool {
    service: Option<ServiceClient>,
}

impl SchedulePostTool {
    pub fn new(service: Option<ServiceClient>) -> Self {
        Self { service }
    }
}

/// Resolve a user-supplied time to an absolute UTC instant.
///
/// Accepts `now`/`immediately`/`asap`/`right now` (one minute from now),
/// relative amounts (`15 min`, `2 hours`, `1 day`) and ISO-8601 timestamps.
pub fn parse_schedule_time(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = input.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }
    if matches!(s.as_str(), "now" | "immediately" | "right now" | "asap") {
        return Some(now + Duration::minutes(1));
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(input.trim()) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input.trim(), fmt) {
            return Some(naive.and_utc());
        }
    }

    let caps = RELATIVE_TIME.captures(&s)?;
    let amount: i64 = caps[1].parse().ok()?;
    let delta = match &caps[2] {
        "min" | "minute" => Duration::try_minutes(amount)?,
        "hour" | "hr" => Duration::try_hours(amount)?,
        _ => Duration::try_days(amount)?,
    };
    now.checked_add_signed(delta)
}

#[async_trait]
impl Tool for SchedulePostTool {
    fn name(&self) -> &str {
        "schedule_post"
    }

    fn description(&self) -> &str {
        "Schedule or immediately post an image to Instagram. Use \"now\" for immediate posting."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("imageUrl", ParamType::String, "URL of the image to post"),
            ParameterSpec::required("caption", ParamType::String, "Caption for the post"),
            ParameterSpec::required(
                "scheduledTime",
                ParamType::String,
                "When to post. Use \"now\" for immediate, or relative like \"2 minutes\", \"1 hour\"",
            ),
            ParameterSpec::optional(
                "accountUsername",
                ParamType::String,
                "Account username to post to",
            ),
            ParameterSpec::optional("hashtags", ParamType::String, "Hashtags to add to the post"),
        ]
    }

    async fn invoke(
        &self,
        params: Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ToolOutcome> {
        let Some(user_id) = context.user_id.clone() else {
            return Ok(ToolOutcome::failure_with_message(
                "userId is required",
                "Please log in first.",
            ));
        };

        let image_url = str_param(&params, "imageUrl")
            .map(str::to_string)
            .or_else(|| context.last_image_url.clone());
        let Some(image_url) = image_url else {
            return Ok(ToolOutcome::failure_with_message(
                "imageUrl is required",
                "No image found to schedule. Please generate or select an image first.",
            ));
        };

        let Some(time_input) = str_param(&params, "scheduledTime") else {
            return Ok(ToolOutcome::failure_with_message(
                "scheduledTime is required",
                "Please specify when to schedule the post.",
            ));
        };
        let Some(scheduled_at) = parse_schedule_time(time_input, Utc::now()) else {
            return Ok(ToolOutcome::failure_with_message(
                "Invalid time format",
                "Please provide a valid time like \"2 minutes\" or \"1 hour\".",
            ));
        };

        let Some(service) = &self.service else {
            return Ok(ToolOutcome::failure_with_message(
                "Scheduler service is not configured",
                "Post scheduling is not available right now.",
            ));
        };

        let account = str_param(&params, "accountUsername");
        let scheduled_at = scheduled_at.to_rfc3339();
        let request = json!({
            "userId": user_id,
            "accountUsername": account,
            "imageUrl": image_url,
            "caption": str_param(&params, "caption").unwrap_or(DEFAULT_CAPTION),
            "hashtags": str_param(&params, "hashtags").unwrap_or(""),
            "scheduledAt": scheduled_at,
            "postType": "image",
        });

        let resp = match service.post_json("posts", &request).await {
            Ok(r) => r,
            Err(e) => {
                return Ok(ToolOutcome::failure_with_message(
                    e.to_string(),
                    format!("Failed to schedule: {e}"),
                ));
            }
        };
        if resp.status == 404 {
            if let Some(name) = account {
                return Ok(ToolOutcome::failure_with_message(
                    format!("Account \"{name}\" not found"),
                    format!("Could not find account \"{name}\". Please check the username."),
                ));
            }
        }
        if !resp.is_success() {
            let error = resp
                .error_text()
                .unwrap_or_else(|| format!("scheduler returned HTTP {}", resp.status));
            return Ok(ToolOutcome::failure_with_message(
                error.clone(),
                format!("Failed to schedule: {error}"),
            ));
        }

        let post_id = resp
            .body
            .get("id")
            .or_else(|| resp.body.get("_id"))
            .cloned()
            .unwrap_or(Value::Null);
        info!(post_id = %post_id, %scheduled_at, "schedule_post");

        Ok(ToolOutcome::success(json!({
            "postId": post_id,
            "scheduledAt": scheduled_at,
            "status": resp.body.get("status").cloned().unwrap_or_else(|| json!("scheduled")),
            "imageUrl": image_url,
            "message": format!(
                "Post scheduled for {}! It will be published to {}.",
                scheduled_at,
                account.unwrap_or("your default account")
            ),
        })))
    }
}
