//! get_accounts: list the user's connected social accounts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use muse_core::types::ExecutionContext;

use crate::service::ServiceClient;
use crate::{ParameterSpec, Tool, ToolOutcome};

pub struct GetAccountsTool {
    service: Option<ServiceClient>,
}

impl GetAccountsTool {
    pub fn new(service: Option<ServiceClient>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

fn accounts_outcome(accounts: Vec<Account>) -> ToolOutcome {
    if accounts.is_empty() {
        return ToolOutcome::success(json!({
            "accounts": [],
            "count": 0,
            "message": "No accounts connected",
        }));
    }
    let usernames: Vec<&str> = accounts
        .iter()
        .filter_map(|a| a.username.as_deref())
        .collect();
    ToolOutcome::success(json!({
        "count": accounts.len(),
        "message": format!(
            "You have {} connected account(s): {}",
            accounts.len(),
            usernames.join(", ")
        ),
        "accounts": accounts,
    }))
}

#[async_trait]
impl Tool for GetAccountsTool {
    fn name(&self) -> &str {
        "get_accounts"
    }

    fn description(&self) -> &str {
        "Get list of connected social accounts for the user. Use this when user asks about their accounts or before scheduling."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    async fn invoke(
        &self,
        _params: Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ToolOutcome> {
        let Some(user_id) = context.user_id.as_deref() else {
            return Ok(ToolOutcome::failure("userId is required"));
        };
        let Some(service) = &self.service else {
            return Ok(ToolOutcome::failure("Scheduler service is not configured"));
        };

        let resp = match service.get_json("accounts", &[("userId", user_id)]).await {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::failure(e.to_string())),
        };
        if !resp.is_success() {
            return Ok(ToolOutcome::failure(
                resp.error_text()
                    .unwrap_or_else(|| format!("scheduler returned HTTP {}", resp.status)),
            ));
        }

        let list = resp
            .body
            .get("accounts")
            .cloned()
            .unwrap_or_else(|| resp.body.clone());
        let accounts: Vec<Account> = serde_json::from_value(list).unwrap_or_default();
        Ok(accounts_outcome(accounts))
    }
}
