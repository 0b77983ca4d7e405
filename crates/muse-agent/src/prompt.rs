//! System prompt and initial turn construction for the executor.

use muse_core::types::{AgentInput, ConversationTurn, ExecutionContext, Role};
use muse_tools::ToolRegistry;

/// Role description used when no `agent.system_prompt` is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant for image generation and social media management.

You help users:
- Generate AI images from text descriptions
- Create on-brand content from their website
- Schedule posts to their social accounts

Guidelines:
- Be concise and helpful
- If the user's image prompt is short or vague (\"a cat\", \"sunset\"), enrich it with detail
- If the prompt is already detailed (specific colors, poses, composition), pass it through unchanged
- Short replies like \"yes\", \"ok\", \"thanks\" are conversational: answer them with the reply tool
- Only use generate_image when the user asks to create or generate an image
- Only use schedule_post when the user asks to post, publish or schedule
- When the intent is unclear, use the reply tool to ask";

const OUTPUT_RULES: &str = r#"IMPORTANT: You MUST respond with valid JSON only. Never respond with plain text.

To use a tool, respond with this exact JSON format:
{
   "thought": "your reasoning",
   "tool": "tool_name",
   "params": { ... }
}

For conversations (questions, greetings, help), respond with:
{
   "thought": "your reasoning",
   "finalAnswer": "your response to user"
}

RULES:
- ALWAYS use a tool when the user wants to generate or create images
- Respond with exactly one of "tool" or "finalAnswer", never both
- NEVER output plain text, always use the JSON format
- NEVER mimic previous outputs, always call the appropriate tool"#;

/// Most recent history images listed in the system note.
const RECENT_IMAGE_LIMIT: usize = 5;

/// Role description, tool catalogue and output contract in one system turn.
pub fn build_system_prompt(role: &str, tools: &ToolRegistry) -> String {
    format!(
        "{role}\n\nYou have access to these tools:\n\n{}\n\n{OUTPUT_RULES}",
        tools.describe()
    )
}

/// Build the initial prompt for a run. Pure: the same input and context
/// always yield the same turns.
pub fn build_turns(
    system_prompt: &str,
    input: &AgentInput,
    context: &ExecutionContext,
) -> Vec<ConversationTurn> {
    let mut turns = vec![ConversationTurn::system(system_prompt)];

    for msg in &context.history {
        let turn = match (msg.role, &msg.image_url) {
            (Role::Assistant, Some(url)) => {
                ConversationTurn::assistant(format!("[Image generated: {url}]"))
            }
            (Role::Assistant, None) => ConversationTurn::assistant(msg.content_text()),
            _ => ConversationTurn::user(msg.content_text()),
        };
        turns.push(turn);
    }

    let images = context.history_images();
    if !images.is_empty() {
        let start = images.len().saturating_sub(RECENT_IMAGE_LIMIT);
        let listing: Vec<String> = images[start..]
            .iter()
            .enumerate()
            .map(|(i, url)| format!("{}. {url}", i + 1))
            .collect();
        turns.push(ConversationTurn::system(format!(
            "Recent images in this conversation (oldest first):\n{}",
            listing.join("\n")
        )));
    }

    let mut user = input.message.clone();
    if !input.images.is_empty() {
        user.push_str(&format!(
            "\n\n[User attached {} reference image(s) for face/style preservation]",
            input.images.len()
        ));
    }
    if let Some(last) = &context.last_image_url {
        user.push_str(&format!("\n\n[Previous image available for editing: {last}]"));
    }
    turns.push(ConversationTurn::user(user));

    turns
}
