//! Human-readable "thinking" steps shown while a tool works.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use muse_core::types::ExecutionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Strategist,
    Creative,
    Editor,
    Researcher,
    Growth,
    Reviewer,
}

impl Persona {
    pub fn display_name(&self) -> &'static str {
        match self {
            Persona::Strategist => "Strategist AI",
            Persona::Creative => "Creative AI",
            Persona::Editor => "Editor AI",
            Persona::Researcher => "Research AI",
            Persona::Growth => "Growth AI",
            Persona::Reviewer => "Reviewer AI",
        }
    }

    /// Persona that fronts a tool.
    pub fn for_tool(tool: &str) -> Self {
        match tool {
            "generate_image" | "create_variations" => Persona::Creative,
            "edit_image" => Persona::Editor,
            "extract_website" | "deep_research" => Persona::Researcher,
            "schedule_post" | "get_accounts" => Persona::Growth,
            _ => Persona::Strategist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CognitiveStep {
    pub persona: Persona,
    pub name: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CognitiveStep {
    fn new(persona: Persona, action: impl Into<String>) -> Self {
        Self {
            persona,
            name: persona.display_name().to_string(),
            action: action.into(),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn aspect_ratio_reason(ratio: &str) -> Option<&'static str> {
    Some(match ratio {
        "1:1" => "Square format works great for profile pictures and Instagram posts",
        "4:5" => "This 4:5 ratio performs well in Instagram feeds",
        "9:16" => "Vertical format optimized for Stories and Reels",
        "16:9" => "Widescreen format ideal for YouTube thumbnails and covers",
        "3:4" => "Portrait orientation for Pinterest and professional headshots",
        _ => return None,
    })
}

fn style_reason(style: &str) -> Option<&'static str> {
    Some(match style {
        "cinematic" => "Cinematic style adds drama and professional polish",
        "photorealistic" => "Photorealistic rendering for maximum authenticity",
        "anime" => "Anime style brings vibrant, expressive character",
        "digital-art" => "Digital art style for modern, clean aesthetics",
        "oil-painting" => "Oil painting style adds classical artistic depth",
        _ => return None,
    })
}

/// Steps for a tool call, empty for tools without a narration.
pub fn narrate(tool: &str, params: &Value, context: &ExecutionContext) -> Vec<CognitiveStep> {
    let param = |key: &str| params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());
    match tool {
        "generate_image" => image_generation(param("aspectRatio"), param("style"), context),
        "edit_image" => image_edit(context),
        "extract_website" => website_extraction(param("url").unwrap_or("the website")),
        "schedule_post" => scheduling(param("scheduledTime")),
        _ => Vec::new(),
    }
}

fn image_generation(
    aspect_ratio: Option<&str>,
    style: Option<&str>,
    context: &ExecutionContext,
) -> Vec<CognitiveStep> {
    let mut steps = vec![CognitiveStep::new(Persona::Strategist, "Analyzing your creative request")];

    let references = context.reference_images.len();
    if references > 0 {
        steps.push(CognitiveStep::new(
            Persona::Researcher,
            format!("Processing {references} reference image(s) for style matching"),
        ));
    }

    let composition = CognitiveStep::new(Persona::Creative, "Designing visual composition");
    steps.push(
        match aspect_ratio.and_then(aspect_ratio_reason) {
            Some(reason) => composition.with_detail(reason),
            None => composition.with_detail("Selecting optimal composition"),
        },
    );

    if let Some(style) = style {
        let action = style_reason(style)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Applying {style} style"));
        steps.push(CognitiveStep::new(Persona::Creative, action));
    }

    steps.push(CognitiveStep::new(Persona::Reviewer, "Ensuring high-quality output"));
    steps
}

fn image_edit(context: &ExecutionContext) -> Vec<CognitiveStep> {
    let mut steps = vec![CognitiveStep::new(Persona::Strategist, "Understanding edit requirements")];
    let references = context.reference_images.len();
    if references > 0 {
        steps.push(CognitiveStep::new(
            Persona::Editor,
            format!("Preparing {references} image(s) for modification"),
        ));
    } else if context.last_image_url.is_some() {
        steps.push(CognitiveStep::new(Persona::Editor, "Using your last generated image as base"));
    }
    steps.push(CognitiveStep::new(Persona::Editor, "Applying precise modifications"));
    steps.push(CognitiveStep::new(Persona::Reviewer, "Verifying edit quality and accuracy"));
    steps
}

fn website_extraction(url: &str) -> Vec<CognitiveStep> {
    vec![
        CognitiveStep::new(Persona::Researcher, format!("Analyzing {url}")),
        CognitiveStep::new(Persona::Researcher, "Extracting brand identity and key messaging"),
        CognitiveStep::new(Persona::Strategist, "Preparing brand context for content creation"),
    ]
}

fn scheduling(time: Option<&str>) -> Vec<CognitiveStep> {
    let immediate = time.is_some_and(|t| {
        let t = t.trim().to_ascii_lowercase();
        t == "now" || t == "immediately"
    });
    vec![
        CognitiveStep::new(Persona::Growth, "Preparing post for publishing"),
        CognitiveStep::new(
            Persona::Growth,
            if immediate {
                "Optimizing for immediate publishing"
            } else {
                "Scheduling for optimal engagement time"
            },
        ),
        CognitiveStep::new(Persona::Reviewer, "Final quality check before publishing"),
    ]
}
