use crate::core::state::{CharacterMode, ResourceKind};
use crate::services::characters::CharacterCandidate;
use crate::services::extractor::StrategyRegistry;
use crate::services::llm::{strip_code_blocks, LlmClient};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

const SYSTEM_PROMPT: &str =
    "You design printable educational and game resources. Reply with a single valid JSON object and nothing else.";

#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub kind: ResourceKind,
    pub description: String,
    pub style_ref: Option<String>,
    pub character_ids: Option<Vec<String>>,
    pub character_mode: Option<CharacterMode>,
}

/// Generated content with the detection side-channel already split off.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    pub content: Value,
    pub detected_characters: Vec<CharacterCandidate>,
}

impl GeneratedContent {
    /// Splits `detectedCharacters` out of raw generator output so it never
    /// ends up in persisted content.
    pub fn from_raw(raw: Value) -> Result<Self> {
        let Value::Object(mut object) = raw else {
            return Err(anyhow!("Generated content is not a JSON object"));
        };
        let detected_characters = match object.remove("detectedCharacters") {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Ignoring malformed detectedCharacters: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        Ok(Self {
            content: Value::Object(object),
            detected_characters,
        })
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent>;
}

pub struct LlmContentGenerator {
    llm: Arc<dyn LlmClient>,
    registry: StrategyRegistry,
}

impl LlmContentGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, registry: StrategyRegistry) -> Self {
        Self { llm, registry }
    }

    fn build_prompt(&self, request: &ContentRequest) -> Result<String> {
        let strategy = self.registry.get(request.kind)?;

        let style_line = match &request.style_ref {
            Some(style) => format!("\nVisual style for every image prompt: {}.", style),
            None => String::new(),
        };
        let character_line = match (&request.character_ids, request.character_mode) {
            (Some(ids), Some(CharacterMode::PerItem)) if !ids.is_empty() => format!(
                "\nExisting characters [{}] may appear; set \"characterIds\" on each item to the ones it features.",
                ids.join(", ")
            ),
            (Some(ids), _) if !ids.is_empty() => format!(
                "\nCharacter [{}] is the recurring protagonist of the whole resource.",
                ids.join(", ")
            ),
            _ => String::new(),
        };

        Ok(format!(
            "Create a {kind} from this request:\n\"{description}\"\
            {style_line}{character_line}\
            \n\nReturn JSON shaped like:\n{shape}\
            \n\nAlso add a top-level \"detectedCharacters\" array listing every recurring named character you used: \
            [{{ \"name\": \"...\", \"description\": \"...\", \"personality\": \"...\", \"visualDescription\": \"what they look like\", \"appearsOn\": [\"{key}\"] }}]. \
            Item keys are positional and zero-based, formatted as {key}. Use an empty array when there are none.",
            kind = request.kind,
            description = request.description.trim(),
            style_line = style_line,
            character_line = character_line,
            shape = strategy.content_instructions(),
            key = strategy.item_key_hint(),
        ))
    }
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent> {
        let prompt = self.build_prompt(request)?;
        debug!("Content prompt for {}: {}", request.kind, prompt);

        let response = self.llm.chat(SYSTEM_PROMPT, &prompt).await?;
        let clean_json = strip_code_blocks(&response);
        let raw: Value = serde_json::from_str(&clean_json)
            .with_context(|| format!("Failed to parse content JSON: {}", clean_json))?;
        GeneratedContent::from_raw(raw)
    }
}
