use super::{first_text, items, list_items, resolve_characters, JobCategory, LinkableItem, Placement, ResourceStrategy};
use crate::core::state::{AspectRatio, AssetKind, CharacterSelection, ImageJob, ResourceKind};
use serde_json::Value;

/// One illustrated front per card.
pub struct Flashcards;

impl ResourceStrategy for Flashcards {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Flashcards
    }

    fn derive_jobs(&self, content: &Value, selection: Option<&CharacterSelection>) -> Vec<ImageJob> {
        let placement = Placement::from_content(content);
        items(content, "cards")
            .iter()
            .enumerate()
            .filter_map(|(i, card)| {
                let prompt = first_text(card, &["imagePrompt", "front"])?;
                Some(
                    ImageJob::new(
                        format!("flashcard_front_{}", i),
                        AssetKind::FlashcardFront,
                        prompt,
                        AspectRatio::Square,
                    )
                    .with_characters(resolve_characters(card, selection, JobCategory::Background, placement))
                    .with_label(format!("Card {}", i + 1), "Fronts"),
                )
            })
            .collect()
    }

    fn linkable_items(&self, content: &Value) -> Vec<LinkableItem> {
        list_items(content, "cards", "card")
    }

    fn item_key_hint(&self) -> &'static str {
        "card_{index}"
    }

    fn content_instructions(&self) -> &'static str {
        r#"{ "title": "...", "cards": [ { "front": "term or question", "back": "answer", "imagePrompt": "what the front illustration shows" } ] }"#
    }
}
