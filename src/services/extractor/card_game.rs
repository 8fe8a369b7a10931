use super::{first_text, items, list_items, resolve_characters, JobCategory, LinkableItem, Placement, ResourceStrategy};
use crate::core::state::{AspectRatio, AssetKind, CharacterSelection, ImageJob, ResourceKind};
use serde_json::Value;
use std::collections::HashSet;

/// A background per card, an icon per card that asks for one, and an
/// optional shared card back.
pub struct CardGame;

fn explicit_id(card: &Value) -> Option<String> {
    match card.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// One id per card, unique within the deck. Explicit ids are claimed first;
/// repeats and cards without an id fall back to the index, suffixed until free.
fn card_ids(cards: &[Value]) -> Vec<String> {
    let explicit: Vec<Option<String>> = cards.iter().map(explicit_id).collect();
    let mut used = HashSet::new();
    let mut ids: Vec<Option<String>> = explicit
        .into_iter()
        .map(|id| id.filter(|id| used.insert(id.clone())))
        .collect();

    for (i, slot) in ids.iter_mut().enumerate() {
        if slot.is_some() {
            continue;
        }
        let base = match explicit_id(&cards[i]) {
            Some(id) => format!("{}_{}", id, i),
            None => i.to_string(),
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while !used.insert(candidate.clone()) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        *slot = Some(candidate);
    }
    ids.into_iter().flatten().collect()
}

impl ResourceStrategy for CardGame {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CardGame
    }

    fn derive_jobs(&self, content: &Value, selection: Option<&CharacterSelection>) -> Vec<ImageJob> {
        let placement = Placement::from_content(content);
        let mut jobs = Vec::new();

        let cards = items(content, "cards");
        for ((i, card), id) in cards.iter().enumerate().zip(card_ids(cards)) {
            let label = first_text(card, &["title"]).unwrap_or_else(|| format!("Card {}", i + 1));

            let background = first_text(card, &["backgroundPrompt"]).or_else(|| {
                let title = first_text(card, &["title"])?;
                Some(match first_text(card, &["description"]) {
                    Some(desc) => format!("{}: {}", title, desc),
                    None => title,
                })
            });
            if let Some(prompt) = background {
                jobs.push(
                    ImageJob::new(format!("card_bg:{}", id), AssetKind::CardBackground, prompt, AspectRatio::Portrait)
                        .with_characters(resolve_characters(card, selection, JobCategory::Background, placement))
                        .with_label(label.clone(), "Backgrounds"),
                );
            }

            if let Some(prompt) = first_text(card, &["iconPrompt"]) {
                jobs.push(
                    ImageJob::new(format!("card_icon:{}", id), AssetKind::CardIcon, prompt, AspectRatio::Square)
                        .with_characters(resolve_characters(card, selection, JobCategory::Icon, placement))
                        .green_screen()
                        .with_label(label, "Icons"),
                );
            }
        }

        if let Some(prompt) = content.get("cardBack").and_then(|b| first_text(b, &["prompt"])) {
            jobs.push(
                ImageJob::new("card_back", AssetKind::CardBack, prompt, AspectRatio::Portrait)
                    .with_label("Card back", "Back"),
            );
        }

        jobs
    }

    fn linkable_items(&self, content: &Value) -> Vec<LinkableItem> {
        list_items(content, "cards", "card")
    }

    fn item_key_hint(&self) -> &'static str {
        "card_{index}"
    }

    fn content_instructions(&self) -> &'static str {
        r#"{ "title": "...", "characterPlacement": "backgrounds|icons|both|none", "cards": [ { "id": "short-unique-id", "title": "...", "description": "...", "backgroundPrompt": "full-card background scene", "iconPrompt": "optional single-object icon" } ], "cardBack": { "prompt": "shared card back design" } }"#
    }
}
