//! Content → image job derivation.
//!
//! Each resource kind plugs in a [`ResourceStrategy`] that knows how its
//! structured content is shaped: which sub-items become image jobs, under
//! which asset keys, and which positional item keys the character linker
//! may attach characters to. Derivation is pure: the same content and
//! selection always produce the same jobs in the same order, all `Pending`.

mod board_game;
mod card_game;
mod chart;
mod flashcards;
mod poster;

pub use board_game::BoardGame;
pub use card_game::CardGame;
pub use chart::Chart;
pub use flashcards::Flashcards;
pub use poster::Poster;

use crate::core::state::{CharacterSelection, ImageJob, ResourceKind};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A content item characters can be linked to, addressed by its positional
/// key (`card_0`, `token_3`, ...) and a JSON pointer into the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkableItem {
    pub key: String,
    pub pointer: String,
}

pub trait ResourceStrategy: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn derive_jobs(&self, content: &Value, selection: Option<&CharacterSelection>) -> Vec<ImageJob>;

    fn linkable_items(&self, content: &Value) -> Vec<LinkableItem>;

    /// How item keys look for this kind, e.g. `card_{index}`.
    fn item_key_hint(&self) -> &'static str;

    /// JSON shape the content generator is asked to produce for this kind.
    fn content_instructions(&self) -> &'static str;
}

#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<ResourceKind, Arc<dyn ResourceStrategy>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Flashcards));
        registry.register(Arc::new(CardGame));
        registry.register(Arc::new(BoardGame));
        registry.register(Arc::new(Poster));
        registry.register(Arc::new(Chart));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn ResourceStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: ResourceKind) -> Result<&dyn ResourceStrategy> {
        self.strategies
            .get(&kind)
            .map(|s| s.as_ref())
            .ok_or_else(|| anyhow!("No strategy registered for resource kind {}", kind))
    }

    pub fn extract_jobs(
        &self,
        kind: ResourceKind,
        content: &Value,
        selection: Option<&CharacterSelection>,
    ) -> Result<Vec<ImageJob>> {
        Ok(self.get(kind)?.derive_jobs(content, selection))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Which job categories receive the resource-level character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Backgrounds,
    Icons,
    Both,
    Nowhere,
}

impl Placement {
    pub fn from_content(content: &Value) -> Placement {
        match content.get("characterPlacement").and_then(Value::as_str) {
            Some("backgrounds") => Placement::Backgrounds,
            Some("icons") => Placement::Icons,
            Some("none") => Placement::Nowhere,
            _ => Placement::Both,
        }
    }

    fn allows(self, category: JobCategory) -> bool {
        match (self, category) {
            (_, JobCategory::Shared) => false,
            (Placement::Both, _) => true,
            (Placement::Backgrounds, JobCategory::Background) => true,
            (Placement::Icons, JobCategory::Icon) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCategory {
    Background,
    Icon,
    /// Assets shared by the whole resource (card back, chart header).
    Shared,
}

/// Characters for one job. Links already spliced into the item by the
/// character linker win over the resource-level selection.
pub(crate) fn resolve_characters(
    item: &Value,
    selection: Option<&CharacterSelection>,
    category: JobCategory,
    placement: Placement,
) -> Option<Vec<String>> {
    if !placement.allows(category) {
        return None;
    }
    if let Some(linked) = item_character_ids(item) {
        return Some(linked);
    }
    selection
        .and_then(|s| s.resource_character())
        .map(|id| vec![id.to_string()])
}

pub(crate) fn item_character_ids(item: &Value) -> Option<Vec<String>> {
    let ids: Vec<String> = item
        .get("characterIds")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    (!ids.is_empty()).then_some(ids)
}

pub(crate) fn items<'a>(content: &'a Value, field: &str) -> &'a [Value] {
    content
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// First non-blank string among `fields`.
pub(crate) fn first_text(item: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|f| {
        item.get(*f)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

pub(crate) fn list_items(content: &Value, field: &str, key_prefix: &str) -> Vec<LinkableItem> {
    (0..items(content, field).len())
        .map(|i| LinkableItem {
            key: format!("{}_{}", key_prefix, i),
            pointer: format!("/{}/{}", field, i),
        })
        .collect()
}
