use super::{first_text, resolve_characters, JobCategory, LinkableItem, Placement, ResourceStrategy};
use crate::core::state::{AspectRatio, AssetKind, CharacterSelection, ImageJob, ResourceKind};
use serde_json::Value;

pub struct Poster;

impl ResourceStrategy for Poster {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Poster
    }

    fn derive_jobs(&self, content: &Value, selection: Option<&CharacterSelection>) -> Vec<ImageJob> {
        let Some(prompt) = first_text(content, &["illustrationPrompt", "headline"]) else {
            return Vec::new();
        };
        let placement = Placement::from_content(content);
        vec![ImageJob::new("poster_main", AssetKind::Illustration, prompt, AspectRatio::Tall)
            .with_characters(resolve_characters(content, selection, JobCategory::Background, placement))
            .with_label("Illustration", "Poster")]
    }

    // The poster itself is the only item.
    fn linkable_items(&self, _content: &Value) -> Vec<LinkableItem> {
        vec![LinkableItem {
            key: "poster".to_string(),
            pointer: String::new(),
        }]
    }

    fn item_key_hint(&self) -> &'static str {
        "poster"
    }

    fn content_instructions(&self) -> &'static str {
        r#"{ "headline": "...", "body": ["short line", "..."], "illustrationPrompt": "the single main illustration" }"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_illustration() {
        let jobs = Poster.derive_jobs(&json!({"headline": "Wash your hands"}), None);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].asset_key, "poster_main");
        assert_eq!(jobs[0].prompt, "Wash your hands");
        assert_eq!(jobs[0].aspect, AspectRatio::Tall);

        assert!(Poster.derive_jobs(&json!({}), None).is_empty());
    }
}
