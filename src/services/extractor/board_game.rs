use super::{first_text, items, list_items, resolve_characters, JobCategory, LinkableItem, Placement, ResourceStrategy};
use crate::core::state::{AspectRatio, AssetKind, CharacterSelection, ImageJob, ResourceKind};
use serde_json::Value;

pub struct BoardGame;

impl ResourceStrategy for BoardGame {
    fn kind(&self) -> ResourceKind {
        ResourceKind::BoardGame
    }

    fn derive_jobs(&self, content: &Value, selection: Option<&CharacterSelection>) -> Vec<ImageJob> {
        let placement = Placement::from_content(content);
        let mut jobs = Vec::new();

        if let Some(board) = content.get("board") {
            if let Some(prompt) = first_text(board, &["prompt"]) {
                jobs.push(
                    ImageJob::new("board", AssetKind::Board, prompt, AspectRatio::Landscape)
                        .with_characters(resolve_characters(board, selection, JobCategory::Background, placement))
                        .with_label("Board", "Board"),
                );
            }
        }

        for (i, token) in items(content, "tokens").iter().enumerate() {
            let Some(prompt) = first_text(token, &["prompt", "name"]) else {
                continue;
            };
            let label = first_text(token, &["name"]).unwrap_or_else(|| format!("Token {}", i + 1));
            jobs.push(
                ImageJob::new(format!("token_{}", i), AssetKind::Token, prompt, AspectRatio::Square)
                    .with_characters(resolve_characters(token, selection, JobCategory::Icon, placement))
                    .green_screen()
                    .with_label(label, "Tokens"),
            );
        }

        jobs
    }

    fn linkable_items(&self, content: &Value) -> Vec<LinkableItem> {
        list_items(content, "tokens", "token")
    }

    fn item_key_hint(&self) -> &'static str {
        "token_{index}"
    }

    fn content_instructions(&self) -> &'static str {
        r#"{ "title": "...", "rules": "...", "board": { "prompt": "top-down board illustration" }, "tokens": [ { "name": "...", "prompt": "single game piece on its own" } ] }"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_board_and_tokens() {
        let content = json!({
            "board": {"prompt": "a winding river"},
            "tokens": [{"name": "Frog"}, {"name": "Heron", "prompt": "a grey heron", "characterIds": ["c9"]}]
        });
        let jobs = BoardGame.derive_jobs(&content, None);

        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].asset_key, "board");
        assert_eq!(jobs[1].asset_key, "token_0");
        assert_eq!(jobs[1].prompt, "Frog");
        assert!(jobs[1].green_screen);
        assert_eq!(jobs[2].character_ids, Some(vec!["c9".to_string()]));
    }
}
