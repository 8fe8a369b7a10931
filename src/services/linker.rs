//! Splices detected characters into structured content and back out again.

use crate::core::state::{DetectedCharacter, ImageJob};
use crate::services::extractor::{item_character_ids, ResourceStrategy};
use serde_json::Value;
use std::collections::HashMap;

pub type CharacterMap = HashMap<String, Vec<String>>;

/// Item key → character ids, in detection order. A key may collect several
/// characters and a character may sit under several keys.
pub fn build_character_map(characters: &[DetectedCharacter]) -> CharacterMap {
    let mut map = CharacterMap::new();
    for character in characters {
        for key in &character.appears_on {
            let bucket = map.entry(key.clone()).or_default();
            if !bucket.contains(&character.character_id) {
                bucket.push(character.character_id.clone());
            }
        }
    }
    map
}

/// Returns a copy of `content` with each mapped item's `characterIds`
/// extended by its characters.
pub fn link_characters(strategy: &dyn ResourceStrategy, content: &Value, map: &CharacterMap) -> Value {
    let mut linked = content.clone();
    for item in strategy.linkable_items(content) {
        let Some(ids) = map.get(&item.key) else {
            continue;
        };
        let Some(target) = linked.pointer_mut(&item.pointer) else {
            continue;
        };
        let mut current = item_character_ids(target).unwrap_or_default();
        for id in ids {
            if !current.contains(id) {
                current.push(id.clone());
            }
        }
        set_character_ids(target, current);
    }
    linked
}

/// Returns a copy of `content` with `character_id` removed from every item.
/// Items left without characters lose the field entirely.
pub fn unlink_character(strategy: &dyn ResourceStrategy, content: &Value, character_id: &str) -> Value {
    let mut unlinked = content.clone();
    for item in strategy.linkable_items(content) {
        let Some(target) = unlinked.pointer_mut(&item.pointer) else {
            continue;
        };
        let Some(current) = item_character_ids(target) else {
            continue;
        };
        let remaining = current.into_iter().filter(|id| id != character_id).collect();
        set_character_ids(target, remaining);
    }
    unlinked
}

fn set_character_ids(target: &mut Value, ids: Vec<String>) {
    let Some(object) = target.as_object_mut() else {
        return;
    };
    if ids.is_empty() {
        object.remove("characterIds");
    } else {
        object.insert(
            "characterIds".to_string(),
            Value::Array(ids.into_iter().map(Value::String).collect()),
        );
    }
}

/// Prefixes every prompt with a description of all linked characters so
/// illustrations without a character still share the same world.
pub fn apply_world_context(jobs: Vec<ImageJob>, characters: &[DetectedCharacter]) -> Vec<ImageJob> {
    let described: Vec<String> = characters
        .iter()
        .map(|c| match c.prompt_fragment.trim() {
            "" => c.name.clone(),
            fragment => format!("{} ({})", c.name, fragment),
        })
        .collect();
    if described.is_empty() {
        return jobs;
    }

    let context = format!("World characters: {}.", described.join("; "));
    jobs.into_iter()
        .map(|mut job| {
            job.prompt = format!("{}\n\n{}", context, job.prompt);
            job
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{AspectRatio, AssetKind};
    use crate::services::extractor::{CardGame, Poster};
    use serde_json::json;

    fn detected(id: &str, appears_on: &[&str]) -> DetectedCharacter {
        DetectedCharacter {
            name: format!("Name {}", id),
            character_id: id.to_string(),
            appears_on: appears_on.iter().map(|s| s.to_string()).collect(),
            is_new: true,
            prompt_fragment: String::new(),
            suggested_prompt_fragment: None,
            suggestion_dismissed: false,
        }
    }

    #[test]
    fn test_build_character_map() {
        let map = build_character_map(&[
            detected("A", &["card_0", "card_2"]),
            detected("B", &["card_2"]),
        ]);

        assert_eq!(map.len(), 2);
        assert_eq!(map["card_0"], vec!["A"]);
        assert_eq!(map["card_2"], vec!["A", "B"]);
    }

    #[test]
    fn test_link_attaches_ids_by_position() {
        let content = json!({"cards": [{"title": "a"}, {"title": "b"}, {"title": "c"}]});
        let map = build_character_map(&[detected("A", &["card_0", "card_2"]), detected("B", &["card_2"])]);

        let linked = link_characters(&CardGame, &content, &map);
        assert_eq!(linked["cards"][0]["characterIds"], json!(["A"]));
        assert!(linked["cards"][1].get("characterIds").is_none());
        assert_eq!(linked["cards"][2]["characterIds"], json!(["A", "B"]));
        // Input untouched.
        assert!(content["cards"][0].get("characterIds").is_none());
    }

    #[test]
    fn test_link_then_unlink_round_trips() {
        let content = json!({
            "cards": [
                {"title": "a"},
                {"title": "b", "characterIds": ["existing"]},
                {"title": "c"}
            ]
        });
        let map = build_character_map(&[detected("X", &["card_0", "card_1", "card_9"])]);

        let linked = link_characters(&CardGame, &content, &map);
        assert_eq!(linked["cards"][1]["characterIds"], json!(["existing", "X"]));

        let restored = unlink_character(&CardGame, &linked, "X");
        assert_eq!(restored, content);
        assert!(restored["cards"][0].get("characterIds").is_none());
    }

    #[test]
    fn test_unlink_empties_to_absent() {
        let content = json!({"cards": [{"characterIds": ["A"]}]});
        let unlinked = unlink_character(&CardGame, &content, "A");
        assert_eq!(unlinked, json!({"cards": [{}]}));
    }

    #[test]
    fn test_poster_links_at_root() {
        let content = json!({"headline": "Hi"});
        let map = build_character_map(&[detected("A", &["poster"])]);
        let linked = link_characters(&Poster, &content, &map);
        assert_eq!(linked["characterIds"], json!(["A"]));
    }

    #[test]
    fn test_world_context_prefixes_every_prompt() {
        let mut fox = detected("A", &[]);
        fox.name = "Pip".to_string();
        fox.prompt_fragment = "a small red fox".to_string();
        let jobs = vec![
            ImageJob::new("k1", AssetKind::CardBackground, "a forest", AspectRatio::Portrait),
            ImageJob::new("k2", AssetKind::CardBack, "stars", AspectRatio::Portrait),
        ];

        let jobs = apply_world_context(jobs, &[fox]);
        assert!(jobs.iter().all(|j| j.prompt.starts_with("World characters: Pip (a small red fox).")));
        assert!(jobs[1].prompt.ends_with("stars"));

        let untouched = apply_world_context(
            vec![ImageJob::new("k", AssetKind::Board, "p", AspectRatio::Landscape)],
            &[],
        );
        assert_eq!(untouched[0].prompt, "p");
    }
}
