use crate::core::error::WizardError;
use crate::core::io::{read_json, write_json, Storage};
use crate::core::state::{AspectRatio, AssetKind};
use crate::services::images::{ImageGenerator, ImageRequest};
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A character as reported by the content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CharacterCandidate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub visual_description: String,
    #[serde(default)]
    pub appears_on: Vec<String>,
}

/// A candidate resolved to a persistent character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedCharacter {
    pub character_id: String,
    pub name: String,
    pub appears_on: Vec<String>,
    pub is_new: bool,
    pub prompt_fragment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_prompt_fragment: Option<String>,
}

#[async_trait]
pub trait CharacterCreator: Send + Sync {
    async fn create_or_link(
        &self,
        owner_id: &str,
        style_ref: Option<&str>,
        candidates: &[CharacterCandidate],
    ) -> Result<Vec<LinkedCharacter>>;
}

#[async_trait]
pub trait ReferenceEnsurer: Send + Sync {
    /// Makes sure a styled reference portrait exists. Idempotent unless
    /// `force` is set.
    async fn ensure_reference(&self, character_id: &str, style_ref: &str, force: bool) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCharacter {
    id: String,
    owner_id: String,
    name: String,
    prompt_fragment: String,
    #[serde(default)]
    personality: String,
    #[serde(default)]
    references: Vec<String>,
}

/// Characters kept in a single JSON registry; reference portraits are
/// produced through the image generator.
pub struct StoredCharacterService {
    storage: Arc<dyn Storage>,
    path: String,
    images: Arc<dyn ImageGenerator>,
    lock: Mutex<()>,
}

impl StoredCharacterService {
    pub fn new(storage: Arc<dyn Storage>, data_folder: &str, images: Arc<dyn ImageGenerator>) -> Self {
        Self {
            storage,
            path: Path::new(data_folder).join("characters.json").to_string_lossy().to_string(),
            images,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<StoredCharacter>> {
        Ok(read_json(self.storage.as_ref(), &self.path).await?.unwrap_or_default())
    }

    async fn save(&self, characters: &[StoredCharacter]) -> Result<()> {
        write_json(self.storage.as_ref(), &self.path, characters).await
    }
}

fn fragment_of(candidate: &CharacterCandidate) -> String {
    let visual = candidate.visual_description.trim();
    if visual.is_empty() {
        candidate.description.trim().to_string()
    } else {
        visual.to_string()
    }
}

#[async_trait]
impl CharacterCreator for StoredCharacterService {
    async fn create_or_link(
        &self,
        owner_id: &str,
        _style_ref: Option<&str>,
        candidates: &[CharacterCandidate],
    ) -> Result<Vec<LinkedCharacter>> {
        let _guard = self.lock.lock().await;
        let mut registry = self.load().await?;
        let mut linked = Vec::with_capacity(candidates.len());
        let mut changed = false;

        for candidate in candidates {
            let fresh = fragment_of(candidate);
            let existing = registry
                .iter()
                .find(|c| c.owner_id == owner_id && c.name.eq_ignore_ascii_case(candidate.name.trim()));

            let character = match existing {
                Some(stored) => {
                    debug!("Linked existing character {} ({})", stored.name, stored.id);
                    let suggested = (!fresh.is_empty() && fresh != stored.prompt_fragment).then_some(fresh);
                    LinkedCharacter {
                        character_id: stored.id.clone(),
                        name: stored.name.clone(),
                        appears_on: candidate.appears_on.clone(),
                        is_new: false,
                        prompt_fragment: stored.prompt_fragment.clone(),
                        suggested_prompt_fragment: suggested,
                    }
                }
                None => {
                    let stored = StoredCharacter {
                        id: Uuid::new_v4().to_string(),
                        owner_id: owner_id.to_string(),
                        name: candidate.name.trim().to_string(),
                        prompt_fragment: fresh,
                        personality: candidate.personality.clone(),
                        references: Vec::new(),
                    };
                    info!("Created character {} ({})", stored.name, stored.id);
                    let character = LinkedCharacter {
                        character_id: stored.id.clone(),
                        name: stored.name.clone(),
                        appears_on: candidate.appears_on.clone(),
                        is_new: true,
                        prompt_fragment: stored.prompt_fragment.clone(),
                        suggested_prompt_fragment: None,
                    };
                    registry.push(stored);
                    changed = true;
                    character
                }
            };
            linked.push(character);
        }

        if changed {
            self.save(&registry).await?;
        }
        Ok(linked)
    }
}

#[async_trait]
impl ReferenceEnsurer for StoredCharacterService {
    async fn ensure_reference(&self, character_id: &str, style_ref: &str, force: bool) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut registry = self.load().await?;
        let character = registry
            .iter_mut()
            .find(|c| c.id == character_id)
            .ok_or_else(|| WizardError::UnknownCharacter(character_id.to_string()))?;

        if !force && character.references.iter().any(|s| s == style_ref) {
            return Ok(());
        }

        let request = ImageRequest {
            owner_ref: character.id.clone(),
            asset_kind: AssetKind::CharacterReference,
            asset_key: format!("ref:{}:{}", character.id, style_ref),
            prompt: format!(
                "Character reference portrait of {}: {}. Full body, neutral pose, plain light background.",
                character.name, character.prompt_fragment
            ),
            style: Some(style_ref.to_string()),
            character_ids: None,
            include_text: false,
            aspect: AspectRatio::Square,
        };
        self.images.generate(&request).await?;

        if !character.references.iter().any(|s| s == style_ref) {
            character.references.push(style_ref.to_string());
        }
        self.save(&registry).await
    }
}
