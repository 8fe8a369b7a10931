use crate::core::io::{read_json, write_json, Storage};
use crate::core::state::{CharacterSelection, DetectedCharacter, ResourceKind};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// The editable part of a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DraftContent {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub style_ref: Option<String>,
    #[serde(default)]
    pub character_selection: Option<CharacterSelection>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub detected_characters: Vec<DetectedCharacter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRecord {
    pub id: String,
    pub owner_id: String,
    pub kind: ResourceKind,
    #[serde(flatten)]
    pub data: DraftContent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Persists a new draft and returns its identifier.
    async fn create(&self, owner_id: &str, kind: ResourceKind, draft: &DraftContent) -> Result<String>;
    async fn update(&self, id: &str, draft: &DraftContent) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<DraftRecord>>;
    /// Drafts of one kind for one owner, most recently updated first.
    async fn list(&self, owner_id: &str, kind: ResourceKind) -> Result<Vec<DraftRecord>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

pub struct StorageDraftStore {
    storage: Arc<dyn Storage>,
    dir: String,
}

impl StorageDraftStore {
    pub fn new(storage: Arc<dyn Storage>, data_folder: &str) -> Self {
        Self {
            storage,
            dir: Path::new(data_folder).join("drafts").to_string_lossy().to_string(),
        }
    }

    fn path(&self, id: &str) -> String {
        Path::new(&self.dir).join(format!("{}.json", id)).to_string_lossy().to_string()
    }
}

#[async_trait]
impl DraftStore for StorageDraftStore {
    async fn create(&self, owner_id: &str, kind: ResourceKind, draft: &DraftContent) -> Result<String> {
        let now = Utc::now();
        let record = DraftRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            kind,
            data: draft.clone(),
            created_at: now,
            updated_at: now,
        };
        write_json(self.storage.as_ref(), &self.path(&record.id), &record).await?;
        info!("Created draft {} ({})", record.id, kind);
        Ok(record.id)
    }

    async fn update(&self, id: &str, draft: &DraftContent) -> Result<()> {
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("Draft {} does not exist", id))?;
        record.data = draft.clone();
        record.updated_at = Utc::now();
        write_json(self.storage.as_ref(), &self.path(id), &record).await?;
        debug!("Updated draft {}", id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DraftRecord>> {
        read_json(self.storage.as_ref(), &self.path(id)).await
    }

    async fn list(&self, owner_id: &str, kind: ResourceKind) -> Result<Vec<DraftRecord>> {
        let mut drafts = Vec::new();
        for entry in self.storage.list(&self.dir).await? {
            if !entry.ends_with(".json") {
                continue;
            }
            if let Some(record) = read_json::<DraftRecord>(self.storage.as_ref(), &entry).await? {
                if record.owner_id == owner_id && record.kind == kind {
                    drafts.push(record);
                }
            }
        }
        drafts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(drafts)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.storage.delete(&self.path(id)).await?;
        info!("Discarded draft {}", id);
        Ok(())
    }
}
