use crate::core::io::{read_json, write_json, Storage};
use crate::core::state::{AspectRatio, AssetKind, ImageJob};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

const GREEN_SCREEN_SUFFIX: &str =
    "Isolated single subject centered on a solid pure green (#00FF00) background. No shadows, no scenery, no text.";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_url")]
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_image_url() -> String {
    "http://localhost:8188/".to_string()
}
fn default_concurrency() -> usize {
    3
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_url: default_image_url(),
            api_key: None,
            model: None,
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub owner_ref: String,
    pub asset_kind: AssetKind,
    pub asset_key: String,
    pub prompt: String,
    pub style: Option<String>,
    pub character_ids: Option<Vec<String>>,
    pub include_text: bool,
    pub aspect: AspectRatio,
}

impl ImageRequest {
    pub fn for_job(owner_ref: &str, job: &ImageJob, style: Option<&str>) -> Self {
        Self {
            owner_ref: owner_ref.to_string(),
            asset_kind: job.asset_kind,
            asset_key: job.asset_key.clone(),
            prompt: job.prompt.clone(),
            style: style.map(str::to_string),
            character_ids: job.character_ids.clone(),
            include_text: job.include_text,
            aspect: job.aspect,
        }
    }
}

/// Produces and persists a new asset version for each request.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<()>;

    /// Icon-style generation against a solid matte for later compositing.
    async fn generate_green_screen(&self, request: &ImageRequest) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub kind: AssetKind,
    pub key: String,
    pub version: u32,
    pub url: String,
    pub status: AssetStatus,
    #[serde(default)]
    pub green_screen: bool,
    pub created_at: DateTime<Utc>,
}

/// Read model over persisted assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn latest(&self, owner: &str, kind: AssetKind, key: &str) -> Result<Option<AssetRecord>>;
}

/// Asset files plus a per-owner JSON index of every version.
pub struct StorageAssetStore {
    storage: Arc<dyn Storage>,
    root: String,
    index_lock: Mutex<()>,
}

impl StorageAssetStore {
    pub fn new(storage: Arc<dyn Storage>, data_folder: &str) -> Self {
        Self {
            storage,
            root: Path::new(data_folder).join("assets").to_string_lossy().to_string(),
            index_lock: Mutex::new(()),
        }
    }

    fn owner_dir(&self, owner: &str) -> String {
        Path::new(&self.root).join(owner).to_string_lossy().to_string()
    }

    fn index_path(&self, owner: &str) -> String {
        Path::new(&self.owner_dir(owner)).join("index.json").to_string_lossy().to_string()
    }

    async fn load_index(&self, owner: &str) -> Result<Vec<AssetRecord>> {
        Ok(read_json(self.storage.as_ref(), &self.index_path(owner)).await?.unwrap_or_default())
    }

    /// Writes `bytes` as the next version of `(kind, key)`.
    pub async fn record(
        &self,
        owner: &str,
        kind: AssetKind,
        key: &str,
        bytes: &[u8],
        extension: &str,
        green_screen: bool,
    ) -> Result<AssetRecord> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index(owner).await?;

        let version = next_version(&index, kind, key);
        let file_name = format!("{}_v{}.{}", key.replace([':', '/'], "_"), version, extension);
        let path = Path::new(&self.owner_dir(owner)).join(file_name).to_string_lossy().to_string();
        self.storage.write(&path, bytes).await?;

        let record = AssetRecord {
            kind,
            key: key.to_string(),
            version,
            url: path,
            status: AssetStatus::Ready,
            green_screen,
            created_at: Utc::now(),
        };
        index.push(record.clone());
        write_json(self.storage.as_ref(), &self.index_path(owner), &index).await?;
        debug!("Recorded {} v{} for {}", key, version, owner);
        Ok(record)
    }

    /// Adds a failed version with no file, so the latest lookup no longer
    /// reports an older image as current.
    pub async fn record_failure(&self, owner: &str, kind: AssetKind, key: &str, green_screen: bool) -> Result<AssetRecord> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index(owner).await?;

        let record = AssetRecord {
            kind,
            key: key.to_string(),
            version: next_version(&index, kind, key),
            url: String::new(),
            status: AssetStatus::Failed,
            green_screen,
            created_at: Utc::now(),
        };
        index.push(record.clone());
        write_json(self.storage.as_ref(), &self.index_path(owner), &index).await?;
        debug!("Recorded failed {} v{} for {}", key, record.version, owner);
        Ok(record)
    }
}

fn next_version(index: &[AssetRecord], kind: AssetKind, key: &str) -> u32 {
    index
        .iter()
        .filter(|r| r.kind == kind && r.key == key)
        .map(|r| r.version)
        .max()
        .unwrap_or(0)
        + 1
}

#[async_trait]
impl AssetStore for StorageAssetStore {
    async fn latest(&self, owner: &str, kind: AssetKind, key: &str) -> Result<Option<AssetRecord>> {
        Ok(self
            .load_index(owner)
            .await?
            .into_iter()
            .filter(|r| r.kind == kind && r.key == key)
            .max_by_key(|r| r.version))
    }
}

// --- HTTP generator ---

pub struct HttpImageGenerator {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    model: Option<String>,
    assets: Arc<StorageAssetStore>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    prompt: &'a str,
    aspect_ratio: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    include_text: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    character_ids: Option<&'a [String]>,
}

impl HttpImageGenerator {
    pub fn new(config: &ImageConfig, assets: Arc<StorageAssetStore>) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .with_context(|| format!("Invalid image base_url: {}", config.base_url))?
            .join("generate")?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            assets,
        })
    }

    async fn fetch(&self, request: &ImageRequest, prompt: &str) -> Result<(Vec<u8>, &'static str)> {
        let body = GenerateBody {
            prompt,
            aspect_ratio: request.aspect.as_str(),
            style: request.style.as_deref(),
            model: self.model.as_deref(),
            include_text: request.include_text,
            character_ids: request.character_ids.as_deref(),
        };

        let mut req = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Image API error ({}): {}", status, error_text));
        }

        let extension = match resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some("image/jpeg") => "jpg",
            Some("image/webp") => "webp",
            _ => "png",
        };
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(anyhow!("Image API returned an empty body for {}", request.asset_key));
        }
        Ok((bytes.to_vec(), extension))
    }

    /// Marks the asset failed and hands back the original error.
    async fn fail(&self, request: &ImageRequest, green_screen: bool, error: anyhow::Error) -> anyhow::Error {
        if let Err(e) = self
            .assets
            .record_failure(&request.owner_ref, request.asset_kind, &request.asset_key, green_screen)
            .await
        {
            warn!("Could not record failure for {}: {:#}", request.asset_key, e);
        }
        error
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(&self, request: &ImageRequest) -> Result<()> {
        let (bytes, ext) = match self.fetch(request, &request.prompt).await {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail(request, false, e).await),
        };
        let record = self
            .assets
            .record(&request.owner_ref, request.asset_kind, &request.asset_key, &bytes, ext, false)
            .await?;
        info!("Generated {} (v{})", request.asset_key, record.version);
        Ok(())
    }

    async fn generate_green_screen(&self, request: &ImageRequest) -> Result<()> {
        let prompt = format!("{}\n\n{}", request.prompt, GREEN_SCREEN_SUFFIX);
        let (bytes, ext) = match self.fetch(request, &prompt).await {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail(request, true, e).await),
        };
        let record = self
            .assets
            .record(&request.owner_ref, request.asset_kind, &request.asset_key, &bytes, ext, true)
            .await?;
        info!("Generated green-screen {} (v{})", request.asset_key, record.version);
        Ok(())
    }
}
