//! Resource creation wizard.
//!
//! Drives the four steps a resource goes through:
//!
//! ```text
//! Describe ──► Review ──► Generate ──► Export
//! ```
//!
//! Side effects fire when *leaving* a step, so navigating back and forth does
//! not repeat work:
//!
//! - leaving `Describe` with no content yet generates it (and detects and
//!   links characters),
//! - leaving `Review` creates the draft the first time,
//! - leaving any step at or after `Review` with a draft saves it,
//! - entering `Generate` restores completed jobs from persisted assets.
//!
//! All writes go through [`WizardState::apply`].

mod draft;

pub use crate::core::error::WizardError;

use crate::core::state::{
    CharacterSelection, ContentStatus, DetectedCharacter, DetectionStatus, ImageJob, JobStatus,
    ResourceKind, StatePatch, WizardState, WizardStep,
};
use crate::services::batch::{BatchRunner, RunMode, RunSummary};
use crate::services::characters::{CharacterCreator, ReferenceEnsurer};
use crate::services::content::{ContentGenerator, ContentRequest, GeneratedContent};
use crate::services::drafts::{DraftContent, DraftStore};
use crate::services::extractor::{first_text, StrategyRegistry};
use crate::services::images::{AssetRecord, AssetStatus, AssetStore, ImageGenerator};
use crate::services::linker::{apply_world_context, build_character_map, link_characters, unlink_character};
use anyhow::Result;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

/// External collaborators the wizard drives.
#[derive(Clone)]
pub struct WizardDeps {
    pub content: Arc<dyn ContentGenerator>,
    pub characters: Arc<dyn CharacterCreator>,
    pub references: Arc<dyn ReferenceEnsurer>,
    pub images: Arc<dyn ImageGenerator>,
    pub assets: Arc<dyn AssetStore>,
    pub drafts: Arc<dyn DraftStore>,
}

pub struct WizardController {
    deps: WizardDeps,
    registry: StrategyRegistry,
    owner_id: String,
    runner: BatchRunner,
    state: WizardState,
}

impl WizardController {
    pub fn new(deps: WizardDeps, registry: StrategyRegistry, owner_id: impl Into<String>, kind: ResourceKind) -> Self {
        let runner = BatchRunner::new(deps.images.clone(), deps.references.clone());
        Self {
            deps,
            registry,
            owner_id: owner_id.into(),
            runner,
            state: WizardState::new(kind),
        }
    }

    pub fn with_runner(mut self, runner: BatchRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    // --- Inputs ---

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.state.apply(StatePatch::Description(description.into()));
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.state.apply(StatePatch::Name(name.into()));
    }

    pub fn set_style(&mut self, style_ref: Option<String>) -> Result<()> {
        self.state.apply(StatePatch::StyleRef(style_ref));
        self.rederive(self.state.content().cloned())
    }

    pub fn set_character_selection(&mut self, selection: Option<CharacterSelection>) -> Result<()> {
        self.state.apply(StatePatch::CharacterSelection(selection));
        self.rederive(self.state.content().cloned())
    }

    /// Replaces the content after a manual edit. Jobs whose asset, prompt and
    /// characters are unchanged keep their status.
    pub fn edit_content(&mut self, content: Value) -> Result<()> {
        self.rederive(Some(content))?;
        self.state.apply(StatePatch::ContentStatus {
            status: ContentStatus::Ready,
            error: None,
        });
        Ok(())
    }

    // --- Steps ---

    pub fn is_step_complete(&self, step: WizardStep) -> bool {
        match step {
            WizardStep::Describe => !self.state.description().trim().is_empty(),
            WizardStep::Review => {
                self.state.content_status() == ContentStatus::Ready && !self.state.name().trim().is_empty()
            }
            WizardStep::Generate => self.state.job_counts().complete > 0,
            WizardStep::Export => true,
        }
    }

    /// Moves forward one step, running the side effects of the step being left.
    ///
    /// A failed content generation keeps the wizard on `Describe` and is
    /// reported through [`WizardState::content_error`], not as an `Err`.
    /// Draft save failures are returned.
    pub async fn next(&mut self) -> Result<WizardStep> {
        let current = self.state.step();
        let Some(target) = current.next() else {
            return Ok(current);
        };
        if !self.is_step_complete(current) {
            return Err(WizardError::StepIncomplete(current).into());
        }

        if current == WizardStep::Describe
            && matches!(self.state.content_status(), ContentStatus::Idle | ContentStatus::Error)
        {
            self.generate_content().await;
            if self.state.content_status() != ContentStatus::Ready {
                return Ok(current);
            }
        }
        if current == WizardStep::Review && self.state.resource_id().is_none() {
            self.create_draft().await?;
        } else if current >= WizardStep::Review {
            self.save_draft().await?;
        }

        self.enter(target).await;
        Ok(target)
    }

    pub async fn back(&mut self) -> Result<WizardStep> {
        let current = self.state.step();
        let Some(target) = current.prev() else {
            return Ok(current);
        };
        if current >= WizardStep::Review {
            self.save_draft().await?;
        }
        self.enter(target).await;
        Ok(target)
    }

    async fn enter(&mut self, step: WizardStep) {
        debug!("Entering step {}", step);
        self.state.apply(StatePatch::Step(step));
        if step == WizardStep::Generate {
            self.restore_completed().await;
        }
    }

    // --- Content ---

    /// Generates content for the current description. Failures land in the
    /// content status rather than being returned.
    pub async fn generate_content(&mut self) {
        self.state.apply(StatePatch::ContentStatus {
            status: ContentStatus::Generating,
            error: None,
        });
        match self.produce_content().await {
            Ok(()) => {
                self.state.apply(StatePatch::ContentStatus {
                    status: ContentStatus::Ready,
                    error: None,
                });
                info!("Content ready with {} image jobs", self.state.jobs().len());
            }
            Err(e) => {
                warn!("Content generation failed: {:#}", e);
                self.state.apply(StatePatch::ContentStatus {
                    status: ContentStatus::Error,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    async fn produce_content(&mut self) -> Result<()> {
        let selection = self.state.character_selection();
        let request = ContentRequest {
            kind: self.state.kind(),
            description: self.state.description().to_string(),
            style_ref: self.state.style_ref().map(str::to_string),
            character_ids: selection.map(|s| s.character_ids().to_vec()),
            character_mode: selection.map(|s| s.mode()),
        };
        let generated = self.deps.content.generate(&request).await?;

        let content = self.detect_and_link(generated).await?;
        if self.state.name().trim().is_empty() {
            if let Some(name) = first_text(&content, &["title", "headline"]) {
                self.state.apply(StatePatch::Name(name));
            }
        }
        self.rederive(Some(content))
    }

    /// Resolves detected characters and splices them into the content. Any
    /// failure here falls back to the content as generated.
    async fn detect_and_link(&mut self, generated: GeneratedContent) -> Result<Value> {
        let GeneratedContent {
            content,
            detected_characters: candidates,
        } = generated;

        if candidates.is_empty() {
            self.state.apply(StatePatch::DetectedCharacters(Vec::new()));
            self.state.apply(StatePatch::DetectionStatus(DetectionStatus::Skipped));
            return Ok(content);
        }

        self.state.apply(StatePatch::DetectionStatus(DetectionStatus::Creating));
        let result = self
            .deps
            .characters
            .create_or_link(&self.owner_id, self.state.style_ref(), &candidates)
            .await;
        let linked = match result {
            Ok(linked) => linked,
            Err(e) => {
                warn!("Character detection failed, keeping ungrouped content: {:#}", e);
                self.state.apply(StatePatch::DetectedCharacters(Vec::new()));
                self.state.apply(StatePatch::DetectionStatus(DetectionStatus::Idle));
                return Ok(content);
            }
        };

        let characters: Vec<DetectedCharacter> = linked
            .into_iter()
            .map(|c| DetectedCharacter {
                name: c.name,
                character_id: c.character_id,
                appears_on: c.appears_on,
                is_new: c.is_new,
                prompt_fragment: c.prompt_fragment,
                suggested_prompt_fragment: c.suggested_prompt_fragment,
                suggestion_dismissed: false,
            })
            .collect();
        info!("Linked {} characters", characters.len());

        let strategy = self.registry.get(self.state.kind())?;
        let linked_content = link_characters(strategy, &content, &build_character_map(&characters));
        self.state.apply(StatePatch::DetectedCharacters(characters));
        self.state.apply(StatePatch::DetectionStatus(DetectionStatus::Ready));
        Ok(linked_content)
    }

    fn rederive(&mut self, content: Option<Value>) -> Result<()> {
        let jobs = match &content {
            Some(content) => {
                let jobs = self.registry.extract_jobs(
                    self.state.kind(),
                    content,
                    self.state.character_selection(),
                )?;
                let jobs = apply_world_context(jobs, self.state.detected_characters());
                carry_statuses(self.state.jobs(), jobs)
            }
            None => Vec::new(),
        };
        self.state.apply(StatePatch::Content { content, jobs });
        Ok(())
    }

    // --- Characters ---

    pub fn pending_suggestions(&self) -> Vec<&DetectedCharacter> {
        self.state
            .detected_characters()
            .iter()
            .filter(|c| c.visible_suggestion().is_some())
            .collect()
    }

    pub fn update_prompt_fragment(&mut self, character_id: &str, fragment: impl Into<String>) -> Result<()> {
        let fragment = fragment.into();
        self.update_character(character_id, |c| c.prompt_fragment = fragment)
    }

    /// Takes the suggested fragment over the stored one.
    pub fn accept_suggestion(&mut self, character_id: &str) -> Result<()> {
        self.update_character(character_id, |c| {
            if let Some(suggested) = c.suggested_prompt_fragment.clone() {
                c.prompt_fragment = suggested;
            }
            c.suggestion_dismissed = true;
        })
    }

    pub fn dismiss_suggestion(&mut self, character_id: &str) -> Result<()> {
        self.update_character(character_id, |c| c.suggestion_dismissed = true)
    }

    fn update_character(&mut self, character_id: &str, edit: impl FnOnce(&mut DetectedCharacter)) -> Result<()> {
        let mut characters = self.state.detected_characters().to_vec();
        let character = characters
            .iter_mut()
            .find(|c| c.character_id == character_id)
            .ok_or_else(|| WizardError::UnknownCharacter(character_id.to_string()))?;
        edit(character);
        self.state.apply(StatePatch::DetectedCharacters(characters));
        // Fragments feed the world context of every prompt.
        self.rederive(self.state.content().cloned())
    }

    /// Removes a detected character from the resource and from every item it
    /// was linked to.
    pub fn unlink_character(&mut self, character_id: &str) -> Result<()> {
        let mut characters = self.state.detected_characters().to_vec();
        let before = characters.len();
        characters.retain(|c| c.character_id != character_id);
        if characters.len() == before {
            return Err(WizardError::UnknownCharacter(character_id.to_string()).into());
        }

        let content = match self.state.content() {
            Some(content) => {
                let strategy = self.registry.get(self.state.kind())?;
                Some(unlink_character(strategy, content, character_id))
            }
            None => None,
        };
        self.state.apply(StatePatch::DetectedCharacters(characters));
        self.rederive(content)
    }

    // --- Generation ---

    pub async fn generate_remaining(&mut self) -> Result<RunSummary> {
        self.runner.run(&mut self.state, RunMode::Remaining).await
    }

    pub async fn retry_failed(&mut self) -> Result<RunSummary> {
        self.runner.run(&mut self.state, RunMode::RetryFailed).await
    }

    pub async fn regenerate_all(&mut self) -> Result<RunSummary> {
        self.runner.run(&mut self.state, RunMode::RegenerateAll).await
    }

    /// Every job with the latest persisted asset for it, if any.
    pub async fn results(&self) -> Result<Vec<(ImageJob, Option<AssetRecord>)>> {
        let Some(owner_ref) = self.state.resource_id() else {
            return Ok(self.state.jobs().iter().cloned().map(|j| (j, None)).collect());
        };
        let mut results = Vec::with_capacity(self.state.jobs().len());
        for job in self.state.jobs() {
            let asset = self.deps.assets.latest(owner_ref, job.asset_kind, &job.asset_key).await?;
            results.push((job.clone(), asset));
        }
        Ok(results)
    }

    /// Best effort: a failed lookup leaves every job pending, so the run
    /// simply regenerates them.
    async fn restore_completed(&mut self) {
        let Some(owner_ref) = self.state.resource_id().map(str::to_string) else {
            return;
        };
        if self.state.jobs().iter().any(|j| j.status != JobStatus::Pending) {
            debug!("Jobs already in progress, skipping restore");
            return;
        }

        let mut ready = Vec::new();
        for (i, job) in self.state.jobs().iter().enumerate() {
            match self.deps.assets.latest(&owner_ref, job.asset_kind, &job.asset_key).await {
                Ok(Some(asset)) if asset.status == AssetStatus::Ready => ready.push(i),
                Ok(_) => {}
                Err(e) => {
                    warn!("Could not restore completed jobs for {}: {:#}", owner_ref, e);
                    return;
                }
            }
        }
        if !ready.is_empty() {
            info!("Restored {} completed jobs from existing assets", ready.len());
            self.state.apply(StatePatch::RestoreCompleted(ready));
        }
    }

    // --- Drafts ---

    fn draft_content(&self) -> DraftContent {
        DraftContent {
            name: self.state.name().to_string(),
            description: self.state.description().to_string(),
            style_ref: self.state.style_ref().map(str::to_string),
            character_selection: self.state.character_selection().cloned(),
            content: self.state.content().cloned(),
            detected_characters: self.state.detected_characters().to_vec(),
        }
    }

    async fn create_draft(&mut self) -> Result<()> {
        let id = self
            .deps
            .drafts
            .create(&self.owner_id, self.state.kind(), &self.draft_content())
            .await?;
        info!("Created draft {}", id);
        self.state.apply(StatePatch::ResourceId(id));
        Ok(())
    }

    async fn save_draft(&mut self) -> Result<()> {
        let Some(id) = self.state.resource_id() else {
            return Ok(());
        };
        self.deps.drafts.update(id, &self.draft_content()).await?;
        debug!("Saved draft {}", id);
        Ok(())
    }
}

/// Finished or failed jobs keep their status when the re-derived job is the
/// same piece of work.
fn carry_statuses(previous: &[ImageJob], jobs: Vec<ImageJob>) -> Vec<ImageJob> {
    jobs.into_iter()
        .map(|mut job| {
            if let Some(old) = previous.iter().find(|old| old.same_work_as(&job)) {
                if matches!(old.status, JobStatus::Complete | JobStatus::Error) {
                    job.status = old.status;
                    job.error = old.error.clone();
                }
            }
            job
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::state::{AssetKind, CharacterMode, DraftPhase};
    use crate::services::characters::{CharacterCandidate, LinkedCharacter};
    use crate::services::drafts::DraftRecord;
    use crate::services::images::ImageRequest;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;

    pub(crate) struct MockContent {
        pub(crate) reply: Mutex<Result<Value, String>>,
        pub(crate) requests: Mutex<Vec<ContentRequest>>,
    }

    #[async_trait]
    impl ContentGenerator for MockContent {
        async fn generate(&self, request: &ContentRequest) -> Result<GeneratedContent> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self.reply.lock().unwrap().clone();
            GeneratedContent::from_raw(reply.map_err(|e| anyhow!(e))?)
        }
    }

    #[derive(Default)]
    pub(crate) struct MockCharacters {
        pub(crate) fail: bool,
        pub(crate) existing: Vec<(String, String)>,
    }

    #[async_trait]
    impl CharacterCreator for MockCharacters {
        async fn create_or_link(
            &self,
            _owner_id: &str,
            _style_ref: Option<&str>,
            candidates: &[CharacterCandidate],
        ) -> Result<Vec<LinkedCharacter>> {
            if self.fail {
                return Err(anyhow!("character service unavailable"));
            }
            Ok(candidates
                .iter()
                .map(|c| {
                    let existing = self.existing.iter().find(|(name, _)| name == &c.name);
                    LinkedCharacter {
                        character_id: format!("id-{}", c.name.to_lowercase()),
                        name: c.name.clone(),
                        appears_on: c.appears_on.clone(),
                        is_new: existing.is_none(),
                        prompt_fragment: existing
                            .map(|(_, f)| f.clone())
                            .unwrap_or_else(|| c.visual_description.clone()),
                        suggested_prompt_fragment: existing.map(|_| c.visual_description.clone()),
                    }
                })
                .collect())
        }
    }

    pub(crate) struct NoopReferences;

    #[async_trait]
    impl ReferenceEnsurer for NoopReferences {
        async fn ensure_reference(&self, _id: &str, _style: &str, _force: bool) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct MockImages {
        pub(crate) generated: Mutex<Vec<String>>,
        pub(crate) failing: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl ImageGenerator for MockImages {
        async fn generate(&self, request: &ImageRequest) -> Result<()> {
            self.generated.lock().unwrap().push(request.asset_key.clone());
            if self.failing.lock().unwrap().contains(&request.asset_key) {
                return Err(anyhow!("render timeout for {}", request.asset_key));
            }
            Ok(())
        }
        async fn generate_green_screen(&self, request: &ImageRequest) -> Result<()> {
            self.generate(request).await
        }
    }

    #[derive(Default)]
    pub(crate) struct MockAssets {
        pub(crate) ready: Mutex<HashSet<String>>,
        pub(crate) failed: Mutex<HashSet<String>>,
        pub(crate) unreadable: Mutex<bool>,
        pub(crate) lookups: Mutex<usize>,
    }

    #[async_trait]
    impl AssetStore for MockAssets {
        async fn latest(&self, _owner: &str, kind: AssetKind, key: &str) -> Result<Option<AssetRecord>> {
            *self.lookups.lock().unwrap() += 1;
            if *self.unreadable.lock().unwrap() {
                return Err(anyhow!("asset index unreadable"));
            }
            let status = if self.ready.lock().unwrap().contains(key) {
                AssetStatus::Ready
            } else if self.failed.lock().unwrap().contains(key) {
                AssetStatus::Failed
            } else {
                return Ok(None);
            };
            Ok(Some(AssetRecord {
                kind,
                key: key.to_string(),
                version: 1,
                url: format!("assets/{}.png", key),
                status,
                green_screen: false,
                created_at: Utc::now(),
            }))
        }
    }

    #[derive(Default)]
    pub(crate) struct MockDrafts {
        pub(crate) records: Mutex<Vec<DraftRecord>>,
        pub(crate) fail_saves: Mutex<bool>,
        pub(crate) creates: Mutex<usize>,
        pub(crate) updates: Mutex<usize>,
    }

    impl MockDrafts {
        pub(crate) fn seed(&self, id: &str, kind: ResourceKind, data: DraftContent) {
            let now = Utc::now();
            self.records.lock().unwrap().push(DraftRecord {
                id: id.to_string(),
                owner_id: "owner".to_string(),
                kind,
                data,
                created_at: now - Duration::hours(1),
                updated_at: now,
            });
        }
    }

    #[async_trait]
    impl DraftStore for MockDrafts {
        async fn create(&self, owner_id: &str, kind: ResourceKind, draft: &DraftContent) -> Result<String> {
            if *self.fail_saves.lock().unwrap() {
                return Err(anyhow!("disk full"));
            }
            *self.creates.lock().unwrap() += 1;
            let id = format!("draft-{}", self.records.lock().unwrap().len() + 1);
            let now = Utc::now();
            self.records.lock().unwrap().push(DraftRecord {
                id: id.clone(),
                owner_id: owner_id.to_string(),
                kind,
                data: draft.clone(),
                created_at: now,
                updated_at: now,
            });
            Ok(id)
        }

        async fn update(&self, id: &str, draft: &DraftContent) -> Result<()> {
            if *self.fail_saves.lock().unwrap() {
                return Err(anyhow!("disk full"));
            }
            *self.updates.lock().unwrap() += 1;
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| anyhow!("no draft {}", id))?;
            record.data = draft.clone();
            record.updated_at = Utc::now();
            Ok(())
        }

        async fn get(&self, id: &str) -> Result<Option<DraftRecord>> {
            Ok(self.records.lock().unwrap().iter().find(|r| r.id == id).cloned())
        }

        async fn list(&self, owner_id: &str, kind: ResourceKind) -> Result<Vec<DraftRecord>> {
            let mut drafts: Vec<DraftRecord> = self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.owner_id == owner_id && r.kind == kind)
                .cloned()
                .collect();
            drafts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(drafts)
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.records.lock().unwrap().retain(|r| r.id != id);
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub(crate) content: Arc<MockContent>,
        pub(crate) images: Arc<MockImages>,
        pub(crate) assets: Arc<MockAssets>,
        pub(crate) drafts: Arc<MockDrafts>,
    }

    pub(crate) fn flashcard_reply() -> Value {
        json!({
            "title": "Ocean Friends",
            "cards": [
                {"front": "Whale", "back": "Largest mammal"},
                {"front": "Crab", "back": "Walks sideways"},
                {"front": "Octopus", "back": "Eight arms"}
            ],
            "detectedCharacters": [
                {"name": "Finn", "visualDescription": "a cheerful blue whale", "appearsOn": ["card_0", "card_2"]}
            ]
        })
    }

    pub(crate) fn controller_with(characters: MockCharacters, reply: Result<Value, String>) -> (WizardController, Harness) {
        let harness = Harness {
            content: Arc::new(MockContent {
                reply: Mutex::new(reply),
                requests: Mutex::new(Vec::new()),
            }),
            images: Arc::new(MockImages::default()),
            assets: Arc::new(MockAssets::default()),
            drafts: Arc::new(MockDrafts::default()),
        };
        let deps = WizardDeps {
            content: harness.content.clone(),
            characters: Arc::new(characters),
            references: Arc::new(NoopReferences),
            images: harness.images.clone(),
            assets: harness.assets.clone(),
            drafts: harness.drafts.clone(),
        };
        let controller = WizardController::new(deps, StrategyRegistry::builtin(), "owner", ResourceKind::Flashcards);
        (controller, harness)
    }

    fn controller() -> (WizardController, Harness) {
        controller_with(MockCharacters::default(), Ok(flashcard_reply()))
    }

    async fn at_review(wizard: &mut WizardController) -> Result<()> {
        wizard.set_description("Flashcards about ocean animals");
        assert_eq!(wizard.next().await?, WizardStep::Review);
        Ok(())
    }

    #[tokio::test]
    async fn test_describe_requires_description() {
        let (mut wizard, harness) = controller();
        let err = wizard.next().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WizardError>(),
            Some(WizardError::StepIncomplete(WizardStep::Describe))
        ));
        assert!(harness.content.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leaving_describe_generates_and_links_characters() -> Result<()> {
        let (mut wizard, harness) = controller();
        wizard.set_character_selection(Some(CharacterSelection::new(
            CharacterMode::PerItem,
            vec!["id-finn".to_string()],
        )?))?;
        at_review(&mut wizard).await?;

        let state = wizard.state();
        assert_eq!(state.content_status(), ContentStatus::Ready);
        assert_eq!(state.detection_status(), DetectionStatus::Ready);
        assert_eq!(state.name(), "Ocean Friends");
        assert!(state.content().unwrap().get("detectedCharacters").is_none());
        assert_eq!(state.content().unwrap()["cards"][0]["characterIds"], json!(["id-finn"]));
        assert!(state.content().unwrap()["cards"][1].get("characterIds").is_none());

        let jobs = state.jobs();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].character_ids, Some(vec!["id-finn".to_string()]));
        assert_eq!(jobs[1].character_ids, None);
        assert!(jobs[1].prompt.starts_with("World characters: Finn (a cheerful blue whale)."));

        let request = harness.content.requests.lock().unwrap()[0].clone();
        assert_eq!(request.character_mode, Some(CharacterMode::PerItem));
        Ok(())
    }

    #[tokio::test]
    async fn test_content_failure_stays_on_describe_and_recovers() -> Result<()> {
        let (mut wizard, harness) = controller_with(MockCharacters::default(), Err("model overloaded".to_string()));
        wizard.set_description("Ocean flashcards");

        assert_eq!(wizard.next().await?, WizardStep::Describe);
        assert_eq!(wizard.state().content_status(), ContentStatus::Error);
        assert_eq!(wizard.state().content_error(), Some("model overloaded"));

        *harness.content.reply.lock().unwrap() = Ok(flashcard_reply());
        wizard.set_description("Ocean animal flashcards");
        assert_eq!(wizard.next().await?, WizardStep::Review);
        assert_eq!(wizard.state().content_error(), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_detection_failure_keeps_ungrouped_content() -> Result<()> {
        let (mut wizard, _) = controller_with(
            MockCharacters {
                fail: true,
                ..Default::default()
            },
            Ok(flashcard_reply()),
        );
        at_review(&mut wizard).await?;

        let state = wizard.state();
        assert_eq!(state.content_status(), ContentStatus::Ready);
        assert_eq!(state.detection_status(), DetectionStatus::Idle);
        assert!(state.detected_characters().is_empty());
        assert_eq!(state.jobs().len(), 3);
        assert!(state.jobs().iter().all(|j| j.character_ids.is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn test_no_detected_characters_marks_detection_skipped() -> Result<()> {
        let (mut wizard, _) = controller_with(
            MockCharacters::default(),
            Ok(json!({"title": "Shapes", "cards": [{"front": "Circle"}]})),
        );
        at_review(&mut wizard).await?;
        assert_eq!(wizard.state().detection_status(), DetectionStatus::Skipped);
        Ok(())
    }

    #[tokio::test]
    async fn test_review_creates_draft_once_then_updates() -> Result<()> {
        let (mut wizard, harness) = controller();
        at_review(&mut wizard).await?;

        assert_eq!(wizard.next().await?, WizardStep::Generate);
        assert_eq!(wizard.state().resource_id(), Some("draft-1"));
        assert_eq!(*harness.drafts.creates.lock().unwrap(), 1);

        assert_eq!(wizard.back().await?, WizardStep::Review);
        assert_eq!(wizard.next().await?, WizardStep::Generate);
        assert_eq!(*harness.drafts.creates.lock().unwrap(), 1);
        assert_eq!(*harness.drafts.updates.lock().unwrap(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_draft_save_failure_propagates() -> Result<()> {
        let (mut wizard, harness) = controller();
        at_review(&mut wizard).await?;
        *harness.drafts.fail_saves.lock().unwrap() = true;

        assert!(wizard.next().await.is_err());
        assert_eq!(wizard.state().step(), WizardStep::Review);
        assert_eq!(wizard.state().resource_id(), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_entering_generate_restores_only_when_all_pending() -> Result<()> {
        let (mut wizard, harness) = controller();
        harness.assets.ready.lock().unwrap().insert("flashcard_front_1".to_string());
        at_review(&mut wizard).await?;

        wizard.next().await?;
        let counts = wizard.state().job_counts();
        assert_eq!(counts.complete, 1);
        assert_eq!(wizard.state().jobs()[1].status, JobStatus::Complete);

        // Back and forth again: statuses already resolved, no second lookup pass.
        let lookups = *harness.assets.lookups.lock().unwrap();
        harness.assets.ready.lock().unwrap().insert("flashcard_front_0".to_string());
        wizard.back().await?;
        wizard.next().await?;
        assert_eq!(*harness.assets.lookups.lock().unwrap(), lookups);
        assert_eq!(wizard.state().job_counts().complete, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_skips_failed_assets() -> Result<()> {
        let (mut wizard, harness) = controller();
        harness.assets.ready.lock().unwrap().insert("flashcard_front_0".to_string());
        harness.assets.failed.lock().unwrap().insert("flashcard_front_1".to_string());
        at_review(&mut wizard).await?;

        wizard.next().await?;
        let jobs = wizard.state().jobs();
        assert_eq!(jobs[0].status, JobStatus::Complete);
        assert_eq!(jobs[1].status, JobStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_assets_still_enter_generate() -> Result<()> {
        let (mut wizard, harness) = controller();
        harness.assets.ready.lock().unwrap().insert("flashcard_front_0".to_string());
        *harness.assets.unreadable.lock().unwrap() = true;
        at_review(&mut wizard).await?;

        assert_eq!(wizard.next().await?, WizardStep::Generate);
        assert_eq!(wizard.state().step(), WizardStep::Generate);
        assert_eq!(wizard.state().resource_id(), Some("draft-1"));
        assert!(wizard.state().jobs().iter().all(|j| j.status == JobStatus::Pending));

        // Nothing was restored, so the run covers every job.
        *harness.assets.unreadable.lock().unwrap() = false;
        assert_eq!(wizard.generate_remaining().await?.completed, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_then_export() -> Result<()> {
        let (mut wizard, harness) = controller();
        at_review(&mut wizard).await?;
        wizard.next().await?;
        assert!(!wizard.is_step_complete(WizardStep::Generate));

        let summary = wizard.generate_remaining().await?;
        assert_eq!(summary.completed, 3);
        assert_eq!(harness.images.generated.lock().unwrap().len(), 3);
        assert_eq!(wizard.next().await?, WizardStep::Export);

        let results = wizard.results().await?;
        assert_eq!(results.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_regenerate_all_reruns_every_job_and_clears_errors() -> Result<()> {
        let (mut wizard, harness) = controller();
        harness.images.failing.lock().unwrap().insert("flashcard_front_1".to_string());
        at_review(&mut wizard).await?;
        wizard.next().await?;

        let first = wizard.generate_remaining().await?;
        assert_eq!((first.completed, first.errored), (2, 1));
        assert_eq!(wizard.state().jobs()[1].status, JobStatus::Error);

        harness.images.failing.lock().unwrap().clear();
        let again = wizard.regenerate_all().await?;
        assert_eq!(again.completed, 3);
        assert_eq!(harness.images.generated.lock().unwrap().len(), 6);
        assert!(wizard
            .state()
            .jobs()
            .iter()
            .all(|j| j.status == JobStatus::Complete && j.error.is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn test_edit_content_keeps_status_of_unchanged_jobs() -> Result<()> {
        let (mut wizard, _) = controller();
        at_review(&mut wizard).await?;
        wizard.next().await?;
        wizard.generate_remaining().await?;

        let mut content = wizard.state().content().unwrap().clone();
        content["cards"][1]["front"] = json!("Lobster");
        wizard.edit_content(content)?;

        let jobs = wizard.state().jobs();
        assert_eq!(jobs[0].status, JobStatus::Complete);
        assert_eq!(jobs[1].status, JobStatus::Pending);
        assert_eq!(jobs[2].status, JobStatus::Complete);
        Ok(())
    }

    #[tokio::test]
    async fn test_suggestions_accept_and_dismiss() -> Result<()> {
        let reply = json!({
            "title": "Pals",
            "cards": [{"front": "Hi"}],
            "detectedCharacters": [
                {"name": "Finn", "visualDescription": "a huge blue whale", "appearsOn": ["card_0"]},
                {"name": "Pip", "visualDescription": "a tiny crab in a hat", "appearsOn": ["card_0"]}
            ]
        });
        let (mut wizard, _) = controller_with(
            MockCharacters {
                fail: false,
                existing: vec![
                    ("Finn".to_string(), "a blue whale".to_string()),
                    ("Pip".to_string(), "a tiny crab".to_string()),
                ],
            },
            Ok(reply),
        );
        at_review(&mut wizard).await?;
        assert_eq!(wizard.pending_suggestions().len(), 2);

        wizard.accept_suggestion("id-finn")?;
        wizard.dismiss_suggestion("id-pip")?;
        assert!(wizard.pending_suggestions().is_empty());

        let characters = wizard.state().detected_characters();
        assert_eq!(characters[0].prompt_fragment, "a huge blue whale");
        assert_eq!(characters[1].prompt_fragment, "a tiny crab");
        assert!(wizard.state().jobs()[0].prompt.contains("Finn (a huge blue whale)"));

        assert!(wizard.accept_suggestion("id-nobody").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_editing_fragment_to_match_hides_suggestion() -> Result<()> {
        let (mut wizard, _) = controller_with(
            MockCharacters {
                fail: false,
                existing: vec![("Finn".to_string(), "a blue whale".to_string())],
            },
            Ok(flashcard_reply()),
        );
        at_review(&mut wizard).await?;
        assert_eq!(wizard.pending_suggestions().len(), 1);

        wizard.update_prompt_fragment("id-finn", "a cheerful blue whale")?;
        assert!(wizard.pending_suggestions().is_empty());
        let finn = &wizard.state().detected_characters()[0];
        assert!(!finn.suggestion_dismissed);
        assert!(wizard.state().jobs()[1].prompt.contains("Finn (a cheerful blue whale)"));

        // Diverging again brings the undecided suggestion back.
        wizard.update_prompt_fragment("id-finn", "a grumpy whale")?;
        assert_eq!(wizard.pending_suggestions().len(), 1);
        assert!(wizard.state().jobs()[1].prompt.contains("Finn (a grumpy whale)"));

        let err = wizard.update_prompt_fragment("id-nobody", "x").unwrap_err();
        assert!(matches!(err.downcast_ref::<WizardError>(), Some(WizardError::UnknownCharacter(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_unlink_character_clears_items_and_jobs() -> Result<()> {
        let (mut wizard, _) = controller();
        at_review(&mut wizard).await?;

        wizard.unlink_character("id-finn")?;
        let state = wizard.state();
        assert!(state.detected_characters().is_empty());
        assert!(state.content().unwrap()["cards"][0].get("characterIds").is_none());
        assert!(state.jobs().iter().all(|j| j.character_ids.is_none()));
        assert!(!state.jobs()[0].prompt.contains("World characters"));
        Ok(())
    }

    #[test]
    fn test_fresh_wizard_starts_uninitialized() {
        let (wizard, _) = controller();
        assert_eq!(wizard.state().draft_phase(), &DraftPhase::Uninitialized);
        assert_eq!(wizard.state().step(), WizardStep::Describe);
    }
}
