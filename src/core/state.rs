use crate::core::error::WizardError;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    Flashcards,
    CardGame,
    BoardGame,
    Poster,
    Chart,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Flashcards,
        ResourceKind::CardGame,
        ResourceKind::BoardGame,
        ResourceKind::Poster,
        ResourceKind::Chart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Flashcards => "flashcards",
            ResourceKind::CardGame => "card_game",
            ResourceKind::BoardGame => "board_game",
            ResourceKind::Poster => "poster",
            ResourceKind::Chart => "chart",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown resource kind: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Idle,
    Generating,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    #[default]
    Idle,
    Creating,
    Ready,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Generating,
    Complete,
    Error,
}

impl JobStatus {
    /// Transitions reachable through a per-job patch. Forcing a job back to
    /// `Pending` is only possible through [`StatePatch::ResetJobs`].
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Generating)
                | (JobStatus::Generating, JobStatus::Complete)
                | (JobStatus::Generating, JobStatus::Error)
                | (JobStatus::Error, JobStatus::Generating)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    FlashcardFront,
    CardBackground,
    CardIcon,
    CardBack,
    Board,
    Token,
    Illustration,
    ChartHeader,
    ChartIcon,
    CharacterReference,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::FlashcardFront => "flashcard_front",
            AssetKind::CardBackground => "card_background",
            AssetKind::CardIcon => "card_icon",
            AssetKind::CardBack => "card_back",
            AssetKind::Board => "board",
            AssetKind::Token => "token",
            AssetKind::Illustration => "illustration",
            AssetKind::ChartHeader => "chart_header",
            AssetKind::ChartIcon => "chart_icon",
            AssetKind::CharacterReference => "character_reference",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "2:3")]
    Tall,
    #[serde(rename = "3:1")]
    Banner,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "2:3",
            AspectRatio::Banner => "3:1",
        }
    }
}

/// One unit of image generation work, attached to a content item through its
/// asset key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageJob {
    pub asset_key: String,
    pub asset_kind: AssetKind,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_ids: Option<Vec<String>>,
    #[serde(default)]
    pub include_text: bool,
    pub aspect: AspectRatio,
    #[serde(default)]
    pub green_screen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageJob {
    pub fn new(
        asset_key: impl Into<String>,
        asset_kind: AssetKind,
        prompt: impl Into<String>,
        aspect: AspectRatio,
    ) -> Self {
        Self {
            asset_key: asset_key.into(),
            asset_kind,
            prompt: prompt.into(),
            character_ids: None,
            include_text: false,
            aspect,
            green_screen: false,
            label: None,
            group: None,
            status: JobStatus::Pending,
            error: None,
        }
    }

    pub fn with_characters(mut self, ids: Option<Vec<String>>) -> Self {
        self.character_ids = ids.filter(|ids| !ids.is_empty());
        self
    }

    pub fn with_text(mut self) -> Self {
        self.include_text = true;
        self
    }

    pub fn green_screen(mut self) -> Self {
        self.green_screen = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>, group: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self.group = Some(group.into());
        self
    }

    /// Same asset, same prompt, same characters: a re-derived job that
    /// matches this one can inherit its status.
    pub fn same_work_as(&self, other: &ImageJob) -> bool {
        self.asset_key == other.asset_key
            && self.prompt == other.prompt
            && self.character_ids == other.character_ids
            && self.green_screen == other.green_screen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterMode {
    /// One character applies to the whole resource.
    Resource,
    /// Different characters per content item.
    PerItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSelection", rename_all = "camelCase")]
pub struct CharacterSelection {
    mode: CharacterMode,
    character_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSelection {
    mode: CharacterMode,
    character_ids: Vec<String>,
}

impl TryFrom<RawSelection> for CharacterSelection {
    type Error = WizardError;

    fn try_from(raw: RawSelection) -> Result<Self, Self::Error> {
        CharacterSelection::new(raw.mode, raw.character_ids)
    }
}

impl CharacterSelection {
    pub fn new(
        mode: CharacterMode,
        character_ids: Vec<String>,
    ) -> Result<Self, WizardError> {
        match (mode, character_ids.len()) {
            (_, 0) => Err(WizardError::InvalidSelection(
                "a character selection needs at least one character".to_string(),
            )),
            (CharacterMode::Resource, n) if n != 1 => Err(WizardError::InvalidSelection(format!(
                "resource mode takes exactly one character, got {}",
                n
            ))),
            _ => Ok(Self { mode, character_ids }),
        }
    }

    pub fn resource(character_id: impl Into<String>) -> Self {
        Self {
            mode: CharacterMode::Resource,
            character_ids: vec![character_id.into()],
        }
    }

    pub fn mode(&self) -> CharacterMode {
        self.mode
    }

    pub fn character_ids(&self) -> &[String] {
        &self.character_ids
    }

    /// The single whole-resource character, if this is a resource selection.
    pub fn resource_character(&self) -> Option<&str> {
        match self.mode {
            CharacterMode::Resource => self.character_ids.first().map(|s| s.as_str()),
            CharacterMode::PerItem => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedCharacter {
    pub name: String,
    pub character_id: String,
    pub appears_on: Vec<String>,
    pub is_new: bool,
    pub prompt_fragment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_prompt_fragment: Option<String>,
    #[serde(default)]
    pub suggestion_dismissed: bool,
}

impl DetectedCharacter {
    /// The AI suggestion still awaiting a decision, if any.
    pub fn visible_suggestion(&self) -> Option<&str> {
        if self.suggestion_dismissed {
            return None;
        }
        match &self.suggested_prompt_fragment {
            Some(s) if s.trim() != self.prompt_fragment.trim() => Some(s.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    #[default]
    Describe,
    Review,
    Generate,
    Export,
}

impl WizardStep {
    pub const ALL: [WizardStep; 4] = [
        WizardStep::Describe,
        WizardStep::Review,
        WizardStep::Generate,
        WizardStep::Export,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> Option<WizardStep> {
        WizardStep::ALL.get(self.index() + 1).copied()
    }

    pub fn prev(&self) -> Option<WizardStep> {
        self.index().checked_sub(1).map(|i| WizardStep::ALL[i])
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WizardStep::Describe => "Describe",
            WizardStep::Review => "Review",
            WizardStep::Generate => "Generate",
            WizardStep::Export => "Export",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftOffer {
    pub id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of the once-per-session draft resume prompt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DraftPhase {
    #[default]
    Uninitialized,
    Prompting(DraftOffer),
    Resolved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: usize,
    pub generating: usize,
    pub complete: usize,
    pub error: usize,
}

/// A single write to [`WizardState`]. Job patches carry only their index so
/// they are always applied on top of the current state.
#[derive(Debug, Clone)]
pub enum StatePatch {
    Description(String),
    Name(String),
    StyleRef(Option<String>),
    CharacterSelection(Option<CharacterSelection>),
    Kind(ResourceKind),
    EditMode(bool),
    ContentStatus {
        status: ContentStatus,
        error: Option<String>,
    },
    /// Content and its derived job list always travel together.
    Content {
        content: Option<Value>,
        jobs: Vec<ImageJob>,
    },
    ResourceId(String),
    DetectedCharacters(Vec<DetectedCharacter>),
    DetectionStatus(DetectionStatus),
    Step(WizardStep),
    DraftPhase(DraftPhase),
    Job {
        index: usize,
        status: JobStatus,
        error: Option<String>,
    },
    ResetJobs,
    RestoreCompleted(Vec<usize>),
}

#[derive(Debug, Clone, Default)]
pub struct WizardState {
    description: String,
    name: String,
    style_ref: Option<String>,
    character_selection: Option<CharacterSelection>,
    content: Option<Value>,
    content_status: ContentStatus,
    content_error: Option<String>,
    image_items: Vec<ImageJob>,
    resource_id: Option<String>,
    kind: ResourceKind,
    edit_mode: bool,
    detected_characters: Vec<DetectedCharacter>,
    detection_status: DetectionStatus,
    step: WizardStep,
    draft_phase: DraftPhase,
}

impl WizardState {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn style_ref(&self) -> Option<&str> {
        self.style_ref.as_deref()
    }
    pub fn character_selection(&self) -> Option<&CharacterSelection> {
        self.character_selection.as_ref()
    }
    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }
    pub fn content_status(&self) -> ContentStatus {
        self.content_status
    }
    pub fn content_error(&self) -> Option<&str> {
        self.content_error.as_deref()
    }
    pub fn jobs(&self) -> &[ImageJob] {
        &self.image_items
    }
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
    pub fn edit_mode(&self) -> bool {
        self.edit_mode
    }
    pub fn detected_characters(&self) -> &[DetectedCharacter] {
        &self.detected_characters
    }
    pub fn detection_status(&self) -> DetectionStatus {
        self.detection_status
    }
    pub fn step(&self) -> WizardStep {
        self.step
    }
    pub fn draft_phase(&self) -> &DraftPhase {
        &self.draft_phase
    }

    pub fn job_counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in &self.image_items {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Generating => counts.generating += 1,
                JobStatus::Complete => counts.complete += 1,
                JobStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    /// The only mutation point. Returns whether the patch changed anything;
    /// rejected patches are logged and dropped.
    pub fn apply(&mut self, patch: StatePatch) -> bool {
        match patch {
            StatePatch::Description(d) => self.description = d,
            StatePatch::Name(n) => self.name = n,
            StatePatch::StyleRef(s) => self.style_ref = s,
            StatePatch::CharacterSelection(s) => self.character_selection = s,
            StatePatch::Kind(k) => self.kind = k,
            StatePatch::EditMode(e) => self.edit_mode = e,
            StatePatch::ContentStatus { status, error } => {
                self.content_status = status;
                self.content_error = error;
            }
            StatePatch::Content { content, jobs } => {
                self.content = content;
                self.image_items = dedupe_asset_keys(jobs);
            }
            StatePatch::ResourceId(id) => self.resource_id = Some(id),
            StatePatch::DetectedCharacters(c) => self.detected_characters = c,
            StatePatch::DetectionStatus(s) => self.detection_status = s,
            StatePatch::Step(s) => self.step = s,
            StatePatch::DraftPhase(p) => self.draft_phase = p,
            StatePatch::Job { index, status, error } => {
                return self.apply_job(index, status, error);
            }
            StatePatch::ResetJobs => {
                for job in &mut self.image_items {
                    job.status = JobStatus::Pending;
                    job.error = None;
                }
            }
            StatePatch::RestoreCompleted(indices) => {
                if self.image_items.iter().any(|j| j.status != JobStatus::Pending) {
                    warn!("Skipping job restore: some jobs already left the pending state");
                    return false;
                }
                for index in indices {
                    if let Some(job) = self.image_items.get_mut(index) {
                        job.status = JobStatus::Complete;
                    }
                }
            }
        }
        true
    }

    fn apply_job(&mut self, index: usize, status: JobStatus, error: Option<String>) -> bool {
        let Some(job) = self.image_items.get_mut(index) else {
            warn!("Dropping status update for unknown job index {}", index);
            return false;
        };
        if !job.status.can_transition_to(status) {
            warn!(
                "Rejected transition {:?} -> {:?} for job {}",
                job.status, status, job.asset_key
            );
            return false;
        }
        job.status = status;
        job.error = match status {
            JobStatus::Error => Some(error.unwrap_or_else(|| "Generation failed".to_string())),
            _ => None,
        };
        true
    }
}

fn dedupe_asset_keys(jobs: Vec<ImageJob>) -> Vec<ImageJob> {
    let mut seen = HashSet::new();
    jobs.into_iter()
        .filter(|job| {
            let fresh = seen.insert(job.asset_key.clone());
            if !fresh {
                warn!("Dropping job with duplicate asset key {}", job.asset_key);
            }
            fresh
        })
        .collect()
}
