use super::{WizardController, WizardError};
use crate::core::state::{ContentStatus, DetectionStatus, DraftOffer, DraftPhase, StatePatch, WizardStep};
use anyhow::{anyhow, Result};
use log::{info, warn};

impl WizardController {
    /// Looks for a resumable draft. Runs once per session: after the first
    /// call the phase is never `Uninitialized` again, so later calls just
    /// report the current phase.
    pub async fn check_for_draft(&mut self) -> &DraftPhase {
        if self.state.draft_phase() != &DraftPhase::Uninitialized {
            return self.state.draft_phase();
        }

        let fresh = self.state.resource_id().is_none()
            && !self.state.edit_mode()
            && self.state.step() == WizardStep::Describe
            && self.state.content_status() == ContentStatus::Idle;

        let phase = if fresh {
            match self.deps.drafts.list(&self.owner_id, self.state.kind()).await {
                Ok(drafts) => match drafts.into_iter().next() {
                    Some(latest) => DraftPhase::Prompting(DraftOffer {
                        id: latest.id,
                        name: latest.data.name,
                        updated_at: latest.updated_at,
                    }),
                    None => DraftPhase::Resolved,
                },
                Err(e) => {
                    warn!("Could not look up drafts: {:#}", e);
                    DraftPhase::Resolved
                }
            }
        } else {
            DraftPhase::Resolved
        };
        self.state.apply(StatePatch::DraftPhase(phase));
        self.state.draft_phase()
    }

    /// Loads the offered draft into the wizard.
    pub async fn resume_draft(&mut self) -> Result<()> {
        let DraftPhase::Prompting(offer) = self.state.draft_phase().clone() else {
            return Err(WizardError::NoDraftOffer.into());
        };
        self.state.apply(StatePatch::DraftPhase(DraftPhase::Resolved));
        self.load_draft(&offer.id).await
    }

    pub fn start_fresh(&mut self) {
        self.state.apply(StatePatch::DraftPhase(DraftPhase::Resolved));
    }

    /// Starts fresh and deletes the offered draft.
    pub async fn discard_draft(&mut self) -> Result<()> {
        let DraftPhase::Prompting(offer) = self.state.draft_phase().clone() else {
            return Err(WizardError::NoDraftOffer.into());
        };
        self.start_fresh();
        self.deps.drafts.delete(&offer.id).await
    }

    /// Opens an existing resource for editing, bypassing the resume prompt.
    pub async fn edit_existing(&mut self, id: &str) -> Result<()> {
        self.state.apply(StatePatch::EditMode(true));
        self.state.apply(StatePatch::DraftPhase(DraftPhase::Resolved));
        self.load_draft(id).await
    }

    async fn load_draft(&mut self, id: &str) -> Result<()> {
        let record = self
            .deps
            .drafts
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("Draft {} no longer exists", id))?;
        let data = record.data;

        self.state.apply(StatePatch::Kind(record.kind));
        self.state.apply(StatePatch::ResourceId(record.id));
        self.state.apply(StatePatch::Name(data.name));
        self.state.apply(StatePatch::Description(data.description));
        self.state.apply(StatePatch::StyleRef(data.style_ref));
        self.state.apply(StatePatch::CharacterSelection(data.character_selection));
        self.state.apply(StatePatch::DetectionStatus(if data.detected_characters.is_empty() {
            DetectionStatus::Idle
        } else {
            DetectionStatus::Ready
        }));
        self.state.apply(StatePatch::DetectedCharacters(data.detected_characters));

        let has_content = data.content.is_some();
        self.rederive(data.content)?;
        if has_content {
            self.state.apply(StatePatch::ContentStatus {
                status: ContentStatus::Ready,
                error: None,
            });
            self.state.apply(StatePatch::Step(WizardStep::Review));
        }
        info!("Loaded draft {} ({} image jobs)", id, self.state.jobs().len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::state::{ContentStatus, DraftPhase, ResourceKind, WizardStep};
    use crate::services::drafts::DraftContent;
    use crate::services::wizard::tests::{controller_with, flashcard_reply, MockCharacters};
    use crate::services::wizard::WizardError;
    use anyhow::Result;
    use serde_json::json;

    fn saved_draft() -> DraftContent {
        DraftContent {
            name: "Farm Animals".to_string(),
            description: "Flashcards about farm animals".to_string(),
            content: Some(json!({"title": "Farm", "cards": [{"front": "Cow"}, {"front": "Pig"}]})),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_prompt_appears_once_after_resume() -> Result<()> {
        let (mut wizard, harness) = controller_with(MockCharacters::default(), Ok(flashcard_reply()));
        harness.drafts.seed("d1", ResourceKind::Flashcards, saved_draft());

        let phase = wizard.check_for_draft().await.clone();
        let DraftPhase::Prompting(offer) = phase else {
            panic!("expected a draft offer, got {:?}", phase);
        };
        assert_eq!(offer.id, "d1");
        assert_eq!(offer.name, "Farm Animals");

        wizard.resume_draft().await?;
        let state = wizard.state();
        assert_eq!(state.resource_id(), Some("d1"));
        assert_eq!(state.step(), WizardStep::Review);
        assert_eq!(state.content_status(), ContentStatus::Ready);
        assert_eq!(state.jobs().len(), 2);

        assert_eq!(wizard.check_for_draft().await, &DraftPhase::Resolved);
        Ok(())
    }

    #[tokio::test]
    async fn test_prompt_never_returns_after_start_fresh() -> Result<()> {
        let (mut wizard, harness) = controller_with(MockCharacters::default(), Ok(flashcard_reply()));
        harness.drafts.seed("d1", ResourceKind::Flashcards, saved_draft());

        assert!(matches!(wizard.check_for_draft().await, DraftPhase::Prompting(_)));
        wizard.start_fresh();

        // Same conditions still hold: no resource, Describe step, idle content.
        assert_eq!(wizard.state().step(), WizardStep::Describe);
        assert_eq!(wizard.state().content_status(), ContentStatus::Idle);
        assert_eq!(wizard.check_for_draft().await, &DraftPhase::Resolved);

        let err = wizard.resume_draft().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<WizardError>(), Some(WizardError::NoDraftOffer)));
        Ok(())
    }

    #[tokio::test]
    async fn test_discard_deletes_offered_draft() -> Result<()> {
        let (mut wizard, harness) = controller_with(MockCharacters::default(), Ok(flashcard_reply()));
        harness.drafts.seed("d1", ResourceKind::Flashcards, saved_draft());

        wizard.check_for_draft().await;
        wizard.discard_draft().await?;
        assert!(harness.drafts.records.lock().unwrap().is_empty());
        assert_eq!(wizard.state().draft_phase(), &DraftPhase::Resolved);
        assert_eq!(wizard.state().resource_id(), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_prompt_without_drafts_of_this_kind() {
        let (mut wizard, harness) = controller_with(MockCharacters::default(), Ok(flashcard_reply()));
        harness.drafts.seed("p1", ResourceKind::Poster, saved_draft());
        assert_eq!(wizard.check_for_draft().await, &DraftPhase::Resolved);
    }

    #[tokio::test]
    async fn test_no_prompt_once_work_has_started() {
        let (mut wizard, harness) = controller_with(MockCharacters::default(), Ok(flashcard_reply()));
        harness.drafts.seed("d1", ResourceKind::Flashcards, saved_draft());

        wizard.set_description("Ocean animals");
        wizard.generate_content().await;
        assert_eq!(wizard.check_for_draft().await, &DraftPhase::Resolved);
    }

    #[tokio::test]
    async fn test_edit_existing_skips_prompt() -> Result<()> {
        let (mut wizard, harness) = controller_with(MockCharacters::default(), Ok(flashcard_reply()));
        harness.drafts.seed("d1", ResourceKind::Flashcards, saved_draft());

        wizard.edit_existing("d1").await?;
        assert!(wizard.state().edit_mode());
        assert_eq!(wizard.state().name(), "Farm Animals");
        assert_eq!(wizard.check_for_draft().await, &DraftPhase::Resolved);

        assert!(wizard.edit_existing("missing").await.is_err());
        Ok(())
    }
}
