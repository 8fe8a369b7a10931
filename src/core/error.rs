use crate::core::state::WizardStep;
use thiserror::Error;

/// Failures a caller is expected to match on. Collaborator and storage
/// failures travel as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum WizardError {
    #[error("step {0} is not complete yet")]
    StepIncomplete(WizardStep),
    #[error("no draft exists yet; finish the review step first")]
    NoDraft,
    #[error("unknown character: {0}")]
    UnknownCharacter(String),
    #[error("invalid character selection: {0}")]
    InvalidSelection(String),
    #[error("no draft is waiting to be resumed")]
    NoDraftOffer,
}
