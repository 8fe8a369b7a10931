//! Batched image generation.
//!
//! Jobs are dispatched in sequential batches of at most `concurrency`. Every
//! job in a batch runs to completion regardless of its siblings, and each
//! completion is applied to the live [`WizardState`] as an index-scoped
//! [`StatePatch::Job`] the moment it arrives.

use crate::core::error::WizardError;
use crate::core::state::{ImageJob, JobStatus, StatePatch, WizardState};
use crate::services::characters::ReferenceEnsurer;
use crate::services::images::{ImageGenerator, ImageRequest};
use anyhow::Result;
use futures_util::StreamExt;
use indicatif::ProgressBar;
use log::{info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Every `Pending` job.
    Remaining,
    /// Every `Error` job.
    RetryFailed,
    /// Every job, after forcing all of them back to `Pending`.
    RegenerateAll,
}

impl RunMode {
    pub fn select_indices(self, jobs: &[ImageJob]) -> Vec<usize> {
        jobs.iter()
            .enumerate()
            .filter(|(_, job)| match self {
                RunMode::Remaining | RunMode::RegenerateAll => job.status == JobStatus::Pending,
                RunMode::RetryFailed => job.status == JobStatus::Error,
            })
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batch_sizes: Vec<usize>,
    pub completed: usize,
    pub errored: usize,
}

pub struct BatchRunner {
    images: Arc<dyn ImageGenerator>,
    references: Arc<dyn ReferenceEnsurer>,
    concurrency: usize,
    progress: Option<ProgressBar>,
}

impl BatchRunner {
    pub fn new(images: Arc<dyn ImageGenerator>, references: Arc<dyn ReferenceEnsurer>) -> Self {
        Self {
            images,
            references,
            concurrency: DEFAULT_CONCURRENCY,
            progress: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn run(&self, state: &mut WizardState, mode: RunMode) -> Result<RunSummary> {
        let Some(owner_ref) = state.resource_id().map(str::to_string) else {
            return Err(WizardError::NoDraft.into());
        };
        if mode == RunMode::RegenerateAll {
            state.apply(StatePatch::ResetJobs);
        }

        let indices = mode.select_indices(state.jobs());
        let mut summary = RunSummary::default();
        if indices.is_empty() {
            info!("No jobs to run for {:?}", mode);
            return Ok(summary);
        }

        let style = state.style_ref().map(str::to_string);
        if let Some(pb) = &self.progress {
            pb.reset();
            pb.set_length(indices.len() as u64);
        }

        for batch in indices.chunks(self.concurrency) {
            summary.batch_sizes.push(batch.len());
            let jobs: Vec<(usize, ImageJob)> =
                batch.iter().map(|&i| (i, state.jobs()[i].clone())).collect();

            if let Some(style) = &style {
                self.ensure_references(&jobs, style).await;
            }

            for (index, _) in &jobs {
                state.apply(StatePatch::Job {
                    index: *index,
                    status: JobStatus::Generating,
                    error: None,
                });
            }

            let images = &self.images;
            let owner_ref = owner_ref.as_str();
            let style = style.as_deref();
            let mut completions = futures_util::stream::iter(jobs)
                .map(|(index, job)| async move {
                    let request = ImageRequest::for_job(owner_ref, &job, style);
                    let result = if job.green_screen {
                        images.generate_green_screen(&request).await
                    } else {
                        images.generate(&request).await
                    };
                    (index, job.asset_key, result)
                })
                .buffer_unordered(self.concurrency);

            while let Some((index, asset_key, result)) = completions.next().await {
                let patch = match result {
                    Ok(()) => {
                        summary.completed += 1;
                        StatePatch::Job {
                            index,
                            status: JobStatus::Complete,
                            error: None,
                        }
                    }
                    Err(e) => {
                        warn!("Image job {} failed: {:#}", asset_key, e);
                        summary.errored += 1;
                        StatePatch::Job {
                            index,
                            status: JobStatus::Error,
                            error: Some(e.to_string()),
                        }
                    }
                };
                state.apply(patch);
                if let Some(pb) = &self.progress {
                    pb.inc(1);
                }
            }
        }

        if let Some(pb) = &self.progress {
            pb.finish_with_message("Batch complete");
        }
        info!(
            "Ran {} batches: {} complete, {} failed",
            summary.batch_sizes.len(),
            summary.completed,
            summary.errored
        );
        Ok(summary)
    }

    // Failures only degrade reference quality; generation proceeds.
    async fn ensure_references(&self, jobs: &[(usize, ImageJob)], style: &str) {
        let characters: BTreeSet<&str> = jobs
            .iter()
            .filter_map(|(_, job)| job.character_ids.as_ref())
            .flatten()
            .map(String::as_str)
            .collect();

        for character_id in characters {
            if let Err(e) = self.references.ensure_reference(character_id, style, false).await {
                warn!(
                    "Reference for {} in style {} unavailable, generating anyway: {:#}",
                    character_id, style, e
                );
            }
        }
    }
}
