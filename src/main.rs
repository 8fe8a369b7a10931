use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use resource_forge::core::config::Config;
use resource_forge::core::io::{NativeStorage, Storage};
use resource_forge::core::state::{ContentStatus, DraftPhase, WizardStep};
use resource_forge::services::batch::BatchRunner;
use resource_forge::services::characters::StoredCharacterService;
use resource_forge::services::content::LlmContentGenerator;
use resource_forge::services::drafts::StorageDraftStore;
use resource_forge::services::extractor::StrategyRegistry;
use resource_forge::services::images::{AssetStatus, HttpImageGenerator, ImageGenerator, StorageAssetStore};
use resource_forge::services::llm::{create_llm, LlmClient};
use resource_forge::services::wizard::{WizardController, WizardDeps};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let llm: Arc<dyn LlmClient> = Arc::from(create_llm(&config.llm)?);
    let registry = StrategyRegistry::builtin();

    let assets = Arc::new(StorageAssetStore::new(storage.clone(), &config.data_folder));
    let images: Arc<dyn ImageGenerator> = Arc::new(HttpImageGenerator::new(&config.image, assets.clone())?);
    let characters = Arc::new(StoredCharacterService::new(storage.clone(), &config.data_folder, images.clone()));

    let deps = WizardDeps {
        content: Arc::new(LlmContentGenerator::new(llm, registry.clone())),
        characters: characters.clone(),
        references: characters.clone(),
        images: images.clone(),
        assets,
        drafts: Arc::new(StorageDraftStore::new(storage, &config.data_folder)),
    };

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    let runner = BatchRunner::new(images, characters)
        .with_concurrency(config.image.concurrency)
        .with_progress(pb);

    let mut wizard = WizardController::new(deps, registry, config.owner_id.clone(), config.kind).with_runner(runner);
    wizard.set_style(config.style.clone())?;

    offer_draft(&mut wizard, &config).await?;
    describe(&mut wizard, &config).await?;
    review(&mut wizard, &config).await?;
    generate(&mut wizard, &config).await?;
    export(&wizard).await
}

async fn offer_draft(wizard: &mut WizardController, config: &Config) -> Result<()> {
    let DraftPhase::Prompting(offer) = wizard.check_for_draft().await.clone() else {
        return Ok(());
    };
    let resume = config.unattended
        || inquire::Confirm::new(&format!(
            "Resume draft \"{}\" (last saved {})?",
            offer.name,
            offer.updated_at.format("%Y-%m-%d %H:%M")
        ))
        .with_default(true)
        .prompt()?;

    if resume {
        wizard.resume_draft().await?;
        println!("Resumed \"{}\".", wizard.state().name());
    } else if inquire::Confirm::new("Delete that draft?").with_default(false).prompt()? {
        wizard.discard_draft().await?;
    } else {
        wizard.start_fresh();
    }
    Ok(())
}

async fn describe(wizard: &mut WizardController, config: &Config) -> Result<()> {
    if wizard.state().step() != WizardStep::Describe {
        return Ok(());
    }

    let from_args = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let mut description = if !from_args.trim().is_empty() {
        from_args
    } else if config.unattended {
        bail!("Pass a description on the command line when running unattended");
    } else {
        inquire::Text::new(&format!("Describe the {} you want:", wizard.state().kind())).prompt()?
    };

    loop {
        wizard.set_description(description.clone());
        println!("Generating content...");
        if wizard.next().await? != WizardStep::Describe {
            return Ok(());
        }
        if wizard.state().content_status() == ContentStatus::Error {
            eprintln!(
                "Content generation failed: {}",
                wizard.state().content_error().unwrap_or("unknown error")
            );
        }
        if config.unattended {
            bail!("Content generation failed");
        }
        description = inquire::Text::new("Edit the description and try again:")
            .with_initial_value(&description)
            .prompt()?;
    }
}

async fn review(wizard: &mut WizardController, config: &Config) -> Result<()> {
    if wizard.state().step() != WizardStep::Review {
        return Ok(());
    }

    let state = wizard.state();
    println!("\n== {} ==", state.name());
    for character in state.detected_characters() {
        let marker = if character.is_new { "new" } else { "linked" };
        println!("  {} [{}]: {}", character.name, marker, character.prompt_fragment);
    }
    println!("{} images to generate:", state.jobs().len());
    for job in state.jobs() {
        println!("  - {}", job.label.as_deref().unwrap_or(&job.asset_key));
    }

    if !config.unattended {
        let suggestions: Vec<(String, String, String)> = wizard
            .pending_suggestions()
            .into_iter()
            .filter_map(|c| {
                c.visible_suggestion()
                    .map(|s| (c.character_id.clone(), c.name.clone(), s.to_string()))
            })
            .collect();
        for (id, name, suggested) in suggestions {
            let accept = inquire::Confirm::new(&format!("Update how {} looks to \"{}\"?", name, suggested))
                .with_default(false)
                .prompt()?;
            if accept {
                wizard.accept_suggestion(&id)?;
            } else {
                wizard.dismiss_suggestion(&id)?;
            }
        }

        let name = inquire::Text::new("Name:")
            .with_default(wizard.state().name())
            .prompt()?;
        wizard.set_name(name);
    }
    if wizard.state().name().trim().is_empty() {
        wizard.set_name("Untitled");
    }

    wizard.next().await?;
    Ok(())
}

async fn generate(wizard: &mut WizardController, config: &Config) -> Result<()> {
    if wizard.state().step() != WizardStep::Generate {
        return Ok(());
    }

    let restored = wizard.state().job_counts().complete;
    if restored > 0 {
        println!("{} images already generated.", restored);
    }
    wizard.generate_remaining().await?;

    while wizard.state().job_counts().error > 0 && !config.unattended {
        let counts = wizard.state().job_counts();
        let retry = inquire::Confirm::new(&format!("{} of {} images failed. Retry them?", counts.error, wizard.state().jobs().len()))
            .with_default(true)
            .prompt()?;
        if !retry {
            break;
        }
        wizard.retry_failed().await?;
    }

    if !config.unattended
        && inquire::Confirm::new("Regenerate every image from scratch?")
            .with_default(false)
            .prompt()?
    {
        wizard.regenerate_all().await?;
    }

    if !wizard.is_step_complete(WizardStep::Generate) {
        bail!("No images were generated");
    }
    wizard.next().await?;
    Ok(())
}

async fn export(wizard: &WizardController) -> Result<()> {
    println!("\n== {} ==", wizard.state().name());
    for (job, asset) in wizard.results().await? {
        let label = job.label.as_deref().unwrap_or(&job.asset_key);
        match asset {
            Some(asset) if asset.status == AssetStatus::Ready => {
                println!("  {}: {} (v{})", label, asset.url, asset.version)
            }
            Some(asset) => println!("  {}: failed (v{})", label, asset.version),
            None => println!("  {}: missing ({:?})", label, job.status),
        }
    }
    if let Some(id) = wizard.state().resource_id() {
        println!("Saved as draft {}", id);
    }
    Ok(())
}
