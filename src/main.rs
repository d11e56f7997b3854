use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use promptstudio::models::{
    Config, GenerationOutcome, GenerationRequest, HistoryItem, ImageRef, ModelEntry,
    PromptAiConfig, Provider,
};
use promptstudio::orchestrator::Orchestrator;
use promptstudio::polish::{PolishClient, PolishMode, PolishState, StreamEvent};
use promptstudio::storage::LocalStorage;
use promptstudio::store::S3ObjectStore;
use promptstudio::sync::{SyncManager, SyncOutcome};
use std::io::Write;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "promptstudio")]
#[command(about = "Generate images from prompts across several providers")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an image and record it in history.
    Generate {
        #[arg(long, value_parser = parse_provider)]
        provider: Provider,
        #[arg(long)]
        model: String,
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        aspect_ratio: Option<String>,
        #[arg(long)]
        negative_prompt: Option<String>,
        #[arg(long)]
        count: Option<u32>,
        prompt: String,
    },
    /// Rewrite a prompt with the configured assistant, streaming the result.
    Polish {
        #[arg(long, default_value = "refine", value_parser = parse_mode)]
        mode: PolishMode,
        text: String,
    },
    #[command(subcommand)]
    Keys(KeysCommand),
    #[command(subcommand)]
    Models(ModelsCommand),
    #[command(subcommand)]
    PromptAi(PromptAiCommand),
    #[command(subcommand)]
    History(HistoryCommand),
    #[command(subcommand)]
    Sync(SyncCommand),
}

#[derive(Debug, Subcommand)]
enum KeysCommand {
    Set {
        #[arg(value_parser = parse_provider)]
        provider: Provider,
        key: String,
    },
}

#[derive(Debug, Subcommand)]
enum ModelsCommand {
    Add {
        #[arg(value_parser = parse_provider)]
        provider: Provider,
        name: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, default_value = "")]
        note: String,
    },
    Remove {
        #[arg(value_parser = parse_provider)]
        provider: Provider,
        name: String,
    },
    Default {
        #[arg(value_parser = parse_provider)]
        provider: Provider,
        name: String,
    },
    List,
}

#[derive(Debug, Subcommand)]
enum PromptAiCommand {
    Set {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        model: String,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    List,
    Remove { id: String },
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    Startup,
    Upload,
    FetchImage { id: String },
    FetchMissingImages,
}

fn parse_provider(input: &str) -> std::result::Result<Provider, String> {
    input.parse().map_err(|e: promptstudio::Error| e.to_string())
}

fn parse_mode(input: &str) -> std::result::Result<PolishMode, String> {
    input.parse().map_err(|e: promptstudio::Error| e.to_string())
}

async fn sync_manager(config: &Config, local: &LocalStorage) -> Result<Option<SyncManager>> {
    let Some(settings) = &config.object_store else {
        return Ok(None);
    };
    let store = S3ObjectStore::new(settings).await?;
    Ok(Some(SyncManager::new(Arc::new(store), local.clone())))
}

fn report(outcome: &SyncOutcome) {
    println!(
        "uploaded: {}, downloaded: {}",
        outcome.uploaded, outcome.downloaded
    );
    for e in &outcome.errors {
        println!("  {}: {}", e.step, e.message);
    }
}

async fn generate(config: &Config, local: &LocalStorage, request: GenerationRequest) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config, local.model_configs.subscribe())?;
    let result = orchestrator.generate(&request).await;
    info!("{}", result.diagnostic);

    let image = match result.outcome {
        GenerationOutcome::Image(image) => image,
        GenerationOutcome::Empty => {
            println!("The provider returned no image; try rephrasing the prompt.");
            return Ok(());
        }
        GenerationOutcome::Failed(message) => bail!("Generation failed: {}", message),
    };

    let mut item = HistoryItem::new_now(
        request.prompt.clone(),
        None,
        request.model.clone(),
        request.provider,
    );
    let image_url = match image {
        ImageRef::Url(url) => url,
        ImageRef::LocalPath(path) => path.to_string_lossy().to_string(),
        ImageRef::InlineBase64 { bytes, .. } => local
            .blobs
            .save(&item.id, &bytes)
            .await?
            .to_string_lossy()
            .to_string(),
    };
    println!("{}", image_url);
    item.image_url = Some(image_url);
    local.history.add(item)?;

    if let Some(manager) = sync_manager(config, local).await? {
        let outcome = manager.upload_history().await;
        if !outcome.is_clean() {
            report(&outcome);
        }
    }
    Ok(())
}

async fn polish(local: &LocalStorage, mode: PolishMode, text: &str) -> Result<()> {
    let config = local.prompt_ai.snapshot();
    let client = PolishClient::new(&config, reqwest::Client::new())
        .context("Configure the assistant with `promptstudio prompt-ai set` first")?;
    let mut stream = client.polish(text, mode);
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                stream.cancel();
                break;
            }
            event = stream.next() => event,
        };
        match event {
            Some(StreamEvent::Chunk(chunk)) => {
                write!(stdout, "{}", chunk)?;
                stdout.flush()?;
            }
            Some(StreamEvent::Completed) | None => break,
            Some(StreamEvent::Error(message)) => eprintln!("\n[warning] {}", message),
        }
    }
    writeln!(stdout)?;

    match stream.state() {
        PolishState::Errored => bail!("Polishing failed"),
        PolishState::Cancelled => bail!("Polishing cancelled"),
        _ => Ok(()),
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let config = Config::from_env()?;
    let local = LocalStorage::open(&config.data_dir)?;

    match args.command {
        Command::Generate {
            provider,
            model,
            size,
            aspect_ratio,
            negative_prompt,
            count,
            prompt,
        } => {
            let mut request = GenerationRequest::new(provider, model, prompt);
            if let Some(size) = size {
                request = request.with_size(size);
            }
            if let Some(aspect_ratio) = aspect_ratio {
                request = request.with_aspect_ratio(aspect_ratio);
            }
            if let Some(negative_prompt) = negative_prompt {
                request = request.with_negative_prompt(negative_prompt);
            }
            if let Some(count) = count {
                request = request.with_sample_count(count);
            }
            generate(&config, &local, request).await?;
        }
        Command::Polish { mode, text } => polish(&local, mode, &text).await?,
        Command::Keys(KeysCommand::Set { provider, key }) => {
            local
                .model_configs
                .update(|c| c.set_api_key(provider, key))?;
            println!("API key for {} saved", provider);
        }
        Command::Models(ModelsCommand::Add {
            provider,
            name,
            display_name,
            note,
        }) => {
            let entry = ModelEntry {
                display_name: display_name.unwrap_or_else(|| name.clone()),
                name,
                note,
            };
            local
                .model_configs
                .update(|c| c.add_model(provider, entry))?;
        }
        Command::Models(ModelsCommand::Remove { provider, name }) => {
            let mut removed = false;
            local.model_configs.update(|c| {
                removed = c.remove_model(provider, &name);
            })?;
            if !removed {
                bail!("{} has no model named '{}'", provider, name);
            }
        }
        Command::Models(ModelsCommand::Default { provider, name }) => {
            let mut config = local.model_configs.snapshot();
            config.set_default(provider, &name)?;
            local.model_configs.replace(config)?;
        }
        Command::Models(ModelsCommand::List) => {
            let config = local.model_configs.snapshot();
            let default = config.default_model();
            for provider in Provider::ALL {
                let key_state = if config.api_key(provider).is_some() {
                    "key set"
                } else {
                    "no key"
                };
                println!("{} ({})", provider, key_state);
                for model in config.models_for(provider) {
                    let marker = match default {
                        Some(d) if d.group == provider && d.model_name == model.name => "*",
                        _ => " ",
                    };
                    println!("  {} {} {}", marker, model.name, model.display_name);
                }
            }
        }
        Command::PromptAi(PromptAiCommand::Set {
            base_url,
            api_key,
            model,
        }) => {
            local.prompt_ai.replace(PromptAiConfig {
                base_url: Some(base_url),
                api_key: Some(api_key),
                model: Some(model),
            })?;
        }
        Command::History(HistoryCommand::List) => {
            for item in local.history.items() {
                println!(
                    "{}  {}  {}/{}  {}  {}",
                    item.id,
                    item.timestamp,
                    item.provider,
                    item.model,
                    item.image_url.as_deref().unwrap_or("-"),
                    item.prompt
                );
            }
        }
        Command::History(HistoryCommand::Remove { id }) => {
            match sync_manager(&config, &local).await? {
                Some(manager) => report(&manager.remove_history_item(&id).await),
                None => {
                    if !local.history.remove(&id)? {
                        bail!("No history item with id {}", id);
                    }
                    local.blobs.delete(&id).await?;
                }
            }
        }
        Command::Sync(command) => {
            let manager = sync_manager(&config, &local)
                .await?
                .context("Sync needs OSS_ACCESS_KEY_ID, OSS_SECRET_ACCESS_KEY and OSS_BUCKET")?;
            let outcome = match command {
                SyncCommand::Startup => manager.sync_on_startup().await,
                SyncCommand::Upload => {
                    let mut outcome = manager.upload_model_configs().await;
                    outcome.absorb(manager.upload_prompt_ai_config().await);
                    outcome.absorb(manager.upload_history().await);
                    outcome
                }
                SyncCommand::FetchImage { id } => manager.fetch_history_image(&id).await,
                SyncCommand::FetchMissingImages => {
                    let ids = manager.ids_missing_images().await;
                    manager.download_history_images(&ids).await
                }
            };
            report(&outcome);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptstudio=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_aliases() {
        assert_eq!(parse_provider("dashscope").unwrap(), Provider::Qwen);
        assert!(parse_provider("midjourney").unwrap_err().contains("Unknown provider"));
    }

    #[test]
    fn test_generate_args() {
        let args = CliArgs::try_parse_from([
            "promptstudio",
            "generate",
            "--provider",
            "minimax",
            "--model",
            "image-01",
            "--aspect-ratio",
            "16:9",
            "a red fox",
        ])
        .unwrap();
        match args.command {
            Command::Generate {
                provider,
                aspect_ratio,
                prompt,
                ..
            } => {
                assert_eq!(provider, Provider::MiniMax);
                assert_eq!(aspect_ratio.as_deref(), Some("16:9"));
                assert_eq!(prompt, "a red fox");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_polish_mode_default() {
        let args = CliArgs::try_parse_from(["promptstudio", "polish", "a cat"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Polish {
                mode: PolishMode::Refine,
                ..
            }
        ));
    }

    #[test]
    fn test_sync_subcommands() {
        let args =
            CliArgs::try_parse_from(["promptstudio", "sync", "fetch-image", "1700000000000"])
                .unwrap();
        assert!(matches!(
            args.command,
            Command::Sync(SyncCommand::FetchImage { ref id }) if id == "1700000000000"
        ));
    }
}
