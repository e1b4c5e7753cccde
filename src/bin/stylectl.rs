use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use stylizer::credential::store::mask_key;
use stylizer::credential::CredentialStore;
use stylizer::gemini::client::QualityTier;
use stylizer::image::ImageArtifact;
use stylizer::prompt::inputs::parse_input_pairs;
use stylizer::runner::RunEvent;
use stylizer::task::{TaskDescriptor, TaskResult, TaskStatus};
use stylizer::{Config, Orchestrator, ProxyClient, RateGovernor, TemplateLibrary};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "stylectl", about = "CLI for restyling photos with an image model", version)]
struct Cli {
    /// Override PROXY_URL
    #[arg(global = true, long)]
    proxy_url: Option<String>,

    /// Personal API key for this invocation (takes precedence over the saved key)
    #[arg(global = true, long)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct PromptArgs {
    /// Literal prompt text
    #[arg(long, conflicts_with = "template")]
    prompt: Option<String>,
    /// Style template name under TEMPLATES_DIR/<name>.json
    #[arg(long)]
    template: Option<String>,
    /// Template inputs as key=value (repeatable)
    #[arg(long = "input", value_name = "KEY=VALUE")]
    inputs: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate one image from one or more input photos
    Generate {
        /// Input image paths
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[command(flatten)]
        prompt: PromptArgs,
        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Run one task per --set, sequentially
    Batch {
        /// Comma separated image paths for one task (repeatable)
        #[arg(long = "set", value_name = "A.png,B.png", required = true)]
        sets: Vec<String>,
        #[command(flatten)]
        prompt: PromptArgs,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Produce several variations of the same request
    Variations {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[command(flatten)]
        prompt: PromptArgs,
        /// Number of variations
        #[arg(long, default_value_t = 4)]
        count: usize,
        /// Concurrent workers (defaults to VARIATION_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Upscale an image to hd, 2k or 4k
    Enhance {
        image: PathBuf,
        #[arg(long, default_value = "hd")]
        tier: QualityTier,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Manage the saved personal API key
    Key {
        #[command(subcommand)]
        cmd: KeyCmd,
    },
    /// Style template listing
    Templates {
        #[command(subcommand)]
        cmd: TemplatesCmd,
    },
}

#[derive(Subcommand, Debug)]
enum KeyCmd {
    /// Validate and save a personal key
    Set {
        key: String,
        /// Save without checking the key upstream
        #[arg(long)]
        skip_validate: bool,
    },
    /// Remove the saved key
    Clear,
    /// Print the saved key, masked
    Show,
    /// Check a key (or the saved one) upstream
    Validate { key: Option<String> },
}

#[derive(Subcommand, Debug)]
enum TemplatesCmd {
    /// List template names
    List,
    /// Print one template as JSON
    Show { name: String },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // Load env and parse CLI
    Config::dotenv_load();
    let cli = Cli::parse();

    let mut conf = Config::new().expect("Failed to load config");
    if let Some(url) = cli.proxy_url {
        conf.proxy_url = url;
    }

    let store = CredentialStore::new(&conf.credential_file);
    let governor = Arc::new(RateGovernor::new());
    governor.spawn_ticker();
    let orchestrator = Orchestrator::from_config(&conf, Arc::new(ProxyClient::from_config(&conf)), governor);

    match cli.command {
        Commands::Generate { images, prompt, out } => {
            let prompt = resolve_prompt(&conf, &prompt).await?;
            let images = load_images(&images).await?;
            let credential = credential(cli.api_key, &store).await?;
            let image = orchestrator
                .generate_single(&images, &prompt, credential.as_deref())
                .await?;
            let path = save_image(&out, "stylized", &image).await?;
            println!("Saved {}", path.display());
            Ok(())
        }
        Commands::Batch { sets, prompt, out } => {
            let prompt = resolve_prompt(&conf, &prompt).await?;
            let mut tasks = Vec::with_capacity(sets.len());
            for (index, set) in sets.iter().enumerate() {
                let paths: Vec<PathBuf> = set
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect();
                tasks.push(TaskDescriptor::new(index as u32 + 1, load_images(&paths).await?, prompt.clone()));
            }
            let credential = credential(cli.api_key, &store).await?;
            let handle = orchestrator.spawn_batch(tasks, credential)?;
            report_progress(handle.events).await;
            let outcome = handle.join.await?;
            if let Some(error) = &outcome.error {
                eprintln!("Batch aborted: {}", error.message);
                std::process::exit(1);
            }
            save_results(&out, "batch", &outcome.results).await?;
            println!("{}/{} tasks completed", outcome.completed, outcome.total);
            Ok(())
        }
        Commands::Variations { images, prompt, count, workers, out } => {
            let prompt = resolve_prompt(&conf, &prompt).await?;
            let images = load_images(&images).await?;
            let credential = credential(cli.api_key, &store).await?;
            let handle = orchestrator.spawn_variations(images, prompt, count, workers, credential)?;
            report_progress(handle.events).await;
            let outcome = handle.join.await?;
            save_results(&out, "variation", &outcome.results).await?;
            println!("{}/{} variations completed", outcome.completed, outcome.total);
            Ok(())
        }
        Commands::Enhance { image, tier, out } => {
            let image = ImageArtifact::from_path(&image).await?;
            let credential = credential(cli.api_key, &store).await?;
            let enhanced = orchestrator.enhance(&image, tier, credential.as_deref()).await?;
            let path = save_image(&out, &format!("enhanced-{}", tier), &enhanced).await?;
            println!("Saved {}", path.display());
            Ok(())
        }
        Commands::Key { cmd } => match cmd {
            KeyCmd::Set { key, skip_validate } => {
                if !skip_validate && !orchestrator.validate_key(&key).await? {
                    eprintln!("The key was rejected upstream; not saved");
                    std::process::exit(1);
                }
                store.save(&key).await?;
                println!("Saved key {} to {}", mask_key(key.trim()), store.path().display());
                Ok(())
            }
            KeyCmd::Clear => {
                store.clear().await?;
                println!("Cleared saved key");
                Ok(())
            }
            KeyCmd::Show => {
                match store.load().await? {
                    Some(key) => println!("{}", mask_key(&key)),
                    None => println!("No saved key"),
                }
                Ok(())
            }
            KeyCmd::Validate { key } => {
                let key = match key {
                    Some(k) => k,
                    None => match store.load().await? {
                        Some(k) => k,
                        None => {
                            eprintln!("No key given and none saved");
                            std::process::exit(2);
                        }
                    },
                };
                let valid = orchestrator.validate_key(&key).await?;
                println!("{}", if valid { "valid" } else { "invalid" });
                Ok(())
            }
        },
        Commands::Templates { cmd } => {
            let library = TemplateLibrary::load(&conf.templates_dir).await?;
            match cmd {
                TemplatesCmd::List => {
                    for template in library.list() {
                        match &template.description {
                            Some(d) => println!("{}\t{}", template.name, d),
                            None => println!("{}", template.name),
                        }
                    }
                }
                TemplatesCmd::Show { name } => {
                    println!("{}", serde_json::to_string_pretty(library.get(&name)?)?);
                }
            }
            Ok(())
        }
    }
}

async fn credential(flag: Option<String>, store: &CredentialStore) -> CliResult<Option<String>> {
    if let Some(key) = flag.filter(|k| !k.trim().is_empty()) {
        return Ok(Some(key));
    }
    Ok(store.load().await?)
}

async fn resolve_prompt(conf: &Config, args: &PromptArgs) -> CliResult<String> {
    match (&args.prompt, &args.template) {
        (Some(p), None) => Ok(p.clone()),
        (None, Some(name)) => {
            let library = TemplateLibrary::load(&conf.templates_dir).await?;
            let inputs = parse_input_pairs(&args.inputs)?;
            Ok(library.render(name, &inputs)?)
        }
        _ => {
            eprintln!("Must provide either --prompt <text> or --template <name>");
            std::process::exit(2);
        }
    }
}

async fn load_images(paths: &[PathBuf]) -> CliResult<Vec<ImageArtifact>> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        images.push(ImageArtifact::from_path(path).await?);
    }
    Ok(images)
}

async fn report_progress(mut events: UnboundedReceiver<RunEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Started { total } => eprintln!("Started {} item(s)", total),
            RunEvent::TaskUpdated { result } if result.status == TaskStatus::Failed => {
                eprintln!(
                    "  #{} failed: {}",
                    result.task_id,
                    result.error_message.as_deref().unwrap_or("unknown error")
                );
            }
            RunEvent::Progress { completed, total } => eprintln!("  {}/{}", completed, total),
            RunEvent::Aborted { message, .. } => eprintln!("Aborted: {}", message),
            _ => {}
        }
    }
}

async fn save_image(dir: &Path, stem: &str, image: &ImageArtifact) -> CliResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.{}", stem, image.extension()));
    tokio::fs::write(&path, &image.data).await?;
    Ok(path)
}

async fn save_results(dir: &Path, prefix: &str, results: &[TaskResult]) -> CliResult<()> {
    for result in results {
        if let Some(image) = &result.output {
            let path = save_image(dir, &format!("{}-{}", prefix, result.task_id), image).await?;
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}
