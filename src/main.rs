//! evalsynth CLI - evaluation dataset synthesis.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use evalsynth::pipeline::FileOutcome;
use evalsynth::{
    CheckpointManager, Config, ConsoleReporter, EvalKind, PromptLibrary, ProviderKind,
    ProviderRegistry, RunFingerprint, SynthesisPipeline, SynthesisSettings, store,
    transform_dir, transform_file,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "evalsynth")]
#[command(version)]
#[command(about = "Evaluation dataset synthesis via batched LLM generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (optional; defaults apply if absent)
    #[arg(short, long, global = true, default_value = "evalsynth.toml")]
    config: PathBuf,

    /// Verbose console output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an evaluation dataset
    Generate {
        /// Eval to generate: hallucination, pii, jailbreak, regulatory, hr
        #[arg(short, long, value_parser = parse_eval)]
        eval: EvalKind,

        /// Provider: openai, anthropic, gemini, grok (repeat to rotate across several)
        #[arg(short, long = "provider", value_parser = parse_provider)]
        providers: Vec<ProviderKind>,

        /// Total datapoints to generate
        #[arg(long)]
        total: Option<usize>,

        /// Datapoints per provider call
        #[arg(long)]
        batch_size: Option<usize>,

        /// Output file (default: <output_dir>/<eval>-dataset.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f64>,

        /// Maximum output tokens per call
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Batch windows in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Checkpoint directory for re-runnable generation
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Flatten conversation history of generated datasets
    Transform {
        /// Transform a single file instead of every *.json in the input directory
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Directory of datasets to transform (default: <output_dir>)
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Directory for flattened datasets (default: <transformed_dir>)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Validate configuration and provider credentials
    Validate {
        /// Providers to check (default: every provider in the config file)
        #[arg(short, long = "provider", value_parser = parse_provider)]
        providers: Vec<ProviderKind>,
    },

    /// Show example configuration
    Example,
}

fn parse_eval(s: &str) -> std::result::Result<EvalKind, String> {
    s.parse()
}

fn parse_provider(s: &str) -> std::result::Result<ProviderKind, String> {
    s.parse()
}

/// Log files for one generation run.
struct RunLogs {
    dir: PathBuf,
    stem: String,
}

/// Install console logging, plus INFO and DEBUG log files for a generation run.
///
/// The returned guards flush the file writers on drop and must outlive the run.
fn setup_logging(verbose: bool, run_logs: Option<&RunLogs>) -> Result<Vec<WorkerGuard>> {
    let console_filter = if verbose {
        "evalsynth=debug,info"
    } else {
        "evalsynth=info,warn"
    };
    let console = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(EnvFilter::new(console_filter));

    let mut guards = Vec::new();
    let mut file_layers = Vec::new();
    if let Some(logs) = run_logs {
        std::fs::create_dir_all(&logs.dir)
            .with_context(|| format!("Failed to create log directory {}", logs.dir.display()))?;

        for (suffix, level) in [("", LevelFilter::INFO), ("_debug", LevelFilter::DEBUG)] {
            let appender =
                tracing_appender::rolling::never(&logs.dir, format!("{}{suffix}.log", logs.stem));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            file_layers.push(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(level)
                    .boxed(),
            );
        }
    }

    tracing_subscriber::registry()
        .with(console)
        .with(file_layers)
        .try_init()
        .context("Failed to install logging")?;
    Ok(guards)
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Providers named on the command line, else those configured in the file.
fn selected_providers(cli: &[ProviderKind], config: &Config) -> Result<Vec<ProviderKind>> {
    if !cli.is_empty() {
        return Ok(cli.to_vec());
    }
    let configured = config
        .providers
        .keys()
        .map(|name| name.parse::<ProviderKind>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(anyhow::Error::msg)?;
    if configured.is_empty() {
        let valid: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();
        bail!("--provider is required. Choose one of: {}", valid.join(", "));
    }
    Ok(configured)
}

fn print_example_config() {
    let example = r#"# evalsynth configuration file
# Every section is optional. Keys and models fall back to the
# <PROVIDER>_API_KEY / <PROVIDER>_MODEL environment variables, which may
# also be set in a .env file beside this config or in the working directory.

[providers.openai]
# api_key = "${OPENAI_API_KEY}"
model = "gpt-4o"
timeout_secs = 300
max_retries = 1
weight = 1

[providers.anthropic]
model = "claude-sonnet-4-20250514"

[providers.gemini]
model = "gemini-2.0-flash"

[providers.grok]
model = "grok-2"
# base_url = "https://api.x.ai/v1"

[generation]
total = 100
batch_size = 25
temperature = 0.7
max_tokens = 16000
cooldown_secs = 2.0
concurrency = 1

[paths]
prompts_dir = "dataset-generation-prompts"
output_dir = "output"
transformed_dir = "output/transformed"
logs_dir = "logs"
"#;
    println!("{example}");
}

#[allow(clippy::too_many_arguments)]
async fn generate(
    mut config: Config,
    verbose: bool,
    eval: EvalKind,
    providers: Vec<ProviderKind>,
    total: Option<usize>,
    batch_size: Option<usize>,
    output: Option<PathBuf>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    concurrency: Option<usize>,
    checkpoint: Option<PathBuf>,
) -> Result<()> {
    let generation = &mut config.generation;
    if let Some(total) = total {
        generation.total = total;
    }
    if let Some(batch_size) = batch_size {
        generation.batch_size = batch_size;
    }
    if let Some(temperature) = temperature {
        generation.temperature = temperature;
    }
    if let Some(max_tokens) = max_tokens {
        generation.max_tokens = max_tokens;
    }
    if let Some(concurrency) = concurrency {
        generation.concurrency = concurrency;
    }
    config.validate().context("Invalid configuration")?;

    let kinds = selected_providers(&providers, &config)?;
    let provider_label = kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join("+");
    let run_logs = RunLogs {
        dir: config.paths.logs_dir.clone(),
        stem: format!(
            "{eval}_{provider_label}_{}",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ),
    };
    let _guards = setup_logging(verbose, Some(&run_logs))?;

    let registry =
        ProviderRegistry::from_config(&config, &kinds).context("Failed to configure providers")?;
    let pool = registry.pool()?;

    let library = PromptLibrary::new(&config.paths.prompts_dir);
    let prompt = library.load(eval).context("Failed to load generation prompt")?;

    let settings = &config.generation;
    let output_path =
        output.unwrap_or_else(|| config.paths.output_dir.join(eval.dataset_file_name()));

    info!(
        eval = %eval,
        providers = %pool.label(),
        total = settings.total,
        batch_size = settings.batch_size,
        temperature = settings.temperature,
        concurrency = settings.concurrency,
        prompt_chars = prompt.chars().count(),
        "Dataset generation started"
    );
    if settings.batch_size > settings.total {
        warn!(
            batch_size = settings.batch_size,
            total = settings.total,
            "Batch size exceeds total; a single window will be requested"
        );
    }

    let pipeline = SynthesisPipeline::new(prompt, SynthesisSettings::from(settings))
        .with_reporter(Arc::new(ConsoleReporter::with_progress()));

    let (result, checkpoint_dir) = match checkpoint {
        Some(dir) => {
            let fingerprint = RunFingerprint {
                eval: eval.to_string(),
                target: settings.total,
                batch_size: settings.batch_size,
            };
            let mut manager = CheckpointManager::open(&dir, fingerprint)
                .context("Failed to open checkpoint")?;
            let result = pipeline
                .run_with_checkpoint(settings.total, settings.batch_size, &pool, &mut manager)
                .await?;
            (result, Some(manager.dir().to_path_buf()))
        }
        None => (
            pipeline.run(settings.total, settings.batch_size, &pool).await,
            None,
        ),
    };

    store::write_json_pretty(&output_path, &result.records)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    let stats = &result.stats;
    println!("\n=== Dataset Generation Complete ===");
    println!("Eval:        {eval}");
    println!("Providers:   {}", pool.label());
    println!("Target:      {}", stats.target);
    println!("Generated:   {}", stats.produced);
    println!(
        "Windows:     {} planned, {} completed, {} empty, {} failed, {} reused",
        stats.windows_planned,
        stats.windows_completed,
        stats.windows_empty,
        stats.windows_failed,
        stats.windows_reused
    );
    println!("Extracted:   {}", stats.total_extracted);
    println!("Invalid:     {}", stats.total_invalid);
    println!("Runtime:     {:.1}s", stats.runtime_secs);
    println!("Output:      {}", output_path.display());
    if let Some(dir) = &checkpoint_dir {
        println!("Checkpoint:  {}", dir.display());
    }

    if stats.shortfall() > 0 {
        warn!(
            "Generated {}/{} datapoints. Some batches failed or returned invalid JSON; \
             check the debug log in {} for details and re-run to generate more.",
            stats.produced,
            stats.target,
            run_logs.dir.display()
        );
    }
    Ok(())
}

fn transform(
    config: &Config,
    file: Option<PathBuf>,
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let output_dir = output_dir.unwrap_or_else(|| config.paths.transformed_dir.clone());

    let outcomes = match file {
        Some(file) => vec![
            transform_file(&file, &output_dir)
                .with_context(|| format!("Failed to transform {}", file.display()))?,
        ],
        None => {
            let input_dir = input_dir.unwrap_or_else(|| config.paths.output_dir.clone());
            if !input_dir.is_dir() {
                bail!("Input directory {} does not exist", input_dir.display());
            }
            transform_dir(&input_dir, &output_dir)?
        }
    };

    println!("\n=== Transform Complete ===");
    let mut transformed = 0;
    for outcome in &outcomes {
        match outcome {
            FileOutcome::Transformed(stats) => {
                transformed += 1;
                println!(
                    "  {} -> {} ({} datapoints: {} single-turn, {} multi-turn, {} invalid skipped)",
                    stats.input.display(),
                    stats.output.display(),
                    stats.total,
                    stats.single_turn,
                    stats.multi_turn,
                    stats.invalid
                );
            }
            FileOutcome::Skipped { input, reason } => {
                println!("  SKIP: {} ({reason})", input.display());
            }
        }
    }
    println!("Files:       {transformed} transformed, {} skipped", outcomes.len() - transformed);
    println!("Output dir:  {}", output_dir.display());
    Ok(())
}

fn validate(config: &Config, providers: &[ProviderKind], env_file: Option<&Path>) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    match env_file {
        Some(path) => info!("  Env file: {}", path.display()),
        None => info!("  Env file: none (using process environment)"),
    }

    let kinds = if providers.is_empty() {
        selected_providers(&[], config).unwrap_or_else(|_| ProviderKind::ALL.to_vec())
    } else {
        providers.to_vec()
    };

    let mut ready = 0;
    for kind in &kinds {
        match config.resolve_provider(*kind) {
            Ok(settings) => {
                ready += 1;
                info!(
                    "  {kind}: model {} at {} (weight {})",
                    settings.model, settings.base_url, settings.weight
                );
            }
            Err(e) => warn!("  {kind}: {e}"),
        }
    }

    let generation = &config.generation;
    info!(
        "  Generation: total {}, batch size {}, temperature {:.2}, cooldown {:.1}s, concurrency {}",
        generation.total,
        generation.batch_size,
        generation.temperature,
        generation.cooldown_secs,
        generation.concurrency
    );
    info!("  Prompts dir: {}", config.paths.prompts_dir.display());

    let library = PromptLibrary::new(&config.paths.prompts_dir);
    for eval in EvalKind::ALL {
        match library.locate(eval) {
            Some(path) => info!("  {eval}: {}", path.display()),
            None => warn!("  {eval}: no prompt file ({}.*)", eval.prompt_stem()),
        }
    }

    if ready == 0 {
        bail!("No provider has both an API key and a model configured");
    }
    info!("Configuration is valid ({ready}/{} providers ready)", kinds.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env_file = evalsynth::models::load_env_file(&cli.config)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
            Ok(())
        }

        Commands::Validate { providers } => {
            let _guards = setup_logging(cli.verbose, None)?;
            let config = load_config(&cli.config)?;
            validate(&config, &providers, env_file.as_deref())
        }

        Commands::Transform {
            file,
            input_dir,
            output_dir,
        } => {
            let _guards = setup_logging(cli.verbose, None)?;
            let config = load_config(&cli.config)?;
            transform(&config, file, input_dir, output_dir)
        }

        Commands::Generate {
            eval,
            providers,
            total,
            batch_size,
            output,
            temperature,
            max_tokens,
            concurrency,
            checkpoint,
        } => {
            let config = load_config(&cli.config)?;
            generate(
                config,
                cli.verbose,
                eval,
                providers,
                total,
                batch_size,
                output,
                temperature,
                max_tokens,
                concurrency,
                checkpoint,
            )
            .await
        }
    }
}
