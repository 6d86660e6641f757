//! Multiple-choice evaluation CLI

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mcq_eval::{
    config::{default_results_path, Config},
    providers::create_provider,
    questions::{load_question_bank, BankEntry},
    runner::{ConsoleProgress, EngineConfig, EvaluationEngine},
    store::ResultsDocument,
};

#[derive(Parser)]
#[command(name = "mcq-eval")]
#[command(about = "Resumable multiple-choice accuracy evaluation for LLM providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a question bank, resuming from an existing results file
    Run {
        /// Provider profile (default: [eval].provider)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model name, overriding the profile's default
        #[arg(short, long)]
        model: Option<String>,

        /// Question bank JSON file
        #[arg(short, long)]
        questions: Option<PathBuf>,

        /// Results file to create or resume
        #[arg(short, long)]
        results: Option<PathBuf>,

        /// Detailed response log
        #[arg(long)]
        responses: Option<PathBuf>,

        /// Run each answer through the verifier
        #[arg(long)]
        verify: bool,

        /// Additional attempts after the first
        #[arg(long)]
        max_retries: Option<u32>,

        /// Fixed pause between failed attempts
        #[arg(long)]
        retry_delay_ms: Option<u64>,

        /// Pause after each question
        #[arg(long)]
        question_delay_ms: Option<u64>,
    },

    /// Show the summary of a results file
    Status {
        /// Results file (default: the direct-variant file name)
        #[arg(short, long)]
        results: Option<PathBuf>,
    },

    /// List the entries of a question bank
    ListQuestions {
        /// Question bank JSON file
        #[arg(short, long)]
        questions: Option<PathBuf>,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/mcq-eval.toml")]
        output: PathBuf,
    },

    /// Check that a provider is reachable with the configured key
    Check {
        /// Provider profile (default: [eval].provider)
        #[arg(short, long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("mcq_eval=debug,info")
        } else {
            EnvFilter::new("mcq_eval=info,warn")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::Run {
            provider,
            model,
            questions,
            results,
            responses,
            verify,
            max_retries,
            retry_delay_ms,
            question_delay_ms,
        } => {
            let overrides = RunOverrides {
                provider,
                model,
                questions,
                results,
                responses,
                verify,
                max_retries,
                retry_delay_ms,
                question_delay_ms,
            };
            run_evaluation(config, overrides).await?;
        }

        Commands::Status { results } => {
            show_status(results.unwrap_or_else(|| default_results_path(config.eval.verify)))?;
        }

        Commands::ListQuestions { questions } => {
            list_questions(questions.unwrap_or_else(|| PathBuf::from(&config.eval.questions_path)))?;
        }

        Commands::InitConfig { output } => {
            init_config(output)?;
        }

        Commands::Check { provider } => {
            let name = provider.unwrap_or_else(|| config.eval.provider.clone());
            check_provider(&name, &config).await?;
        }
    }

    Ok(())
}

/// Command-line values layered over the loaded configuration
struct RunOverrides {
    provider: Option<String>,
    model: Option<String>,
    questions: Option<PathBuf>,
    results: Option<PathBuf>,
    responses: Option<PathBuf>,
    verify: bool,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    question_delay_ms: Option<u64>,
}

impl RunOverrides {
    /// Apply to `config`, returning the selected provider profile name
    fn apply(self, config: &mut Config) -> String {
        let name = self
            .provider
            .unwrap_or_else(|| config.eval.provider.clone())
            .to_lowercase();

        let eval = &mut config.eval;
        eval.verify |= self.verify;
        if let Some(path) = self.questions {
            eval.questions_path = path.to_string_lossy().into_owned();
        }
        if let Some(path) = self.results {
            eval.results_path = Some(path.to_string_lossy().into_owned());
        }
        if let Some(path) = self.responses {
            eval.responses_path = Some(path.to_string_lossy().into_owned());
        }
        if let Some(ms) = self.question_delay_ms {
            eval.question_delay_ms = ms;
        }

        if let Some(profile) = config.providers.get_mut(&name) {
            if let Some(model) = self.model {
                profile.default_model = model;
            }
            if let Some(n) = self.max_retries {
                profile.max_retries = n;
            }
            if let Some(ms) = self.retry_delay_ms {
                profile.retry_delay_ms = ms;
            }
        }

        name
    }
}

async fn run_evaluation(
    mut config: Config,
    overrides: RunOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let provider_name = overrides.apply(&mut config);

    let provider = create_provider(&provider_name, &config)?;
    let engine_config = EngineConfig::from_config(&config, &provider_name)?;
    let bank = load_question_bank(&config.eval.questions_path)?;

    if bank.is_empty() {
        eprintln!("Error: No questions in {}", config.eval.questions_path);
        std::process::exit(1);
    }

    println!("=== Multiple-Choice Evaluation ===");
    println!("Provider:  {}", provider.name());
    println!(
        "Model:     {}",
        engine_config.request.model.as_deref().unwrap_or(provider.default_model())
    );
    println!("Questions: {} ({} malformed)", bank.len(), bank.malformed_count());
    println!("Results:   {}", engine_config.results_path.display());
    if engine_config.verify {
        println!("Mode:      answer + verify");
    }
    println!();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    let engine = EvaluationEngine::new(provider, engine_config).with_progress(Arc::new(ConsoleProgress));
    let summary = engine.run(&bank, cancel).await?;

    if summary.cancelled {
        println!("Run interrupted. Re-run the same command to resume.");
    }

    Ok(())
}

fn show_status(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(&path)?;
    let document: ResultsDocument = serde_json::from_str(&content)?;
    let meta = &document.metadata;

    println!("Results: {}", path.display());
    println!("{:-<60}", "");
    println!("  Model:        {}", meta.model);
    println!("  Variant:      {}", document.variant());
    println!("  Started:      {}", meta.start_time.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Last updated: {}", meta.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Processed:    {}/{}", meta.questions_processed, meta.total_questions);
    println!("  Correct:      {}", meta.correct_answers);
    println!("  Accuracy:     {:.2}%", meta.accuracy);
    if let Some(changed) = meta.answers_changed_by_verifier {
        println!("  Changed by verifier: {}", changed);
    }

    Ok(())
}

fn list_questions(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let bank = load_question_bank(&path)?;

    println!("Questions in {} ({}):", path.display(), bank.len());
    println!("{:-<60}", "");

    for entry in bank.entries() {
        match entry {
            BankEntry::Valid(q) => {
                let preview: String = q.text.chars().take(60).collect();
                println!("  {} | {} | {}", q.id, q.correct_answer, preview);
            }
            BankEntry::Malformed { index, id, reason } => {
                let id = id.as_ref().map_or_else(|| format!("#{}", index), |id| id.to_string());
                println!("  {} | MALFORMED | {}", id, reason);
            }
        }
    }

    Ok(())
}

fn init_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    config.save_toml(&output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}

async fn check_provider(name: &str, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let provider = create_provider(name, config)?;
    println!("Checking {} ({})...", provider.name(), provider.default_model());

    if let Err(e) = provider.ping().await {
        println!("  FAILED: {}", e);
        std::process::exit(1);
    }

    println!("  OK");
    if let Some(limiter) = provider.rate_limiter() {
        println!(
            "  Tokens used in the last minute: {}",
            limiter.current_token_usage().await
        );
    }

    Ok(())
}
