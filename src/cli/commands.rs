//! CLI command definitions for langbench.
//!
//! Each subcommand is a thin wrapper that loads configuration, builds the
//! library components and prints results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use crate::catalog::{Catalog, LanguageProfile};
use crate::ledger::{reconstruct, ReconstructContext, ReconstructOptions, RunConfig, RunLedger, LEDGER_FILE};
use crate::pipeline::{BenchmarkConfig, BenchmarkRunner, TrialRunner};
use crate::review::llm::DEFAULT_REVIEW_MODEL;
use crate::review::{LlmReviewer, Reviewer};
use crate::scoring::{Oracle, Scorer, TestBank};
use crate::session::{replay_transcript, CliEngine, TRANSCRIPT_FILE};

const DEFAULT_TASKS_DIR: &str = "tasks";
const DEFAULT_LANGUAGES_FILE: &str = "languages.json";
const DEFAULT_RESULTS_DIR: &str = "results";

/// Benchmark coding agents across programming languages.
#[derive(Parser)]
#[command(name = "langbench")]
#[command(about = "Benchmark coding agent performance across programming languages")]
#[command(version)]
#[command(
    long_about = "langbench runs a coding agent against a catalog of tasks in several languages,\nscores each attempt against the task's oracle and records the results in a run ledger.\n\nExample usage:\n  langbench run --task add-two-numbers --language rust -t 1"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the benchmark over discovered tasks.
    Run(RunArgs),

    /// Score an existing workspace directory.
    Score(ScoreArgs),

    /// Rebuild `run.json` from the transcripts in a run directory.
    Reconstruct(ReconstructArgs),

    /// Reconcile a transcript and print its canonical outcome.
    Inspect(InspectArgs),
}

/// Task catalog locations shared by several commands.
#[derive(clap::Args, Debug, Clone)]
pub struct CatalogArgs {
    /// Directory containing one subdirectory per task.
    #[arg(long, default_value = DEFAULT_TASKS_DIR)]
    pub tasks_dir: PathBuf,

    /// Language profiles file (JSON or YAML).
    #[arg(long, default_value = DEFAULT_LANGUAGES_FILE)]
    pub languages: PathBuf,
}

impl CatalogArgs {
    fn load(&self) -> anyhow::Result<Catalog> {
        Catalog::load(&self.tasks_dir, &self.languages).with_context(|| {
            format!(
                "Failed to load catalog from {} and {}",
                self.tasks_dir.display(),
                self.languages.display()
            )
        })
    }
}

/// Review service options shared by `run` and `reconstruct`.
#[derive(clap::Args, Debug, Clone)]
pub struct ReviewArgs {
    /// Model used for code review.
    #[arg(long, default_value = DEFAULT_REVIEW_MODEL)]
    pub review_model: String,

    /// Base URL of the OpenAI-compatible review API.
    #[arg(long)]
    pub review_api_base: Option<String>,

    /// OpenRouter API key for code review.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

impl ReviewArgs {
    fn build(&self) -> anyhow::Result<Option<Arc<dyn Reviewer>>> {
        let Some(key) = self.api_key.clone() else {
            warn!("No API key for code review; set OPENROUTER_API_KEY or pass --api-key");
            return Ok(None);
        };
        let mut reviewer = LlmReviewer::new(key)
            .context("Failed to initialize review client")?
            .with_model(&self.review_model);
        if let Some(base) = &self.review_api_base {
            reviewer = reviewer.with_api_base(base);
        }
        info!(model = %self.review_model, "Code review enabled");
        Ok(Some(Arc::new(reviewer)))
    }
}

/// Arguments for `langbench run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Directory where run directories are created.
    #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Agent model.
    #[arg(short = 'm', long, default_value = "claude-sonnet-4-5")]
    pub model: String,

    /// Trials per task/language combination.
    #[arg(short = 't', long, default_value_t = 3)]
    pub trials: u32,

    /// Maximum agent turns per trial.
    #[arg(long, default_value_t = 60)]
    pub max_turns: u32,

    /// Maximum spend per trial in USD.
    #[arg(long, default_value_t = 5.0)]
    pub max_budget: f64,

    /// Only run this task.
    #[arg(long)]
    pub task: Option<String>,

    /// Only run this language.
    #[arg(long)]
    pub language: Option<String>,

    #[command(flatten)]
    pub review: ReviewArgs,

    /// Disable code review.
    #[arg(long)]
    pub no_review: bool,

    /// Keep each trial's workspace next to its transcript.
    #[arg(long)]
    pub keep_workspaces: bool,

    /// Agent CLI binary.
    #[arg(long, default_value = "claude")]
    pub agent_bin: String,

    /// Permission mode passed to the agent CLI.
    #[arg(long, default_value = "bypassPermissions")]
    pub permission_mode: String,

    /// Extra argument passed verbatim to the agent CLI (repeatable).
    #[arg(long = "agent-arg", allow_hyphen_values = true)]
    pub agent_args: Vec<String>,
}

/// Arguments for `langbench score`.
#[derive(Parser, Debug)]
pub struct ScoreArgs {
    /// Workspace directory to score.
    pub dir: PathBuf,

    /// Test bank (`tests.json`).
    #[arg(long, required_unless_present = "native")]
    pub tests: Option<PathBuf>,

    /// Command that reads a test case on stdin.
    #[arg(long, required_unless_present = "native")]
    pub run_command: Option<String>,

    /// Command run before scoring, e.g. a build.
    #[arg(long)]
    pub pre_scoring_command: Option<String>,

    /// Score with the native test runner instead of the test bank.
    #[arg(long, requires = "test_command")]
    pub native: bool,

    /// Native test command.
    #[arg(long)]
    pub test_command: Option<String>,
}

/// Arguments for `langbench reconstruct`.
#[derive(Parser, Debug)]
pub struct ReconstructArgs {
    /// Run directory containing `<task>/<language>/trial-<n>/transcript.jsonl`.
    pub run_dir: PathBuf,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[command(flatten)]
    pub review: ReviewArgs,

    /// Keep prior scores instead of re-scoring retained workspaces.
    #[arg(long)]
    pub skip_scoring: bool,

    /// Keep prior reviews instead of re-reviewing.
    #[arg(long)]
    pub skip_reviews: bool,

    /// Only recompute outcomes from transcripts.
    #[arg(long)]
    pub transcript_only: bool,

    /// Only score or review entries that have no prior value.
    #[arg(long)]
    pub only_missing: bool,

    /// Keep prior durations instead of recomputing them.
    #[arg(long)]
    pub keep_durations: bool,
}

/// Arguments for `langbench inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Transcript file or trial directory.
    pub path: PathBuf,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_benchmark_command(args).await,
        Commands::Score(args) => run_score_command(args).await,
        Commands::Reconstruct(args) => run_reconstruct_command(args).await,
        Commands::Inspect(args) => run_inspect_command(args),
    }
}

async fn run_benchmark_command(args: RunArgs) -> anyhow::Result<()> {
    let catalog = args.catalog.load()?;
    let run_config = RunConfig::default()
        .with_model(&args.model)
        .with_trials(args.trials)
        .with_max_turns(args.max_turns)
        .with_max_budget_usd(args.max_budget);

    let reviewer = if args.no_review {
        None
    } else {
        args.review.build()?
    };

    let engine = CliEngine::new(&args.agent_bin)
        .with_permission_mode(&args.permission_mode)
        .with_extra_args(args.agent_args.clone());

    let config = BenchmarkConfig::new()
        .with_results_dir(&args.results_dir)
        .with_run_config(run_config.clone())
        .with_keep_workspaces(args.keep_workspaces)
        .with_task_filter(args.task.clone())
        .with_language_filter(args.language.clone());
    let trials = TrialRunner::new(Arc::new(engine), run_config).with_reviewer(reviewer);

    let run = BenchmarkRunner::new(config, trials)
        .run(&catalog)
        .await
        .context("Benchmark run failed")?;
    print_language_summary(&run.ledger);
    Ok(())
}

async fn run_score_command(args: ScoreArgs) -> anyhow::Result<()> {
    let bank = match &args.tests {
        Some(path) => Some(
            TestBank::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        ),
        None => None,
    };

    let oracle = if args.native {
        Oracle::Native {
            declared_total: bank.as_ref().map_or(0, TestBank::len),
        }
    } else {
        match bank {
            Some(bank) => Oracle::Io(bank),
            None => bail!("--tests is required unless --native is given"),
        }
    };

    let profile = LanguageProfile {
        id: "cli".to_string(),
        run_command: args.run_command.clone().unwrap_or_default(),
        test_command: args.test_command.clone().unwrap_or_default(),
        pre_trial_command: None,
        pre_scoring_command: args.pre_scoring_command.clone(),
        test_framework: None,
    };

    let result = Scorer::default()
        .score(&args.dir, &profile, &oracle)
        .await
        .with_context(|| format!("Failed to score {}", args.dir.display()))?;

    println!("passed: {}/{}", result.passed, result.total);
    println!("\noutput:\n{}", result.output);
    Ok(())
}

async fn run_reconstruct_command(args: ReconstructArgs) -> anyhow::Result<()> {
    let options = ReconstructOptions::default()
        .with_score(!args.skip_scoring && !args.transcript_only)
        .with_review(!args.skip_reviews && !args.transcript_only)
        .with_duration(!args.keep_durations)
        .with_only_missing(args.only_missing);

    let mut ctx = ReconstructContext::new(options);
    if options.score || options.review {
        ctx = ctx.with_catalog(args.catalog.load()?);
    }
    if options.review {
        if let Some(reviewer) = args.review.build()? {
            ctx = ctx.with_reviewer(reviewer);
        }
    }

    let ledger_path = args.run_dir.join(LEDGER_FILE);
    let prior = RunLedger::load_if_exists(&ledger_path)
        .with_context(|| format!("Failed to read prior ledger {}", ledger_path.display()))?;
    if prior.is_none() {
        info!(path = %ledger_path.display(), "No prior ledger, building from scratch");
    }

    let ledger = reconstruct(&args.run_dir, prior.as_ref(), &ctx)
        .await
        .with_context(|| format!("Failed to reconstruct {}", args.run_dir.display()))?;

    for result in &ledger.results {
        println!("{}", result.key());
        println!("  {}", result.summary_line());
    }
    ledger
        .save(&ledger_path)
        .with_context(|| format!("Failed to write {}", ledger_path.display()))?;
    println!("\nresults written to: {}", ledger_path.display());
    print_language_summary(&ledger);
    Ok(())
}

fn run_inspect_command(args: InspectArgs) -> anyhow::Result<()> {
    let path = transcript_path(&args.path);
    if !path.is_file() {
        bail!("transcript not found: {}", path.display());
    }
    let replay =
        replay_transcript(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    let counts = &replay.counts;
    println!("transcript: {}", path.display());
    println!(
        "events: {} assistant messages, {} tool calls, {} tool results, {} terminal",
        counts.assistant_messages, counts.tool_invocations, counts.tool_results, counts.terminal_events
    );
    if replay.skipped_lines > 0 {
        println!("skipped malformed lines: {}", replay.skipped_lines);
    }
    match replay.outcome {
        Some(outcome) => {
            println!("status: {}", outcome.status);
            println!("cost: ${:.4}", outcome.cost_usd);
            println!("tokens: {} in / {} out", outcome.input_tokens, outcome.output_tokens);
            println!("turns: {}", outcome.turns);
            println!("duration: {:.1}s", outcome.duration_ms as f64 / 1000.0);
        }
        None => println!("status: no terminal outcome in transcript"),
    }
    Ok(())
}

/// Accepts either a transcript file or the trial directory holding it.
fn transcript_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(TRANSCRIPT_FILE)
    } else {
        path.to_path_buf()
    }
}

fn print_language_summary(ledger: &RunLedger) {
    if ledger.is_empty() {
        return;
    }
    println!("\n{:<14} {:>7} {:>9} {:>13} {:>10}", "language", "trials", "success", "tests", "mean cost");
    for summary in ledger.summary_by_language() {
        println!(
            "{:<14} {:>7} {:>9} {:>13} {:>10}",
            summary.language,
            summary.trials,
            summary.successes,
            format!("{}/{}", summary.tests_passed, summary.tests_total),
            format!("${:.4}", summary.mean_cost_usd)
        );
    }
}
