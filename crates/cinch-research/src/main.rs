//! Run a deep-research pipeline against OpenRouter and write the report.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Web
//! search is enabled when `TAVILY_API_KEY` is set.
//!
//! # Examples
//!
//! ```sh
//! # Basic run
//! cinch-research "Compare 2023 and 2024 revenue of Company X"
//!
//! # Skip the clarifying question, widen the fan-out
//! cinch-research --no-clarify --max-concurrency 4 "State of solid-state batteries"
//!
//! # Load limits and remote lookup tools from a JSON file
//! cinch-research --config research.json "Apple gross margin trend"
//!
//! # Keep integrated findings in a JSON-lines file
//! cinch-research --knowledge findings.jsonl "EU AI Act timeline"
//! ```

use cinch_research::agent::events::ResearchEvent;
use cinch_research::prelude::*;
use cinch_research::tools::web::TAVILY_KEY_ENV;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run a deep-research pipeline and write the final report to a file.
#[derive(Parser)]
#[command(name = "cinch-research")]
struct Cli {
    /// The research request.
    #[arg(required = true)]
    query: Vec<String>,

    /// JSON file with pipeline limits and remote lookup tools.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model for every stage, overriding the config file.
    #[arg(long)]
    model: Option<String>,

    /// Never ask a clarifying question.
    #[arg(long)]
    no_clarify: bool,

    /// Maximum researchers running at once.
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Maximum supervisor planning turns.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Maximum tool calls per researcher.
    #[arg(long)]
    max_tool_calls: Option<u32>,

    /// Append integrated findings to this JSON-lines file.
    #[arg(long)]
    knowledge: Option<PathBuf>,

    /// Directory the report is written to.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

/// Contents of the `--config` file.
#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(flatten)]
    research: ResearchConfig,
    #[serde(default)]
    remote_tools: Vec<RemoteToolConfig>,
}

fn load_file_config(path: Option<&Path>) -> Result<FileConfig, String> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read config file '{}': {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse config file '{}': {e}", path.display()))
}

fn build_config(cli: &Cli, base: ResearchConfig) -> ResearchConfig {
    let mut config = base;
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    if cli.no_clarify {
        config = config.with_allow_clarification(false);
    }
    if let Some(n) = cli.max_concurrency {
        config = config.with_max_concurrent_research_units(n);
    }
    if let Some(n) = cli.max_iterations {
        config = config.with_max_supervisor_iterations(n);
    }
    if let Some(n) = cli.max_tool_calls {
        config = config.with_max_tool_calls_per_unit(n);
    }
    config
}

fn build_tools(config: &ResearchConfig, remote_tools: Vec<RemoteToolConfig>) -> ToolSet {
    let web_search = std::env::var(TAVILY_KEY_ENV).is_ok();
    if !web_search {
        eprintln!("  {TAVILY_KEY_ENV} is not set; web search disabled");
    }
    let mut tools = ToolSet::new()
        .with_timeout(Some(config.tool_timeout()))
        .with_if(web_search, WebSearch::new())
        .with(FetchUrl::new())
        .with(ThinkTool);
    for remote in remote_tools {
        tools.register(RemoteLookup::new(remote));
    }
    tools
}

/// Prints progress to stderr.
struct CliEventHandler;

impl EventHandler for CliEventHandler {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        match event {
            ResearchEvent::BriefWritten { brief } => eprintln!("  [brief] {brief}"),
            ResearchEvent::PlanningTurn {
                iteration,
                max_iterations,
                delegations,
            } => eprintln!("  [plan {iteration}/{max_iterations}] {delegations} topic(s)"),
            ResearchEvent::UnitStarted { index, topic } => eprintln!("  [unit {index}] {topic}"),
            ResearchEvent::UnitToolCall {
                topic,
                name,
                call_count,
            } => eprintln!("    [tool {call_count}] {name} ({topic})"),
            ResearchEvent::ReportFallback {
                notes_kept,
                notes_total,
                ..
            } => eprintln!("  [report] retrying with {notes_kept}/{notes_total} notes"),
            ResearchEvent::Usage(totals) => eprintln!("  [usage] {}", totals.summary()),
            _ => {}
        }
    }
}

fn write_report(dir: &Path, content: &str) -> Result<PathBuf, String> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("research_report_{stamp}.md"));
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
    std::fs::write(&path, content).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    Ok(path)
}

async fn run(cli: Cli) -> Result<(), String> {
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "OPENROUTER_KEY environment variable is not set".to_string())?;
    let file_config = load_file_config(cli.config.as_deref())?;
    let config = build_config(&cli, file_config.research);
    let tools = build_tools(&config, file_config.remote_tools);
    let client = OpenRouterClient::new(api_key)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("  Cancelling...");
            on_ctrl_c.cancel();
        }
    });

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(CliEventHandler);
    let mut pipeline = Pipeline::new(&client, &tools, &config)
        .with_event_handler(&handler)
        .with_cancellation(cancel);
    if let Some(path) = &cli.knowledge {
        pipeline = pipeline.with_knowledge_store(Arc::new(JsonlKnowledgeStore::new(path)));
    }

    let query = cli.query.join(" ");
    match pipeline.run(vec![Message::user(query)]).await {
        Ok(ResearchOutcome::Clarification(question)) => {
            println!("{question}");
            Ok(())
        }
        Ok(ResearchOutcome::Report(report)) => {
            let path = write_report(&cli.output_dir, &report.report)?;
            println!("{}", path.display());
            Ok(())
        }
        Err(ResearchError::Report(e)) => {
            let path = write_report(&cli.output_dir, &e.degraded_report())?;
            println!("{}", path.display());
            Err(format!("{e}; degraded report written to {}", path.display()))
        }
        Err(e) => Err(e.to_string()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
