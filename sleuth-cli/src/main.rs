//! Sleuth CLI: terminal interface for the research pipeline.
//!
//! Plans web searches for a query, runs them concurrently, and writes a
//! report. Sessions are checkpointed so interrupted runs can be resumed.

mod console;
mod providers;

use anyhow::Context;
use clap::Parser;
use sleuth_core::config::{SleuthConfig, load_config};
use sleuth_core::error::CollaboratorError;
use sleuth_core::orchestrator::{Orchestrator, RunOutcome};
use sleuth_core::store::SessionStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Sleuth: plan, search, and report on any research question
#[derive(Parser, Debug)]
#[command(name = "sleuth", version, about, long_about = None)]
struct Cli {
    /// LLM model to use
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Directory holding session files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Research a query from scratch, or continue a named session
    Run {
        /// The research question
        query: String,

        /// Session ID to create or resume
        #[arg(short, long)]
        session: Option<String>,

        /// Maximum number of concurrent searches
        #[arg(long)]
        concurrency: Option<usize>,

        /// Skip the LLM report writer and assemble the report from raw results
        #[arg(long)]
        no_writer: bool,
    },
    /// Resume an interrupted session
    Resume {
        /// Session ID
        id: String,

        /// Skip the LLM report writer and assemble the report from raw results
        #[arg(long)]
        no_writer: bool,
    },
    /// List research sessions, newest first
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a session's report
    Show {
        /// Session ID
        id: String,

        /// Print the raw session document
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file to the workspace
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,hyper=warn,reqwest=warn",
        2 => "debug,hyper=warn,reqwest=warn",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = sleuth_core::config::default_data_root()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "sleuth.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug,hyper=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if config.data_dir.is_relative() {
        config.data_dir = workspace.join(&config.data_dir);
    }

    match cli.command {
        Commands::Run {
            query,
            session,
            concurrency,
            no_writer,
        } => {
            if let Some(limit) = concurrency {
                config.search.max_concurrency = limit;
                config
                    .validate()
                    .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            }
            if no_writer {
                config.report.use_generator = false;
            }
            research(config, &query, session.as_deref(), cli.quiet).await
        }
        Commands::Resume { id, no_writer } => {
            let store = SessionStore::new(config.data_dir.clone());
            let session = store
                .get(&id)
                .with_context(|| format!("No readable session '{id}' in {}", store.data_dir().display()))?;
            if no_writer {
                config.report.use_generator = false;
            }
            research(config, &session.query, Some(&id), cli.quiet).await
        }
        Commands::List { json } => {
            let sessions = SessionStore::new(config.data_dir.clone()).list();
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                print!("{}", console::render_list(&sessions));
            }
            Ok(())
        }
        Commands::Show { id, json } => {
            let store = SessionStore::new(config.data_dir.clone());
            let session = store
                .get(&id)
                .with_context(|| format!("No readable session '{id}' in {}", store.data_dir().display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                print!("{}", console::render_session(&session));
            }
            Ok(())
        }
        Commands::Config { action } => handle_config(action, &config, &workspace),
    }
}

/// Run or resume the pipeline and print the finished report.
async fn research(
    config: SleuthConfig,
    query: &str,
    session_id: Option<&str>,
    quiet: bool,
) -> anyhow::Result<()> {
    let generator = providers::OpenAiCompatibleGenerator::new(&config.llm).map_err(|e| match e {
        CollaboratorError::Auth { .. } => anyhow::anyhow!(
            "{} is not set. Export it or add it to a .env file in the workspace.",
            config.llm.api_key_env
        ),
        other => other.into(),
    })?;
    let generator = Arc::new(generator);
    let search = Arc::new(providers::DuckDuckGoSearch::new(5)?);

    let orchestrator = Orchestrator::new(config, generator.clone(), search)
        .with_report_generator(generator)
        .with_observer(Arc::new(console::ConsoleObserver::new(quiet)));

    match orchestrator.run(query, session_id).await {
        RunOutcome::Completed(session) => {
            print!("{}", console::render_session(&session));
            Ok(())
        }
        RunOutcome::Stopped {
            session_id, stage, ..
        } => match session_id {
            Some(id) => anyhow::bail!(
                "Research stopped during {stage}. Resume with `sleuth resume {id}`."
            ),
            None => anyhow::bail!("Research stopped during {stage}."),
        },
    }
}

fn handle_config(action: ConfigAction, config: &SleuthConfig, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let rendered = config
                .to_toml()
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            print!("{rendered}");
            Ok(())
        }
        ConfigAction::Init => {
            let dir = workspace.join(".sleuth");
            let path = dir.join("config.toml");
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let rendered = SleuthConfig::default()
                .to_toml()
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}
