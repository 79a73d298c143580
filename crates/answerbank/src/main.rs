//! Answerbank CLI - resolve online-course questions through question banks and LLMs.
//!
//! Answerbank normalizes a question, checks the local answer cache, and on a
//! miss asks the configured provider (a remote question bank or an LLM).
//!
//! # Usage
//!
//! ```bash
//! # Answer a single question
//! answerbank answer --title "计算机的核心部件是" --type single -o "A. CPU" -o "B. 内存"
//!
//! # Answer a JSONL file of questions, four at a time
//! answerbank answer --input questions.jsonl --parallel 4
//!
//! # Inspect the answer cache
//! answerbank cache get "计算机的核心部件是"
//!
//! # View configuration
//! answerbank config show
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;
mod logging;

/// Answerbank - answer resolution through question banks and LLMs.
#[derive(Parser, Debug)]
#[command(name = "answerbank")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location
    #[arg(short, long, global = true, env = "ANSWERBANK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve answers for one question or a JSONL file of questions
    Answer(cli::answer::AnswerArgs),

    /// Read and write the answer cache directly
    Cache(cli::cache::CacheArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref().map(cli::expand_path);

    // Logging isn't initialized yet, so use eprintln for config warnings.
    let config = match cli::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `answerbank config path`."
            );
            answerbank_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Answerbank v{}", answerbank_core::VERSION);

    match cli.command {
        Commands::Answer(args) => cli::answer::execute(args, &config).await,
        Commands::Cache(args) => cli::cache::execute(args, &config).await,
        Commands::Config(args) => cli::config::execute(args, config_path).await,
    }
}
