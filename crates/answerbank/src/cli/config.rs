//! The `answerbank config` command for configuration management.

use clap::{Args, Subcommand};
use answerbank_core::Config;
use std::path::PathBuf;

/// Arguments for the `config` command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,

    /// Show config file path
    Path,

    /// Initialize a new config file with defaults
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Starter file: defaults plus commented provider examples.
const PROVIDER_TEMPLATE: &str = r#"
# Pick one provider: TikuYanxi, TikuLike, TikuAdapter, AI, SiliconFlow.
# Leaving it unset disables answering.
#
# provider = "AI"
# endpoint = "https://api.openai.com/v1/chat/completions"
# key = "${OPENAI_API_KEY}"
# model = "gpt-4o-mini"
# submit = false
# cover_rate = 0.8
# true_list = "正确,对,T,True,true"
# false_list = "错误,错,F,False,false"
"#;

/// Execute the config command.
pub async fn execute(args: ConfigArgs, path: Option<PathBuf>) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show => {
            let config = super::load_config(path.as_deref())?;
            let toml = config.to_toml()?;
            println!("{}", toml);
        }

        ConfigCommand::Path => {
            println!("{}", super::config_path(path.as_deref()).display());
        }

        ConfigCommand::Init { force } => {
            let path = super::config_path(path.as_deref());

            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at: {}\nUse --force to overwrite.",
                    path.display()
                );
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            std::fs::write(&path, starter_config()?)?;

            tracing::info!("Config file created at: {}", path.display());
            println!("Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn starter_config() -> anyhow::Result<String> {
    // The empty [tiku] table moves to the end, next to its examples.
    let mut toml: String = Config::default()
        .to_toml()?
        .lines()
        .filter(|line| line.trim() != "[tiku]")
        .map(|line| format!("{line}\n"))
        .collect();
    toml.push_str("\n[tiku]");
    toml.push_str(PROVIDER_TEMPLATE);
    Ok(toml)
}
