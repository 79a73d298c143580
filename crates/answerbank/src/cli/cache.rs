//! The `answerbank cache` command for direct cache access.

use answerbank_core::engine::normalize_title;
use answerbank_core::{AnswerCache, Config};
use clap::{Args, Subcommand};

/// Arguments for the `cache` command.
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

/// Subcommands for cache access.
#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print the cached answer for a title
    Get {
        /// Question title (index and score annotations are stripped)
        title: String,
    },

    /// Store an answer for a title
    Put {
        /// Question title (index and score annotations are stripped)
        title: String,

        /// Answer text; separate multiple answers with newlines
        answer: String,
    },

    /// Show the cache file path
    Path,
}

/// Execute the cache command.
pub async fn execute(args: CacheArgs, config: &Config) -> anyhow::Result<()> {
    let path = config.cache_path();
    match args.command {
        CacheCommand::Path => println!("{}", path.display()),

        CacheCommand::Get { title } => {
            let cache = AnswerCache::open(&path);
            let key = normalize_title(&title);
            match cache.get(&key) {
                Some(answer) => println!("{answer}"),
                None => anyhow::bail!("No cached answer for: {key}"),
            }
        }

        CacheCommand::Put { title, answer } => {
            let answer = answer.trim();
            if answer.is_empty() {
                anyhow::bail!("Refusing to cache an empty answer");
            }
            let cache = AnswerCache::open(&path);
            let key = normalize_title(&title);
            cache.put(&key, answer);
            tracing::info!("Cached answer for: {key}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get_uses_normalized_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.cache_path = dir.path().join("cache.json");

        let put = CacheArgs {
            command: CacheCommand::Put {
                title: "7中国的首都是（2.0分）".into(),
                answer: " 北京 ".into(),
            },
        };
        execute(put, &config).await.unwrap();

        let cache = AnswerCache::open(config.cache_path());
        assert_eq!(cache.get("中国的首都是").as_deref(), Some("北京"));

        let missing = CacheArgs {
            command: CacheCommand::Get {
                title: "不存在".into(),
            },
        };
        assert!(execute(missing, &config).await.is_err());
    }
}
