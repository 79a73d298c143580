//! General OpenAI-compatible answerer (`provider = "AI"`).

use super::chat::{ChatClient, ChatSettings};
use super::prompt::PromptStyle;
use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderResult};
use crate::provider::AnswerProvider;
use crate::types::QuestionInfo;
use async_trait::async_trait;

const NAME: &str = "AI";

/// Answers questions through any Chat Completions endpoint.
#[derive(Debug)]
pub struct OpenAiAnswerer {
    chat: ChatClient,
}

impl OpenAiAnswerer {
    /// Requires `endpoint`, `key` and `model`.
    pub fn from_config(conf: &ProviderConfig) -> Result<Self, ConfigError> {
        let endpoint = conf.require(NAME, "endpoint")?;
        let api_key = conf.require(NAME, "key")?;
        let model = conf.require(NAME, "model")?;
        let settings = ChatSettings::from_config(conf, endpoint, api_key, model)?;
        Ok(Self {
            chat: ChatClient::new(NAME, settings, PromptStyle::Strict)?,
        })
    }

    pub fn settings(&self) -> &ChatSettings {
        self.chat.settings()
    }
}

#[async_trait]
impl AnswerProvider for OpenAiAnswerer {
    fn name(&self) -> &str {
        self.chat.name()
    }

    fn is_freeform(&self) -> bool {
        true
    }

    async fn query(&self, question: &QuestionInfo) -> ProviderResult<Option<String>> {
        self.chat.answer(question).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reads_tunables() {
        let conf = ProviderConfig::from_pairs([
            ("endpoint", "https://api.example.com/v1/chat/completions"),
            ("key", "sk-test"),
            ("model", "gpt-4o-mini"),
            ("min_interval_seconds", "0.5"),
            ("max_retries", "5"),
            ("ai_concurrency", "8"),
            ("disable_ssl_verify", "yes"),
        ]);
        let answerer = OpenAiAnswerer::from_config(&conf).unwrap();
        let s = answerer.settings();
        assert_eq!(s.model, "gpt-4o-mini");
        assert_eq!(s.min_interval, Duration::from_millis(500));
        assert_eq!(s.max_retries, 5);
        assert_eq!(s.concurrency, 8);
        assert!(s.disable_ssl_verify);
        assert!(answerer.is_freeform());
    }

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let conf = ProviderConfig::from_pairs([
            ("endpoint", "https://api.example.com/v1/chat/completions"),
            ("key", "sk-test"),
            ("model", "m"),
            ("http_proxy", "::not a url::"),
        ]);
        assert!(OpenAiAnswerer::from_config(&conf).is_err());
    }
}
