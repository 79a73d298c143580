//! SiliconFlow answerer (OpenAI-compatible API).
//!
//! SiliconFlow uses the same Chat Completions format as OpenAI, so this
//! delegates to the shared chat client with its own endpoint, model
//! defaults and sampling parameters.

use super::chat::{ChatClient, ChatSettings};
use super::prompt::PromptStyle;
use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderResult};
use crate::provider::AnswerProvider;
use crate::types::QuestionInfo;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const NAME: &str = "SiliconFlow";
const DEFAULT_ENDPOINT: &str = "https://api.siliconflow.cn/v1/chat/completions";
const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-V3";

fn sampling_parameters() -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert("stream".into(), json!(false));
    extra.insert("max_tokens".into(), json!(4096));
    extra.insert("temperature".into(), json!(0.7));
    extra.insert("top_p".into(), json!(0.7));
    extra.insert("response_format".into(), json!({"type": "text"}));
    extra
}

/// SiliconFlow provider wrapping the shared chat client.
#[derive(Debug)]
pub struct SiliconFlowAnswerer {
    chat: ChatClient,
}

impl SiliconFlowAnswerer {
    /// Requires `siliconflow_key`.
    pub fn from_config(conf: &ProviderConfig) -> Result<Self, ConfigError> {
        let api_key = conf.require(NAME, "siliconflow_key")?;
        let endpoint = conf
            .get("siliconflow_endpoint")
            .unwrap_or(DEFAULT_ENDPOINT)
            .to_string();
        let model = conf
            .get("siliconflow_model")
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        let settings = ChatSettings::from_config(conf, endpoint, api_key, model)?;
        Ok(Self {
            chat: ChatClient::new(NAME, settings, PromptStyle::Compact)?
                .with_extra(sampling_parameters()),
        })
    }

    pub fn settings(&self) -> &ChatSettings {
        self.chat.settings()
    }
}

#[async_trait]
impl AnswerProvider for SiliconFlowAnswerer {
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
