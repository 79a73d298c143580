//! Shared chat-completion client for LLM answerers.
//!
//! Every request passes two gates: a semaphore capping in-flight requests
//! for this client, and a pacer enforcing the minimum interval between
//! request starts. Failed attempts are retried with a rate-limit cooldown or
//! a linear backoff; exhausting the attempts is a logged miss.

use super::extract::extract_answers;
use super::prompt::{build_messages, ChatMessage, PromptStyle};
use super::rate_limit::RequestPacer;
use super::retry;
use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderError, ProviderResult};
use crate::provider::{http_client, seconds};
use crate::types::{join_answers, QuestionInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;

const DEFAULT_CONCURRENCY: usize = 3;

/// Connection and pacing settings for one chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Floor between consecutive request starts
    pub min_interval: Duration,
    /// Per-request timeout
    pub timeout: Duration,
    /// Total attempts per question (at least 1)
    pub max_retries: u32,
    /// Base for the linear backoff
    pub retry_delay: Duration,
    /// Maximum requests in flight (at least 1)
    pub concurrency: usize,
    pub http_proxy: Option<String>,
    pub disable_ssl_verify: bool,
}

impl ChatSettings {
    /// Read the shared tunables from the provider mapping.
    pub fn from_config(
        conf: &ProviderConfig,
        endpoint: String,
        api_key: String,
        model: String,
    ) -> Result<Self, ConfigError> {
        let concurrency = match conf.get("ai_concurrency").map(str::parse::<i64>) {
            Some(Ok(n)) => n.max(1) as usize,
            Some(Err(_)) => {
                tracing::warn!("Invalid ai_concurrency, using {DEFAULT_CONCURRENCY}");
                DEFAULT_CONCURRENCY
            }
            None => DEFAULT_CONCURRENCY,
        };
        Ok(Self {
            endpoint,
            api_key,
            model,
            min_interval: seconds(conf, "min_interval_seconds", 3.0)?,
            timeout: seconds(conf, "timeout", 30.0)?,
            max_retries: conf.get_parsed("max_retries", 3u32)?.max(1),
            retry_delay: seconds(conf, "retry_delay", 2.0)?,
            concurrency,
            http_proxy: conf.get("http_proxy").map(String::from),
            disable_ssl_verify: conf.get_bool("disable_ssl_verify", false),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Paced, concurrency-limited chat-completion client.
#[derive(Debug)]
pub struct ChatClient {
    name: &'static str,
    settings: ChatSettings,
    style: PromptStyle,
    extra: Map<String, Value>,
    client: reqwest::Client,
    pacer: RequestPacer,
    permits: Semaphore,
}

impl ChatClient {
    pub fn new(
        name: &'static str,
        settings: ChatSettings,
        style: PromptStyle,
    ) -> Result<Self, ConfigError> {
        let client = http_client(
            name,
            settings.timeout,
            settings.http_proxy.as_deref(),
            settings.disable_ssl_verify,
        )?;
        tracing::debug!(
            "{name} client: model={}, concurrency={}, min_interval={:?}",
            settings.model,
            settings.concurrency,
            settings.min_interval
        );
        Ok(Self {
            name,
            pacer: RequestPacer::new(settings.min_interval),
            permits: Semaphore::new(settings.concurrency.max(1)),
            settings,
            style,
            extra: Map::new(),
            client,
        })
    }

    /// Extra top-level request fields (sampling parameters and the like).
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Ask the model and normalize its reply into one answer string.
    pub async fn answer(&self, question: &QuestionInfo) -> ProviderResult<Option<String>> {
        let messages = build_messages(question, self.style);
        Ok(with_retries(
            self.name,
            self.settings.max_retries,
            self.settings.retry_delay,
            self.settings.min_interval,
            || self.attempt(&messages),
        )
        .await)
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> ProviderResult<Option<String>> {
        let raw = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| ProviderError::response(self.name, "request semaphore closed"))?;
            self.pacer.wait().await;
            self.complete(messages).await?
        };

        let answers = extract_answers(&raw);
        if answers.is_empty() {
            tracing::warn!("{} returned an empty answer", self.name);
        }
        Ok(join_answers(answers))
    }

    /// One raw chat-completion round trip.
    async fn complete(&self, messages: &[ChatMessage]) -> ProviderResult<String> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages,
            extra: &self.extra,
        };

        let resp = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::from_reqwest(
                    self.name,
                    e,
                    self.settings.timeout.as_millis() as u64,
                )
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: self.name.to_string(),
                message: format!(
                    "HTTP {status}: {}",
                    text.chars().take(200).collect::<String>()
                ),
                status_code: Some(status.as_u16()),
            });
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::response(self.name, e.to_string()))?;
        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::response(self.name, "empty choices array"))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

/// Run `attempt` up to `max_retries` times.
///
/// Rate-limit failures sleep `max(2 × min_interval, 5s)`, others
/// `retry_delay × attempt`. The final failure is logged and yields `None`.
pub async fn with_retries<F, Fut>(
    name: &str,
    max_retries: u32,
    retry_delay: Duration,
    min_interval: Duration,
    mut attempt: F,
) -> Option<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<Option<String>>>,
{
    let max_retries = max_retries.max(1);
    let mut last_error = None;
    for n in 1..=max_retries {
        match attempt().await {
            Ok(answer) => return answer,
            Err(e) => {
                let pause = if retry::is_rate_limited(&e) {
                    let cooldown = retry::rate_limit_cooldown(min_interval);
                    tracing::warn!(
                        attempt = n,
                        "{name} request failed ({n}/{max_retries}), rate limited, cooling down {cooldown:?}: {e}"
                    );
                    cooldown
                } else {
                    tracing::warn!(attempt = n, "{name} request failed ({n}/{max_retries}): {e}");
                    retry::backoff_duration(n, retry_delay)
                };
                last_error = Some(e);
                if n < max_retries {
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
    if let Some(e) = last_error {
        tracing::error!("{name} failed after {max_retries} attempts, last error: {e}");
    }
    None
}
