//! Yanxi question bank (`tk.enncy.cn`) with ordered token rotation.

use super::{http_client, seconds, AnswerProvider};
use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderError, ProviderResult};
use crate::types::{token_suffix, QuestionInfo};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

const NAME: &str = "Yanxi";
const DEFAULT_ENDPOINT: &str = "https://tk.enncy.cn/query";
const QUOTA_PHRASE: &str = "次数不足";

#[derive(Debug, Deserialize)]
struct YanxiResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<YanxiData>,
}

#[derive(Debug, Default, Deserialize)]
struct YanxiData {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    times: Option<i64>,
}

/// What a single response means for the rotation loop.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Answer { answer: String, times: Option<i64> },
    QuotaExhausted,
    Failed(String),
}

fn interpret(resp: YanxiResponse, known_times: i64) -> Outcome {
    let data = resp.data.unwrap_or_default();
    if resp.code != 0 {
        return Outcome::Answer {
            answer: data.answer.unwrap_or_default().trim().to_string(),
            times: data.times,
        };
    }
    let answer = data.answer.unwrap_or_default();
    if known_times == 0 || data.times == Some(0) || answer.contains(QUOTA_PHRASE) {
        return Outcome::QuotaExhausted;
    }
    Outcome::Failed(format!(
        "remaining={}, message={}",
        data.times.unwrap_or(known_times),
        resp.message.unwrap_or_default()
    ))
}

/// Token-rotating question bank.
///
/// Tokens are used in configured order; a quota signal advances to the next
/// token and re-issues the query. Running off the end is reported as
/// [`ProviderError::QuotaExhausted`].
#[derive(Debug)]
pub struct YanxiProvider {
    client: reqwest::Client,
    endpoint: String,
    tokens: Vec<String>,
    index: AtomicUsize,
    /// Remaining query count reported by the service; 100 until first known.
    times: AtomicI64,
    timeout: Duration,
}

impl YanxiProvider {
    pub fn from_config(conf: &ProviderConfig) -> Result<Self, ConfigError> {
        let tokens: Vec<String> = conf
            .get_list("tokens")
            .iter()
            .filter_map(|t| crate::config::resolve_env_var(t))
            .collect();
        if tokens.is_empty() {
            return Err(ConfigError::MissingKey {
                provider: "TikuYanxi".into(),
                key: "tokens".into(),
            });
        }
        let timeout = seconds(conf, "timeout", 30.0)?;
        Ok(Self {
            client: http_client(
                NAME,
                timeout,
                None,
                conf.get_bool("disable_ssl_verify", false),
            )?,
            endpoint: conf.get("yanxi_endpoint").unwrap_or(DEFAULT_ENDPOINT).to_string(),
            tokens,
            index: AtomicUsize::new(0),
            times: AtomicI64::new(100),
            timeout,
        })
    }

    fn current_token(&self) -> ProviderResult<(usize, &str)> {
        let index = self.index.load(Ordering::SeqCst);
        self.tokens
            .get(index)
            .map(|t| (index, t.as_str()))
            .ok_or_else(|| ProviderError::QuotaExhausted {
                provider: NAME.to_string(),
                message: "all tokens used up, replace them and restart".into(),
            })
    }

    /// Move past the token at `index` unless another caller already did.
    fn advance_from(&self, index: usize) {
        let _ = self
            .index
            .compare_exchange(index, index + 1, Ordering::SeqCst, Ordering::SeqCst);
        self.times.store(100, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnswerProvider for YanxiProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn query(&self, question: &QuestionInfo) -> ProviderResult<Option<String>> {
        loop {
            let (index, token) = self.current_token()?;

            let resp = self
                .client
                .get(&self.endpoint)
                .query(&[("question", question.title.as_str()), ("token", token)])
                .send()
                .await
                .map_err(|e| {
                    ProviderError::from_reqwest(NAME, e, self.timeout.as_millis() as u64)
                })?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                tracing::error!("{NAME} query failed: HTTP {status}: {body}");
                return Ok(None);
            }

            let parsed: YanxiResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::response(NAME, e.to_string()))?;

            match interpret(parsed, self.times.load(Ordering::SeqCst)) {
                Outcome::Answer { answer, times } => {
                    if let Some(times) = times {
                        self.times.store(times, Ordering::SeqCst);
                    }
                    return Ok(Some(answer).filter(|a| !a.is_empty()));
                }
                Outcome::QuotaExhausted => {
                    tracing::info!(
                        token = %token_suffix(token),
                        "{NAME} token quota exhausted, rotating to next token"
                    );
                    self.advance_from(index);
                }
                Outcome::Failed(detail) => {
                    tracing::error!("{NAME} query failed: {detail}");
                    return Ok(None);
                }
            }
        }
    }
}
