//! Self-hosted tikuAdapter service at a fixed URL.

use super::{http_client, seconds, AnswerProvider};
use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderError, ProviderResult};
use crate::types::{join_answers, QuestionInfo, QuestionType};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

const NAME: &str = "TikuAdapter";

static LABEL_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]\.?、?\s?").expect("static regex"));

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    question: &'a str,
    options: Vec<String>,
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<SearchAnswer>,
}

#[derive(Debug, Deserialize)]
struct SearchAnswer {
    #[serde(rename = "bestAnswer", default)]
    best_answer: Vec<String>,
}

/// Numeric type code expected by the service.
fn type_code(kind: QuestionType) -> u8 {
    match kind {
        QuestionType::Single => 0,
        QuestionType::Multiple => 1,
        QuestionType::Completion => 2,
        QuestionType::Judgement => 3,
        _ => 4,
    }
}

fn request_body(question: &QuestionInfo) -> SearchRequest<'_> {
    SearchRequest {
        question: &question.title,
        options: question
            .option_lines()
            .iter()
            .map(|o| LABEL_PREFIX.replace(o, "").into_owned())
            .collect(),
        kind: type_code(question.kind),
    }
}

/// Fixed-endpoint question bank.
#[derive(Debug)]
pub struct AdapterProvider {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl AdapterProvider {
    pub fn from_config(conf: &ProviderConfig) -> Result<Self, ConfigError> {
        let url = conf.require(NAME, "url")?;
        let timeout = seconds(conf, "timeout", 30.0)?;
        Ok(Self {
            client: http_client(
                NAME,
                timeout,
                None,
                conf.get_bool("disable_ssl_verify", false),
            )?,
            url,
            timeout,
        })
    }
}

#[async_trait]
impl AnswerProvider for AdapterProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn query(&self, question: &QuestionInfo) -> ProviderResult<Option<String>> {
        let body = request_body(question);
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(NAME, e, self.timeout.as_millis() as u64))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Http {
                provider: NAME.to_string(),
                message: format!("HTTP {status}"),
                status_code: Some(status.as_u16()),
            });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::response(NAME, e.to_string()))?;
        let parsed: SearchResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::response(NAME, e.to_string()))?;

        let best = parsed.answer.map(|a| a.best_answer).unwrap_or_default();
        match join_answers(&best) {
            Some(answer) => Ok(Some(answer)),
            None => {
                tracing::error!("{NAME} returned no answer: {text}");
                Ok(None)
            }
        }
    }
}
