//! LIKE knowledge base (`app.datam.site`) with a balance-tracked token pool.

use super::{http_client, seconds, AnswerProvider, TokenPool};
use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderError, ProviderResult};
use crate::types::{token_suffix, QuestionInfo, QuestionType};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

const NAME: &str = "LIKE";
const DEFAULT_BASE: &str = "https://app.datam.site/api/v1";
const REFRESH_EVERY: u32 = 10;

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    model: &'a str,
    search: bool,
    vision: bool,
}

/// Token-pool question bank.
#[derive(Debug)]
pub struct LikeProvider {
    client: reqwest::Client,
    query_url: String,
    balance_url: String,
    model: String,
    search: bool,
    vision: bool,
    retry: bool,
    retry_times: u32,
    timeout: Duration,
    pool: TokenPool,
}

impl LikeProvider {
    pub fn from_config(conf: &ProviderConfig) -> Result<Self, ConfigError> {
        let tokens: Vec<String> = conf
            .get_list("tokens")
            .iter()
            .filter_map(|t| crate::config::resolve_env_var(t))
            .collect();
        if tokens.is_empty() {
            return Err(ConfigError::MissingKey {
                provider: "TikuLike".into(),
                key: "tokens".into(),
            });
        }
        let base = conf
            .get("likeapi_endpoint")
            .unwrap_or(DEFAULT_BASE)
            .trim_end_matches('/')
            .to_string();
        let timeout = seconds(conf, "timeout", 300.0)?;

        Ok(Self {
            client: http_client(
                NAME,
                timeout,
                None,
                conf.get_bool("disable_ssl_verify", false),
            )?,
            query_url: format!("{base}/query"),
            balance_url: format!("{base}/balance"),
            model: conf.get("likeapi_model").unwrap_or_default().to_string(),
            search: conf.get_bool("likeapi_search", false),
            vision: conf.get_bool("likeapi_vision", true),
            retry: conf.get_bool("likeapi_retry", true),
            retry_times: conf.get_parsed("likeapi_retry_times", 3u32)?.max(1),
            timeout,
            pool: TokenPool::new(tokens, REFRESH_EVERY),
        })
    }

    pub fn pool(&self) -> &TokenPool {
        &self.pool
    }

    /// Re-read every token's balance. Failures count as a zero balance.
    pub async fn refresh_balances(&self) {
        for token in self.pool.tokens() {
            let balance = match self.fetch_balance(token).await {
                Ok(balance) => balance,
                Err(e) => {
                    tracing::error!(token = %token_suffix(token), "{NAME} balance check failed: {e}");
                    0
                }
            };
            self.pool.set_balance(token, balance);
            tracing::info!(
                token = %token_suffix(token),
                "{NAME} token balance: {balance} (indicative)"
            );
        }
    }

    async fn fetch_balance(&self, token: &str) -> ProviderResult<i64> {
        let resp = self
            .client
            .post(&self.balance_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| self.transport_err(e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Http {
                provider: NAME.to_string(),
                message: format!("balance endpoint returned HTTP {status}"),
                status_code: Some(status.as_u16()),
            });
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::response(NAME, e.to_string()))?;
        parse_balance(&body).map_err(|m| ProviderError::response(NAME, m))
    }

    /// One query with one token. Errors are logged here; `None` is a miss.
    async fn query_once(&self, token: &str, query: &str) -> Option<String> {
        let body = QueryRequest {
            query,
            model: &self.model,
            search: self.search,
            vision: self.vision,
        };
        let resp = match self
            .client
            .post(&self.query_url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!("{}", self.transport_err(e));
                return None;
            }
        };

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            tracing::error!("{NAME} query failed: {}", status_message(status, &text));
            return None;
        }

        let body: Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("{NAME} response is not valid JSON: {e}");
                return None;
            }
        };
        match parse_answer(&body) {
            Ok(answer) => Some(answer),
            Err(reason) => {
                tracing::error!("{NAME} {reason}");
                None
            }
        }
    }

    fn transport_err(&self, e: reqwest::Error) -> ProviderError {
        ProviderError::from_reqwest(NAME, e, self.timeout.as_millis() as u64)
    }
}

#[async_trait]
impl AnswerProvider for LikeProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> ProviderResult<()> {
        self.refresh_balances().await;
        Ok(())
    }

    async fn query(&self, question: &QuestionInfo) -> ProviderResult<Option<String>> {
        let query = build_query(question);
        let attempts = if self.retry { self.retry_times } else { 1 };

        let mut answer = None;
        for attempt in 1..=attempts {
            let Some(token) = self.pool.pick() else {
                tracing::error!("{NAME} every token has run out of queries");
                return Ok(None);
            };
            if let Some(found) = self.query_once(&token, &query).await {
                let remaining = self.pool.consume(&token);
                tracing::info!(token = %token_suffix(&token), "{NAME} query succeeded, {remaining} left");
                answer = Some(found);
                break;
            }
            if attempt < attempts {
                tracing::warn!(
                    token = %token_suffix(&token),
                    "{NAME} query failed, retrying ({}/{attempts})",
                    attempt + 1
                );
            }
        }

        if self.pool.tick() {
            self.refresh_balances().await;
        }
        Ok(answer)
    }
}

/// Query text: type label, title, and the options for choice questions.
fn build_query(question: &QuestionInfo) -> String {
    let label = match question.kind {
        QuestionType::Single => "【单选题】",
        QuestionType::Multiple => "【多选题】",
        QuestionType::Completion => "【填空题】",
        QuestionType::Judgement => "【判断题】",
        _ => "【其他类型题目】",
    };
    let mut query = format!("{label}{}\n", question.title);
    if question.kind.is_choice() {
        query.push_str(&format!("选项为: {}\n", question.options.join(", ")));
    }
    query
}

fn status_message(status: u16, body: &str) -> String {
    match status {
        400 => "bad request, check the query format".to_string(),
        401 => "authentication failed, the token is wrong or expired".to_string(),
        403 => "access denied, the token lacks permission".to_string(),
        429 => "rate limited by the API".to_string(),
        500 => "internal server error, the service is unavailable".to_string(),
        other => format!("HTTP {other}: {body}"),
    }
}

fn parse_balance(body: &Value) -> Result<i64, String> {
    if body.get("code").and_then(Value::as_i64) != Some(1) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(message.to_string());
    }
    match body.get("balance") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| format!("balance out of range: {n}")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| format!("balance is not a number: {s}")),
        _ => Ok(0),
    }
}

/// Extract the answer from `results.output`, branching on `questionType`.
fn parse_answer(body: &Value) -> Result<String, String> {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        if !message.is_empty() {
            tracing::info!("{NAME} response message: {message}");
        }
    }
    let code = body.get("code").and_then(Value::as_i64).unwrap_or(1);
    if code != 1 {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(format!("API returned an error: {message}"));
    }

    let output = body
        .get("results")
        .and_then(Value::as_object)
        .ok_or("response has no results object")?
        .get("output")
        .and_then(Value::as_object)
        .ok_or("results.output is missing or not an object")?;
    let q_type = output
        .get("questionType")
        .and_then(Value::as_str)
        .ok_or("results.output.questionType is missing")?;
    let answer = output
        .get("answer")
        .ok_or("results.output.answer is missing")?
        .as_object()
        .ok_or("results.output.answer is not an object")?;

    match q_type {
        "CHOICE" => join_field(answer.get("selectedOptions"))
            .ok_or_else(|| "CHOICE answer has no usable selectedOptions".to_string()),
        "FILL_IN_BLANK" => join_field(answer.get("blanks"))
            .ok_or_else(|| "FILL_IN_BLANK answer has no usable blanks".to_string()),
        "JUDGMENT" => match answer.get("isCorrect") {
            Some(Value::Null) | None => Err("JUDGMENT answer has no isCorrect".to_string()),
            Some(value) => Ok(if truthy(value) { "正确" } else { "错误" }.to_string()),
        },
        other => match answer.get("otherText") {
            Some(Value::String(text)) => Ok(text.clone()),
            Some(Value::Null) | None => {
                Err(format!("unknown question type {other} without otherText"))
            }
            Some(value) => Ok(value.to_string()),
        },
    }
}

/// Newline-join a list field, skipping nulls and blank entries.
fn join_field(value: Option<&Value>) -> Option<String> {
    let items = value?.as_array()?;
    let parts: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .filter(|s| !s.trim().is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => crate::config::parse_bool(s),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn provider(tokens: &str) -> LikeProvider {
        LikeProvider::from_config(&ProviderConfig::from_pairs([
            ("tokens", tokens),
            // Unroutable so that an accidental request fails fast.
            ("likeapi_endpoint", "http://127.0.0.1:9/api/v1/"),
        ]))
        .unwrap()
    }

    #[test]
    fn test_build_query_for_choice() {
        let q = QuestionInfo::new("下列属于输入设备的是", QuestionType::Multiple)
            .with_options(["A. 键盘", "B. 显示器"]);
        assert_eq!(
            build_query(&q),
            "【多选题】下列属于输入设备的是\n选项为: A. 键盘, B. 显示器\n"
        );
    }

    #[test]
    fn test_build_query_for_other_types() {
        let q = QuestionInfo::new("简述冯诺依曼结构", QuestionType::ShortAnswer)
            .with_options(["ignored"]);
        assert_eq!(build_query(&q), "【其他类型题目】简述冯诺依曼结构\n");
    }

    #[test]
    fn test_parse_choice_and_blanks() {
        let body = json!({"code": 1, "results": {"output": {
            "questionType": "CHOICE",
            "answer": {"selectedOptions": ["A", null, " ", "C"]}
        }}});
        assert_eq!(parse_answer(&body).unwrap(), "A\nC");

        let body = json!({"code": 1, "results": {"output": {
            "questionType": "FILL_IN_BLANK",
            "answer": {"blanks": ["冯·诺依曼", "存储程序"]}
        }}});
        assert_eq!(parse_answer(&body).unwrap(), "冯·诺依曼\n存储程序");
    }

    #[test]
    fn test_parse_judgement_and_other() {
        let body = json!({"code": 1, "results": {"output": {
            "questionType": "JUDGMENT", "answer": {"isCorrect": false}
        }}});
        assert_eq!(parse_answer(&body).unwrap(), "错误");

        let body = json!({"code": 1, "results": {"output": {
            "questionType": "ESSAY", "answer": {"otherText": "略"}
        }}});
        assert_eq!(parse_answer(&body).unwrap(), "略");
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        assert!(parse_answer(&json!({"code": 0, "message": "token invalid"})).is_err());
        assert!(parse_answer(&json!({"code": 1, "results": []})).is_err());
        assert!(parse_answer(&json!({"code": 1, "results": {"output": {"answer": {}}}})).is_err());
        assert!(parse_answer(&json!({"code": 1, "results": {"output": {
            "questionType": "CHOICE", "answer": {"selectedOptions": []}
        }}}))
        .is_err());
        assert!(parse_answer(&json!({"code": 1, "results": {"output": {
            "questionType": "JUDGMENT", "answer": "yes"
        }}}))
        .is_err());
    }

    #[test]
    fn test_parse_balance() {
        assert_eq!(parse_balance(&json!({"code": 1, "balance": 57})).unwrap(), 57);
        assert_eq!(parse_balance(&json!({"code": 1, "balance": "12"})).unwrap(), 12);
        assert!(parse_balance(&json!({"code": 0, "message": "invalid token"})).is_err());
    }

    #[test]
    fn test_endpoints_derive_from_base() {
        let p = provider("abc");
        assert_eq!(p.query_url, "http://127.0.0.1:9/api/v1/query");
        assert_eq!(p.balance_url, "http://127.0.0.1:9/api/v1/balance");
        assert_eq!(p.retry_times, 3);
        assert!(p.vision);
        assert!(!p.search);
    }

    #[tokio::test]
    async fn test_all_tokens_empty_returns_none_without_request() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicU32::new(0));
        let counter = connections.clone();
        let server = tokio::spawn(async move {
            while let Ok((_socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let endpoint = format!("http://127.0.0.1:{port}/api/v1");
        let p = LikeProvider::from_config(&ProviderConfig::from_pairs([
            ("tokens", "tok-11111,tok-22222"),
            ("likeapi_endpoint", endpoint.as_str()),
        ]))
        .unwrap();
        p.pool().set_balance("tok-11111", 0);
        p.pool().set_balance("tok-22222", 0);

        // Enough calls to cross the periodic balance refresh.
        let q = QuestionInfo::new("1+1=?", QuestionType::Single);
        for _ in 0..(REFRESH_EVERY * 2 + 1) {
            assert_eq!(p.query(&q).await.unwrap(), None);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connections.load(Ordering::SeqCst), 0);
        assert_eq!(p.pool().balance("tok-11111"), 0);
        server.abort();
    }
}
