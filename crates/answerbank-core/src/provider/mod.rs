//! Answer provider contract and the registry of concrete adapters.
//!
//! An [`AnswerProvider`] turns one question into an answer string (or
//! nothing). Remote question banks live in this module; LLM-backed
//! answerers live in [`crate::llm`]. [`ProviderKind`] is the closed set of
//! adapters selectable by the `provider` configuration key.

mod adapter;
mod like;
mod token_pool;
mod yanxi;

pub use adapter::AdapterProvider;
pub use like::LikeProvider;
pub use token_pool::TokenPool;
pub use yanxi::YanxiProvider;

use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderResult};
use crate::llm::{OpenAiAnswerer, SiliconFlowAnswerer};
use crate::types::QuestionInfo;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Trait that all answer providers implement.
///
/// Uses `async_trait` because native async fn in trait is not object-safe
/// (the engine holds a `Box<dyn AnswerProvider>`).
#[async_trait]
pub trait AnswerProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Free-form providers (LLMs) have their answers cached without the
    /// type-compatibility check.
    fn is_freeform(&self) -> bool {
        false
    }

    /// One-time setup run before the first query (e.g. balance refresh).
    ///
    /// An error disables the engine.
    async fn initialize(&self) -> ProviderResult<()> {
        Ok(())
    }

    /// Look up an answer. `Ok(None)` is a logged miss.
    async fn query(&self, question: &QuestionInfo) -> ProviderResult<Option<String>>;
}

/// Adapters selectable through the `provider` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Yanxi,
    Like,
    Adapter,
    OpenAi,
    SiliconFlow,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Yanxi,
        ProviderKind::Like,
        ProviderKind::Adapter,
        ProviderKind::OpenAi,
        ProviderKind::SiliconFlow,
    ];

    /// Canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Yanxi => "TikuYanxi",
            ProviderKind::Like => "TikuLike",
            ProviderKind::Adapter => "TikuAdapter",
            ProviderKind::OpenAi => "AI",
            ProviderKind::SiliconFlow => "SiliconFlow",
        }
    }

    /// Whether answers from this kind skip the type-compatibility check.
    pub fn is_freeform(&self) -> bool {
        matches!(self, ProviderKind::OpenAi | ProviderKind::SiliconFlow)
    }

    /// Construct the adapter, validating and defaulting the keys it reads.
    pub fn build(&self, conf: &ProviderConfig) -> Result<Box<dyn AnswerProvider>, ConfigError> {
        Ok(match self {
            ProviderKind::Yanxi => Box::new(YanxiProvider::from_config(conf)?),
            ProviderKind::Like => Box::new(LikeProvider::from_config(conf)?),
            ProviderKind::Adapter => Box::new(AdapterProvider::from_config(conf)?),
            ProviderKind::OpenAi => Box::new(OpenAiAnswerer::from_config(conf)?),
            ProviderKind::SiliconFlow => Box::new(SiliconFlowAnswerer::from_config(conf)?),
        })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tikuyanxi" | "yanxi" => Ok(ProviderKind::Yanxi),
            "tikulike" | "like" => Ok(ProviderKind::Like),
            "tikuadapter" | "adapter" => Ok(ProviderKind::Adapter),
            "ai" | "openai" => Ok(ProviderKind::OpenAi),
            "siliconflow" => Ok(ProviderKind::SiliconFlow),
            _ => Err(ConfigError::UnknownProvider(s.trim().to_string())),
        }
    }
}

/// Build the HTTP client an adapter uses for every request.
pub(crate) fn http_client(
    provider: &str,
    timeout: Duration,
    proxy: Option<&str>,
    accept_invalid_certs: bool,
) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(accept_invalid_certs);
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| ConfigError::InvalidValue {
            key: "http_proxy".to_string(),
            message: format!("{provider}: {e}"),
        })?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| {
        ConfigError::ValidationError(format!("{provider}: failed to build HTTP client: {e}"))
    })
}

/// Read a non-negative seconds value as a `Duration`.
pub(crate) fn seconds(
    conf: &ProviderConfig,
    key: &str,
    default: f64,
) -> Result<Duration, ConfigError> {
    let value: f64 = conf.get_parsed(key, default)?;
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{value}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_names_and_aliases() {
        assert_eq!("TikuYanxi".parse::<ProviderKind>().unwrap(), ProviderKind::Yanxi);
        assert_eq!("like".parse::<ProviderKind>().unwrap(), ProviderKind::Like);
        assert_eq!(" tikuadapter ".parse::<ProviderKind>().unwrap(), ProviderKind::Adapter);
        assert_eq!("AI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("SiliconFlow".parse::<ProviderKind>().unwrap(), ProviderKind::SiliconFlow);
    }

    #[test]
    fn test_unknown_provider_fails_fast() {
        let err = "Baidu".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(name) if name == "Baidu"));
    }

    #[test]
    fn test_canonical_names_roundtrip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_freeform_kinds() {
        assert!(ProviderKind::OpenAi.is_freeform());
        assert!(ProviderKind::SiliconFlow.is_freeform());
        assert!(!ProviderKind::Like.is_freeform());
    }

    #[test]
    fn test_build_reports_missing_keys() {
        let err = ProviderKind::Adapter.build(&ProviderConfig::new()).err().unwrap();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "url"));

        let err = ProviderKind::OpenAi
            .build(&ProviderConfig::from_pairs([("endpoint", "http://x"), ("key", "k")]))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "model"));
    }

    #[test]
    fn test_build_built_provider_reports_freeform() {
        let conf = ProviderConfig::from_pairs([("siliconflow_key", "sk-test")]);
        let provider = ProviderKind::SiliconFlow.build(&conf).unwrap();
        assert!(provider.is_freeform());

        let conf = ProviderConfig::from_pairs([("url", "http://127.0.0.1:8060/adapter-service/search")]);
        let provider = ProviderKind::Adapter.build(&conf).unwrap();
        assert!(!provider.is_freeform());
    }

    #[test]
    fn test_seconds_rejects_negative() {
        let conf = ProviderConfig::from_pairs([("timeout", "-1")]);
        assert!(seconds(&conf, "timeout", 30.0).is_err());
        assert_eq!(
            seconds(&ProviderConfig::new(), "timeout", 2.5).unwrap(),
            Duration::from_millis(2500)
        );
    }
}
