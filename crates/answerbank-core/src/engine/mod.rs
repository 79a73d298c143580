//! Provider registry and the per-question answering pipeline.
//!
//! ```text
//! QuestionInfo → normalize title → substitute images (OCR) → cache
//!              → provider.query → compatibility check → cache write
//! ```
//!
//! [`AnswerEngine::query`] never fails: every provider, OCR and cache error
//! is logged and reported as "no answer".

mod judgement;
mod normalize;

pub use judgement::{is_compatible, JudgementSets};
pub use normalize::{has_image, normalize_title, substitute_images, IMAGE_PLACEHOLDER};

use crate::cache::AnswerCache;
use crate::config::{Config, ProviderConfig};
use crate::error::{ConfigError, ProviderError};
use crate::ocr::{OcrChain, SessionContext};
use crate::provider::{AnswerProvider, ProviderKind};
use crate::types::QuestionInfo;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::OnceCell;

const DEFAULT_COVER_RATE: f64 = 0.8;

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No configuration applied yet
    #[default]
    Uninitialized,
    /// Provider built, setup not yet run
    ConfigLoaded,
    /// Provider setup succeeded
    Initialized,
    /// Answering is off; `query` returns `None` without network calls
    Disabled,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::ConfigLoaded => "config-loaded",
            EngineState::Initialized => "initialized",
            EngineState::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Shared keys consumed by the engine and the calling orchestration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Submit answers (true) or only save them (false)
    pub submit: bool,
    /// Minimum answered fraction before the caller submits
    pub cover_rate: f64,
    /// Literal sets for judgement questions
    pub judgement: JudgementSets,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            submit: false,
            cover_rate: DEFAULT_COVER_RATE,
            judgement: JudgementSets::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(conf: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            submit: conf.get_bool("submit", false),
            cover_rate: conf.get_parsed("cover_rate", DEFAULT_COVER_RATE)?,
            judgement: JudgementSets::from_config(conf),
        })
    }
}

/// Resolves questions through the cache and the configured provider.
///
/// `Send + Sync`; share one instance across tasks with `Arc`.
pub struct AnswerEngine {
    provider: Option<Box<dyn AnswerProvider>>,
    cache: Option<Arc<AnswerCache>>,
    ocr: OcrChain,
    settings: EngineSettings,
    state: RwLock<EngineState>,
    setup: OnceCell<()>,
}

impl fmt::Debug for AnswerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerEngine")
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("cache", &self.cache.as_deref().map(AnswerCache::path))
            .field("state", &self.state())
            .finish()
    }
}

impl AnswerEngine {
    /// Build the engine described by `config`.
    ///
    /// An unknown `provider` name is an error. A missing `provider`, or an
    /// adapter that cannot be built from its keys, yields a disabled engine.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let settings = EngineSettings::from_config(&config.tiku)?;
        let ocr = OcrChain::from_config(&config.ocr);

        let Some(name) = config.tiku.get("provider") else {
            tracing::info!("No provider configured, answering is disabled");
            return Ok(Self::disabled(ocr, settings));
        };
        let kind: ProviderKind = name.parse()?;

        match kind.build(&config.tiku) {
            Ok(provider) => {
                tracing::info!("Using provider {kind}");
                let cache = AnswerCache::open(config.cache_path());
                Ok(Self::with_provider(provider, cache)
                    .with_ocr(ocr)
                    .with_settings(settings))
            }
            Err(e) => {
                tracing::error!("Failed to set up provider {kind}, answering is disabled: {e}");
                Ok(Self::disabled(ocr, settings))
            }
        }
    }

    /// Engine around an already-built provider, with OCR off and default settings.
    pub fn with_provider(provider: Box<dyn AnswerProvider>, cache: AnswerCache) -> Self {
        Self {
            provider: Some(provider),
            cache: Some(Arc::new(cache)),
            ocr: OcrChain::from_config(&Default::default()),
            settings: EngineSettings::default(),
            state: RwLock::new(EngineState::ConfigLoaded),
            setup: OnceCell::new(),
        }
    }

    fn disabled(ocr: OcrChain, settings: EngineSettings) -> Self {
        Self {
            provider: None,
            cache: None,
            ocr,
            settings,
            state: RwLock::new(EngineState::Disabled),
            setup: OnceCell::new(),
        }
    }

    pub fn with_ocr(mut self, ocr: OcrChain) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn state(&self) -> EngineState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn disable(&self, reason: &str) {
        tracing::error!("Answering disabled: {reason}");
        self.set_state(EngineState::Disabled);
    }

    /// Name of the active provider, if any.
    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.name())
    }

    pub fn cache(&self) -> Option<&AnswerCache> {
        self.cache.as_deref()
    }

    /// Run provider setup once. Later calls are no-ops.
    ///
    /// `query` calls this itself; calling it up front moves setup cost
    /// (balance checks and the like) out of the first question.
    pub async fn initialize(&self) {
        let Some(provider) = self.provider.as_deref() else {
            return;
        };
        self.setup
            .get_or_init(|| async {
                if self.state() != EngineState::ConfigLoaded {
                    return;
                }
                match provider.initialize().await {
                    Ok(()) => {
                        tracing::debug!("Provider {} initialized", provider.name());
                        self.set_state(EngineState::Initialized);
                    }
                    Err(e) => self.disable(&format!("{} setup failed: {e}", provider.name())),
                }
            })
            .await;
    }

    /// Resolve one question, rewriting its title in place.
    pub async fn query(&self, question: &mut QuestionInfo) -> Option<String> {
        if self.state() == EngineState::Disabled {
            return None;
        }
        self.initialize().await;
        if self.state() == EngineState::Disabled {
            return None;
        }
        let (provider, cache) = (self.provider.as_deref()?, self.cache.as_ref()?);

        tracing::debug!("Original title: {}", question.title);
        let title = normalize_title(&question.title);
        question.title = substitute_images(&title, &self.ocr).await;
        tracing::debug!("Normalized title: {}", question.title);

        if let Some(answer) = cache.get_async(&question.title).await {
            let answer = answer.trim().to_string();
            if !answer.is_empty() {
                tracing::info!("Cache hit: {} -> {answer}", question.title);
                return Some(answer);
            }
        }

        let answer = match provider.query(question).await {
            Ok(answer) => answer.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
            Err(ProviderError::QuotaExhausted { provider, message }) => {
                self.disable(&format!("{provider} quota exhausted: {message}"));
                None
            }
            Err(e) => {
                tracing::warn!(provider = provider.name(), "{e}");
                None
            }
        };

        let Some(answer) = answer else {
            tracing::error!("{} returned no answer for: {}", provider.name(), question.title);
            return None;
        };
        tracing::info!("{}: {} -> {answer}", provider.name(), question.title);

        if !provider.is_freeform()
            && !is_compatible(&answer, question.kind, &self.settings.judgement)
        {
            tracing::info!(
                "Answer from {} does not fit a {} question, discarded",
                provider.name(),
                question.kind
            );
            return None;
        }
        cache.put_async(&question.title, &answer).await;
        Some(answer)
    }

    /// Map a judgement answer to true/false. Always `false` when disabled.
    pub fn resolve_judgement(&self, answer: &str) -> bool {
        if self.state() == EngineState::Disabled {
            return false;
        }
        self.settings.judgement.resolve(answer)
    }

    pub fn submit_enabled(&self) -> bool {
        self.settings.submit
    }

    /// Submission flag for the platform's answer API: `""` submits, `"1"` saves only.
    pub fn submit_flag(&self) -> &'static str {
        if self.settings.submit {
            ""
        } else {
            "1"
        }
    }

    pub fn cover_rate(&self) -> f64 {
        self.settings.cover_rate
    }

    /// Update the cookies used for question-image downloads.
    pub fn set_session(&self, session: SessionContext) {
        self.ocr.set_session(session);
    }
}
