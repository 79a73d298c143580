//! Answerbank Core - answer-resolution engine for online-course questions.
//!
//! Given a question (title, type, options), the engine normalizes the title,
//! transcribes embedded formula images, consults a persistent answer cache
//! and on a miss asks one configured provider: a remote question bank or an
//! LLM. Validated answers are written back to the cache.
//!
//! # Architecture
//!
//! ```text
//! QuestionInfo → Normalize → OCR images → Cache ─hit→ answer
//!                                           └miss→ Provider → Validate → Cache → answer
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use answerbank_core::{AnswerEngine, Config, QuestionInfo, QuestionType};
//!
//! #[tokio::main]
//! async fn main() -> answerbank_core::Result<()> {
//!     let config = Config::load()?;
//!     let engine = AnswerEngine::from_config(&config)?;
//!
//!     let mut question = QuestionInfo::new("计算机的核心部件是", QuestionType::Single)
//!         .with_options(["A. CPU", "B. 内存"]);
//!     if let Some(answer) = engine.query(&mut question).await {
//!         println!("{answer}");
//!     }
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod ocr;
pub mod provider;
pub mod types;

// Re-exports for convenient access
pub use cache::AnswerCache;
pub use config::{Config, ProviderConfig};
pub use engine::{AnswerEngine, EngineSettings, EngineState, JudgementSets};
pub use error::{AnswerError, ConfigError, OcrError, ProviderError, ProviderResult, Result};
pub use ocr::{OcrChain, SessionContext};
pub use provider::{AnswerProvider, ProviderKind};
pub use types::{QuestionInfo, QuestionType};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
