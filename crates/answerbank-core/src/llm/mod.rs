//! LLM-backed answer providers.
//!
//! Both answerers speak the Chat Completions format through a shared
//! [`ChatClient`], which owns request pacing, the in-flight cap, retries and
//! lenient answer extraction.

pub mod chat;
pub mod extract;
pub mod openai;
pub mod prompt;
pub mod rate_limit;
pub mod retry;
pub mod siliconflow;

pub use chat::{ChatClient, ChatSettings};
pub use extract::extract_answers;
pub use openai::OpenAiAnswerer;
pub use prompt::{ChatMessage, PromptStyle};
pub use rate_limit::RequestPacer;
pub use siliconflow::SiliconFlowAnswerer;
