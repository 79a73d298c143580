//! External vision-model OCR.
//!
//! Sends the question image to a vision-capable chat model with a strict
//! transcription instruction. Claude uses the Messages API; every other
//! provider speaks the OpenAI Chat Completions format.

use crate::config::{resolve_env_var, OcrConfig};
use crate::error::OcrError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Default transcription instruction.
pub const DEFAULT_OCR_PROMPT: &str = "你是一个 OCR 文字识别引擎，只做转写。\n\
规则：\n\
1. 只输出图片中的原文，不要解释、描述、翻译或补充，不要任何引导语。\n\
2. 数学公式使用 LaTeX：行内用 $...$，独立公式用 $$...$$，分数用 \\frac{}{}，根号用 \\sqrt{}，希腊字母用 \\alpha 等命令。\n\
3. 按从上到下、从左到右的顺序输出，多行内容用换行分隔。\n\
4. 如果图片空白或无法识别任何文字，只输出：[空]\n\
现在请识别图片内容：";

/// Replies meaning "nothing legible".
const EMPTY_SENTINELS: &[&str] = &["[空]", "[empty]", "无文字内容", "[空白]"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Supported vision providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionProvider {
    OpenAi,
    Claude,
    Qwen,
    SiliconFlow,
    OpenAiCompatible,
}

impl VisionProvider {
    /// Default chat endpoint; empty when the user must supply one.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            VisionProvider::OpenAi => "https://api.openai.com/v1/chat/completions",
            VisionProvider::Claude => "https://api.anthropic.com/v1/messages",
            VisionProvider::Qwen => {
                "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
            }
            VisionProvider::SiliconFlow => "https://api.siliconflow.cn/v1/chat/completions",
            VisionProvider::OpenAiCompatible => "",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            VisionProvider::OpenAi | VisionProvider::OpenAiCompatible => "gpt-4o",
            VisionProvider::Claude => "claude-3-5-sonnet-20241022",
            VisionProvider::Qwen => "qwen-vl-plus",
            VisionProvider::SiliconFlow => "Qwen/Qwen2-VL-72B-Instruct",
        }
    }
}

impl FromStr for VisionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(VisionProvider::OpenAi),
            "claude" | "anthropic" => Ok(VisionProvider::Claude),
            "qwen" => Ok(VisionProvider::Qwen),
            "siliconflow" => Ok(VisionProvider::SiliconFlow),
            "openai_compatible" => Ok(VisionProvider::OpenAiCompatible),
            other => Err(format!("unknown vision provider '{other}'")),
        }
    }
}

/// Base64-encoded image ready to send to a vision API.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// Base64-encoded image bytes
    pub data: String,
    /// MIME type (e.g., "image/jpeg", "image/png")
    pub media_type: String,
}

impl ImageInput {
    /// Encode raw bytes, sniffing the MIME type from magic bytes (PNG if unknown).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let media_type = image::guess_format(bytes)
            .map(|f| f.to_mime_type())
            .unwrap_or("image/png");
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type: media_type.to_string(),
        }
    }

    /// Return a data URL suitable for OpenAI-style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

// --- OpenAI-style request/response ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ChatContent<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ChatContent<'a> {
    #[serde(rename = "text")]
    Text { text: &'a str },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
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

// --- Anthropic Messages request/response ---

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ClaudeMessage<'a>>,
}

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentBlock<'a> {
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "text")]
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

/// Vision-model OCR client.
#[derive(Debug)]
pub struct VisionOcr {
    provider: VisionProvider,
    endpoint: String,
    api_key: String,
    model: String,
    prompt: String,
    client: reqwest::Client,
}

impl VisionOcr {
    /// Build from config; `None` when provider or key is missing or unusable.
    pub fn from_config(config: &OcrConfig) -> Option<Self> {
        let provider_name = config.vision_provider.as_deref()?.trim();
        let api_key = config.vision_key.as_deref().and_then(resolve_env_var)?;
        if provider_name.is_empty() {
            return None;
        }
        let provider = match provider_name.parse::<VisionProvider>() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Vision OCR disabled: {e}");
                return None;
            }
        };

        let endpoint = config
            .vision_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(provider.default_endpoint())
            .to_string();
        if endpoint.is_empty() {
            tracing::warn!("Vision OCR provider '{provider_name}' requires ocr.vision_endpoint");
            return None;
        }
        let model = config
            .vision_model
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(provider.default_model())
            .to_string();
        let prompt = config
            .vision_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OCR_PROMPT.to_string());

        tracing::info!("Vision OCR enabled: provider={provider_name}, model={model}");
        Some(Self {
            provider,
            endpoint,
            api_key,
            model,
            prompt,
            client: reqwest::Client::new(),
        })
    }

    /// Transcribe the image. `Ok(None)` means the model saw nothing legible.
    pub async fn transcribe(&self, bytes: &[u8]) -> Result<Option<String>, OcrError> {
        let image = ImageInput::from_bytes(bytes);
        let text = match self.provider {
            VisionProvider::Claude => self.call_claude(&image).await?,
            _ => self.call_chat(&image).await?,
        };
        Ok(text.and_then(|t| filter_sentinel(&t)))
    }

    async fn call_chat(&self, image: &ImageInput) -> Result<Option<String>, OcrError> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: 1024,
            temperature: 0.1,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ChatContent::Text { text: &self.prompt },
                    ChatContent::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_url(),
                        },
                    },
                ],
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.backend_err(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(self.backend_err(format!("HTTP {status}: {}", truncate(&text, 200))));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| self.backend_err(format!("unparseable response: {e}")))?;
        Ok(chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content))
    }

    async fn call_claude(&self, image: &ImageInput) -> Result<Option<String>, OcrError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: 1024,
            messages: vec![ClaudeMessage {
                role: "user",
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            source_type: "base64",
                            media_type: image.media_type.clone(),
                            data: image.data.clone(),
                        },
                    },
                    ContentBlock::Text { text: &self.prompt },
                ],
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.backend_err(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(self.backend_err(format!("HTTP {status}: {}", truncate(&text, 200))));
        }

        let messages: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| self.backend_err(format!("unparseable response: {e}")))?;
        Ok(messages
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .find_map(|block| block.text.filter(|t| !t.trim().is_empty())))
    }

    fn backend_err(&self, message: String) -> OcrError {
        OcrError::Backend {
            backend: format!("vision ({:?})", self.provider),
            message,
        }
    }
}

/// Trim a reply and drop it if it is one of the "nothing found" sentinels.
pub fn filter_sentinel(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || EMPTY_SENTINELS.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_input_sniffs_png() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let input = ImageInput::from_bytes(&png);
        assert_eq!(input.media_type, "image/png");
        assert!(input.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_image_input_sniffs_jpeg_and_defaults_to_png() {
        assert_eq!(ImageInput::from_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]).media_type, "image/jpeg");
        assert_eq!(ImageInput::from_bytes(b"????").media_type, "image/png");
    }

    #[test]
    fn test_filter_sentinel() {
        assert_eq!(filter_sentinel("  [空] "), None);
        assert_eq!(filter_sentinel("[empty]"), None);
        assert_eq!(filter_sentinel(""), None);
        assert_eq!(filter_sentinel(" $x^2$ "), Some("$x^2$".to_string()));
    }

    #[test]
    fn test_from_config_requires_provider_and_key() {
        let mut config = OcrConfig::default();
        assert!(VisionOcr::from_config(&config).is_none());

        config.vision_provider = Some("qwen".into());
        assert!(VisionOcr::from_config(&config).is_none());

        config.vision_key = Some("sk-test".into());
        let ocr = VisionOcr::from_config(&config).unwrap();
        assert_eq!(ocr.model, "qwen-vl-plus");
        assert!(ocr.endpoint.contains("dashscope"));
        assert_eq!(ocr.prompt, DEFAULT_OCR_PROMPT);
    }

    #[test]
    fn test_openai_compatible_requires_endpoint() {
        let config = OcrConfig {
            vision_provider: Some("openai_compatible".into()),
            vision_key: Some("sk-test".into()),
            ..OcrConfig::default()
        };
        assert!(VisionOcr::from_config(&config).is_none());

        let config = OcrConfig {
            vision_endpoint: Some("http://localhost:8000/v1/chat/completions".into()),
            ..config
        };
        assert!(VisionOcr::from_config(&config).is_some());
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("Claude".parse::<VisionProvider>(), Ok(VisionProvider::Claude));
        assert!("mystery".parse::<VisionProvider>().is_err());
    }
}
