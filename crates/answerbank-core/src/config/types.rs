//! Typed configuration sections with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Location of the flat title→answer cache file
    pub cache_path: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("cache.json"),
        }
    }
}

/// OCR fallback chain settings.
///
/// Each backend is optional; with none configured, embedded question images
/// are replaced by a placeholder without any download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Host whose images are question content (matched as a substring of the src)
    pub image_host: String,

    /// Referer sent when downloading from `image_host`
    pub referer: String,

    /// User-Agent for image downloads
    pub user_agent: String,

    /// Image download timeout in seconds
    pub download_timeout_secs: u64,

    /// Vision model provider: openai, claude, qwen, siliconflow, openai_compatible
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_provider: Option<String>,

    /// Vision API key (supports ${ENV_VAR} syntax)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_key: Option<String>,

    /// Overrides the provider's default endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_endpoint: Option<String>,

    /// Overrides the provider's default model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,

    /// Overrides the built-in transcription instruction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_prompt: Option<String>,

    /// Enable the local OCR engine
    pub local_enabled: bool,

    /// Directory holding `det.onnx`, `rec.onnx` and `dict.txt` for the ONNX engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_model_dir: Option<PathBuf>,

    /// Local OCR command line, used when no model directory is set;
    /// `{image}` and `{device}` are substituted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_command: Option<String>,

    /// Preferred local device: "gpu" or "cpu"
    pub local_device: String,

    /// Generic HTTP OCR service receiving the raw image as multipart upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            image_host: "p.ananas.chaoxing.com".to_string(),
            referer: "https://mooc1.chaoxing.com/".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            download_timeout_secs: 8,
            vision_provider: None,
            vision_key: None,
            vision_endpoint: None,
            vision_model: None,
            vision_prompt: None,
            local_enabled: false,
            local_model_dir: None,
            local_command: None,
            local_device: "gpu".to_string(),
            http_endpoint: None,
        }
    }
}

impl OcrConfig {
    /// Resolved ONNX model directory (with ~ expansion).
    pub fn model_dir(&self) -> Option<PathBuf> {
        let dir = self.local_model_dir.as_ref()?;
        let expanded = shellexpand::tilde(&dir.to_string_lossy()).into_owned();
        Some(PathBuf::from(expanded))
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dir_expands_tilde() {
        let mut ocr = OcrConfig::default();
        assert_eq!(ocr.model_dir(), None);

        ocr.local_model_dir = Some(PathBuf::from("~/models/ppocr"));
        let dir = ocr.model_dir().unwrap();
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert!(dir.ends_with("models/ppocr"));
    }

    #[test]
    fn test_local_keys_deserialize() {
        let ocr: OcrConfig = toml::from_str(
            "local_enabled = true\nlocal_model_dir = \"/opt/ppocr\"\nlocal_device = \"cpu\"\n",
        )
        .unwrap();
        assert!(ocr.local_enabled);
        assert_eq!(ocr.model_dir(), Some(PathBuf::from("/opt/ppocr")));
        assert_eq!(ocr.local_command, None);
    }
}
