//! OCR fallback chain for question images.
//!
//! Backends are tried in order, stopping at the first that produces text:
//!
//! 1. External vision model (when provider and key are configured)
//! 2. Local engine (when enabled and no vision model is configured): ONNX
//!    models from `local_model_dir`, else the `local_command` bridge
//! 3. Generic HTTP OCR service (when an endpoint is configured)
//!
//! Every failure degrades to empty text; the caller substitutes a placeholder.

mod fetch;
mod http;
mod local;
mod onnx;
mod preprocess;
mod vision;

pub use fetch::{ImageFetcher, SessionContext};
pub use http::HttpOcr;
pub use local::{
    CommandEngineFactory, Device, EngineFactory, LocalOcr, OcrEngineHandle, RecognitionEngine,
};
pub use onnx::OnnxEngineFactory;
pub use preprocess::{prepare, Variant};
pub use vision::{ImageInput, VisionOcr, VisionProvider, DEFAULT_OCR_PROMPT};

use crate::config::OcrConfig;
use std::sync::Arc;

/// Ordered set of configured OCR backends plus the image downloader.
#[derive(Debug)]
pub struct OcrChain {
    fetcher: ImageFetcher,
    vision: Option<VisionOcr>,
    local: Option<LocalOcr>,
    http: Option<HttpOcr>,
}

impl OcrChain {
    /// Build every backend the configuration enables.
    pub fn from_config(config: &OcrConfig) -> Self {
        let local = if config.local_enabled {
            local_factory(config).map(|factory| {
                let device = config.local_device.parse().unwrap_or(Device::Gpu);
                LocalOcr::new(Arc::new(OcrEngineHandle::new(factory, device)))
            })
        } else {
            None
        };

        let http = config
            .http_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(HttpOcr::new);

        Self {
            fetcher: ImageFetcher::new(config),
            vision: VisionOcr::from_config(config),
            local,
            http,
        }
    }

    /// Whether any backend can run.
    pub fn is_enabled(&self) -> bool {
        self.vision.is_some() || self.local.is_some() || self.http.is_some()
    }

    pub fn set_session(&self, session: SessionContext) {
        self.fetcher.set_session(session);
    }

    pub fn is_platform_image(&self, url: &str) -> bool {
        self.fetcher.is_platform_image(url)
    }

    /// Transcribe the image at `url`, or return an empty string.
    pub async fn image_to_text(&self, url: &str) -> String {
        if !self.is_enabled() {
            return String::new();
        }

        let bytes = match self.fetcher.fetch(url).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                tracing::warn!("Downloaded empty image from {url}");
                return String::new();
            }
            Err(e) => {
                tracing::warn!("{e}");
                return String::new();
            }
        };

        if let Some(vision) = &self.vision {
            match vision.transcribe(&bytes).await {
                Ok(Some(text)) => return text,
                Ok(None) => tracing::debug!("Vision OCR found no text"),
                Err(e) => tracing::warn!("{e}"),
            }
        } else if let Some(local) = &self.local {
            if let Some(text) = local.recognize(&bytes).await {
                return text;
            }
            tracing::debug!("Local OCR found no text");
        }

        if let Some(http) = &self.http {
            match http.recognize(&bytes).await {
                Ok(Some(text)) => return text,
                Ok(None) => tracing::debug!("HTTP OCR found no text"),
                Err(e) => tracing::warn!("{e}"),
            }
        }

        String::new()
    }
}

/// ONNX models when a model directory is set, else the command bridge.
fn local_factory(config: &OcrConfig) -> Option<Box<dyn EngineFactory>> {
    if let Some(dir) = config.model_dir() {
        match OnnxEngineFactory::from_dir(&dir) {
            Ok(factory) => return Some(Box::new(factory)),
            Err(e) => tracing::warn!("ONNX OCR unavailable: {e}"),
        }
    }
    match config.local_command.as_deref().map(CommandEngineFactory::parse) {
        Some(Ok(factory)) => Some(Box::new(factory)),
        Some(Err(e)) => {
            tracing::warn!("Local OCR disabled: {e}");
            None
        }
        None => {
            tracing::warn!(
                "Local OCR enabled but neither ocr.local_model_dir nor ocr.local_command is usable"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chain_is_disabled() {
        let chain = OcrChain::from_config(&OcrConfig::default());
        assert!(!chain.is_enabled());
    }

    #[test]
    fn test_local_without_command_stays_disabled() {
        let config = OcrConfig {
            local_enabled: true,
            ..OcrConfig::default()
        };
        assert!(!OcrChain::from_config(&config).is_enabled());
    }

    #[test]
    fn test_local_engine_prefers_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OcrConfig {
            local_enabled: true,
            local_model_dir: Some(dir.path().to_path_buf()),
            ..OcrConfig::default()
        };
        // Incomplete model directory and no command: nothing to run.
        assert!(!OcrChain::from_config(&config).is_enabled());

        config.local_command = Some("paddleocr --image_dir {image}".into());
        assert!(OcrChain::from_config(&config).is_enabled());

        for name in ["det.onnx", "rec.onnx"] {
            std::fs::write(dir.path().join(name), b"onnx").unwrap();
        }
        std::fs::write(dir.path().join("dict.txt"), "a\n").unwrap();
        config.local_command = None;
        assert!(OcrChain::from_config(&config).is_enabled());
    }

    #[test]
    fn test_http_endpoint_enables_chain() {
        let config = OcrConfig {
            http_endpoint: Some("http://127.0.0.1:8502/ocr".into()),
            ..OcrConfig::default()
        };
        assert!(OcrChain::from_config(&config).is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_chain_returns_empty_without_download() {
        let chain = OcrChain::from_config(&OcrConfig::default());
        assert_eq!(chain.image_to_text("https://p.ananas.chaoxing.com/x.png").await, "");
    }
}
