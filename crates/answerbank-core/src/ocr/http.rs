//! Generic HTTP OCR service.
//!
//! Posts the raw image as a multipart upload and reads the recognized text
//! from the first non-empty field among `latex`, `text`, `result`, `data`.

use crate::error::OcrError;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const RESULT_FIELDS: &[&str] = &["latex", "text", "result", "data"];

#[derive(Debug, Clone)]
pub struct HttpOcr {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpOcr {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Recognize text in `bytes`. `Ok(None)` when the service found nothing.
    pub async fn recognize(&self, bytes: &[u8]) -> Result<Option<String>, OcrError> {
        let backend_err = |message: String| OcrError::Backend {
            backend: "HTTP".to_string(),
            message,
        };

        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name("question.png")
            .mime_str("image/png")
            .map_err(|e| backend_err(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| backend_err(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(backend_err(format!("HTTP {status}")));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| backend_err(format!("unparseable response: {e}")))?;
        Ok(extract_text(&body))
    }
}

/// First non-empty string among the known result fields.
pub fn extract_text(body: &Value) -> Option<String> {
    RESULT_FIELDS.iter().find_map(|field| {
        body.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}
