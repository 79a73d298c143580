//! Question image download using the learner's authenticated session.
//!
//! The image host answers 403 to anonymous requests, so downloads carry the
//! session cookies supplied by the caller plus a platform referer.

use crate::config::OcrConfig;
use crate::error::OcrError;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Cookie state of the logged-in platform session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    cookies: Vec<(String, String)>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `name=value` pairs.
    pub fn from_cookies<I, K, V>(cookies: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cookies: cookies
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a `Cookie:` header value such as `a=1; b=2`.
    pub fn from_cookie_header(header: &str) -> Self {
        Self {
            cookies: header
                .split(';')
                .filter_map(|pair| {
                    let (name, value) = pair.split_once('=')?;
                    let name = name.trim();
                    (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
                })
                .collect(),
        }
    }

    /// Render as a `Cookie:` header value, or `None` when there are no cookies.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Downloads question images.
#[derive(Debug)]
pub struct ImageFetcher {
    client: reqwest::Client,
    session: RwLock<SessionContext>,
    image_host: String,
    referer: String,
    user_agent: String,
    timeout: Duration,
}

impl ImageFetcher {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            session: RwLock::new(SessionContext::default()),
            image_host: config.image_host.clone(),
            referer: config.referer.clone(),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }

    /// Replace the session cookies used for subsequent downloads.
    pub fn set_session(&self, session: SessionContext) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Whether `url` points at the platform's question-image host.
    pub fn is_platform_image(&self, url: &str) -> bool {
        url.contains(&self.image_host)
    }

    /// Download the image bytes behind `url`.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, OcrError> {
        let cookie = self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cookie_header();

        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .timeout(self.timeout);
        if let Some(cookie) = cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        if self.is_platform_image(url) {
            request = request.header(reqwest::header::REFERER, &self.referer);
        }

        let download_err = |message: String| OcrError::Download {
            url: url.to_string(),
            message,
        };

        let resp = request.send().await.map_err(|e| download_err(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(download_err(format!("HTTP {status}")));
        }
        let bytes = resp.bytes().await.map_err(|e| download_err(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header_roundtrip() {
        let session = SessionContext::from_cookie_header("uf=abc; _uid=42 ;; bad; vc3=x=y");
        assert_eq!(
            session.cookie_header().as_deref(),
            Some("uf=abc; _uid=42; vc3=x=y")
        );
    }

    #[test]
    fn test_empty_session_has_no_header() {
        assert_eq!(SessionContext::new().cookie_header(), None);
    }

    #[test]
    fn test_platform_image_detection() {
        let fetcher = ImageFetcher::new(&OcrConfig::default());
        assert!(fetcher.is_platform_image("https://p.ananas.chaoxing.com/star3/origin/a.png"));
        assert!(!fetcher.is_platform_image("https://example.com/a.png"));
    }
}
