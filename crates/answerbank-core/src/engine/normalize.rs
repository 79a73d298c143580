//! Title normalization and image substitution.

use crate::ocr::OcrChain;
use regex::Regex;
use std::sync::LazyLock;

static SCORE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[（(]\d+(?:\.\d+)?分[）)]$").expect("static regex"));

static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]*src=["'](.*?)["'][^>]*>"#).expect("static regex")
});

/// Substituted when an image could not be transcribed.
pub const IMAGE_PLACEHOLDER: &str = "[formula image]";

/// Strip a leading question index and a trailing score annotation.
///
/// `"12计算机的核心是（2.0分）"` becomes `"计算机的核心是"`. A title made
/// only of digits keeps its last one, so `"123（2.0分）"` becomes `"3"`.
pub fn normalize_title(title: &str) -> String {
    let title = SCORE_SUFFIX.replace(title, "");
    let digits = title.len() - title.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let cut = if digits == title.len() {
        digits.saturating_sub(1)
    } else {
        digits
    };
    title[cut..].to_string()
}

/// Whether the title still embeds an `<img>` tag.
pub fn has_image(title: &str) -> bool {
    IMG_TAG.is_match(title)
}

/// Replace every `<img>` tag with OCR text or the placeholder.
///
/// Only images from the platform host are downloaded; other tags are
/// replaced without OCR. No raw tag survives.
pub async fn substitute_images(title: &str, ocr: &OcrChain) -> String {
    if !has_image(title) {
        return title.to_string();
    }

    let mut out = String::with_capacity(title.len());
    let mut last = 0;
    for caps in IMG_TAG.captures_iter(title) {
        let (Some(tag), Some(src)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&title[last..tag.start()]);
        let src = src.as_str();
        let text = if ocr.is_platform_image(src) {
            ocr.image_to_text(src).await
        } else {
            tracing::debug!("Skipping OCR for foreign image {src}");
            String::new()
        };
        let text = text.trim();
        if text.is_empty() {
            out.push_str(IMAGE_PLACEHOLDER);
        } else {
            out.push_str(&format!("[formula: {text}]"));
        }
        last = tag.end();
    }
    out.push_str(&title[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrConfig;

    #[test]
    fn test_strip_index_and_score() {
        assert_eq!(normalize_title("12计算机的核心是（2.0分）"), "计算机的核心是");
        assert_eq!(normalize_title("下列说法正确的是(5分)"), "下列说法正确的是");
        assert_eq!(normalize_title("没有编号的题目"), "没有编号的题目");
        // The score must be the suffix.
        assert_eq!(normalize_title("（2.0分）之后还有字"), "（2.0分）之后还有字");
    }

    #[test]
    fn test_digits_only_title_keeps_last_digit() {
        assert_eq!(normalize_title("123（2.0分）"), "3");
        assert_eq!(normalize_title("7"), "7");
        assert_eq!(normalize_title("12计算机"), "计算机");
        assert_eq!(normalize_title(""), "");
    }

    #[tokio::test]
    async fn test_images_replaced_with_placeholder_when_ocr_disabled() {
        let chain = OcrChain::from_config(&OcrConfig::default());
        let title = r#"求值<img src="https://p.ananas.chaoxing.com/star3/origin/abc.png" width="40">的结果"#;
        let out = substitute_images(title, &chain).await;
        assert_eq!(out, "求值[formula image]的结果");
        assert!(!out.contains("<img"));
    }

    #[tokio::test]
    async fn test_foreign_and_single_quoted_images() {
        let chain = OcrChain::from_config(&OcrConfig::default());
        let title = "<IMG SRC='https://example.com/a.png'>与<img src=\"https://p.ananas.chaoxing.com/b.png\"/>";
        let out = substitute_images(title, &chain).await;
        assert_eq!(out, "[formula image]与[formula image]");
    }

    #[tokio::test]
    async fn test_title_without_images_is_untouched() {
        let chain = OcrChain::from_config(&OcrConfig::default());
        assert_eq!(substitute_images("1+1=?", &chain).await, "1+1=?");
    }
}
