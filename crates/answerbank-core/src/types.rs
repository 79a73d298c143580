//! Core data types shared by the engine and every provider.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Kind of question as reported by the platform scraper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Single,
    Multiple,
    Completion,
    Judgement,
    #[serde(rename = "shortanswer")]
    ShortAnswer,
    #[default]
    #[serde(other)]
    Unknown,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Single => "single",
            QuestionType::Multiple => "multiple",
            QuestionType::Completion => "completion",
            QuestionType::Judgement => "judgement",
            QuestionType::ShortAnswer => "shortanswer",
            QuestionType::Unknown => "unknown",
        }
    }

    /// Whether the question is answered by picking among listed options.
    pub fn is_choice(&self) -> bool {
        matches!(self, QuestionType::Single | QuestionType::Multiple)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = std::convert::Infallible;

    /// Unrecognized names map to `Unknown` rather than failing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "single" => QuestionType::Single,
            "multiple" => QuestionType::Multiple,
            "completion" => QuestionType::Completion,
            "judgement" => QuestionType::Judgement,
            "shortanswer" => QuestionType::ShortAnswer,
            _ => QuestionType::Unknown,
        })
    }
}

/// A single question handed to the engine.
///
/// The engine rewrites `title` once, in place, before any provider sees it
/// (index/score stripping and image substitution). Everything else is
/// read-only.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuestionInfo {
    /// Platform question identifier
    #[serde(default)]
    pub id: String,

    /// Question text; may embed `<img>` tags
    pub title: String,

    /// Declared question type
    #[serde(rename = "type", default)]
    pub kind: QuestionType,

    /// Choice texts in display order, usually prefixed with a label letter
    #[serde(default)]
    pub options: Vec<String>,
}

impl QuestionInfo {
    pub fn new(title: impl Into<String>, kind: QuestionType) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            kind,
            options: Vec::new(),
        }
    }

    /// Attach choice texts.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Non-empty option lines. A single option containing newlines is split.
    pub fn option_lines(&self) -> Vec<String> {
        self.options
            .iter()
            .flat_map(|opt| opt.lines())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    }

    /// Option lines with their leading label letter (`A.`, `B、`, `C,`) removed.
    pub fn cleaned_options(&self) -> Vec<String> {
        self.option_lines()
            .iter()
            .map(|opt| clean_option_prefix(opt))
            .collect()
    }
}

static OPTION_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]\.?,?、?\s*").expect("static regex"));

/// Strip a leading choice label such as `A.`, `b、` or `C ` from an option.
pub fn clean_option_prefix(option: &str) -> String {
    OPTION_PREFIX.replace(option, "").trim().to_string()
}

/// Join answer parts into the engine's single answer string.
///
/// Returns `None` when nothing but whitespace remains, which callers treat
/// as "no answer".
pub fn join_answers<I, S>(parts: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = parts
        .into_iter()
        .map(|p| p.as_ref().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Last five characters of a credential, for log lines.
pub fn token_suffix(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let start = chars.len().saturating_sub(5);
    chars[start..].iter().collect()
}
